//! Classification verdicts and the enriched records persisted for them

use crate::types::record::{RawRecord, StreamPosition};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Fraud,
    Legit,
}

impl Label {
    /// Class index as produced by the classifier (1 = fraud)
    pub fn class(&self) -> i32 {
        match self {
            Label::Fraud => 1,
            Label::Legit => 0,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Fraud => f.write_str("FRAUD"),
            Label::Legit => f.write_str("LEGIT"),
        }
    }
}

/// Scoring result for one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub label: Label,
    /// Calibrated probability of the positive (fraud) class, in [0, 1]
    pub confidence: f64,
}

impl Verdict {
    pub fn fraud(confidence: f64) -> Self {
        Self {
            label: Label::Fraud,
            confidence,
        }
    }

    pub fn legit(confidence: f64) -> Self {
        Self {
            label: Label::Legit,
            confidence,
        }
    }

    /// Confidence in the verdict that was actually reached
    pub fn verdict_confidence(&self) -> f64 {
        match self.label {
            Label::Fraud => self.confidence,
            Label::Legit => 1.0 - self.confidence,
        }
    }
}

/// Store partition a record is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Records classified as fraud
    Fraud,
    /// Records classified as legitimate
    Legit,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Fraud => f.write_str("fraud"),
            Partition::Legit => f.write_str("legit"),
        }
    }
}

/// The single identifier attached to an enriched record.
///
/// Flattened into the document as either `fraud_token` or `legit_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeToken {
    #[serde(rename = "fraud_token")]
    Fraud(i64),
    #[serde(rename = "legit_token")]
    Legit(String),
}

/// A raw record plus everything learned while processing it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    /// Original transaction fields
    #[serde(flatten)]
    pub fields: RawRecord,
    /// Stream position the record was read from
    pub stream_id: StreamPosition,
    /// Processing time as fractional seconds since the Unix epoch
    pub processed_timestamp: f64,
    /// Predicted class (1 = fraud)
    pub fraud_prediction: i32,
    /// Probability of the fraud class
    pub fraud_probability: f64,
    #[serde(flatten)]
    pub token: OutcomeToken,
}

impl EnrichedRecord {
    pub fn fraud_token(&self) -> Option<i64> {
        match self.token {
            OutcomeToken::Fraud(token) => Some(token),
            OutcomeToken::Legit(_) => None,
        }
    }

    pub fn legit_token(&self) -> Option<&str> {
        match &self.token {
            OutcomeToken::Legit(token) => Some(token),
            OutcomeToken::Fraud(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enriched(token: OutcomeToken) -> EnrichedRecord {
        EnrichedRecord {
            fields: [("Amount", "500")].into_iter().collect(),
            stream_id: StreamPosition::new(1, 0),
            processed_timestamp: 1_700_000_000.5,
            fraud_prediction: 1,
            fraud_probability: 0.9,
            token,
        }
    }

    #[test]
    fn test_fraud_token_flattens_into_document() {
        let value = serde_json::to_value(enriched(OutcomeToken::Fraud(7))).unwrap();
        assert_eq!(value["fraud_token"], 7);
        assert!(value.get("legit_token").is_none());
        assert_eq!(value["Amount"], "500");
        assert_eq!(value["stream_id"], "1-0");
    }

    #[test]
    fn test_legit_token_flattens_into_document() {
        let value = serde_json::to_value(enriched(OutcomeToken::Legit("ab".into()))).unwrap();
        assert_eq!(value["legit_token"], "ab");
        assert!(value.get("fraud_token").is_none());
    }

    #[test]
    fn test_verdict_confidence() {
        assert_eq!(Verdict::fraud(0.92).verdict_confidence(), 0.92);
        assert!((Verdict::legit(0.25).verdict_confidence() - 0.75).abs() < 1e-12);
    }
}
