//! Record validation and feature extraction for model inference.
//!
//! Turns a raw stream record into the fixed-order feature vector the
//! classifier was trained on. Every value on the stream is a string, so both
//! field presence and numeric convertibility are checked here, before scoring.

use crate::error::{NonNumericField, ValidationError};
use crate::types::record::RawRecord;

/// Number of features the classifier expects
pub const FEATURE_COUNT: usize = 9;

/// Feature columns in the order used during training
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "Amount",
    "Active_Loans",
    "Session_Time",
    "Transactions_Per_Unit_Time",
    "Velocity",
    "High_Value_Transaction",
    "Large_Transaction_Freq",
    "Payment_Method",
    "Device_Type",
];

/// Model input for a single record, in [`FEATURE_COLUMNS`] order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f32; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f32; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Feature extractor that validates records and builds feature vectors.
pub struct FeatureExtractor {
    columns: &'static [&'static str; FEATURE_COUNT],
}

impl FeatureExtractor {
    /// Create a new feature extractor over the training columns.
    pub fn new() -> Self {
        Self {
            columns: &FEATURE_COLUMNS,
        }
    }

    /// Validate a record and extract its features.
    ///
    /// Presence of every column is checked first so that all missing fields
    /// are reported together. Only then are values parsed; any value that is
    /// not a finite number fails the record, and every such field is reported.
    pub fn extract(&self, record: &RawRecord) -> Result<FeatureVector, ValidationError> {
        let missing: Vec<String> = self
            .columns
            .iter()
            .filter(|column| record.get(column).is_none())
            .map(|column| column.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let mut values = [0.0_f32; FEATURE_COUNT];
        let mut non_numeric = Vec::new();
        let mut out_of_range = Vec::new();
        for (slot, column) in values.iter_mut().zip(self.columns.iter()) {
            let raw = record.get(column).unwrap_or_default();
            let invalid = || NonNumericField {
                field: column.to_string(),
                value: raw.to_string(),
            };
            match parse_feature(raw) {
                Feature::Value(value) => *slot = value,
                Feature::NonNumeric => non_numeric.push(invalid()),
                Feature::OutOfRange => out_of_range.push(invalid()),
            }
        }

        if !non_numeric.is_empty() {
            Err(ValidationError::NonNumeric(non_numeric))
        } else if !out_of_range.is_empty() {
            Err(ValidationError::OutOfRange(out_of_range))
        } else {
            Ok(FeatureVector(values))
        }
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        self.columns.len()
    }

    /// Get feature names in model input order.
    pub fn feature_names(&self) -> &[&'static str] {
        self.columns
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

enum Feature {
    Value(f32),
    NonNumeric,
    OutOfRange,
}

/// Parse at full precision, then narrow to the model's input type
fn parse_feature(raw: &str) -> Feature {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => {
            let narrowed = value as f32;
            if narrowed.is_finite() {
                Feature::Value(narrowed)
            } else {
                Feature::OutOfRange
            }
        }
        _ => Feature::NonNumeric,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> RawRecord {
        [
            ("Amount", "500"),
            ("Active_Loans", "2"),
            ("Session_Time", "30"),
            ("Transactions_Per_Unit_Time", "4"),
            ("Velocity", "1.2"),
            ("High_Value_Transaction", "1"),
            ("Large_Transaction_Freq", "0"),
            ("Payment_Method", "0"),
            ("Device_Type", "1"),
            ("Customer_ID", "C-1001"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_feature_extraction() {
        let extractor = FeatureExtractor::new();
        let features = extractor.extract(&sample_record()).unwrap();

        assert_eq!(
            features.as_slice(),
            &[500.0, 2.0, 30.0, 4.0, 1.2, 1.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_feature_count() {
        let extractor = FeatureExtractor::new();
        assert_eq!(extractor.feature_count(), 9);
        assert_eq!(extractor.feature_names()[4], "Velocity");
    }

    #[test]
    fn test_missing_single_field() {
        let mut record = sample_record();
        record.remove("Velocity");

        let err = FeatureExtractor::new().extract(&record).unwrap_err();
        assert_eq!(err, ValidationError::MissingFields(vec!["Velocity".into()]));
    }

    #[test]
    fn test_every_missing_field_reported_in_column_order() {
        let mut record = sample_record();
        record.remove("Device_Type");
        record.remove("Amount");
        record.remove("Velocity");
        // A non-numeric value does not mask the missing fields
        record.insert("Session_Time", "soon");

        let err = FeatureExtractor::new().extract(&record).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields(vec![
                "Amount".into(),
                "Velocity".into(),
                "Device_Type".into(),
            ])
        );
    }

    #[test]
    fn test_empty_record_reports_all_columns() {
        let err = FeatureExtractor::new().extract(&RawRecord::new()).unwrap_err();
        assert_eq!(err.fields(), FEATURE_COLUMNS.to_vec());
    }

    #[test]
    fn test_non_numeric_fails_whole_record() {
        let mut record = sample_record();
        record.insert("Amount", "five hundred");
        record.insert("Payment_Method", "NaN");

        let err = FeatureExtractor::new().extract(&record).unwrap_err();
        match err {
            ValidationError::NonNumeric(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].field, "Amount");
                assert_eq!(fields[0].value, "five hundred");
                assert_eq!(fields[1].field, "Payment_Method");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_values_beyond_f32_are_out_of_range() {
        let mut record = sample_record();
        record.insert("Amount", "1e39");
        record.insert("Velocity", "-4e38");

        let err = FeatureExtractor::new().extract(&record).unwrap_err();
        match &err {
            ValidationError::OutOfRange(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].field, "Amount");
                assert_eq!(fields[0].value, "1e39");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.fields(), vec!["Amount", "Velocity"]);
    }

    #[test]
    fn test_non_numeric_reported_before_out_of_range() {
        let mut record = sample_record();
        record.insert("Amount", "1e39");
        record.insert("Device_Type", "inf");

        let err = FeatureExtractor::new().extract(&record).unwrap_err();
        assert!(matches!(err, ValidationError::NonNumeric(ref f) if f[0].field == "Device_Type"));
    }

    #[test]
    fn test_whitespace_tolerated() {
        let mut record = sample_record();
        record.insert("Amount", " 12.5 ");

        let features = FeatureExtractor::new().extract(&record).unwrap();
        assert_eq!(features.as_slice()[0], 12.5);
    }
}
