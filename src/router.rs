//! Verdict dispatch: partition selection, token assignment and enrichment

use crate::error::StoreError;
use crate::tokens::{SequenceAllocator, TokenGenerator};
use crate::types::outcome::{EnrichedRecord, Label, OutcomeToken, Partition, Verdict};
use crate::types::record::{RawRecord, StreamPosition};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Keys the enriched document sets itself; producer values for them are dropped
pub const RESERVED_FIELDS: [&str; 7] = [
    "_id",
    "stream_id",
    "processed_timestamp",
    "fraud_prediction",
    "fraud_probability",
    "fraud_token",
    "legit_token",
];

/// An enriched record and the partition it belongs in
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedRecord {
    pub partition: Partition,
    pub record: EnrichedRecord,
}

/// Routes verdicts to partitions and attaches the matching identifier.
///
/// Fraud verdicts draw the next value of the shared sequence; legitimate
/// verdicts get a random token. There are no other outcomes.
#[derive(Clone)]
pub struct OutcomeRouter {
    allocator: SequenceAllocator,
    tokens: TokenGenerator,
}

impl OutcomeRouter {
    pub fn new(allocator: SequenceAllocator, tokens: TokenGenerator) -> Self {
        Self { allocator, tokens }
    }

    /// Build the enriched record for a scored transaction.
    ///
    /// Fails only when the fraud sequence cannot be advanced.
    pub async fn route(
        &self,
        verdict: Verdict,
        fields: &RawRecord,
        position: StreamPosition,
        processed_at: DateTime<Utc>,
    ) -> Result<RoutedRecord, StoreError> {
        let (partition, token) = match verdict.label {
            Label::Fraud => (
                Partition::Fraud,
                OutcomeToken::Fraud(self.allocator.next().await?),
            ),
            Label::Legit => (Partition::Legit, OutcomeToken::Legit(self.tokens.next())),
        };

        let record = EnrichedRecord {
            fields: strip_reserved(fields, position),
            stream_id: position,
            processed_timestamp: processed_at.timestamp_micros() as f64 / 1_000_000.0,
            fraud_prediction: verdict.label.class(),
            fraud_probability: verdict.confidence,
            token,
        };

        Ok(RoutedRecord { partition, record })
    }
}

/// Copy the producer's fields, leaving out keys the document owns
fn strip_reserved(fields: &RawRecord, position: StreamPosition) -> RawRecord {
    let (kept, dropped): (Vec<_>, Vec<_>) = fields
        .iter()
        .partition(|(name, _)| !RESERVED_FIELDS.contains(name));
    if !dropped.is_empty() {
        let names: Vec<&str> = dropped.iter().map(|(name, _)| *name).collect();
        warn!(stream_id = %position, fields = ?names, "Dropping reserved fields from transaction");
    }
    kept.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounter;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn router() -> (OutcomeRouter, Arc<MemoryCounter>) {
        let counter = Arc::new(MemoryCounter::new());
        let allocator = SequenceAllocator::new(counter.clone(), "fraud_token");
        (OutcomeRouter::new(allocator, TokenGenerator::new()), counter)
    }

    fn fields() -> RawRecord {
        [("Amount", "500"), ("Velocity", "1.2")].into_iter().collect()
    }

    #[tokio::test]
    async fn test_fraud_routes_to_fraud_partition() {
        let (router, counter) = router();
        let at = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();

        let routed = router
            .route(Verdict::fraud(0.92), &fields(), StreamPosition::new(7, 1), at)
            .await
            .unwrap();

        assert_eq!(routed.partition, Partition::Fraud);
        assert_eq!(routed.record.fraud_token(), Some(1));
        assert_eq!(routed.record.legit_token(), None);
        assert_eq!(routed.record.fraud_prediction, 1);
        assert_eq!(routed.record.fraud_probability, 0.92);
        assert_eq!(routed.record.stream_id, StreamPosition::new(7, 1));
        assert_eq!(routed.record.processed_timestamp, 1_700_000_000.5);
        assert_eq!(routed.record.fields, fields());
        assert_eq!(counter.value("fraud_token"), Some(1));
    }

    #[tokio::test]
    async fn test_legit_routes_to_legit_partition() {
        let (router, counter) = router();

        let routed = router
            .route(Verdict::legit(0.13), &fields(), StreamPosition::new(8, 0), Utc::now())
            .await
            .unwrap();

        assert_eq!(routed.partition, Partition::Legit);
        assert!(routed.record.legit_token().is_some());
        assert_eq!(routed.record.fraud_token(), None);
        assert_eq!(routed.record.fraud_prediction, 0);
        assert_eq!(routed.record.fraud_probability, 0.13);
        // Legit verdicts never touch the sequence
        assert_eq!(counter.value("fraud_token"), None);
    }

    #[tokio::test]
    async fn test_reserved_producer_fields_are_dropped() {
        let (router, _) = router();
        let mut raw = fields();
        raw.insert("legit_token", "deadbeef");
        raw.insert("_id", "x1");
        raw.insert("fraud_probability", "0.01");

        let routed = router
            .route(Verdict::fraud(0.92), &raw, StreamPosition::new(9, 0), Utc::now())
            .await
            .unwrap();

        assert_eq!(routed.record.fields, fields());
        let doc = serde_json::to_value(&routed.record).unwrap();
        assert_eq!(doc["fraud_token"], serde_json::json!(1));
        assert_eq!(doc["fraud_probability"], serde_json::json!(0.92));
        assert!(doc.get("legit_token").is_none());
        assert!(doc.get("_id").is_none());
    }

    #[tokio::test]
    async fn test_successive_fraud_tokens_increase() {
        let (router, _) = router();
        let mut tokens = Vec::new();
        for seq in 0..3 {
            let routed = router
                .route(Verdict::fraud(0.8), &fields(), StreamPosition::new(1, seq), Utc::now())
                .await
                .unwrap();
            tokens.extend(routed.record.fraud_token());
        }
        assert_eq!(tokens, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_counter_failure_fails_route() {
        let (router, counter) = router();
        counter.fail_next_increments(1);

        let result = router
            .route(Verdict::fraud(0.9), &fields(), StreamPosition::new(1, 0), Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
