//! End-to-end runs of the consumer over the in-memory log and store

use fraud_stream_consumer::consumer::{ConsumerSettings, StepOutcome, TransactionConsumer};
use fraud_stream_consumer::error::ScoringError;
use fraud_stream_consumer::feature_extractor::FeatureVector;
use fraud_stream_consumer::models::{Classifier, FixedClassifier, ScoringAdapter};
use fraud_stream_consumer::router::OutcomeRouter;
use fraud_stream_consumer::store::{CursorCheckpoint, MemoryCheckpoint, MemoryCounter, MemoryStore};
use fraud_stream_consumer::stream::{MemoryLog, TransactionLog};
use fraud_stream_consumer::tokens::{SequenceAllocator, TokenGenerator};
use fraud_stream_consumer::types::{Partition, RawRecord, StreamPosition};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Flags any transaction above 1000 as fraud
struct AmountThreshold;

impl Classifier for AmountThreshold {
    fn predict(&self, features: &FeatureVector) -> Result<i64, ScoringError> {
        Ok(i64::from(features.as_slice()[0] > 1000.0))
    }

    fn predict_confidence(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        Ok(if features.as_slice()[0] > 1000.0 { 0.9 } else { 0.1 })
    }
}

fn transaction(amount: &str) -> RawRecord {
    [
        ("Amount", amount),
        ("Active_Loans", "2"),
        ("Session_Time", "30"),
        ("Transactions_Per_Unit_Time", "4"),
        ("Velocity", "1.2"),
        ("High_Value_Transaction", "1"),
        ("Large_Transaction_Freq", "0"),
        ("Payment_Method", "0"),
        ("Device_Type", "1"),
    ]
    .into_iter()
    .collect()
}

fn settings() -> ConsumerSettings {
    ConsumerSettings {
        stream_key: "transactions".into(),
        reconnect_backoff: Duration::from_millis(1),
        retry_delay: Duration::ZERO,
        ..ConsumerSettings::default()
    }
}

fn consumer(
    log: &MemoryLog,
    classifier: impl Classifier + 'static,
    store: &Arc<MemoryStore>,
    counter: &Arc<MemoryCounter>,
) -> TransactionConsumer<MemoryLog> {
    let router = OutcomeRouter::new(
        SequenceAllocator::new(counter.clone(), "fraud_token"),
        TokenGenerator::new(),
    );
    TransactionConsumer::new(
        log.clone(),
        ScoringAdapter::new(Arc::new(classifier)),
        router,
        store.clone(),
        settings(),
        StreamPosition::BEGINNING,
    )
}

#[tokio::test]
async fn test_fraud_verdict_lands_in_fraud_partition() {
    let log = MemoryLog::new();
    let store = Arc::new(MemoryStore::new());
    let counter = Arc::new(MemoryCounter::new());
    let mut consumer = consumer(&log, FixedClassifier::new(1, 0.95), &store, &counter);
    let position = log.append(transaction("500"));

    let outcome = consumer.step(&CancellationToken::new()).await;
    assert_eq!(
        outcome,
        StepOutcome::Persisted {
            position,
            partition: Partition::Fraud
        }
    );

    let stored = store.records(Partition::Fraud);
    assert_eq!(stored.len(), 1);
    assert!(store.records(Partition::Legit).is_empty());

    let doc = serde_json::to_value(&stored[0]).unwrap();
    assert_eq!(doc["fraud_prediction"], json!(1));
    assert_eq!(doc["fraud_probability"], json!(0.95));
    assert_eq!(doc["fraud_token"], json!(1));
    assert_eq!(doc["stream_id"], json!(position.to_string()));
    assert_eq!(doc["Amount"], json!("500"));
    assert!(doc.get("legit_token").is_none());
    assert!(doc["processed_timestamp"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_legit_verdict_lands_in_legit_partition() {
    let log = MemoryLog::new();
    let store = Arc::new(MemoryStore::new());
    let counter = Arc::new(MemoryCounter::new());
    let mut consumer = consumer(&log, FixedClassifier::new(0, 0.10), &store, &counter);
    log.append(transaction("500"));

    let outcome = consumer.step(&CancellationToken::new()).await;
    assert!(matches!(
        outcome,
        StepOutcome::Persisted {
            partition: Partition::Legit,
            ..
        }
    ));

    let stored = store.records(Partition::Legit);
    assert_eq!(stored.len(), 1);
    assert!(store.records(Partition::Fraud).is_empty());

    let doc = serde_json::to_value(&stored[0]).unwrap();
    assert_eq!(doc["fraud_prediction"], json!(0));
    assert_eq!(doc["fraud_probability"], json!(0.10));
    assert!(doc.get("fraud_token").is_none());
    let token = doc["legit_token"].as_str().unwrap();
    assert_eq!(token.len(), 32);
    // Legit verdicts never touch the sequence
    assert_eq!(counter.value("fraud_token"), None);
}

#[tokio::test]
async fn test_run_processes_stream_until_cancelled() {
    let log = MemoryLog::new();
    let store = Arc::new(MemoryStore::new());
    let counter = Arc::new(MemoryCounter::new());
    let checkpoint = Arc::new(MemoryCheckpoint::new());
    let mut consumer =
        consumer(&log, AmountThreshold, &store, &counter).with_checkpoint(checkpoint.clone());

    let amounts = ["500", "2500", "abc", "40", "9000", "1200"];
    let mut last = StreamPosition::BEGINNING;
    for amount in amounts {
        last = log.append(transaction(amount));
    }

    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { consumer.run(cancel).await }
    });

    // Wait until the last entry has been handled, then shut down
    for _ in 0..200 {
        if store.len(Partition::Fraud) + store.len(Partition::Legit) == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    let report = run.await.unwrap();

    assert_eq!(report.persisted, 5);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.resume_position, last);

    // Fraud tokens follow stream order without gaps
    let tokens: Vec<i64> = store
        .records(Partition::Fraud)
        .iter()
        .filter_map(|r| r.fraud_token())
        .collect();
    assert_eq!(tokens, vec![1, 2, 3]);
    assert_eq!(store.len(Partition::Legit), 2);

    assert_eq!(checkpoint.load("transactions").await.unwrap(), Some(last));
}

#[tokio::test]
async fn test_unchanged_cursor_redelivers_after_store_outage() {
    let log = MemoryLog::new();
    let store = Arc::new(MemoryStore::new());
    let counter = Arc::new(MemoryCounter::new());
    let mut consumer = consumer(&log, AmountThreshold, &store, &counter);
    let first = log.append(transaction("5000"));
    let second = log.append(transaction("10"));
    store.fail_next_inserts(3);

    let cancel = CancellationToken::new();
    for _ in 0..3 {
        let outcome = consumer.step(&cancel).await;
        assert!(matches!(outcome, StepOutcome::Deferred { position, .. } if position == first));
        assert_eq!(consumer.cursor(), StreamPosition::BEGINNING);

        let mut reader = log.clone();
        let entry = reader.read_after(consumer.cursor()).await.unwrap().unwrap();
        assert_eq!(entry.position, first);
    }

    assert!(matches!(
        consumer.step(&cancel).await,
        StepOutcome::Persisted { position, .. } if position == first
    ));
    assert!(matches!(
        consumer.step(&cancel).await,
        StepOutcome::Persisted { position, .. } if position == second
    ));

    // The outage did not burn sequence values
    assert_eq!(store.records(Partition::Fraud)[0].fraud_token(), Some(1));
    assert_eq!(counter.value("fraud_token"), Some(1));
}

#[tokio::test]
async fn test_restart_resumes_after_last_advanced_position() {
    let log = MemoryLog::new();
    let store = Arc::new(MemoryStore::new());
    let counter = Arc::new(MemoryCounter::new());
    let cancel = CancellationToken::new();

    let first = log.append(transaction("100"));
    let mut consumer_a = consumer(&log, AmountThreshold, &store, &counter);
    consumer_a.step(&cancel).await;
    assert_eq!(consumer_a.cursor(), first);
    drop(consumer_a);

    let second = log.append(transaction("2000"));
    let router = OutcomeRouter::new(
        SequenceAllocator::new(counter.clone(), "fraud_token"),
        TokenGenerator::new(),
    );
    let mut consumer_b = TransactionConsumer::new(
        log.clone(),
        ScoringAdapter::new(Arc::new(AmountThreshold)),
        router,
        store.clone(),
        settings(),
        first,
    );

    let outcome = consumer_b.step(&cancel).await;
    assert!(matches!(outcome, StepOutcome::Persisted { position, .. } if position == second));
    assert_eq!(store.len(Partition::Legit), 1);
    assert_eq!(store.len(Partition::Fraud), 1);
}
