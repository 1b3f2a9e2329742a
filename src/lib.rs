//! Fraud Stream Consumer Library
//!
//! A resumable, at-least-once consumer that reads transactions from a Redis
//! stream, scores each with a binary fraud classifier, and stores the result
//! in a fraud or legit partition with a distinguishing token.

pub mod config;
pub mod consumer;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod router;
pub mod store;
pub mod stream;
pub mod tokens;
pub mod types;

pub use config::AppConfig;
pub use consumer::{RunReport, StepOutcome, TransactionConsumer};
pub use feature_extractor::FeatureExtractor;
pub use models::{Classifier, ScoringAdapter};
pub use router::OutcomeRouter;
pub use tokens::{SequenceAllocator, TokenGenerator};
pub use types::{EnrichedRecord, Partition, RawRecord, StreamPosition, Verdict};
