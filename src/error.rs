//! Error types for each layer of the consumer.
//!
//! Per-record failures ([`ValidationError`], [`ScoringError`], [`StoreError`])
//! are recovered inside the loop and [`LogError`] drives reconnection, so none
//! of them stop [`crate::consumer::TransactionConsumer::run`].

use thiserror::Error;

/// A raw record could not be turned into a feature vector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// One or more required feature fields are absent, in column order.
    #[error("missing features: {0:?}")]
    MissingFields(Vec<String>),

    /// Every required field is present but some are not finite numbers.
    #[error("non-numeric features: {0:?}")]
    NonNumeric(Vec<NonNumericField>),

    /// Every value is numeric but some do not fit the model's `f32` input.
    #[error("features out of range: {0:?}")]
    OutOfRange(Vec<NonNumericField>),
}

impl ValidationError {
    /// Names of the offending fields, in column order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            ValidationError::MissingFields(names) => names.iter().map(String::as_str).collect(),
            ValidationError::NonNumeric(fields) | ValidationError::OutOfRange(fields) => {
                fields.iter().map(|f| f.field.as_str()).collect()
            }
        }
    }
}

/// A feature field whose value failed numeric conversion or range checks.
#[derive(Debug, Clone, PartialEq)]
pub struct NonNumericField {
    pub field: String,
    pub value: String,
}

/// The classifier failed or produced an output outside its contract.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("classifier returned label {0}, expected 0 or 1")]
    InvalidLabel(i64),

    #[error("classifier returned confidence {0}, expected a value in [0, 1]")]
    InvalidConfidence(f64),

    #[error("classifier inference failed: {0}")]
    Inference(String),
}

/// A write to one of the store partitions or the counter failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("counter {0:?} returned no document")]
    CounterMissing(String),

    #[error("failed to encode document: {0}")]
    Encode(String),
}

/// The upstream log could not be read.
#[derive(Debug, Error)]
pub enum LogError {
    /// Connectivity lost or refused; recovered by reconnecting.
    #[error("log connection failed: {0}")]
    Connection(String),

    /// The log returned an entry id that is not a valid position.
    #[error("invalid stream position {0:?}")]
    InvalidPosition(String),
}
