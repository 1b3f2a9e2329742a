//! Identifier schemes for routed records.
//!
//! Fraud records get a strictly increasing integer from a counter that lives
//! in the store, so every consumer process draws from the same sequence.
//! Legitimate records get a random token that needs no coordination.

use crate::error::StoreError;
use crate::store::Counter;
use std::sync::Arc;
use uuid::Uuid;

/// Issues fraud tokens from a shared store counter
#[derive(Clone)]
pub struct SequenceAllocator {
    counter: Arc<dyn Counter>,
    key: String,
}

impl SequenceAllocator {
    pub fn new(counter: Arc<dyn Counter>, key: impl Into<String>) -> Self {
        Self {
            counter,
            key: key.into(),
        }
    }

    /// Atomically increment the counter and return the new value
    pub async fn next(&self) -> Result<i64, StoreError> {
        self.counter.increment(&self.key).await
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Issues random opaque tokens for legitimate records
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenGenerator;

impl TokenGenerator {
    pub fn new() -> Self {
        Self
    }

    /// 32 lowercase hex characters from a random UUID
    pub fn next(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}
