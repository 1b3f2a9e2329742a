//! Persistent store abstractions.
//!
//! The store has two append-only partitions (fraud and legit records), a
//! named atomic counter resource backing the fraud token sequence, and an
//! optional cursor checkpoint slot. Implementations must be safe to share
//! between processes: the counter in particular may be incremented by several
//! consumers at once.

pub mod memory;
pub mod mongo;

use crate::error::StoreError;
use crate::types::outcome::{EnrichedRecord, Partition};
use crate::types::record::StreamPosition;
use async_trait::async_trait;

pub use memory::{MemoryCheckpoint, MemoryCounter, MemoryStore};
pub use mongo::MongoStore;

/// Append-only destination for enriched records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert one record into a partition, returning the store-assigned id
    async fn insert(&self, partition: Partition, record: &EnrichedRecord)
        -> Result<String, StoreError>;
}

/// Named integer counters with atomic increment
#[async_trait]
pub trait Counter: Send + Sync {
    /// Increment `key` by one and return the new value.
    ///
    /// A counter that does not exist yet starts at 0, so the first call
    /// returns 1.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;
}

/// Durable slot for the consumer's last advanced position
#[async_trait]
pub trait CursorCheckpoint: Send + Sync {
    async fn load(&self, stream_key: &str) -> Result<Option<StreamPosition>, StoreError>;

    async fn save(&self, stream_key: &str, position: StreamPosition) -> Result<(), StoreError>;
}
