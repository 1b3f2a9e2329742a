//! Ordered transaction log the consumer reads from.
//!
//! The log is position-addressed: a reader asks for the first entry after a
//! given position, so resuming after a reconnect or a restart only needs the
//! last position that was durably processed.

pub mod memory;
pub mod redis_streams;

use crate::error::LogError;
use crate::types::record::{LogEntry, StreamPosition};
use async_trait::async_trait;

pub use self::memory::MemoryLog;
pub use self::redis_streams::RedisLog;

/// Position-based reader over the transaction stream
#[async_trait]
pub trait TransactionLog: Send {
    /// Wait for the first entry strictly after `position`.
    ///
    /// Suspends until an entry arrives. `Ok(None)` means the read ended
    /// without an entry (a bounded block elapsed) and should be retried.
    /// Dropping the returned future cancels the wait.
    async fn read_after(&mut self, position: StreamPosition)
        -> Result<Option<LogEntry>, LogError>;

    /// Re-establish the connection after a [`LogError::Connection`]
    async fn reconnect(&mut self) -> Result<(), LogError>;
}
