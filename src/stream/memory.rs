//! In-process transaction log.
//!
//! Cloned handles share one ordered stream: tests append through one handle
//! while the consumer blocks reading through another. Connection failures can
//! be injected to exercise recovery.

use crate::error::LogError;
use crate::stream::TransactionLog;
use crate::types::record::{LogEntry, RawRecord, StreamPosition};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct Shared {
    entries: Mutex<Vec<LogEntry>>,
    appended: Notify,
    fail_reads: AtomicUsize,
    fail_reconnects: AtomicUsize,
    reads: AtomicUsize,
    reconnects: AtomicUsize,
}

/// Shared in-memory stream
#[derive(Clone, Default)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its position.
    ///
    /// Positions are `<n>-0` for the n-th appended record, starting at 1.
    pub fn append(&self, record: RawRecord) -> StreamPosition {
        let position = {
            let mut entries = self
                .shared
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let position = StreamPosition::new(entries.len() as u64 + 1, 0);
            entries.push(LogEntry { position, record });
            position
        };
        self.shared.appended.notify_waiters();
        position
    }

    /// Make the next `count` reads fail with [`LogError::Connection`]
    pub fn fail_next_reads(&self, count: usize) {
        self.shared.fail_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reconnect attempts fail
    pub fn fail_next_reconnects(&self, count: usize) {
        self.shared.fail_reconnects.store(count, Ordering::SeqCst);
    }

    /// Number of reads issued so far, including failed ones
    pub fn read_count(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    /// Number of successful reconnects
    pub fn reconnect_count(&self) -> usize {
        self.shared.reconnects.load(Ordering::SeqCst)
    }

    fn first_after(&self, position: StreamPosition) -> Option<LogEntry> {
        let entries = self
            .shared
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.iter().find(|e| e.position > position).cloned()
    }
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl TransactionLog for MemoryLog {
    async fn read_after(
        &mut self,
        position: StreamPosition,
    ) -> Result<Option<LogEntry>, LogError> {
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        if take(&self.shared.fail_reads) {
            return Err(LogError::Connection("injected read failure".into()));
        }

        loop {
            // Register before checking so an append in between is not missed
            let appended = self.shared.appended.notified();
            if let Some(entry) = self.first_after(position) {
                return Ok(Some(entry));
            }
            appended.await;
        }
    }

    async fn reconnect(&mut self) -> Result<(), LogError> {
        if take(&self.shared.fail_reconnects) {
            return Err(LogError::Connection("injected reconnect failure".into()));
        }
        self.shared.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(amount: &str) -> RawRecord {
        [("Amount", amount)].into_iter().collect()
    }

    #[tokio::test]
    async fn test_read_after_returns_next_entry() {
        let mut log = MemoryLog::new();
        let first = log.append(record("1"));
        let second = log.append(record("2"));

        let entry = log.read_after(StreamPosition::BEGINNING).await.unwrap().unwrap();
        assert_eq!(entry.position, first);

        let entry = log.read_after(first).await.unwrap().unwrap();
        assert_eq!(entry.position, second);
        assert_eq!(entry.record.get("Amount"), Some("2"));
    }

    #[tokio::test]
    async fn test_unchanged_position_redelivers() {
        let mut log = MemoryLog::new();
        log.append(record("1"));

        let a = log.read_after(StreamPosition::BEGINNING).await.unwrap();
        let b = log.read_after(StreamPosition::BEGINNING).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_read_blocks_until_append() {
        let mut reader = MemoryLog::new();
        let writer = reader.clone();

        let read = tokio::spawn(async move { reader.read_after(StreamPosition::BEGINNING).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!read.is_finished());

        writer.append(record("7"));
        let entry = read.await.unwrap().unwrap().unwrap();
        assert_eq!(entry.record.get("Amount"), Some("7"));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mut log = MemoryLog::new();
        log.append(record("1"));
        log.fail_next_reads(1);
        log.fail_next_reconnects(1);

        assert!(log.read_after(StreamPosition::BEGINNING).await.is_err());
        assert!(log.reconnect().await.is_err());
        assert!(log.reconnect().await.is_ok());
        assert!(log.read_after(StreamPosition::BEGINNING).await.is_ok());
        assert_eq!(log.reconnect_count(), 1);
        assert_eq!(log.read_count(), 2);
    }
}
