//! In-process store, counter and checkpoint.
//!
//! Used by the test suite and for running the pipeline without MongoDB.
//! Failures can be injected to exercise the consumer's retry paths.

use crate::error::StoreError;
use crate::store::{Counter, CursorCheckpoint, RecordStore};
use crate::types::outcome::{EnrichedRecord, Partition};
use crate::types::record::StreamPosition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Two in-memory partitions
#[derive(Debug, Default)]
pub struct MemoryStore {
    fraud: Mutex<Vec<EnrichedRecord>>,
    legit: Mutex<Vec<EnrichedRecord>>,
    /// Number of upcoming inserts that fail
    fail_next: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` inserts fail with [`StoreError::Unavailable`]
    pub fn fail_next_inserts(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Snapshot of the records in a partition, in insertion order
    pub fn records(&self, partition: Partition) -> Vec<EnrichedRecord> {
        self.partition(partition)
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, partition: Partition) -> usize {
        self.partition(partition)
            .lock()
            .map(|records| records.len())
            .unwrap_or_default()
    }

    fn partition(&self, partition: Partition) -> &Mutex<Vec<EnrichedRecord>> {
        match partition {
            Partition::Fraud => &self.fraud,
            Partition::Legit => &self.legit,
        }
    }

    fn take_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(
        &self,
        partition: Partition,
        record: &EnrichedRecord,
    ) -> Result<String, StoreError> {
        if self.take_failure() {
            return Err(StoreError::Unavailable("injected insert failure".into()));
        }

        let mut records = self
            .partition(partition)
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Lock error: {}", e)))?;
        records.push(record.clone());
        Ok(format!("{}:{}", partition, records.len()))
    }
}

/// Named counters held in process memory
#[derive(Debug, Default)]
pub struct MemoryCounter {
    values: Mutex<HashMap<String, i64>>,
    fail_next: AtomicUsize,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` increments fail with [`StoreError::Unavailable`]
    pub fn fail_next_increments(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Current value of a counter, if it has been used
    pub fn value(&self, key: &str) -> Option<i64> {
        self.values.lock().ok()?.get(key).copied()
    }
}

#[async_trait]
impl Counter for MemoryCounter {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected counter failure".into()));
        }

        let mut values = self
            .values
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Lock error: {}", e)))?;
        let value = values.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

/// Checkpoint slot held in process memory
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    positions: Mutex<HashMap<String, StreamPosition>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorCheckpoint for MemoryCheckpoint {
    async fn load(&self, stream_key: &str) -> Result<Option<StreamPosition>, StoreError> {
        let positions = self
            .positions
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Lock error: {}", e)))?;
        Ok(positions.get(stream_key).copied())
    }

    async fn save(&self, stream_key: &str, position: StreamPosition) -> Result<(), StoreError> {
        let mut positions = self
            .positions
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Lock error: {}", e)))?;
        positions.insert(stream_key.to_string(), position);
        Ok(())
    }
}
