//! Type definitions for the transaction consumer

pub mod outcome;
pub mod record;

pub use outcome::{EnrichedRecord, Label, OutcomeToken, Partition, Verdict};
pub use record::{LogEntry, RawRecord, StreamPosition};
