//! Raw transaction records and their positions in the stream

use crate::error::LogError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A transaction as written onto the stream by the producer.
///
/// Every value arrives as a string; numeric conversion happens in
/// [`crate::feature_extractor::FeatureExtractor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(BTreeMap<String, String>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a field value
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Set a field value, replacing any previous one
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    /// Remove a field, returning its value
    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.0.remove(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Position of an entry in the stream.
///
/// Mirrors Redis stream ids (`<millis>-<seq>`), which are totally ordered by
/// `(millis, seq)`. Reading "after" a position returns the first entry with a
/// strictly greater id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamPosition {
    millis: u64,
    seq: u64,
}

impl StreamPosition {
    /// The position before the first entry of any stream (`0-0`)
    pub const BEGINNING: StreamPosition = StreamPosition { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for StreamPosition {
    type Err = LogError;

    /// Parse `<millis>-<seq>`; a bare `<millis>` means sequence 0, as Redis accepts.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LogError::InvalidPosition(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (s, "0"),
        };
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for StreamPosition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamPosition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry pulled from the stream
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub position: StreamPosition,
    pub record: RawRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_parse_and_display() {
        let pos: StreamPosition = "1700000000000-3".parse().unwrap();
        assert_eq!(pos, StreamPosition::new(1_700_000_000_000, 3));
        assert_eq!(pos.to_string(), "1700000000000-3");

        let bare: StreamPosition = "42".parse().unwrap();
        assert_eq!(bare, StreamPosition::new(42, 0));
    }

    #[test]
    fn test_position_rejects_garbage() {
        assert!("abc".parse::<StreamPosition>().is_err());
        assert!("1-".parse::<StreamPosition>().is_err());
        assert!("$".parse::<StreamPosition>().is_err());
    }

    #[test]
    fn test_position_ordering() {
        let a = StreamPosition::new(5, 9);
        let b = StreamPosition::new(6, 0);
        let c = StreamPosition::new(6, 1);
        assert!(StreamPosition::BEGINNING < a);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_position_serde_as_string() {
        let pos = StreamPosition::new(10, 2);
        let json = serde_json::to_string(&pos).unwrap();
        assert_eq!(json, "\"10-2\"");
        let back: StreamPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pos);
    }

    #[test]
    fn test_raw_record_from_pairs() {
        let record: RawRecord = [("Amount", "500"), ("Velocity", "1.2")].into_iter().collect();
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("Amount"), Some("500"));
        assert_eq!(record.get("Device_Type"), None);
    }
}
