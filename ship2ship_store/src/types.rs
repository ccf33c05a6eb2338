//! Row keys and stored rows.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Inclusive timestamp bounds in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    pub start_millis: i64,
    pub end_millis: i64,
}

impl TimestampRange {
    /// Creates a range, swapping the bounds if they are reversed.
    pub fn new(start_millis: i64, end_millis: i64) -> Self {
        if start_millis <= end_millis {
            Self { start_millis, end_millis }
        } else {
            Self {
                start_millis: end_millis,
                end_millis: start_millis,
            }
        }
    }

    /// Returns true if `millis` lies within the bounds (inclusive).
    pub fn contains(&self, millis: i64) -> bool {
        millis >= self.start_millis && millis <= self.end_millis
    }
}

/// Physical key of a stored row.
///
/// Serialized big-endian as `cluster (8B) | timestamp (8B, sign-flipped) | seq (4B)`
/// so that byte order equals `(cluster, timestamp_millis, seq)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowKey {
    /// Colocation key (e.g. a spatial cell id; 0 for unclustered tables)
    pub cluster: u64,

    /// Row timestamp in Unix milliseconds
    pub timestamp_millis: i64,

    /// Position of the row within the saved batch
    pub seq: u32,
}

impl RowKey {
    /// Size of a serialized key in bytes.
    pub const SIZE: usize = 20;

    const SIGN_FLIP: u64 = 1 << 63;

    pub fn new(cluster: u64, timestamp_millis: i64, seq: u32) -> Self {
        Self {
            cluster,
            timestamp_millis,
            seq,
        }
    }

    /// Serialize to order-preserving bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.cluster.to_be_bytes());
        let ts = (self.timestamp_millis as u64) ^ Self::SIGN_FLIP;
        buf[8..16].copy_from_slice(&ts.to_be_bytes());
        buf[16..20].copy_from_slice(&self.seq.to_be_bytes());
        buf
    }

    /// Deserialize from bytes. Returns `None` if the length is wrong.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != Self::SIZE {
            return None;
        }
        let cluster = u64::from_be_bytes(data[0..8].try_into().ok()?);
        let ts = u64::from_be_bytes(data[8..16].try_into().ok()?) ^ Self::SIGN_FLIP;
        let seq = u32::from_be_bytes(data[16..20].try_into().ok()?);
        Some(Self {
            cluster,
            timestamp_millis: ts as i64,
            seq,
        })
    }
}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cluster
            .cmp(&other.cluster)
            .then(self.timestamp_millis.cmp(&other.timestamp_millis))
            .then(self.seq.cmp(&other.seq))
    }
}

/// A row as the store sees it: a key and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub key: RowKey,
    pub payload: Vec<u8>,
}

impl StoredRow {
    pub fn new(key: RowKey, payload: Vec<u8>) -> Self {
        Self { key, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_key_bytes_preserve_order() {
        let keys = vec![
            RowKey::new(0, -5_000, 0),
            RowKey::new(0, -1, 3),
            RowKey::new(0, 0, 0),
            RowKey::new(0, 1_517_356_800_000, 1),
            RowKey::new(7, i64::MIN, 0),
            RowKey::new(7, 42, 0),
            RowKey::new(u64::MAX, 0, u32::MAX),
        ];

        let mut by_bytes = keys.clone();
        by_bytes.sort_by_key(|k| k.to_bytes());
        let mut by_ord = keys.clone();
        by_ord.sort();

        assert_eq!(by_bytes, by_ord);
        for key in &keys {
            assert_eq!(RowKey::from_bytes(&key.to_bytes()), Some(*key));
        }
    }

    #[test]
    fn test_row_key_rejects_short_input() {
        assert_eq!(RowKey::from_bytes(&[0u8; 12]), None);
    }

    #[test]
    fn test_timestamp_range_inclusive() {
        let range = TimestampRange::new(200, 100);
        assert_eq!(range.start_millis, 100);
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(201));
    }
}
