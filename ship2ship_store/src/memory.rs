//! Process-local implementation of TableStore.

use crate::error::Result;
use crate::lease::{LeaseRegistry, PartitionLease};
use crate::store::{PartitionWrite, TableStore};
use crate::types::{RowKey, StoredRow, TimestampRange};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Partition = Arc<BTreeMap<RowKey, Vec<u8>>>;
type Tables = HashMap<String, BTreeMap<String, Partition>>;

/// In-memory table store.
///
/// Each partition is an immutable `Arc`'d map; an overwrite builds the new
/// map off to the side and swaps the pointer, so readers holding the old
/// generation are unaffected.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    leases: LeaseRegistry,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        match self.tables.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        match self.tables.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn snapshot(&self, table: &str) -> Vec<Partition> {
        self.read()
            .get(table)
            .map(|parts| parts.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl TableStore for MemoryStore {
    fn lease(&self, table: &str, partition: &str) -> Result<PartitionLease> {
        self.leases.acquire(table, partition)
    }

    fn save_overwrite_all(&self, writes: Vec<PartitionWrite<'_>>) -> Result<Vec<usize>> {
        for write in &writes {
            self.leases.verify(write.lease)?;
        }

        let mut counts = Vec::with_capacity(writes.len());
        let mut generations = Vec::with_capacity(writes.len());
        for write in writes {
            counts.push(write.rows.len());
            let generation: BTreeMap<RowKey, Vec<u8>> = write
                .rows
                .into_iter()
                .enumerate()
                .map(|(seq, row)| (RowKey { seq: seq as u32, ..row.key }, row.payload))
                .collect();
            generations.push((write.lease, Arc::new(generation)));
        }

        let mut tables = self.write();
        for (lease, generation) in generations {
            tables
                .entry(lease.table().to_string())
                .or_default()
                .insert(lease.partition().to_string(), generation);
        }

        Ok(counts)
    }

    fn read_range(&self, table: &str, range: Option<TimestampRange>) -> Result<Vec<StoredRow>> {
        let mut out = Vec::new();
        for partition in self.snapshot(table) {
            out.extend(
                partition
                    .iter()
                    .filter(|(key, _)| range.map_or(true, |r| r.contains(key.timestamp_millis)))
                    .map(|(key, payload)| StoredRow::new(*key, payload.clone())),
            );
        }
        Ok(out)
    }

    fn read_partition(&self, table: &str, partition: &str) -> Result<Vec<StoredRow>> {
        let generation = self
            .read()
            .get(table)
            .and_then(|parts| parts.get(partition).cloned());

        Ok(generation
            .map(|rows| {
                rows.iter()
                    .map(|(key, payload)| StoredRow::new(*key, payload.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn partitions(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .read()
            .get(table)
            .map(|parts| parts.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{keyed_rows, ordered_rows, Keyed, TableStoreExt};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        cell: u64,
        at: i64,
        label: String,
    }

    impl Keyed for Reading {
        fn row_key(&self) -> (u64, i64) {
            (self.cell, self.at)
        }
    }

    fn reading(cell: u64, at: i64, label: &str) -> Reading {
        Reading {
            cell,
            at,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_rows_are_clustered_then_time_ordered() {
        let store = MemoryStore::new();
        let lease = store.lease("indexed", "day").unwrap();
        let rows = vec![
            reading(9, 300, "c"),
            reading(2, 500, "b"),
            reading(9, 100, "d"),
            reading(2, 100, "a"),
        ];
        store.save_rows(&lease, &rows).unwrap();

        let back: Vec<Reading> = store.load_partition("indexed", "day").unwrap();
        let labels: Vec<&str> = back.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_overwrite_replaces_whole_partition() {
        let store = MemoryStore::new();
        let lease = store.lease("candidates", "day").unwrap();
        store
            .save_rows(&lease, &[reading(1, 1, "old"), reading(1, 2, "old")])
            .unwrap();
        store.save_rows(&lease, &[reading(1, 3, "new")]).unwrap();

        let back: Vec<Reading> = store.load_partition("candidates", "day").unwrap();
        assert_eq!(back, vec![reading(1, 3, "new")]);
    }

    #[test]
    fn test_range_read_spans_partitions() {
        let store = MemoryStore::new();
        {
            let lease = store.lease("pings", "d1").unwrap();
            store
                .save_rows(&lease, &[reading(0, 10, "x"), reading(0, 20, "y")])
                .unwrap();
        }
        {
            let lease = store.lease("pings", "d2").unwrap();
            store.save_rows(&lease, &[reading(0, 30, "z")]).unwrap();
        }

        let range = TimestampRange::new(15, 30);
        let back: Vec<Reading> = store.load_range("pings", Some(range)).unwrap();
        let labels: Vec<&str> = back.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["y", "z"]);
        assert_eq!(store.partitions("pings").unwrap(), vec!["d1", "d2"]);
    }

    #[test]
    fn test_released_lease_cannot_write() {
        let store = MemoryStore::new();
        let other = MemoryStore::new();
        let foreign = other.lease("aggregates", "day").unwrap();

        let err = store.save_ordered(&foreign, &[1u32, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::LeaseMismatch { .. }));
        assert!(store.partitions("aggregates").unwrap().is_empty());
    }

    #[test]
    fn test_missing_partition_reads_empty() {
        let store = MemoryStore::new();
        assert!(store.read_partition("nope", "day").unwrap().is_empty());
        assert!(store.read_range("nope", None).unwrap().is_empty());
    }

    #[test]
    fn test_multi_table_write_publishes_together() {
        let store = MemoryStore::new();
        let indexed = store.lease("indexed", "day").unwrap();
        let totals = store.lease("aggregates", "day").unwrap();

        let counts = store
            .save_overwrite_all(vec![
                PartitionWrite::new(&indexed, keyed_rows(&[reading(1, 1, "a"), reading(2, 1, "b")]).unwrap()),
                PartitionWrite::new(&totals, ordered_rows(&[7u32]).unwrap()),
            ])
            .unwrap();

        assert_eq!(counts, vec![2, 1]);
        assert_eq!(store.read_partition("indexed", "day").unwrap().len(), 2);
        assert_eq!(store.load_partition::<u32>("aggregates", "day").unwrap(), vec![7]);
    }

    #[test]
    fn test_multi_table_write_with_foreign_lease_commits_nothing() {
        let store = MemoryStore::new();
        let indexed = store.lease("indexed", "day").unwrap();
        store.save_rows(&indexed, &[reading(1, 1, "old")]).unwrap();

        let other = MemoryStore::new();
        let foreign = other.lease("candidates", "day").unwrap();

        let err = store
            .save_overwrite_all(vec![
                PartitionWrite::new(&indexed, keyed_rows(&[reading(1, 2, "new")]).unwrap()),
                PartitionWrite::new(&foreign, ordered_rows(&[1u32]).unwrap()),
            ])
            .unwrap_err();

        assert!(matches!(err, StoreError::LeaseMismatch { .. }));
        let back: Vec<Reading> = store.load_partition("indexed", "day").unwrap();
        assert_eq!(back, vec![reading(1, 1, "old")]);
        assert!(store.partitions("candidates").unwrap().is_empty());
    }
}
