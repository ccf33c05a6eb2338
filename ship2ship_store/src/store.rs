//! The storage collaborator contract.

use crate::error::Result;
use crate::lease::PartitionLease;
use crate::types::{RowKey, StoredRow, TimestampRange};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Abstraction for the table storage behind the pipeline.
///
/// # Implementations
///
/// - **Embedded**: `SledStore` - persistent, crash-safe publication
/// - **Testing**: `MemoryStore` - process-local
///
/// A table is a set of named partitions. Each partition is replaced as a
/// whole by [`TableStore::save_overwrite`], or together with partitions of
/// other tables by [`TableStore::save_overwrite_all`].
pub trait TableStore: Send + Sync {
    /// Acquires the single-writer lease for `table/partition`.
    fn lease(&self, table: &str, partition: &str) -> Result<PartitionLease>;

    /// Atomically replaces every leased partition in `writes`.
    ///
    /// Either all partitions switch to their new rows or none do. Every
    /// lease is verified before anything is written. Row `seq` values are
    /// reassigned from batch position, so callers only choose `cluster` and
    /// `timestamp_millis`.
    ///
    /// # Returns
    /// Number of rows written per entry of `writes`, in order.
    fn save_overwrite_all(&self, writes: Vec<PartitionWrite<'_>>) -> Result<Vec<usize>>;

    /// Atomically replaces the leased partition with `rows`.
    ///
    /// # Returns
    /// Number of rows written.
    fn save_overwrite(&self, lease: &PartitionLease, rows: Vec<StoredRow>) -> Result<usize> {
        let counts = self.save_overwrite_all(vec![PartitionWrite::new(lease, rows)])?;
        Ok(counts.into_iter().sum())
    }

    /// Reads every partition of `table`, optionally filtered by row timestamp.
    ///
    /// Rows come back partition by partition (partition names ascending),
    /// each in key order.
    fn read_range(&self, table: &str, range: Option<TimestampRange>) -> Result<Vec<StoredRow>>;

    /// Reads one partition in key order. A missing partition reads as empty.
    fn read_partition(&self, table: &str, partition: &str) -> Result<Vec<StoredRow>>;

    /// Lists the published partitions of `table`, ascending.
    fn partitions(&self, table: &str) -> Result<Vec<String>>;
}

/// One partition replacement inside [`TableStore::save_overwrite_all`].
pub struct PartitionWrite<'a> {
    pub lease: &'a PartitionLease,
    pub rows: Vec<StoredRow>,
}

impl<'a> PartitionWrite<'a> {
    pub fn new(lease: &'a PartitionLease, rows: Vec<StoredRow>) -> Self {
        Self { lease, rows }
    }
}

/// Maps a typed row to its physical `(cluster, timestamp_millis)` key.
pub trait Keyed {
    fn row_key(&self) -> (u64, i64);
}

/// Typed helpers over any [`TableStore`], using JSON payloads.
pub trait TableStoreExt: TableStore {
    /// Saves rows under their [`Keyed`] keys.
    fn save_rows<T: Serialize + Keyed>(&self, lease: &PartitionLease, rows: &[T]) -> Result<usize> {
        self.save_overwrite(lease, keyed_rows(rows)?)
    }

    /// Saves rows keyed by their position, preserving the given order.
    fn save_ordered<T: Serialize>(&self, lease: &PartitionLease, rows: &[T]) -> Result<usize> {
        self.save_overwrite(lease, ordered_rows(rows)?)
    }

    /// Loads and decodes every row of `table` within `range`.
    fn load_range<T: DeserializeOwned>(&self, table: &str, range: Option<TimestampRange>) -> Result<Vec<T>> {
        decode_all(self.read_range(table, range)?)
    }

    /// Loads and decodes one partition.
    fn load_partition<T: DeserializeOwned>(&self, table: &str, partition: &str) -> Result<Vec<T>> {
        decode_all(self.read_partition(table, partition)?)
    }
}

impl<S: TableStore + ?Sized> TableStoreExt for S {}

/// Encodes rows under their [`Keyed`] keys.
pub fn keyed_rows<T: Serialize + Keyed>(rows: &[T]) -> Result<Vec<StoredRow>> {
    rows.iter()
        .enumerate()
        .map(|(seq, row)| {
            let (cluster, ts) = row.row_key();
            Ok(StoredRow::new(
                RowKey::new(cluster, ts, seq as u32),
                serde_json::to_vec(row)?,
            ))
        })
        .collect()
}

/// Encodes rows keyed by their position.
pub fn ordered_rows<T: Serialize>(rows: &[T]) -> Result<Vec<StoredRow>> {
    rows.iter()
        .enumerate()
        .map(|(seq, row)| {
            Ok(StoredRow::new(
                RowKey::new(seq as u64, 0, seq as u32),
                serde_json::to_vec(row)?,
            ))
        })
        .collect()
}

fn decode_all<T: DeserializeOwned>(rows: Vec<StoredRow>) -> Result<Vec<T>> {
    rows.iter()
        .map(|row| Ok(serde_json::from_slice(&row.payload)?))
        .collect()
}
