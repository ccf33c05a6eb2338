//! Sled-backed implementation of TableStore.
//!
//! # Layout
//!
//! ```text
//! catalog tree:   "{table}\0{partition}"  ->  "gen/{table}/{partition}/{uuid}"
//! generation tree "gen/...":               RowKey bytes -> JSON payload
//! ```
//!
//! An overwrite fills a brand new generation tree per partition, flushes them,
//! then swaps all of their catalog entries in one batch. Readers resolve partitions through the catalog, so
//! they never observe a generation that is still being written. Generation
//! trees not referenced by the catalog (left behind by a crash between the
//! fill and the swap) are dropped on open.

use crate::error::{Result, StoreError};
use crate::lease::{LeaseRegistry, PartitionLease};
use crate::store::{PartitionWrite, TableStore};
use crate::types::{RowKey, StoredRow, TimestampRange};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

const CATALOG_TREE: &str = "catalog";
const GENERATION_PREFIX: &str = "gen/";

/// Persistent table store backed by an embedded sled database.
pub struct SledStore {
    db: sled::Db,
    catalog: sled::Tree,
    leases: LeaseRegistry,
}

impl SledStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| StoreError::backend(format!("Failed to open sled DB: {}", e)))?;
        Self::from_db(db)
    }

    /// Create a temporary store that is deleted when dropped
    pub fn open_temp() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::backend(format!("Failed to open temp DB: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let catalog = db.open_tree(CATALOG_TREE)?;
        let store = Self {
            db,
            catalog,
            leases: LeaseRegistry::new(),
        };
        store.sweep_orphans()?;
        Ok(store)
    }

    fn catalog_key(table: &str, partition: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(table.len() + partition.len() + 1);
        key.extend_from_slice(table.as_bytes());
        key.push(0);
        key.extend_from_slice(partition.as_bytes());
        key
    }

    fn table_prefix(table: &str) -> Vec<u8> {
        let mut prefix = table.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }

    /// Drops generation trees that no catalog entry points at.
    fn sweep_orphans(&self) -> Result<usize> {
        let mut live = HashSet::new();
        for entry in self.catalog.iter() {
            let (_, generation) = entry?;
            live.insert(generation.to_vec());
        }

        let mut dropped = 0;
        for name in self.db.tree_names() {
            if name.starts_with(GENERATION_PREFIX.as_bytes()) && !live.contains(&name[..]) {
                self.db.drop_tree(&name)?;
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(dropped, "Dropped unpublished table generations");
        }
        Ok(dropped)
    }

    fn rows_of(&self, table: &str, generation: &[u8], range: Option<TimestampRange>) -> Result<Vec<StoredRow>> {
        let tree = self.db.open_tree(generation)?;
        let mut rows = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (key, payload) = entry?;
            let key = RowKey::from_bytes(&key).ok_or_else(|| StoreError::CorruptKey {
                table: table.to_string(),
                reason: format!("expected {} key bytes, found {}", RowKey::SIZE, key.len()),
            })?;
            if range.map_or(true, |r| r.contains(key.timestamp_millis)) {
                rows.push(StoredRow::new(key, payload.to_vec()));
            }
        }
        Ok(rows)
    }
}

impl TableStore for SledStore {
    fn lease(&self, table: &str, partition: &str) -> Result<PartitionLease> {
        self.leases.acquire(table, partition)
    }

    fn save_overwrite_all(&self, writes: Vec<PartitionWrite<'_>>) -> Result<Vec<usize>> {
        for write in &writes {
            self.leases.verify(write.lease)?;
        }

        let mut counts = Vec::with_capacity(writes.len());
        let mut published = Vec::with_capacity(writes.len());
        for write in writes {
            let lease = write.lease;
            let generation = format!(
                "{}{}/{}/{}",
                GENERATION_PREFIX,
                lease.table(),
                lease.partition(),
                Uuid::new_v4()
            );
            let tree = self.db.open_tree(generation.as_bytes())?;

            let count = write.rows.len();
            let mut batch = sled::Batch::default();
            for (seq, row) in write.rows.into_iter().enumerate() {
                let key = RowKey {
                    seq: seq as u32,
                    ..row.key
                };
                batch.insert(&key.to_bytes()[..], row.payload);
            }
            tree.apply_batch(batch)?;
            tree.flush()?;

            counts.push(count);
            published.push((lease, generation));
        }

        // Publish every partition with one catalog batch
        let mut previous = Vec::new();
        let mut catalog = sled::Batch::default();
        for (lease, generation) in &published {
            let key = Self::catalog_key(lease.table(), lease.partition());
            if let Some(old) = self.catalog.get(&key)? {
                previous.push(old);
            }
            catalog.insert(key, generation.as_bytes());
        }
        self.catalog.apply_batch(catalog)?;
        self.catalog.flush()?;

        for old in previous {
            self.db.drop_tree(&old)?;
        }

        for ((lease, _), rows) in published.iter().zip(&counts) {
            debug!(
                table = lease.table(),
                partition = lease.partition(),
                rows,
                "Published table generation"
            );
        }
        Ok(counts)
    }

    fn read_range(&self, table: &str, range: Option<TimestampRange>) -> Result<Vec<StoredRow>> {
        let mut out = Vec::new();
        for entry in self.catalog.scan_prefix(Self::table_prefix(table)) {
            let (_, generation) = entry?;
            out.extend(self.rows_of(table, &generation, range)?);
        }
        Ok(out)
    }

    fn read_partition(&self, table: &str, partition: &str) -> Result<Vec<StoredRow>> {
        match self.catalog.get(Self::catalog_key(table, partition))? {
            Some(generation) => self.rows_of(table, &generation, None),
            None => Ok(Vec::new()),
        }
    }

    fn partitions(&self, table: &str) -> Result<Vec<String>> {
        let prefix = Self::table_prefix(table);
        let mut names = Vec::new();
        for entry in self.catalog.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            names.push(name);
        }
        Ok(names)
    }
}
