//! ship2ship Storage Abstraction Layer
//!
//! This crate is the table storage collaborator for the detection pipeline.
//! Every pipeline stage writes a whole named partition of a table and reads
//! back rows filtered by timestamp. Two backends share one contract:
//!
//! - **Embedded**: `SledStore` - generation trees published through a catalog
//! - **Testing**: `MemoryStore` - `Arc` swaps under an `RwLock`
//!
//! # Guarantees
//!
//! - **Atomic overwrite**: readers observe either the previous or the new
//!   generation of a partition, never a mix. Partitions written together
//!   through [`TableStore::save_overwrite_all`] switch together.
//! - **Single writer**: a partition can only be written through a
//!   [`PartitionLease`], and only one lease per (table, partition) exists at
//!   a time.
//! - **Layout**: rows are stored under [`RowKey`]s ordered by
//!   `(cluster, timestamp, seq)`, so a table clustered by cell id keeps each
//!   cell's rows together in time order.
//!
//! # Example
//!
//! ```ignore
//! use ship2ship_store::{MemoryStore, TableStore, TableStoreExt};
//!
//! let store = MemoryStore::new();
//! let lease = store.lease("pings", "2018-01-31")?;
//! store.save_rows(&lease, &pings)?;
//! let back: Vec<Ping> = store.load_range("pings", None)?;
//! ```

mod error;
mod lease;
mod memory;
mod sled_store;
mod store;
mod types;

pub use error::{Result, StoreError};
pub use lease::{LeaseRegistry, PartitionLease};
pub use memory::MemoryStore;
pub use sled_store::SledStore;
pub use store::{keyed_rows, ordered_rows, Keyed, PartitionWrite, TableStore, TableStoreExt};
pub use types::{RowKey, StoredRow, TimestampRange};
