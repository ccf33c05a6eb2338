//! Single-writer leases for output partitions.

use crate::error::{Result, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

type LeaseMap = HashMap<(String, String), Uuid>;

/// Tracks which (table, partition) pairs currently have a writer.
///
/// Cloning shares the underlying registry.
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    held: Arc<Mutex<LeaseMap>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LeaseMap> {
        // A panicking writer cannot leave the map half-updated
        match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Acquires the lease for a partition.
    ///
    /// # Returns
    /// * `Ok(lease)` - The caller is now the only writer
    /// * `Err(StoreError::PartitionBusy)` - Another lease is outstanding
    pub fn acquire(&self, table: &str, partition: &str) -> Result<PartitionLease> {
        let key = (table.to_string(), partition.to_string());
        let mut held = self.lock();
        if held.contains_key(&key) {
            return Err(StoreError::PartitionBusy {
                table: key.0,
                partition: key.1,
            });
        }

        let token = Uuid::new_v4();
        held.insert(key, token);

        Ok(PartitionLease {
            table: table.to_string(),
            partition: partition.to_string(),
            token,
            registry: self.clone(),
        })
    }

    /// Returns an error unless `lease` is the live lease issued by this registry.
    pub fn verify(&self, lease: &PartitionLease) -> Result<()> {
        let held = self.lock();
        match held.get(&(lease.table.clone(), lease.partition.clone())) {
            Some(token) if *token == lease.token && Arc::ptr_eq(&self.held, &lease.registry.held) => {
                Ok(())
            }
            _ => Err(StoreError::LeaseMismatch {
                table: lease.table.clone(),
                partition: lease.partition.clone(),
            }),
        }
    }

    fn release(&self, lease: &PartitionLease) {
        let mut held = self.lock();
        let key = (lease.table.clone(), lease.partition.clone());
        if held.get(&key) == Some(&lease.token) {
            held.remove(&key);
        }
    }

    /// Number of outstanding leases.
    pub fn active(&self) -> usize {
        self.lock().len()
    }
}

/// Exclusive right to overwrite one (table, partition). Released on drop.
#[derive(Debug)]
pub struct PartitionLease {
    table: String,
    partition: String,
    token: Uuid,
    registry: LeaseRegistry,
}

impl PartitionLease {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }
}

impl Drop for PartitionLease {
    fn drop(&mut self) {
        self.registry.release(self);
    }
}
