// src/core/env/store.rs

//! The node-local partition stores the handler executes against. A real
//! storage engine is out of scope; this is an ordered in-memory map per
//! partition with commit sequence numbers attached.

use crate::core::topology::PartitionId;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One partition's records, keyed bytewise.
#[derive(Debug, Default)]
pub struct PartitionStore {
    entries: RwLock<BTreeMap<Vec<u8>, VersionedValue>>,
}

#[derive(Debug, Clone)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub vlsn: u64,
}

impl PartitionStore {
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.read().get(key).map(|v| v.value.clone())
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, vlsn: u64) {
        self.entries
            .write()
            .insert(key, VersionedValue { value, vlsn });
    }

    /// Removes a key, reporting whether it existed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// A full copy of the partition, in key order. Used when handing a
    /// partition to a migration target.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Replaces the partition's contents wholesale, as a migration target
    /// does when installing a pulled snapshot.
    pub fn install(&self, records: Vec<(Vec<u8>, Vec<u8>)>, vlsn: u64) {
        let mut entries = self.entries.write();
        entries.clear();
        for (key, value) in records {
            entries.insert(key, VersionedValue { value, vlsn });
        }
    }
}

/// All partitions this node currently holds.
#[derive(Debug, Default)]
pub struct PartitionStoreSet {
    stores: DashMap<PartitionId, Arc<PartitionStore>>,
}

impl PartitionStoreSet {
    pub fn get(&self, partition: PartitionId) -> Option<Arc<PartitionStore>> {
        self.stores.get(&partition).map(|s| s.clone())
    }

    pub fn get_or_create(&self, partition: PartitionId) -> Arc<PartitionStore> {
        self.stores
            .entry(partition)
            .or_insert_with(|| Arc::new(PartitionStore::default()))
            .clone()
    }

    pub fn remove(&self, partition: PartitionId) -> Option<Arc<PartitionStore>> {
        self.stores.remove(&partition).map(|(_, s)| s)
    }

    pub fn partitions(&self) -> Vec<PartitionId> {
        self.stores.iter().map(|e| *e.key()).collect()
    }

    pub fn record_count(&self, partition: PartitionId) -> usize {
        self.stores.get(&partition).map_or(0, |s| s.len())
    }
}
