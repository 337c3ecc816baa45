// src/core/env/manager.rs

//! The replicated environment manager: the version gate at open, the
//! replica-state listener, and the commit sequence every write funnels
//! through.

use super::store::{PartitionStore, PartitionStoreSet};
use super::token::CommitToken;
use super::version::{VersionDatabase, VersionStamp};
use crate::core::CitrineError;
use crate::core::request::Durability;
use crate::core::topology::PartitionId;
use dashmap::DashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// A hook run when the persisted stamp is older than the code version but
/// upgrade-compatible, before the new stamp is written.
pub type UpgradeHook = fn(&VersionStamp, &VersionStamp) -> Result<(), CitrineError>;

/// The node's replica role, as reported by the replication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ReplicaState {
    Master,
    Replica,
    Unknown,
    Detached,
}

/// Owns the node's partition stores and the commit sequence. Exactly one
/// manager exists per process; every write goes through [`Self::commit`],
/// which is what makes commit tokens totally ordered within the
/// environment.
#[derive(Debug)]
pub struct ReplicatedEnvManager {
    env_id: Uuid,
    vlsn: AtomicU64,
    stores: PartitionStoreSet,
    /// Partitions that migrated in but have not finished local catch-up.
    /// Replica reads against these bounce to the master.
    pending_open: DashSet<PartitionId>,
    state_tx: watch::Sender<ReplicaState>,
    state_rx: watch::Receiver<ReplicaState>,
}

impl ReplicatedEnvManager {
    /// Opens the environment with the default upgrade predicate and no
    /// version-bump hooks.
    pub fn open(data_dir: impl AsRef<Path>, code: VersionStamp) -> Result<Self, CitrineError> {
        Self::open_with(data_dir, code, VersionStamp::is_upgrade_compatible, &[])
    }

    /// Opens the environment, gated by the persisted version stamp:
    ///
    /// 1. A missing stamp is a first-time open; the current version is
    ///    written before anything else happens.
    /// 2. A stamp equal to the code version opens directly.
    /// 3. An upgrade-compatible older stamp runs the bump hooks, then
    ///    rewrites the stamp with an fsync before the environment opens.
    /// 4. Anything else aborts with `UpgradeRequired`, leaving the stamp
    ///    untouched.
    ///
    /// Failures while writing the stamp are fatal: proceeding would let the
    /// in-memory version run ahead of what the disk claims.
    pub fn open_with(
        data_dir: impl AsRef<Path>,
        code: VersionStamp,
        compatible: impl Fn(&VersionStamp, &VersionStamp) -> bool,
        hooks: &[UpgradeHook],
    ) -> Result<Self, CitrineError> {
        let version_db = VersionDatabase::open(&data_dir);
        match version_db.read()? {
            None => {
                info!("First-time open; stamping environment at version {code}.");
                version_db.write(&code)?;
            }
            Some(stored) if stored == code => {}
            Some(stored) if compatible(&stored, &code) => {
                info!("Upgrading environment stamp {stored} -> {code}.");
                for hook in hooks {
                    hook(&stored, &code)?;
                }
                version_db.write(&code)?;
            }
            Some(stored) => {
                warn!(
                    "Persisted version {stored} is not upgrade-compatible with code version {code}."
                );
                return Err(CitrineError::UpgradeRequired {
                    stored: stored.to_string(),
                    code: code.to_string(),
                });
            }
        }

        let (state_tx, state_rx) = watch::channel(ReplicaState::Unknown);
        Ok(Self {
            env_id: Uuid::new_v4(),
            vlsn: AtomicU64::new(0),
            stores: PartitionStoreSet::default(),
            pending_open: DashSet::new(),
            state_tx,
            state_rx,
        })
    }

    pub fn environment_id(&self) -> Uuid {
        self.env_id
    }

    // --- Replica-state listener ---

    /// Translates a state-change event from the replication layer into the
    /// single notification routing and login consume.
    pub fn note_state_change(&self, state: ReplicaState) {
        if *self.state_rx.borrow() != state {
            info!("Replica state transition to {state}.");
            let _ = self.state_tx.send(state);
        }
    }

    pub fn replica_state(&self) -> ReplicaState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReplicaState> {
        self.state_rx.clone()
    }

    // --- Commit path ---

    /// Applies a write and returns its commit token. Tokens issued by one
    /// environment are strictly increasing.
    pub fn commit_put(
        &self,
        partition: PartitionId,
        key: Vec<u8>,
        value: Vec<u8>,
        _durability: Durability,
    ) -> CommitToken {
        let store = self.stores.get_or_create(partition);
        let vlsn = self.next_vlsn();
        store.put(key, value, vlsn);
        CommitToken::new(self.env_id, vlsn)
    }

    /// Applies a delete, reporting whether the key existed. The deletion is
    /// a commit either way; the sequence advances.
    pub fn commit_delete(
        &self,
        partition: PartitionId,
        key: &[u8],
        _durability: Durability,
    ) -> (bool, CommitToken) {
        let store = self.stores.get_or_create(partition);
        let vlsn = self.next_vlsn();
        let existed = store.delete(key);
        (existed, CommitToken::new(self.env_id, vlsn))
    }

    fn next_vlsn(&self) -> u64 {
        self.vlsn.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The highest token issued so far, or `None` before the first commit.
    pub fn last_token(&self) -> Option<CommitToken> {
        match self.vlsn.load(Ordering::SeqCst) {
            0 => None,
            vlsn => Some(CommitToken::new(self.env_id, vlsn)),
        }
    }

    // --- Reads ---

    pub fn get(&self, partition: PartitionId, key: &[u8]) -> Option<Vec<u8>> {
        self.stores.get(partition).and_then(|s| s.get(key))
    }

    pub fn store(&self, partition: PartitionId) -> Option<Arc<PartitionStore>> {
        self.stores.get(partition)
    }

    // --- Partition movement ---

    pub fn snapshot_partition(&self, partition: PartitionId) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.stores
            .get(partition)
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    /// Installs a migrated-in partition's records wholesale.
    pub fn install_partition(&self, partition: PartitionId, records: Vec<(Vec<u8>, Vec<u8>)>) {
        let store = self.stores.get_or_create(partition);
        let vlsn = self.next_vlsn();
        store.install(records, vlsn);
    }

    pub fn drop_partition(&self, partition: PartitionId) {
        self.stores.remove(partition);
        self.pending_open.remove(&partition);
    }

    /// Marks a migrated-in partition as not yet open for replica reads.
    pub fn mark_pending_open(&self, partition: PartitionId) {
        self.pending_open.insert(partition);
    }

    pub fn clear_pending_open(&self, partition: PartitionId) {
        self.pending_open.remove(&partition);
    }

    pub fn is_pending_open(&self, partition: PartitionId) -> bool {
        self.pending_open.contains(&partition)
    }

    pub fn owned_partitions(&self) -> Vec<PartitionId> {
        self.stores.partitions()
    }

    pub fn record_count(&self, partition: PartitionId) -> usize {
        self.stores.record_count(partition)
    }
}
