// src/core/migration/locks.rs

//! Per-group migration locks. A migration holds the lock of its source and
//! target groups for its whole lifetime, serializing concurrent migrations
//! that touch either endpoint.

use crate::core::topology::GroupId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The table of group locks. Locks are created lazily and never removed;
/// the set of groups is small and stable.
#[derive(Debug, Default)]
pub struct GroupLockTable {
    locks: DashMap<GroupId, Arc<Mutex<()>>>,
}

/// Holds both endpoint locks of one migration. Dropping the guard releases
/// them.
#[derive(Debug)]
pub struct GroupPairGuard {
    _first: OwnedMutexGuard<()>,
    _second: Option<OwnedMutexGuard<()>>,
}

impl GroupLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, group: GroupId) -> Arc<Mutex<()>> {
        self.locks
            .entry(group)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires the locks of both groups. Always taken in ascending group
    /// order, whatever order the caller names them in, so two migrations
    /// crossing the same pair cannot deadlock.
    pub async fn lock_pair(&self, a: GroupId, b: GroupId) -> GroupPairGuard {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first_guard = self.lock_for(first).lock_owned().await;
        let second_guard = if first == second {
            None
        } else {
            Some(self.lock_for(second).lock_owned().await)
        };
        GroupPairGuard {
            _first: first_guard,
            _second: second_guard,
        }
    }

    /// Whether a group's lock is currently held. Diagnostic only.
    pub fn is_locked(&self, group: GroupId) -> bool {
        self.lock_for(group).try_lock().is_err()
    }
}
