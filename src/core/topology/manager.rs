// src/core/topology/manager.rs

//! The per-node topology manager. Many readers share the current snapshot;
//! one writer publishes a replacement. Publication is an `Arc` swap, so
//! readers are never blocked and never observe a partial update.

use super::map::{GroupId, GroupStateDelta, Topology};
use crate::core::metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// Holds the node's current view of the cluster layout plus a small
/// overlay of group-state deltas learned from responses, which can be
/// fresher than the snapshot's master indices.
#[derive(Debug, Default)]
pub struct TopologyManager {
    current: RwLock<Option<Arc<Topology>>>,
    group_overlay: dashmap::DashMap<GroupId, GroupStateDelta>,
}

impl TopologyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot, if one has been published yet.
    pub fn current(&self) -> Option<Arc<Topology>> {
        self.current.read().clone()
    }

    /// The sequence number of the current snapshot, or `None` before bootstrap.
    pub fn sequence(&self) -> Option<u32> {
        self.current.read().as_ref().map(|t| t.sequence)
    }

    /// Publishes `topology` if it is newer than what we hold. Returns `true`
    /// when the snapshot was installed. Sequence numbers observed through the
    /// manager are therefore monotonically non-decreasing.
    pub fn publish(&self, topology: Arc<Topology>) -> bool {
        let mut slot = self.current.write();
        match slot.as_ref() {
            Some(existing) if existing.sequence >= topology.sequence => {
                debug!(
                    "Ignoring topology at sequence {} (holding {}).",
                    topology.sequence, existing.sequence
                );
                false
            }
            _ => {
                info!("Publishing topology at sequence {}.", topology.sequence);
                // The snapshot carries authoritative group state; stale
                // overlay entries would otherwise shadow it.
                self.group_overlay.clear();
                *slot = Some(topology);
                metrics::TOPOLOGY_PUBLICATIONS_TOTAL.inc();
                true
            }
        }
    }

    /// Absorbs a topology delta attached to a response.
    pub fn absorb(&self, delta: &Topology) -> bool {
        self.publish(Arc::new(delta.clone()))
    }

    /// Records a group-state delta from a response. Kept separately from the
    /// snapshot so a master change can be honored without a full publication.
    pub fn absorb_group_state(&self, delta: GroupStateDelta) {
        self.group_overlay.insert(delta.group, delta);
    }

    /// The freshest known master index for `group`: the overlay entry when
    /// present, the snapshot's otherwise.
    pub fn master_index(&self, group: GroupId) -> Option<u8> {
        if let Some(state) = self.group_overlay.get(&group) {
            return Some(state.master);
        }
        self.current()
            .and_then(|t| t.group(group).map(|info| info.master))
    }
}
