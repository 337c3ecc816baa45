// src/core/topology/map.rs

//! The immutable, sequence-numbered topology snapshot: which group owns
//! each partition, which nodes make up each group, and where they live.

use crate::core::CitrineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;

/// Identifies one logical partition of the key space.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Identifies one replication group (shard).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rg{}", self.0)
    }
}

/// An administrative region tag. Read requests may restrict themselves to a
/// set of zones; writes ignore the restriction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct ZoneId(pub u32);

/// A node is addressed by its group and its position within the group's
/// ordered member list. The index fits a single byte so that forwarding
/// chains can compress each hop to one byte on the wire.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct NodeId {
    pub group: GroupId,
    pub index: u8,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-n{}", self.group, self.index)
    }
}

/// The network location and zone of one node.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct NodeEndpoint {
    pub host: String,
    pub port: u16,
    pub zone: ZoneId,
}

impl NodeEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One replication group: an ordered member list plus the index of the
/// member currently acting as master.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct GroupInfo {
    pub members: Vec<NodeEndpoint>,
    pub master: u8,
}

impl GroupInfo {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// A change in one group's runtime state, attached to responses so clients
/// can update their master cache without waiting for a full snapshot.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct GroupStateDelta {
    pub group: GroupId,
    pub master: u8,
    pub size: u8,
}

/// An immutable snapshot of the cluster layout. A new snapshot replaces the
/// old one atomically; readers always observe one snapshot in full.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Topology {
    /// Monotonically increasing publication sequence number.
    pub sequence: u32,
    /// Which group owns each partition. Exactly one owner per partition.
    pub partition_map: BTreeMap<PartitionId, GroupId>,
    /// Group membership and current master per group.
    pub group_map: BTreeMap<GroupId, GroupInfo>,
    /// Zone name to zone id.
    pub zone_map: BTreeMap<String, ZoneId>,
    /// Partitions currently in flight between groups, keyed by partition
    /// with the migration target as value.
    #[serde(default)]
    pub migrating: BTreeMap<PartitionId, GroupId>,
}

impl Topology {
    /// Checks that every mapped group and master index actually exists.
    /// The partition map itself guarantees the single-owner invariant: a
    /// partition is a key, and a key has one value.
    pub fn validate(&self) -> Result<(), CitrineError> {
        for (partition, group) in &self.partition_map {
            if !self.group_map.contains_key(group) {
                return Err(CitrineError::TopologyError(format!(
                    "{partition} is mapped to unknown {group}"
                )));
            }
        }
        for (group, info) in &self.group_map {
            if info.members.is_empty() {
                return Err(CitrineError::TopologyError(format!("{group} has no members")));
            }
            if usize::from(info.master) >= info.members.len() {
                return Err(CitrineError::TopologyError(format!(
                    "{group} master index {} is out of range",
                    info.master
                )));
            }
        }
        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        self.partition_map.len()
    }

    /// Returns the group that owns `partition` in this snapshot.
    pub fn group_for_partition(&self, partition: PartitionId) -> Result<GroupId, CitrineError> {
        self.partition_map.get(&partition).copied().ok_or_else(|| {
            CitrineError::TopologyError(format!("{partition} is not in the partition map"))
        })
    }

    /// Maps a key to its owning partition. Uses the same hash the original
    /// store uses for its key distribution.
    pub fn partition_for_key(&self, key: &[u8]) -> Result<PartitionId, CitrineError> {
        let n = self.partition_count() as u32;
        if n == 0 {
            return Err(CitrineError::TopologyError(
                "topology has no partitions".to_string(),
            ));
        }
        let hash = murmur3::murmur3_32(&mut Cursor::new(key), 0)
            .map_err(|e| CitrineError::Internal(e.to_string()))?;
        Ok(PartitionId(hash % n))
    }

    pub fn group(&self, group: GroupId) -> Option<&GroupInfo> {
        self.group_map.get(&group)
    }

    /// The node currently acting as master of `group`, if the group exists.
    pub fn master_of(&self, group: GroupId) -> Option<NodeId> {
        self.group_map.get(&group).map(|info| NodeId {
            group,
            index: info.master,
        })
    }

    pub fn endpoint(&self, node: NodeId) -> Option<&NodeEndpoint> {
        self.group_map
            .get(&node.group)?
            .members
            .get(usize::from(node.index))
    }

    pub fn group_size(&self, group: GroupId) -> usize {
        self.group_map.get(&group).map_or(0, GroupInfo::size)
    }

    /// True when `partition` is marked as in flight to another group.
    pub fn is_migrating(&self, partition: PartitionId) -> bool {
        self.migrating.contains_key(&partition)
    }

    /// A derived group-state delta for `group`, as attached to responses.
    pub fn group_state(&self, group: GroupId) -> Option<GroupStateDelta> {
        self.group_map.get(&group).map(|info| GroupStateDelta {
            group,
            master: info.master,
            size: info.members.len() as u8,
        })
    }
}
