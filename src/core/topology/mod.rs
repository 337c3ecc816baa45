// src/core/topology/mod.rs

//! Topology snapshots, the per-node snapshot manager, the authoritative
//! admin store, and snapshot propagation to the rest of the cluster.

pub mod manager;
pub mod map;
pub mod propagation;
pub mod store;

pub use manager::TopologyManager;
pub use map::{
    GroupId, GroupInfo, GroupStateDelta, NodeEndpoint, NodeId, PartitionId, Topology, ZoneId,
};
pub use propagation::TopologyPropagator;
pub use store::TopologyStore;
