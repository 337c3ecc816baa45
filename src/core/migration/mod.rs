// src/core/migration/mod.rs

//! Partition migration: the admin-side coordinator state machine that
//! moves one partition between replication groups, the node-side service
//! that actually pulls the data across, and the locks and plan plumbing
//! both sit on.

pub mod admin;
pub mod coordinator;
pub mod locks;
pub mod runner;
pub mod service;

pub use admin::{AdminTopologyAuthority, NodeShardRpc};
pub use coordinator::{MigrationCoordinator, MigrationEnd, MigrationOutcome, ShardRpc, TopologyAuthority};
pub use locks::GroupLockTable;
pub use runner::{MigrationPlan, RetryDelays};
pub use service::{MigrationService, MigrationTable};

use crate::core::topology::{GroupId, PartitionId};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// The migration state a shard master reports over the wire.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    bincode::Encode,
    bincode::Decode,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationState {
    Pending,
    Running,
    Succeeded,
    Error,
    Unknown,
}

/// A reported migration state plus its cause when the state is an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct MigrationStateReport {
    pub state: MigrationState,
    pub cause: Option<String>,
}

impl MigrationStateReport {
    pub fn of(state: MigrationState) -> Self {
        Self { state, cause: None }
    }

    pub fn error(cause: impl Into<String>) -> Self {
        Self {
            state: MigrationState::Error,
            cause: Some(cause.into()),
        }
    }
}

/// The coordinator's own view of one migration's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    Requested,
    Running,
    Succeeded,
    Errored,
    Cancelled,
    Unknown,
}

/// Everything the coordinator tracks for one in-flight migration. Owned
/// exclusively by the coordinator task driving it; operators see copies.
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub partition: PartitionId,
    pub source: GroupId,
    pub target: GroupId,
    /// Set when the source shard is known dead: there is nothing to move,
    /// ownership is reassigned administratively.
    pub failed_source: bool,
    pub state: RecordState,
    pub cause: Option<String>,
    /// Latest status strings observed while polling, for operators.
    pub observed_target_status: Option<String>,
    pub observed_source_status: Option<String>,
}

impl MigrationRecord {
    pub fn new(partition: PartitionId, source: GroupId, target: GroupId) -> Self {
        Self {
            partition,
            source,
            target,
            failed_source: false,
            state: RecordState::Requested,
            cause: None,
            observed_target_status: None,
            observed_source_status: None,
        }
    }

    pub fn for_failed_source(partition: PartitionId, source: GroupId, target: GroupId) -> Self {
        Self {
            failed_source: true,
            ..Self::new(partition, source, target)
        }
    }
}
