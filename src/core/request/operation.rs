// src/core/request/operation.rs

//! The operation payload a request carries. Opaque to routing; the handler
//! decodes and executes it against the local environment.

use crate::core::CitrineError;
use crate::core::env::CommitToken;
use crate::core::migration::MigrationStateReport;
use crate::core::topology::{GroupId, PartitionId, Topology};
use serde::{Deserialize, Serialize};

/// A single data-plane or control-plane operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Operation {
    /// Liveness probe; answered even before the data plane is up.
    Ping,
    Get {
        key: Vec<u8>,
    },
    MultiGet {
        keys: Vec<Vec<u8>>,
    },
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        key: Vec<u8>,
    },
    /// Operator-supplied topology, accepted during bootstrap.
    Configure {
        topology: Topology,
    },
    /// A topology snapshot pushed by the admin or a peer.
    TopologyPush {
        topology: Topology,
    },
    /// Asks the target group's master to start pulling a partition over.
    MigrationStart {
        partition: PartitionId,
        source: GroupId,
    },
    MigrationStatus {
        partition: PartitionId,
    },
    /// Asks the source group's master to abandon an outbound migration.
    MigrationCancel {
        partition: PartitionId,
        target: GroupId,
    },
    /// Probes whether an inbound migration can still be abandoned.
    MigrationCanCancel {
        partition: PartitionId,
    },
    /// Hands the full contents of a partition to the migrating target.
    PartitionSnapshot {
        partition: PartitionId,
    },
}

impl Operation {
    /// Operations that mutate the environment and therefore must run on a
    /// master through a write request.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::Put { .. } | Operation::Delete { .. }
        )
    }

    /// Control-plane operations served even while the node is still in its
    /// minimal startup mode (no environment, possibly no topology).
    pub fn is_control_plane(&self) -> bool {
        matches!(
            self,
            Operation::Ping | Operation::Configure { .. } | Operation::TopologyPush { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Ping => "ping",
            Operation::Get { .. } => "get",
            Operation::MultiGet { .. } => "multi-get",
            Operation::Put { .. } => "put",
            Operation::Delete { .. } => "delete",
            Operation::Configure { .. } => "configure",
            Operation::TopologyPush { .. } => "topology-push",
            Operation::MigrationStart { .. } => "migration-start",
            Operation::MigrationStatus { .. } => "migration-status",
            Operation::MigrationCancel { .. } => "migration-cancel",
            Operation::MigrationCanCancel { .. } => "migration-can-cancel",
            Operation::PartitionSnapshot { .. } => "partition-snapshot",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CitrineError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CitrineError> {
        let (op, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(op)
    }
}

/// The successful result of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum OpResult {
    Pong,
    Value(Option<Vec<u8>>),
    Values(Vec<Option<Vec<u8>>>),
    Committed(CommitToken),
    Deleted {
        existed: bool,
        token: CommitToken,
    },
    /// Control-plane acknowledgement.
    Accepted,
    Migration(MigrationStateReport),
    Snapshot(Vec<(Vec<u8>, Vec<u8>)>),
}
