// src/core/migration/admin.rs

//! Production bindings of the coordinator's two seams: migration RPCs
//! carried over the node transport, and the authoritative topology backed
//! by the admin store plus the quorum broadcast.

use super::coordinator::{ShardRpc, TopologyAuthority};
use super::{MigrationState, MigrationStateReport};
use crate::core::CitrineError;
use crate::core::dispatch::NodeTransport;
use crate::core::request::{
    Consistency, DispatcherId, OpResult, Operation, Request, RequestOptions, RequestTarget,
    ResponseBody,
};
use crate::core::topology::propagation::TopologyPropagator;
use crate::core::topology::{GroupId, NodeId, PartitionId, TopologyManager, TopologyStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Issues migration control operations directly against a named node.
/// Retry policy lives in the coordinator, not here.
pub struct NodeShardRpc {
    transport: Arc<dyn NodeTransport>,
    topology: Arc<TopologyManager>,
    dispatcher_id: DispatcherId,
}

impl NodeShardRpc {
    pub fn new(
        transport: Arc<dyn NodeTransport>,
        topology: Arc<TopologyManager>,
        dispatcher_id: DispatcherId,
    ) -> Self {
        Self {
            transport,
            topology,
            dispatcher_id,
        }
    }

    async fn call(&self, node: NodeId, operation: Operation) -> Result<OpResult, CitrineError> {
        let topology = self.topology.current().ok_or_else(|| {
            CitrineError::Unreachable("no topology snapshot yet".to_string())
        })?;
        let endpoint = topology
            .endpoint(node)
            .ok_or_else(|| {
                CitrineError::TopologyError(format!("{node} has no endpoint in the snapshot"))
            })?
            .clone();

        let payload = Bytes::from(operation.encode()?);
        let mut opts = RequestOptions::new(self.dispatcher_id.clone());
        opts.no_charge = true;
        let request = Request::read(
            RequestTarget::Group(node.group),
            Consistency::Absolute,
            payload,
            opts,
        )?;

        match self.transport.invoke(&endpoint, request).await?.body {
            ResponseBody::Ok(result) => Ok(result),
            ResponseBody::Failure(failure) => Err(failure.into_error()),
        }
    }

    fn expect_report(result: OpResult) -> Result<MigrationStateReport, CitrineError> {
        match result {
            OpResult::Migration(report) => Ok(report),
            other => Err(CitrineError::MigrationError(format!(
                "unexpected migration reply: {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl ShardRpc for NodeShardRpc {
    async fn start_migration(
        &self,
        master: NodeId,
        partition: PartitionId,
        source: GroupId,
    ) -> Result<MigrationStateReport, CitrineError> {
        let result = self
            .call(master, Operation::MigrationStart { partition, source })
            .await?;
        Self::expect_report(result)
    }

    async fn migration_status(
        &self,
        master: NodeId,
        partition: PartitionId,
    ) -> Result<MigrationStateReport, CitrineError> {
        let result = self
            .call(master, Operation::MigrationStatus { partition })
            .await?;
        Self::expect_report(result)
    }

    async fn cancel_migration(
        &self,
        source_master: NodeId,
        partition: PartitionId,
        target: GroupId,
    ) -> Result<bool, CitrineError> {
        let result = self
            .call(source_master, Operation::MigrationCancel { partition, target })
            .await?;
        match result {
            OpResult::Accepted => Ok(true),
            OpResult::Migration(report) => Ok(report.state == MigrationState::Error),
            _ => Ok(false),
        }
    }

    async fn can_cancel(
        &self,
        master: NodeId,
        partition: PartitionId,
    ) -> Result<MigrationStateReport, CitrineError> {
        let result = self
            .call(master, Operation::MigrationCanCancel { partition })
            .await?;
        Self::expect_report(result)
    }
}

/// The authoritative topology: the admin store decides, the local manager
/// observes, the propagator announces.
pub struct AdminTopologyAuthority {
    store: Arc<TopologyStore>,
    manager: Arc<TopologyManager>,
    propagator: TopologyPropagator,
}

impl AdminTopologyAuthority {
    pub fn new(
        store: Arc<TopologyStore>,
        manager: Arc<TopologyManager>,
        propagator: TopologyPropagator,
    ) -> Self {
        Self {
            store,
            manager,
            propagator,
        }
    }
}

#[async_trait]
impl TopologyAuthority for AdminTopologyAuthority {
    async fn reassign_partition(
        &self,
        partition: PartitionId,
        target: GroupId,
    ) -> Result<bool, CitrineError> {
        match self.store.reassign_partition(partition, target)? {
            Some(updated) => {
                self.manager.publish(Arc::new(updated));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn broadcast(&self) -> Result<(), CitrineError> {
        let topology = self.store.current().ok_or_else(|| {
            CitrineError::InvalidState("no authoritative topology to broadcast".to_string())
        })?;
        self.propagator.broadcast(&topology).await
    }
}
