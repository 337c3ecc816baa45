// src/core/handler/mod.rs

//! The per-node request endpoint: authenticate, check ownership against
//! the local snapshot, forward within the group when the master is needed,
//! execute against the environment, and attach any deltas newer than what
//! the request declared.

use crate::core::CitrineError;
use crate::core::dispatch::NodeTransport;
use crate::core::env::ReplicaState;
use crate::core::metrics;
use crate::core::request::{
    Failure, FailureKind, OpResult, Operation, Request, RequestTarget, Response,
};
use crate::core::state::NodeState;
use crate::core::topology::{GroupId, NodeId, PartitionId, Topology};
use std::sync::Arc;
use tracing::{debug, info};

/// Handles requests accepted by this node's listener.
pub struct RequestHandler {
    state: Arc<NodeState>,
    /// Used for within-group forwards toward the master.
    transport: Arc<dyn NodeTransport>,
}

impl RequestHandler {
    pub fn new(state: Arc<NodeState>, transport: Arc<dyn NodeTransport>) -> Self {
        Self { state, transport }
    }

    /// The handler entry point. Never errors outward; every failure becomes
    /// a classified `Response` the dispatcher can act on.
    pub async fn handle(&self, request: Request) -> Response {
        let timer = metrics::REQUEST_LATENCY_SECONDS.start_timer();
        self.state.stats.increment_handled();
        if let Some(trace) = &request.trace {
            debug!(
                correlation = %trace.correlation_id,
                origin = %trace.origin,
                "Handling traced request."
            );
        }

        let declared_basis = request.topo_seq_basis;
        let response = match self.process(request).await {
            Ok(response) => {
                metrics::REQUESTS_TOTAL.with_label_values(&["ok"]).inc();
                response
            }
            Err(e) => {
                self.state.stats.increment_rejected();
                let kind = Failure::from_error(&e).kind.to_string();
                metrics::REQUESTS_TOTAL
                    .with_label_values(&[kind.as_str()])
                    .inc();
                Response::from_error(&e)
            }
        };
        timer.observe_duration();
        self.attach_deltas(response, declared_basis)
    }

    async fn process(&self, mut request: Request) -> Result<Response, CitrineError> {
        // A chain that revisits a node is rejected before anything runs.
        if request.forwarding_chain().has_loop() {
            return Err(CitrineError::InvalidRequest(
                "forwarding chain revisits a node".to_string(),
            ));
        }

        let operation = Operation::decode(&request.payload)?;
        self.authenticate(&request, &operation).await?;

        // Control-plane operations work in minimal mode: before the
        // environment is open and possibly before any topology is known.
        if operation.is_control_plane() {
            return self.execute_control_plane(operation);
        }

        let _permit = self
            .state
            .handler_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CitrineError::InvalidState("handler pool is shut down".to_string()))?;

        let env = self.state.env()?.clone();
        let topology = self.state.topology.current().ok_or_else(|| {
            CitrineError::InvalidState("no topology configured yet".to_string())
        })?;

        let my_group = self.state.node_id.group;
        let partition = self.check_ownership(&request, &topology, my_group)?;

        let i_am_master = self.state.is_master();
        let master_index = topology
            .group(my_group)
            .map(|info| info.master)
            .unwrap_or_default();

        if request.needs_master() && !i_am_master {
            return self.forward_to_master(request, &topology, master_index).await;
        }

        // A replica asked to read a partition that migrated in but has not
        // finished opening bounces the client to the master.
        if let Some(partition) = partition {
            if !i_am_master && env.is_pending_open(partition) {
                debug!("{partition} is migrated in but not open; signalling needs-master.");
                return Ok(Response::failure(
                    Failure::new(
                        FailureKind::NotMaster,
                        format!("{partition} is not open on this replica yet"),
                    )
                    .with_master_hint(master_index)
                    .needs_master(),
                ));
            }
        }

        let durability = request.durability.unwrap_or_default();
        self.execute(operation, partition, durability, i_am_master, master_index, &env)
            .await
    }

    /// Verifies the request's auth material. With a shared secret
    /// configured every operation except a bare ping must be signed.
    async fn authenticate(
        &self,
        request: &Request,
        operation: &Operation,
    ) -> Result<(), CitrineError> {
        if matches!(operation, Operation::Ping) {
            return Ok(());
        }
        let security_enabled = self
            .state
            .config
            .lock()
            .await
            .security
            .shared_secret
            .is_some();
        if !security_enabled {
            return Ok(());
        }
        match &request.auth {
            Some(context) if self.state.login.verify(context) => Ok(()),
            _ => Err(CitrineError::AuthRequired),
        }
    }

    /// Resolves the request's target against the local snapshot, rejecting
    /// requests for partitions or groups this node does not own.
    fn check_ownership(
        &self,
        request: &Request,
        topology: &Topology,
        my_group: GroupId,
    ) -> Result<Option<PartitionId>, CitrineError> {
        match request.target {
            RequestTarget::Partition(partition) => {
                let owner = topology.group_for_partition(partition)?;
                if owner != my_group {
                    return Err(CitrineError::WrongShard {
                        partition: partition.0,
                        owner: owner.0,
                    });
                }
                Ok(Some(partition))
            }
            RequestTarget::Group(group) => {
                if group != my_group {
                    return Err(CitrineError::WrongShard {
                        partition: u32::MAX,
                        owner: group.0,
                    });
                }
                Ok(None)
            }
        }
    }

    /// Forwards a master-bound request to the group's master: spend a hop,
    /// record ourselves on the chain, send. The chain discipline refuses
    /// loops and chains longer than the group.
    async fn forward_to_master(
        &self,
        mut request: Request,
        topology: &Topology,
        master_index: u8,
    ) -> Result<Response, CitrineError> {
        let my_group = self.state.node_id.group;
        request.decrement_ttl()?;
        request.update_forwarding_chain(
            self.state.node_id.index,
            my_group,
            topology.group_size(my_group),
        )?;

        let master = NodeId {
            group: my_group,
            index: master_index,
        };
        if master == self.state.node_id {
            return Err(CitrineError::NotMaster {
                group: my_group.0,
                hint: Some(master_index),
            });
        }
        let endpoint = topology
            .endpoint(master)
            .ok_or_else(|| {
                CitrineError::TopologyError(format!("{master} has no endpoint in the snapshot"))
            })?
            .clone();

        metrics::FORWARDS_TOTAL.inc();
        self.state.stats.increment_forwarded();
        debug!("Forwarding master-bound request to {master}.");
        self.transport.invoke(&endpoint, request).await
    }

    fn execute_control_plane(&self, operation: Operation) -> Result<Response, CitrineError> {
        match operation {
            Operation::Ping => Ok(Response::ok(OpResult::Pong)),
            Operation::Configure { topology } => {
                topology.validate()?;
                info!(
                    "Operator configuration received at sequence {}.",
                    topology.sequence
                );
                if let Some(store) = self.state.admin_store() {
                    store.install(topology.clone())?;
                }
                self.install_topology(topology);
                Ok(Response::ok(OpResult::Accepted))
            }
            Operation::TopologyPush { topology } => {
                topology.validate()?;
                self.install_topology(topology);
                Ok(Response::ok(OpResult::Accepted))
            }
            other => Err(CitrineError::Internal(format!(
                "{} is not a control-plane operation",
                other.name()
            ))),
        }
    }

    /// Publishes a received snapshot and re-derives this node's replica
    /// role from it.
    fn install_topology(&self, topology: Topology) {
        let installed = self.state.topology.publish(Arc::new(topology));
        if installed {
            if let Some(sequence) = self.state.topology.sequence() {
                metrics::TOPOLOGY_SEQUENCE.set(f64::from(sequence));
            }
            if let Ok(env) = self.state.env() {
                let role = if self.state.is_master() {
                    ReplicaState::Master
                } else {
                    ReplicaState::Replica
                };
                env.note_state_change(role);
            }
        }
    }

    async fn execute(
        &self,
        operation: Operation,
        partition: Option<PartitionId>,
        durability: crate::core::request::Durability,
        i_am_master: bool,
        master_index: u8,
        env: &Arc<crate::core::env::ReplicatedEnvManager>,
    ) -> Result<Response, CitrineError> {
        let my_group = self.state.node_id.group;
        let require_master = |what: &str| -> Result<(), CitrineError> {
            if i_am_master && env.replica_state() == ReplicaState::Master {
                Ok(())
            } else {
                debug!("{what} requires the master of {my_group}.");
                Err(CitrineError::NotMaster {
                    group: my_group.0,
                    hint: Some(master_index),
                })
            }
        };
        let target_partition = |partition: Option<PartitionId>| -> Result<PartitionId, CitrineError> {
            partition.ok_or_else(|| {
                CitrineError::InvalidRequest(
                    "a store operation must name a partition".to_string(),
                )
            })
        };

        match operation {
            Operation::Get { key } => {
                let partition = target_partition(partition)?;
                Ok(Response::ok(OpResult::Value(env.get(partition, &key))))
            }
            Operation::MultiGet { keys } => {
                let partition = target_partition(partition)?;
                let values = keys.iter().map(|key| env.get(partition, key)).collect();
                Ok(Response::ok(OpResult::Values(values)))
            }
            Operation::Put { key, value } => {
                require_master("put")?;
                let partition = target_partition(partition)?;
                let token = env.commit_put(partition, key, value, durability);
                Ok(Response::ok(OpResult::Committed(token)))
            }
            Operation::Delete { key } => {
                require_master("delete")?;
                let partition = target_partition(partition)?;
                let (existed, token) = env.commit_delete(partition, &key, durability);
                Ok(Response::ok(OpResult::Deleted { existed, token }))
            }
            Operation::MigrationStart { partition, source } => {
                require_master("migration-start")?;
                let report = self.state.migration()?.start_inbound(partition, source);
                Ok(Response::ok(OpResult::Migration(report)))
            }
            Operation::MigrationStatus { partition } => {
                let report = self.state.migration()?.status(partition);
                Ok(Response::ok(OpResult::Migration(report)))
            }
            Operation::MigrationCancel { partition, target } => {
                require_master("migration-cancel")?;
                let confirmed = self.state.migration()?.cancel_outbound(partition, target);
                if confirmed {
                    Ok(Response::ok(OpResult::Accepted))
                } else {
                    Err(CitrineError::MigrationError(format!(
                        "cancel of {partition} was not confirmed"
                    )))
                }
            }
            Operation::MigrationCanCancel { partition } => {
                let report = self.state.migration()?.can_cancel(partition);
                Ok(Response::ok(OpResult::Migration(report)))
            }
            Operation::PartitionSnapshot { partition } => {
                require_master("partition-snapshot")?;
                if self.state.migration()?.outbound_cancelled(partition) {
                    return Err(CitrineError::MigrationError(format!(
                        "outbound migration of {partition} was cancelled"
                    )));
                }
                Ok(Response::ok(OpResult::Snapshot(
                    env.snapshot_partition(partition),
                )))
            }
            Operation::Ping | Operation::Configure { .. } | Operation::TopologyPush { .. } => {
                unreachable!("control-plane operations are handled earlier")
            }
        }
    }

    /// Attaches topology and group-state deltas when this node's view is
    /// newer than the sequence number the request declared.
    fn attach_deltas(&self, mut response: Response, declared_basis: Option<u32>) -> Response {
        let Some(topology) = self.state.topology.current() else {
            return response;
        };
        let behind = declared_basis.is_none_or(|basis| basis < topology.sequence);
        if behind {
            if response.topology.is_none() {
                response.topology = Some((*topology).clone());
            }
            if response.group_state.is_none() {
                response.group_state = topology.group_state(self.state.node_id.group);
            }
        }
        response
    }
}
