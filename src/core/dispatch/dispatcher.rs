// src/core/dispatch/dispatcher.rs

//! The client-side dispatcher: resolves a request to a destination node
//! against the current topology snapshot, sends it, and retries or
//! surfaces according to the failure classification.

use super::transport::NodeTransport;
use crate::core::CitrineError;
use crate::core::login::LoginManager;
use crate::core::metrics;
use crate::core::request::{
    Consistency, DispatcherId, Durability, FailureKind, OpResult, Operation, Request,
    RequestOptions, RequestTarget, Response, ResponseBody,
};
use crate::core::topology::{GroupId, NodeId, Topology, TopologyManager};
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Tunables for the dispatch loop.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DispatcherConfig {
    /// Hop budget stamped on requests this dispatcher originates.
    #[serde(default = "default_ttl")]
    pub default_ttl: i32,
    /// Deadline stamped on requests that do not specify their own.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Pause between attempts after a connection-level failure.
    #[serde(with = "humantime_serde", default = "default_retry_backoff")]
    pub retry_backoff: Duration,
}

fn default_ttl() -> i32 {
    5
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_retry_backoff() -> Duration {
    Duration::from_millis(100)
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_ttl(),
            request_timeout: default_request_timeout(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

/// Routes requests for one client or node. Topology sequence numbers
/// observed through one dispatcher are monotonically non-decreasing.
pub struct Dispatcher {
    id: DispatcherId,
    topology: Arc<TopologyManager>,
    transport: Arc<dyn NodeTransport>,
    login: Arc<LoginManager>,
    config: DispatcherConfig,
    observed_sequence: AtomicU32,
}

impl Dispatcher {
    pub fn new(
        id: DispatcherId,
        topology: Arc<TopologyManager>,
        transport: Arc<dyn NodeTransport>,
        login: Arc<LoginManager>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            id,
            topology,
            transport,
            login,
            config,
            observed_sequence: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> &DispatcherId {
        &self.id
    }

    /// The highest topology sequence number any response has carried past
    /// this dispatcher.
    pub fn observed_sequence(&self) -> u32 {
        self.observed_sequence.load(Ordering::Relaxed)
    }

    fn options(&self) -> RequestOptions {
        let mut opts = RequestOptions::new(self.id.clone());
        opts.ttl = self.config.default_ttl;
        opts.timeout_ms = self.config.request_timeout.as_millis() as u32;
        opts.topo_seq_basis = self.topology.sequence();
        opts
    }

    // --- Convenience entry points for store operations ---

    pub async fn put(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        durability: Durability,
    ) -> Result<crate::core::env::CommitToken, CitrineError> {
        let partition = self.partition_for_key(&key)?;
        let payload = Bytes::from(Operation::Put { key, value }.encode()?);
        let request = Request::write(
            RequestTarget::Partition(partition),
            durability,
            payload,
            self.options(),
        )?;
        match self.dispatch(request).await? {
            OpResult::Committed(token) => Ok(token),
            other => Err(CitrineError::Internal(format!(
                "unexpected result for put: {other:?}"
            ))),
        }
    }

    pub async fn get(
        &self,
        key: Vec<u8>,
        consistency: Consistency,
    ) -> Result<Option<Vec<u8>>, CitrineError> {
        let partition = self.partition_for_key(&key)?;
        let payload = Bytes::from(Operation::Get { key }.encode()?);
        let request = Request::read(
            RequestTarget::Partition(partition),
            consistency,
            payload,
            self.options(),
        )?;
        match self.dispatch(request).await? {
            OpResult::Value(value) => Ok(value),
            other => Err(CitrineError::Internal(format!(
                "unexpected result for get: {other:?}"
            ))),
        }
    }

    pub async fn delete(
        &self,
        key: Vec<u8>,
        durability: Durability,
    ) -> Result<bool, CitrineError> {
        let partition = self.partition_for_key(&key)?;
        let payload = Bytes::from(Operation::Delete { key }.encode()?);
        let request = Request::write(
            RequestTarget::Partition(partition),
            durability,
            payload,
            self.options(),
        )?;
        match self.dispatch(request).await? {
            OpResult::Deleted { existed, .. } => Ok(existed),
            other => Err(CitrineError::Internal(format!(
                "unexpected result for delete: {other:?}"
            ))),
        }
    }

    fn partition_for_key(&self, key: &[u8]) -> Result<crate::core::topology::PartitionId, CitrineError> {
        let topology = self.current_topology()?;
        topology.partition_for_key(key)
    }

    fn current_topology(&self) -> Result<Arc<Topology>, CitrineError> {
        self.topology
            .current()
            .ok_or_else(|| CitrineError::Unreachable("no topology snapshot yet".to_string()))
    }

    /// The dispatch engine. Retries within the request's deadline; every
    /// recoverable failure either refreshes routing state or narrows the
    /// candidate set before the next attempt.
    pub async fn dispatch(&self, mut request: Request) -> Result<OpResult, CitrineError> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(request.timeout_ms));
        let mut reauthenticated = false;
        let mut master_hint: Option<u8> = None;
        // Nodes that failed at the transport level this dispatch; retried
        // only after every other candidate is gone.
        let mut unresponsive: Vec<NodeId> = Vec::new();

        loop {
            if Instant::now() >= deadline {
                return Err(CitrineError::Timeout(u64::from(request.timeout_ms)));
            }

            let topology = self.current_topology()?;
            let group = match request.target {
                RequestTarget::Partition(p) => topology.group_for_partition(p)?,
                RequestTarget::Group(g) => g,
            };
            let index = match self.select_node(&topology, group, &request, master_hint, &unresponsive) {
                Ok(index) => index,
                Err(CitrineError::Unreachable(_)) if !unresponsive.is_empty() => {
                    // Every candidate misbehaved once; start a fresh pass
                    // rather than giving up inside the deadline.
                    debug!("All candidates for {group} were unresponsive; retrying the full set.");
                    unresponsive.clear();
                    tokio::time::sleep_until(
                        (Instant::now() + self.config.retry_backoff).min(deadline),
                    )
                    .await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let node = NodeId { group, index };
            let endpoint = topology
                .endpoint(node)
                .ok_or_else(|| {
                    CitrineError::TopologyError(format!("{node} has no endpoint in the snapshot"))
                })?
                .clone();

            let mut attempt = request.clone();
            attempt.topo_seq_basis = Some(topology.sequence);
            if attempt.auth.is_none() {
                attempt.auth = Some(
                    self.login
                        .handle_for_endpoint(&endpoint.host, endpoint.port)
                        .auth_context(),
                );
            }

            match self.transport.invoke(&endpoint, attempt).await {
                Ok(response) => {
                    self.absorb(&response);
                    match response.body {
                        ResponseBody::Ok(result) => return Ok(result),
                        ResponseBody::Failure(failure) => match failure.kind {
                            FailureKind::WrongShard | FailureKind::StaleTopology => {
                                debug!(
                                    "{node} declined with {}: {}. Retrying with absorbed topology.",
                                    failure.kind, failure.message
                                );
                                metrics::DISPATCH_RETRIES_TOTAL.inc();
                                master_hint = None;
                                continue;
                            }
                            FailureKind::NotMaster => {
                                master_hint = failure.master_hint;
                                if failure.needs_master {
                                    request.set_needs_master();
                                }
                                metrics::DISPATCH_RETRIES_TOTAL.inc();
                                continue;
                            }
                            FailureKind::AuthRequired => {
                                if reauthenticated {
                                    return Err(CitrineError::AuthRequired);
                                }
                                reauthenticated = true;
                                let handle = self.login.renew(&endpoint.host, endpoint.port);
                                request.auth = Some(handle.auth_context());
                                metrics::DISPATCH_RETRIES_TOTAL.inc();
                                continue;
                            }
                            _ => return Err(failure.into_error()),
                        },
                    }
                }
                // Connection-level failures: drop the node from this pass
                // and keep trying until the deadline.
                Err(CitrineError::Io(e)) => {
                    warn!("Transport failure against {node} at {}: {e}", endpoint.address());
                    unresponsive.push(node);
                    metrics::DISPATCH_RETRIES_TOTAL.inc();
                    tokio::time::sleep_until(
                        (Instant::now() + self.config.retry_backoff).min(deadline),
                    )
                    .await;
                }
                Err(CitrineError::Unreachable(reason)) | Err(CitrineError::Internal(reason)) => {
                    warn!("{node} unreachable: {reason}");
                    unresponsive.push(node);
                    metrics::DISPATCH_RETRIES_TOTAL.inc();
                    tokio::time::sleep_until(
                        (Instant::now() + self.config.retry_backoff).min(deadline),
                    )
                    .await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Applies the routing rules of one attempt: master for anything that
    /// needs it, otherwise a replica chosen under the zone filter and the
    /// consistency contract.
    fn select_node(
        &self,
        topology: &Topology,
        group: GroupId,
        request: &Request,
        master_hint: Option<u8>,
        unresponsive: &[NodeId],
    ) -> Result<u8, CitrineError> {
        let info = topology.group(group).ok_or_else(|| {
            CitrineError::TopologyError(format!("{group} is not in the snapshot"))
        })?;
        let master = master_hint
            .or_else(|| self.topology.master_index(group))
            .unwrap_or(info.master);

        let is_down =
            |index: u8| unresponsive.iter().any(|n| n.group == group && n.index == index);

        if request.needs_master() {
            if !is_down(master) {
                return Ok(master);
            }
            // The master is not answering; any member can forward once a
            // new master is known on that side.
            let fallback = (0..info.members.len() as u8).find(|i| !is_down(*i));
            return fallback.ok_or_else(|| {
                CitrineError::Unreachable(format!("no reachable node in {group}"))
            });
        }

        let avoid_master = request
            .consistency
            .as_ref()
            .is_some_and(Consistency::avoids_master);

        let mut candidates: Vec<u8> = info
            .members
            .iter()
            .enumerate()
            .map(|(i, member)| (i as u8, member))
            .filter(|(i, member)| {
                !is_down(*i)
                    && request.zone_allowed(member.zone)
                    && !(avoid_master && *i == master)
            })
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            if avoid_master {
                return Err(CitrineError::ConsistencyUnavailable(format!(
                    "{group} has no replica besides its master"
                )));
            }
            return Err(CitrineError::Unreachable(format!(
                "no node in {group} satisfies the read-zone filter"
            )));
        }
        candidates.shuffle(&mut rand::thread_rng());
        Ok(candidates[0])
    }

    /// Absorbs any topology or group-state delta the response carried.
    fn absorb(&self, response: &Response) {
        if let Some(topology) = &response.topology {
            self.topology.absorb(topology);
            self.observed_sequence
                .fetch_max(topology.sequence, Ordering::Relaxed);
        }
        if let Some(sequence) = self.topology.sequence() {
            self.observed_sequence.fetch_max(sequence, Ordering::Relaxed);
        }
        if let Some(delta) = &response.group_state {
            self.topology.absorb_group_state(delta.clone());
        }
    }
}
