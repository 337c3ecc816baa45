// src/core/topology/propagation.rs

//! Pushing a topology snapshot out to the cluster. The broadcast succeeds
//! once a quorum of replication groups has acknowledged the new snapshot;
//! stragglers learn it from response deltas in the normal request path.

use super::map::Topology;
use crate::core::CitrineError;
use crate::core::dispatch::NodeTransport;
use crate::core::request::{
    Consistency, DispatcherId, Operation, Request, RequestOptions, RequestTarget, ResponseBody,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, warn};

/// Pushes snapshots at group masters over the node transport.
pub struct TopologyPropagator {
    transport: Arc<dyn NodeTransport>,
    dispatcher_id: DispatcherId,
}

impl TopologyPropagator {
    pub fn new(transport: Arc<dyn NodeTransport>, dispatcher_id: DispatcherId) -> Self {
        Self {
            transport,
            dispatcher_id,
        }
    }

    /// Pushes `topology` to every group's master, counting acknowledgments.
    /// Succeeds once a majority of groups has the snapshot; otherwise the
    /// caller retries on its own schedule.
    pub async fn broadcast(&self, topology: &Topology) -> Result<(), CitrineError> {
        let groups = topology.group_map.len();
        if groups == 0 {
            return Err(CitrineError::TopologyError(
                "cannot broadcast an empty topology".to_string(),
            ));
        }

        let payload = Bytes::from(
            Operation::TopologyPush {
                topology: topology.clone(),
            }
            .encode()?,
        );

        let mut acked = 0usize;
        for (&group, info) in &topology.group_map {
            let master = super::map::NodeId {
                group,
                index: info.master,
            };
            let Some(endpoint) = topology.endpoint(master) else {
                warn!("{master} has no endpoint; skipping in broadcast.");
                continue;
            };

            let mut opts = RequestOptions::new(self.dispatcher_id.clone());
            opts.no_charge = true;
            let request = Request::read(
                RequestTarget::Group(group),
                Consistency::NoneRequired,
                payload.clone(),
                opts,
            )?;

            match self.transport.invoke(endpoint, request).await {
                Ok(response) if matches!(response.body, ResponseBody::Ok(_)) => acked += 1,
                Ok(response) => {
                    warn!("{master} declined the topology push: {:?}", response.body);
                }
                Err(e) => {
                    warn!("Topology push to {master} failed: {e}");
                }
            }
        }

        let quorum = groups / 2 + 1;
        if acked >= quorum {
            info!(
                "Topology sequence {} acknowledged by {acked}/{groups} groups.",
                topology.sequence
            );
            Ok(())
        } else {
            Err(CitrineError::Unreachable(format!(
                "topology sequence {} reached only {acked}/{groups} groups (quorum {quorum})",
                topology.sequence
            )))
        }
    }
}
