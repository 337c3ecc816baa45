// tests/helpers/mod.rs

//! Shared fixtures: topology builders and a scripted transport that plays
//! a cluster without sockets.

// Each test binary pulls in the subset it needs.
#![allow(dead_code)]

use async_trait::async_trait;
use citrinekv::CitrineError;
use citrinekv::core::dispatch::NodeTransport;
use citrinekv::core::request::{Request, Response};
use citrinekv::core::topology::{
    GroupId, GroupInfo, NodeEndpoint, PartitionId, Topology, ZoneId,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Builds a topology from `(partition, group)` assignments and
/// `(group, members(port, zone), master)` descriptions.
pub fn build_topology(
    sequence: u32,
    assignments: &[(u32, u32)],
    groups: &[(u32, Vec<(u16, u32)>, u8)],
) -> Topology {
    let partition_map: BTreeMap<PartitionId, GroupId> = assignments
        .iter()
        .map(|&(p, g)| (PartitionId(p), GroupId(g)))
        .collect();
    let group_map: BTreeMap<GroupId, GroupInfo> = groups
        .iter()
        .map(|(g, members, master)| {
            (
                GroupId(*g),
                GroupInfo {
                    members: members
                        .iter()
                        .map(|&(port, zone)| NodeEndpoint {
                            host: "127.0.0.1".to_string(),
                            port,
                            zone: ZoneId(zone),
                        })
                        .collect(),
                    master: *master,
                },
            )
        })
        .collect();
    let mut zone_map = BTreeMap::new();
    zone_map.insert("z0".to_string(), ZoneId(0));
    zone_map.insert("z1".to_string(), ZoneId(1));
    zone_map.insert("z2".to_string(), ZoneId(2));
    let topology = Topology {
        sequence,
        partition_map,
        group_map,
        zone_map,
        migrating: BTreeMap::new(),
    };
    topology.validate().unwrap();
    topology
}

/// A transport that answers from per-port scripts and records every call.
/// An unscripted call answers `Unreachable`, which the dispatcher treats
/// as a connection-level failure.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<u16, VecDeque<Result<Response, CitrineError>>>>,
    calls: Mutex<Vec<u16>>,
    requests: Mutex<Vec<(u16, Request)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn program(&self, port: u16, result: Result<Response, CitrineError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(port)
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<u16> {
        self.calls.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<(u16, Request)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeTransport for MockTransport {
    async fn invoke(
        &self,
        endpoint: &NodeEndpoint,
        request: Request,
    ) -> Result<Response, CitrineError> {
        self.calls.lock().unwrap().push(endpoint.port);
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.port, request));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&endpoint.port)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(CitrineError::Unreachable(format!(
                    "no scripted response for port {}",
                    endpoint.port
                )))
            })
    }
}
