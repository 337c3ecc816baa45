// src/core/request/request.rs

//! The `Request` type: target, access mode, hop budget, forwarding chain,
//! and the constructor-enforced mode invariants.

use crate::core::CitrineError;
use crate::core::env::CommitToken;
use crate::core::topology::{GroupId, PartitionId, ZoneId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::wire::SERIAL_VERSION;

/// The longest forwarding chain the wire format can carry.
pub const MAX_CHAIN_LEN: usize = 127;

/// A request names either a partition (resolved through the topology) or a
/// replication group directly. Exactly one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTarget {
    Partition(PartitionId),
    Group(GroupId),
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestTarget::Partition(p) => write!(f, "{p}"),
            RequestTarget::Group(g) => write!(f, "{g}"),
        }
    }
}

/// Commit synchronization policy for one side of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SyncPolicy {
    NoSync = 0,
    WriteNoSync = 1,
    Sync = 2,
}

impl SyncPolicy {
    pub fn from_u8(v: u8) -> Result<Self, CitrineError> {
        match v {
            0 => Ok(SyncPolicy::NoSync),
            1 => Ok(SyncPolicy::WriteNoSync),
            2 => Ok(SyncPolicy::Sync),
            other => Err(CitrineError::InvalidRequest(format!(
                "unknown sync policy {other}"
            ))),
        }
    }
}

/// How many replicas must acknowledge a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReplicaAckPolicy {
    All = 0,
    None = 1,
    SimpleMajority = 2,
}

impl ReplicaAckPolicy {
    pub fn from_u8(v: u8) -> Result<Self, CitrineError> {
        match v {
            0 => Ok(ReplicaAckPolicy::All),
            1 => Ok(ReplicaAckPolicy::None),
            2 => Ok(ReplicaAckPolicy::SimpleMajority),
            other => Err(CitrineError::InvalidRequest(format!(
                "unknown replica ack policy {other}"
            ))),
        }
    }
}

/// Durability contract of a write: local sync policy, replica ack policy,
/// replica sync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Durability {
    pub master_sync: SyncPolicy,
    pub replica_ack: ReplicaAckPolicy,
    pub replica_sync: SyncPolicy,
}

impl Default for Durability {
    fn default() -> Self {
        Self {
            master_sync: SyncPolicy::WriteNoSync,
            replica_ack: ReplicaAckPolicy::SimpleMajority,
            replica_sync: SyncPolicy::NoSync,
        }
    }
}

/// Consistency contract of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// Must observe the master's current state; routed to the master.
    Absolute,
    /// Any replica will do.
    NoneRequired,
    /// Any replica, explicitly avoiding the master.
    NoneRequiredNoMaster,
    /// A replica lagging no more than `permitted_lag_ms`.
    Time {
        permitted_lag_ms: u32,
        timeout_ms: u32,
    },
    /// A replica that has caught up to the given commit token.
    Token {
        token: CommitToken,
        timeout_ms: u32,
    },
}

impl Consistency {
    pub fn requires_master(&self) -> bool {
        matches!(self, Consistency::Absolute)
    }

    pub fn avoids_master(&self) -> bool {
        matches!(self, Consistency::NoneRequiredNoMaster)
    }
}

/// Identifies the dispatcher instance that first emitted a request. Never
/// rewritten by forwarding nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatcherId(pub String);

impl fmt::Display for DispatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authentication material carried by a request: a session nonce and the
/// HMAC-SHA256 signature the login manager produced over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub nonce: [u8; 16],
    pub signature: [u8; 32],
}

/// Optional log/trace correlation carried end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub correlation_id: String,
    pub origin: String,
}

/// The hops a request has already taken within its current group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardingChain {
    group: Option<GroupId>,
    hops: Vec<u8>,
}

impl ForwardingChain {
    pub fn from_hops(hops: Vec<u8>) -> Self {
        Self { group: None, hops }
    }

    pub fn hops(&self) -> &[u8] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// True when the chain revisits a node, which a well-formed request
    /// never does.
    pub fn has_loop(&self) -> bool {
        let mut seen = [false; 256];
        self.hops.iter().any(|&h| {
            let dup = seen[usize::from(h)];
            seen[usize::from(h)] = true;
            dup
        })
    }
}

/// Everything about a request except its target and mode; used by the
/// constructors to keep their signatures manageable.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub ttl: i32,
    pub timeout_ms: u32,
    pub topo_seq_basis: Option<u32>,
    pub dispatcher_id: DispatcherId,
    pub read_zones: Vec<ZoneId>,
    pub auth: Option<AuthContext>,
    pub trace: Option<TraceContext>,
    pub no_charge: bool,
}

impl RequestOptions {
    pub fn new(dispatcher_id: DispatcherId) -> Self {
        Self {
            ttl: 5,
            timeout_ms: 5000,
            topo_seq_basis: None,
            dispatcher_id,
            read_zones: Vec::new(),
            auth: None,
            trace: None,
            no_charge: false,
        }
    }
}

/// The wire-serializable unit of work.
///
/// The constructors enforce the mode invariants: a write carries a
/// durability contract and nothing read-related; a read carries a
/// consistency contract and no durability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub serial_version: u16,
    pub target: RequestTarget,
    pub write: bool,
    pub durability: Option<Durability>,
    pub consistency: Option<Consistency>,
    ttl: i32,
    chain: ForwardingChain,
    pub timeout_ms: u32,
    pub topo_seq_basis: Option<u32>,
    pub dispatcher_id: DispatcherId,
    pub payload: Bytes,
    pub read_zones: Vec<ZoneId>,
    pub auth: Option<AuthContext>,
    pub trace: Option<TraceContext>,
    pub no_charge: bool,
    /// Transient, server-set: a replica learned the partition migrated in
    /// but is not yet open locally. Never serialized.
    needs_master_flag: bool,
}

impl Request {
    /// Builds a write request. Writes always route to the master and ignore
    /// read zones, so neither a consistency contract nor a zone filter is
    /// accepted here.
    pub fn write(
        target: RequestTarget,
        durability: Durability,
        payload: Bytes,
        opts: RequestOptions,
    ) -> Result<Self, CitrineError> {
        if !opts.read_zones.is_empty() {
            return Err(CitrineError::InvalidRequest(
                "a write request cannot carry a read-zone filter".to_string(),
            ));
        }
        let request = Self {
            serial_version: SERIAL_VERSION,
            target,
            write: true,
            durability: Some(durability),
            consistency: None,
            ttl: opts.ttl,
            chain: ForwardingChain::default(),
            timeout_ms: opts.timeout_ms,
            topo_seq_basis: opts.topo_seq_basis,
            dispatcher_id: opts.dispatcher_id,
            payload,
            read_zones: Vec::new(),
            auth: opts.auth,
            trace: opts.trace,
            no_charge: opts.no_charge,
            needs_master_flag: false,
        };
        request.validate()?;
        Ok(request)
    }

    /// Builds a read request.
    pub fn read(
        target: RequestTarget,
        consistency: Consistency,
        payload: Bytes,
        opts: RequestOptions,
    ) -> Result<Self, CitrineError> {
        let request = Self {
            serial_version: SERIAL_VERSION,
            target,
            write: false,
            durability: None,
            consistency: Some(consistency),
            ttl: opts.ttl,
            chain: ForwardingChain::default(),
            timeout_ms: opts.timeout_ms,
            topo_seq_basis: opts.topo_seq_basis,
            dispatcher_id: opts.dispatcher_id,
            payload,
            read_zones: opts.read_zones,
            auth: opts.auth,
            trace: opts.trace,
            no_charge: opts.no_charge,
            needs_master_flag: false,
        };
        request.validate()?;
        Ok(request)
    }

    /// Re-checks the mode invariants. Called by the constructors and by the
    /// wire decoder, which can receive arbitrary field combinations.
    pub fn validate(&self) -> Result<(), CitrineError> {
        if self.write {
            if self.durability.is_none() {
                return Err(CitrineError::InvalidRequest(
                    "a write request must carry a durability contract".to_string(),
                ));
            }
            if self.consistency.is_some() {
                return Err(CitrineError::InvalidRequest(
                    "a write request cannot carry a consistency contract".to_string(),
                ));
            }
            if !self.read_zones.is_empty() {
                return Err(CitrineError::InvalidRequest(
                    "a write request cannot carry a read-zone filter".to_string(),
                ));
            }
        } else {
            if self.consistency.is_none() {
                return Err(CitrineError::InvalidRequest(
                    "a read request must carry a consistency contract".to_string(),
                ));
            }
            if self.durability.is_some() {
                return Err(CitrineError::InvalidRequest(
                    "a read request cannot carry a durability contract".to_string(),
                ));
            }
        }
        if self.ttl < 0 {
            return Err(CitrineError::InvalidRequest(
                "negative hop budget".to_string(),
            ));
        }
        if self.chain.len() > MAX_CHAIN_LEN {
            return Err(CitrineError::InvalidRequest(format!(
                "forwarding chain exceeds {MAX_CHAIN_LEN} hops"
            )));
        }
        Ok(())
    }

    /// Whether this request must execute on the group's master: any write,
    /// an absolute-consistency read, or a request bounced off a replica
    /// that has not finished opening a migrated-in partition.
    pub fn needs_master(&self) -> bool {
        self.write
            || self
                .consistency
                .as_ref()
                .is_some_and(Consistency::requires_master)
            || self.needs_master_flag
    }

    pub fn set_needs_master(&mut self) {
        self.needs_master_flag = true;
    }

    pub fn ttl(&self) -> i32 {
        self.ttl
    }

    /// Restores the hop budget and chain of a request that arrived off the
    /// wire mid-forward. Used by the decoder; a fresh request starts with
    /// its constructor's TTL and an empty chain.
    pub fn restore_wire_state(&mut self, ttl: i32, chain: ForwardingChain) {
        self.ttl = ttl;
        self.chain = chain;
    }

    /// Spends one forwarding hop. A request whose budget is already zero
    /// fails here, before any forward is attempted.
    pub fn decrement_ttl(&mut self) -> Result<(), CitrineError> {
        if self.ttl <= 0 {
            return Err(CitrineError::TtlExceeded);
        }
        self.ttl -= 1;
        Ok(())
    }

    pub fn forwarding_chain(&self) -> &ForwardingChain {
        &self.chain
    }

    /// Records a hop through node `index` of `group`. Within the current
    /// group the hop is appended, refusing loops and chains that would
    /// exceed the group size. Crossing into a different group resets the
    /// chain, since the indices of the old group mean nothing in the new one.
    pub fn update_forwarding_chain(
        &mut self,
        index: u8,
        group: GroupId,
        group_size: usize,
    ) -> Result<(), CitrineError> {
        // A chain restored off the wire carries no group marker; it belongs
        // to the group of the node holding it.
        if self.chain.group.is_none() && !self.chain.hops.is_empty() {
            self.chain.group = Some(group);
        }
        if self.chain.group == Some(group) {
            if self.chain.hops.contains(&index) {
                return Err(CitrineError::Unreachable(format!(
                    "forwarding loop through {group} node {index}"
                )));
            }
            if self.chain.len() >= group_size || self.chain.len() >= MAX_CHAIN_LEN {
                return Err(CitrineError::Unreachable(format!(
                    "forwarding chain exhausted all {group_size} nodes of {group}"
                )));
            }
            self.chain.hops.push(index);
        } else {
            self.chain = ForwardingChain {
                group: Some(group),
                hops: vec![index],
            };
        }
        Ok(())
    }

    /// True when the zone filter admits `zone`. An empty filter admits
    /// every zone; it does not mean "no zone allowed".
    pub fn zone_allowed(&self, zone: ZoneId) -> bool {
        self.read_zones.is_empty() || self.read_zones.contains(&zone)
    }
}
