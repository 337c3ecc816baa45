// src/core/request/response.rs

//! The `Response`: an operation result or a classified failure, plus any
//! topology and group-state deltas the recipient should absorb.

use super::operation::OpResult;
use crate::core::CitrineError;
use crate::core::topology::{GroupStateDelta, Topology};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// The failure classifications a peer can return. The dispatcher's retry
/// policy keys off this, so the set mirrors the crate error kinds that can
/// travel over the wire.
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
pub enum FailureKind {
    Timeout,
    Unreachable,
    WrongShard,
    StaleTopology,
    NotMaster,
    AuthRequired,
    TtlExceeded,
    UnsupportedVersion,
    ConsistencyUnavailable,
    MigrationError,
    Interrupted,
    InvalidRequest,
    InvalidState,
    Internal,
}

/// A failed operation, with enough routing material for the caller to do
/// something smarter than give up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// The responder's best guess at the group's current master index.
    pub master_hint: Option<u8>,
    /// Set when a replica has learned the partition migrated in but has not
    /// finished opening it; the client should re-route to the master.
    pub needs_master: bool,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            master_hint: None,
            needs_master: false,
        }
    }

    pub fn with_master_hint(mut self, hint: u8) -> Self {
        self.master_hint = Some(hint);
        self
    }

    pub fn needs_master(mut self) -> Self {
        self.needs_master = true;
        self
    }

    /// Classifies a crate error into its wire form.
    pub fn from_error(err: &CitrineError) -> Self {
        let kind = match err {
            CitrineError::Timeout(_) => FailureKind::Timeout,
            CitrineError::Unreachable(_) => FailureKind::Unreachable,
            CitrineError::WrongShard { .. } => FailureKind::WrongShard,
            CitrineError::StaleTopology { .. } => FailureKind::StaleTopology,
            CitrineError::NotMaster { .. } => FailureKind::NotMaster,
            CitrineError::AuthRequired => FailureKind::AuthRequired,
            CitrineError::TtlExceeded => FailureKind::TtlExceeded,
            CitrineError::UnsupportedVersion { .. } => FailureKind::UnsupportedVersion,
            CitrineError::ConsistencyUnavailable(_) => FailureKind::ConsistencyUnavailable,
            CitrineError::MigrationError(_) => FailureKind::MigrationError,
            CitrineError::Interrupted => FailureKind::Interrupted,
            CitrineError::InvalidRequest(_) => FailureKind::InvalidRequest,
            CitrineError::InvalidState(_) => FailureKind::InvalidState,
            _ => FailureKind::Internal,
        };
        let mut failure = Failure::new(kind, err.to_string());
        if let CitrineError::NotMaster {
            hint: Some(hint), ..
        } = err
        {
            failure.master_hint = Some(*hint);
        }
        failure
    }

    /// The inverse mapping, for surfacing a remote failure to the caller.
    pub fn into_error(self) -> CitrineError {
        match self.kind {
            FailureKind::Timeout => CitrineError::Timeout(0),
            FailureKind::Unreachable => CitrineError::Unreachable(self.message),
            FailureKind::WrongShard => CitrineError::Internal(self.message),
            FailureKind::StaleTopology => CitrineError::Internal(self.message),
            FailureKind::NotMaster => CitrineError::NotMaster {
                group: 0,
                hint: self.master_hint,
            },
            FailureKind::AuthRequired => CitrineError::AuthRequired,
            FailureKind::TtlExceeded => CitrineError::TtlExceeded,
            FailureKind::UnsupportedVersion => CitrineError::InvalidRequest(self.message),
            FailureKind::ConsistencyUnavailable => {
                CitrineError::ConsistencyUnavailable(self.message)
            }
            FailureKind::MigrationError => CitrineError::MigrationError(self.message),
            FailureKind::Interrupted => CitrineError::Interrupted,
            FailureKind::InvalidRequest => CitrineError::InvalidRequest(self.message),
            FailureKind::InvalidState => CitrineError::InvalidState(self.message),
            FailureKind::Internal => CitrineError::Internal(self.message),
        }
    }
}

/// Either the operation's result or a classified failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum ResponseBody {
    Ok(OpResult),
    Failure(Failure),
}

/// What a handler sends back. Deltas ride alongside both success and
/// failure bodies whenever the responder's view is newer than the
/// sequence number the request declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Response {
    pub body: ResponseBody,
    pub topology: Option<Topology>,
    pub group_state: Option<GroupStateDelta>,
}

impl Response {
    pub fn ok(result: OpResult) -> Self {
        Self {
            body: ResponseBody::Ok(result),
            topology: None,
            group_state: None,
        }
    }

    pub fn failure(failure: Failure) -> Self {
        Self {
            body: ResponseBody::Failure(failure),
            topology: None,
            group_state: None,
        }
    }

    pub fn from_error(err: &CitrineError) -> Self {
        Self::failure(Failure::from_error(err))
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn with_group_state(mut self, delta: GroupStateDelta) -> Self {
        self.group_state = Some(delta);
        self
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.body, ResponseBody::Ok(_))
    }
}
