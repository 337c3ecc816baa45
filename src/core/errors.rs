// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the store.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum CitrineError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("No eligible node responded for {0}")]
    Unreachable(String),

    #[error("WRONGSHARD partition {partition} is owned by group {owner}")]
    WrongShard { partition: u32, owner: u32 },

    #[error("Stale topology: peer is at sequence {peer_seq}, request declared {declared_seq}")]
    StaleTopology { peer_seq: u32, declared_seq: i64 },

    #[error("NOTMASTER group {group} (master hint: {hint:?})")]
    NotMaster { group: u32, hint: Option<u8> },

    #[error("NOAUTH Authentication required")]
    AuthRequired,

    #[error("Forwarding hop budget exhausted")]
    TtlExceeded,

    #[error("Unsupported serial version {received} (supported {floor}..={ceiling})")]
    UnsupportedVersion {
        received: u16,
        floor: u16,
        ceiling: u16,
    },

    #[error("Replica cannot satisfy the requested consistency: {0}")]
    ConsistencyUnavailable(String),

    #[error("Persisted version {stored} is incompatible with code version {code}")]
    UpgradeRequired { stored: String, code: String },

    #[error("Background task interrupted while holding a permit")]
    ThreadInterrupted,

    #[error("Migration Error: {0}")]
    MigrationError(String),

    #[error("Plan interrupted")]
    Interrupted,

    #[error("Commit tokens from different environments cannot be compared")]
    InvalidComparison,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Topology Error: {0}")]
    TopologyError(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for CitrineError {
    fn clone(&self) -> Self {
        match self {
            CitrineError::Io(e) => CitrineError::Io(Arc::clone(e)),
            CitrineError::IncompleteData => CitrineError::IncompleteData,
            CitrineError::Timeout(ms) => CitrineError::Timeout(*ms),
            CitrineError::Unreachable(s) => CitrineError::Unreachable(s.clone()),
            CitrineError::WrongShard { partition, owner } => CitrineError::WrongShard {
                partition: *partition,
                owner: *owner,
            },
            CitrineError::StaleTopology {
                peer_seq,
                declared_seq,
            } => CitrineError::StaleTopology {
                peer_seq: *peer_seq,
                declared_seq: *declared_seq,
            },
            CitrineError::NotMaster { group, hint } => CitrineError::NotMaster {
                group: *group,
                hint: *hint,
            },
            CitrineError::AuthRequired => CitrineError::AuthRequired,
            CitrineError::TtlExceeded => CitrineError::TtlExceeded,
            CitrineError::UnsupportedVersion {
                received,
                floor,
                ceiling,
            } => CitrineError::UnsupportedVersion {
                received: *received,
                floor: *floor,
                ceiling: *ceiling,
            },
            CitrineError::ConsistencyUnavailable(s) => {
                CitrineError::ConsistencyUnavailable(s.clone())
            }
            CitrineError::UpgradeRequired { stored, code } => CitrineError::UpgradeRequired {
                stored: stored.clone(),
                code: code.clone(),
            },
            CitrineError::ThreadInterrupted => CitrineError::ThreadInterrupted,
            CitrineError::MigrationError(s) => CitrineError::MigrationError(s.clone()),
            CitrineError::Interrupted => CitrineError::Interrupted,
            CitrineError::InvalidComparison => CitrineError::InvalidComparison,
            CitrineError::InvalidRequest(s) => CitrineError::InvalidRequest(s.clone()),
            CitrineError::InvalidState(s) => CitrineError::InvalidState(s.clone()),
            CitrineError::TopologyError(s) => CitrineError::TopologyError(s.clone()),
            CitrineError::Internal(s) => CitrineError::Internal(s.clone()),
        }
    }
}

impl PartialEq for CitrineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CitrineError::Io(e1), CitrineError::Io(e2)) => e1.to_string() == e2.to_string(),
            (CitrineError::Timeout(a), CitrineError::Timeout(b)) => a == b,
            (CitrineError::Unreachable(a), CitrineError::Unreachable(b)) => a == b,
            (
                CitrineError::WrongShard {
                    partition: p1,
                    owner: o1,
                },
                CitrineError::WrongShard {
                    partition: p2,
                    owner: o2,
                },
            ) => p1 == p2 && o1 == o2,
            (
                CitrineError::NotMaster {
                    group: g1,
                    hint: h1,
                },
                CitrineError::NotMaster {
                    group: g2,
                    hint: h2,
                },
            ) => g1 == g2 && h1 == h2,
            (CitrineError::ConsistencyUnavailable(a), CitrineError::ConsistencyUnavailable(b)) => {
                a == b
            }
            (CitrineError::MigrationError(a), CitrineError::MigrationError(b)) => a == b,
            (CitrineError::InvalidRequest(a), CitrineError::InvalidRequest(b)) => a == b,
            (CitrineError::InvalidState(a), CitrineError::InvalidState(b)) => a == b,
            (CitrineError::TopologyError(a), CitrineError::TopologyError(b)) => a == b,
            (CitrineError::Internal(a), CitrineError::Internal(b)) => a == b,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for CitrineError {
    fn from(e: std::io::Error) -> Self {
        CitrineError::Io(Arc::new(e))
    }
}

impl From<bincode::error::EncodeError> for CitrineError {
    fn from(e: bincode::error::EncodeError) -> Self {
        CitrineError::Internal(format!("encode failure: {e}"))
    }
}

impl From<bincode::error::DecodeError> for CitrineError {
    fn from(e: bincode::error::DecodeError) -> Self {
        CitrineError::InvalidRequest(format!("decode failure: {e}"))
    }
}

impl From<serde_json::Error> for CitrineError {
    fn from(e: serde_json::Error) -> Self {
        CitrineError::Internal(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CitrineError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CitrineError::Timeout(0)
    }
}
