// src/core/env/token.rs

//! Commit tokens: the opaque handle a client gets back from a write,
//! totally ordered within one environment.

use crate::core::CitrineError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Identifies a specific committed state: the environment's UUID plus the
/// commit's log sequence number. Tokens from the same environment are
/// totally ordered by sequence number; comparing tokens across
/// environments is an error, not a value.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct CommitToken {
    env: [u8; 16],
    vlsn: u64,
}

impl CommitToken {
    pub fn new(env: Uuid, vlsn: u64) -> Self {
        Self {
            env: env.into_bytes(),
            vlsn,
        }
    }

    pub fn environment(&self) -> Uuid {
        Uuid::from_bytes(self.env)
    }

    pub fn vlsn(&self) -> u64 {
        self.vlsn
    }

    /// Compares two tokens. Fails with `InvalidComparison` when they were
    /// issued by different environments.
    pub fn try_compare(&self, other: &CommitToken) -> Result<Ordering, CitrineError> {
        if self.env != other.env {
            return Err(CitrineError::InvalidComparison);
        }
        Ok(self.vlsn.cmp(&other.vlsn))
    }

    /// The 24-byte wire form: 16-byte environment UUID, 8-byte sequence.
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[..16].copy_from_slice(&self.env);
        out[16..].copy_from_slice(&self.vlsn.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; 24]) -> Self {
        let mut env = [0u8; 16];
        env.copy_from_slice(&bytes[..16]);
        let mut vlsn = [0u8; 8];
        vlsn.copy_from_slice(&bytes[16..]);
        Self {
            env,
            vlsn: u64::from_be_bytes(vlsn),
        }
    }
}

impl fmt::Display for CommitToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.environment(), self.vlsn)
    }
}
