// src/core/login/mod.rs

//! The internal login manager: one session handle per remote endpoint,
//! idempotent under racing creators, with HMAC-signed auth material for
//! cross-node requests.

use crate::core::CitrineError;
use crate::core::metrics;
use crate::core::request::AuthContext;
use crate::core::topology::NodeId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// The kinds of node a login handle is accepted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Replication,
    Admin,
    Storage,
}

/// An established session against one endpoint. The token is the
/// HMAC-SHA256 signature of the session nonce under the cluster secret;
/// with security disabled the signature is all zeroes and peers accept it.
#[derive(Debug)]
pub struct LoginHandle {
    pub host: String,
    pub port: u16,
    nonce: [u8; 16],
    signature: [u8; 32],
    pub created: Instant,
}

impl LoginHandle {
    /// A handle is valid against replication, admin, and storage nodes
    /// alike; there is one session namespace per endpoint.
    pub fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Replication, NodeKind::Admin, NodeKind::Storage]
    }

    pub fn auth_context(&self) -> AuthContext {
        AuthContext {
            nonce: self.nonce,
            signature: self.signature,
        }
    }

    pub fn token(&self) -> String {
        hex::encode(self.signature)
    }
}

/// Resolves a node id to a network endpoint. Injected so the login
/// manager does not own a topology view of its own.
pub trait NodeResolver: Send + Sync {
    fn resolve(&self, node: NodeId) -> Option<(String, u16)>;
}

/// The per-node login cache: `(host, port) → handle`.
#[derive(Default)]
pub struct LoginManager {
    secret: Option<String>,
    handles: DashMap<(String, u16), Arc<LoginHandle>>,
    resolver: RwLock<Option<Arc<dyn NodeResolver>>>,
    logouts: AtomicU64,
}

impl LoginManager {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret,
            ..Self::default()
        }
    }

    /// Supplies the topology resolver once the topology service is up.
    pub fn set_resolver(&self, resolver: Arc<dyn NodeResolver>) {
        *self.resolver.write() = Some(resolver);
    }

    /// Returns the handle for an endpoint, creating one on a miss. Under a
    /// race exactly one creator wins; every loser's transient handle is
    /// logged out and the winner's handle is returned, so the cache holds
    /// exactly one handle per endpoint.
    pub fn handle_for_endpoint(&self, host: &str, port: u16) -> Arc<LoginHandle> {
        let key = (host.to_string(), port);
        if let Some(existing) = self.handles.get(&key) {
            metrics::LOGIN_CACHE_HITS_TOTAL.inc();
            return existing.clone();
        }

        metrics::LOGIN_CACHE_MISSES_TOTAL.inc();
        let fresh = Arc::new(self.create_handle(host, port));
        match self.handles.entry(key) {
            Entry::Occupied(winner) => {
                self.logout(&fresh);
                winner.get().clone()
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh.clone());
                fresh
            }
        }
    }

    /// Looks a handle up by node id; requires the injected resolver.
    pub fn handle_for_node(&self, node: NodeId) -> Result<Arc<LoginHandle>, CitrineError> {
        let resolver = self.resolver.read().clone().ok_or_else(|| {
            CitrineError::InvalidState("login manager has no topology resolver".to_string())
        })?;
        let (host, port) = resolver.resolve(node).ok_or_else(|| {
            CitrineError::TopologyError(format!("{node} is not in the current topology"))
        })?;
        Ok(self.handle_for_endpoint(&host, port))
    }

    /// Replaces the endpoint's handle with a fresh session. Renewal is
    /// idempotent under a race: whichever renewal lands last is the one
    /// handle every caller sees afterwards.
    pub fn renew(&self, host: &str, port: u16) -> Arc<LoginHandle> {
        let fresh = Arc::new(self.create_handle(host, port));
        if let Some(previous) = self
            .handles
            .insert((host.to_string(), port), fresh.clone())
        {
            self.logout(&previous);
        }
        fresh
    }

    /// Drops the endpoint's cached handle, if any.
    pub fn invalidate(&self, host: &str, port: u16) {
        if let Some((_, handle)) = self.handles.remove(&(host.to_string(), port)) {
            self.logout(&handle);
        }
    }

    /// Verifies the auth material on an inbound request. With no secret
    /// configured, only the all-zero signature is accepted.
    pub fn verify(&self, context: &AuthContext) -> bool {
        match &self.secret {
            None => context.signature == [0u8; 32],
            Some(secret) => {
                if context.signature == [0u8; 32] {
                    return false;
                }
                let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
                    Ok(mac) => mac,
                    Err(_) => return false,
                };
                mac.update(&context.nonce);
                mac.verify_slice(&context.signature).is_ok()
            }
        }
    }

    pub fn cached_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn logout_count(&self) -> u64 {
        self.logouts.load(Ordering::Relaxed)
    }

    fn create_handle(&self, host: &str, port: u16) -> LoginHandle {
        let mut nonce = [0u8; 16];
        getrandom::fill(&mut nonce).expect("OS randomness is available");
        let signature = match &self.secret {
            None => [0u8; 32],
            Some(secret) => {
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .expect("HMAC accepts any key length");
                mac.update(&nonce);
                mac.finalize().into_bytes().into()
            }
        };
        LoginHandle {
            host: host.to_string(),
            port,
            nonce,
            signature,
            created: Instant::now(),
        }
    }

    fn logout(&self, handle: &LoginHandle) {
        debug!(
            "Logging out transient session for {}:{}.",
            handle.host, handle.port
        );
        self.logouts.fetch_add(1, Ordering::Relaxed);
    }
}
