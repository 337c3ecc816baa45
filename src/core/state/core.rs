// src/core/state/core.rs

//! Defines the central `NodeState` struct, holding all shared node-wide state.

use crate::config::Config;
use crate::core::CitrineError;
use crate::core::env::ReplicatedEnvManager;
use crate::core::login::{LoginManager, NodeResolver};
use crate::core::migration::{GroupLockTable, MigrationService};
use crate::core::stats::StatsState;
use crate::core::topology::{NodeId, TopologyManager, TopologyStore};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Semaphore};
use tracing::info;

/// The central struct holding all shared, node-wide state. Wrapped in an
/// `Arc` and passed to nearly every task and connection handler.
///
/// Components that only exist after their startup step (the replicated
/// environment, the migration service, the admin store) live in
/// `OnceCell`s; accessing one before its step has run is how "minimal
/// mode" falls out of the design rather than being a special case.
pub struct NodeState {
    /// The node's runtime configuration.
    pub config: Arc<Mutex<Config>>,
    /// This node's identity within its replication group.
    pub node_id: NodeId,
    /// The node's view of the cluster layout.
    pub topology: Arc<TopologyManager>,
    /// The per-endpoint login cache.
    pub login: Arc<LoginManager>,
    /// Server-wide statistics.
    pub stats: StatsState,
    /// Admin-side migration group locks. Only exercised on nodes that run
    /// migration plans, but cheap to carry everywhere.
    pub group_locks: Arc<GroupLockTable>,
    /// Bounded admission for request handlers.
    pub handler_permits: Arc<Semaphore>,
    /// Set when a stop has been requested; start checkpoints poll it.
    pub stop_requested: Arc<AtomicBool>,
    env: OnceCell<Arc<ReplicatedEnvManager>>,
    migration: OnceCell<Arc<MigrationService>>,
    admin_store: OnceCell<Arc<TopologyStore>>,
}

impl NodeState {
    /// Builds the state that exists before any lifecycle step has run.
    pub fn initialize(config: Config) -> Result<Arc<Self>, CitrineError> {
        let node_id = config.node.node_id();
        let login = Arc::new(LoginManager::new(config.security.shared_secret.clone()));
        let handler_permits = Arc::new(Semaphore::new(config.pools.handler_pool_size));

        info!("Node state initialized for {node_id}.");
        Ok(Arc::new(Self {
            config: Arc::new(Mutex::new(config)),
            node_id,
            topology: Arc::new(TopologyManager::new()),
            login,
            stats: StatsState::new(),
            group_locks: Arc::new(GroupLockTable::new()),
            handler_permits,
            stop_requested: Arc::new(AtomicBool::new(false)),
            env: OnceCell::new(),
            migration: OnceCell::new(),
            admin_store: OnceCell::new(),
        }))
    }

    /// The replicated environment, once its startup step has opened it.
    /// Before that the node is in minimal mode and only control-plane
    /// operations are served.
    pub fn env(&self) -> Result<&Arc<ReplicatedEnvManager>, CitrineError> {
        self.env.get().ok_or_else(|| {
            CitrineError::InvalidState("the replicated environment is not open yet".to_string())
        })
    }

    pub fn set_env(&self, env: Arc<ReplicatedEnvManager>) {
        if self.env.set(env).is_err() {
            // A second open is a lifecycle bug, not a runtime condition.
            panic!("the replicated environment was opened twice");
        }
    }

    pub fn migration(&self) -> Result<&Arc<MigrationService>, CitrineError> {
        self.migration.get().ok_or_else(|| {
            CitrineError::InvalidState("the migration service is not running yet".to_string())
        })
    }

    pub fn set_migration(&self, service: Arc<MigrationService>) {
        let _ = self.migration.set(service);
    }

    /// The authoritative topology store. Present only on admin nodes.
    pub fn admin_store(&self) -> Option<&Arc<TopologyStore>> {
        self.admin_store.get()
    }

    pub fn set_admin_store(&self, store: Arc<TopologyStore>) {
        let _ = self.admin_store.set(store);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Whether the current topology names this node as its group's master.
    pub fn is_master(&self) -> bool {
        self.topology
            .current()
            .and_then(|t| t.master_of(self.node_id.group))
            .is_some_and(|master| master == self.node_id)
    }
}

/// Lets the login manager turn node ids into endpoints without owning a
/// topology view of its own.
pub struct TopologyNodeResolver {
    pub topology: Arc<TopologyManager>,
}

impl NodeResolver for TopologyNodeResolver {
    fn resolve(&self, node: NodeId) -> Option<(String, u16)> {
        let topology = self.topology.current()?;
        let endpoint = topology.endpoint(node)?;
        Some((endpoint.host.clone(), endpoint.port))
    }
}
