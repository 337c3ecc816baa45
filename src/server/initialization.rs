// src/server/initialization.rs

//! Walks the ordered startup steps: monitoring first, then the admin
//! endpoint in minimal mode, the version-gated environment open, topology
//! bootstrap, and finally the data-plane services. Every step checks the
//! stop-requested flag through a lifecycle checkpoint.

use super::context::ServerContext;
use super::lifecycle::ServiceLifecycle;
use super::metrics_server;
use crate::config::Config;
use crate::core::dispatch::{Dispatcher, TcpNodeTransport};
use crate::core::env::{ReplicaState, ReplicatedEnvManager, VersionStamp};
use crate::core::handler::RequestHandler;
use crate::core::migration::MigrationService;
use crate::core::request::{DispatcherId, RequestCodec};
use crate::core::state::{NodeState, TopologyNodeResolver};
use crate::core::tasks::permits::TaskCoordinator;
use crate::core::topology::TopologyStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all node components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    let state = NodeState::initialize(config)?;
    let lifecycle = Arc::new(ServiceLifecycle::new(state.stop_requested.clone()));
    lifecycle.begin_start();

    let (shutdown_tx, _) = broadcast::channel(1);
    let background_tasks: JoinSet<Result<(), anyhow::Error>> = JoinSet::new();

    // Step 1: the monitoring sink, so every later step can be observed.
    // It lives outside the shared JoinSet because it is the last thing to
    // stop on shutdown.
    lifecycle.checkpoint("monitoring sink")?;
    let (metrics_shutdown_tx, _) = broadcast::channel(1);
    let metrics_enabled = state.config.lock().await.metrics.enabled;
    let metrics_task = if metrics_enabled {
        let metrics_state = state.clone();
        let shutdown_rx_metrics = metrics_shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await;
        }))
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
        None
    };

    // Step 2: the admin endpoint in minimal mode. The listener is bound
    // now; until the environment opens, only control-plane operations
    // (ping, configure, topology push) are answered.
    lifecycle.checkpoint("admin endpoint (minimal mode)")?;
    let (host, port, max_clients) = {
        let config = state.config.lock().await;
        (config.host.clone(), config.port, config.pools.max_clients)
    };
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("could not bind {host}:{port}"))?;
    info!("CitrineKV node listening on {host}:{port}.");
    let connection_permits = Arc::new(tokio::sync::Semaphore::new(max_clients));

    // Step 3: the replica-state listener. The channel is wired into the
    // environment at open; the logging consumer is spawned with the other
    // background tasks.
    lifecycle.checkpoint("replica-state listener")?;

    // Step 4: the replicated environment, gated by the persisted version
    // stamp. Recovery can make this the slowest step.
    lifecycle.checkpoint("replicated environment open")?;
    let data_dir = state.config.lock().await.data_dir.clone();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("could not create data directory '{data_dir}'"))?;
    let env = Arc::new(ReplicatedEnvManager::open(&data_dir, VersionStamp::current())?);
    info!("Replicated environment {} is open.", env.environment_id());
    state.set_env(env.clone());

    // Step 5: topology bootstrap.
    lifecycle.checkpoint("topology bootstrap")?;
    bootstrap_topology(&state).await?;
    let role = if state.is_master() {
        ReplicaState::Master
    } else if state.topology.current().is_some() {
        ReplicaState::Replica
    } else {
        ReplicaState::Unknown
    };
    env.note_state_change(role);

    // Step 6: security, which needs the topology to resolve node ids.
    lifecycle.checkpoint("security startup")?;
    state.login.set_resolver(Arc::new(TopologyNodeResolver {
        topology: state.topology.clone(),
    }));
    let security_enabled = state.config.lock().await.security.shared_secret.is_some();
    if security_enabled {
        info!("Request signing is enabled.");
    } else {
        warn!("Request signing is disabled; all unsigned requests are accepted.");
    }

    // Step 7: the request handler, advertised as the node's full service.
    lifecycle.checkpoint("request handler")?;
    let transport = Arc::new(TcpNodeTransport::new(RequestCodec::default()));
    let dispatcher_id = DispatcherId(format!("{}@{host}:{port}", state.node_id));
    let dispatcher_config = state.config.lock().await.dispatcher.clone();
    let dispatcher = Arc::new(Dispatcher::new(
        dispatcher_id,
        state.topology.clone(),
        transport.clone(),
        state.login.clone(),
        dispatcher_config,
    ));
    state.set_migration(Arc::new(MigrationService::new(env.clone(), dispatcher)));
    let handler = Arc::new(RequestHandler::new(state.clone(), transport));
    info!("Request handler registered as {}.", state.node_id);

    // Step 8: the login service is ready once its resolver is in place.
    lifecycle.checkpoint("login service")?;

    // Step 9: background collectors are spawned by the caller next.
    lifecycle.checkpoint("background collectors")?;
    let (task_permits, permit_wait) = {
        let config = state.config.lock().await;
        (config.pools.task_permits, config.pools.permit_wait)
    };
    let task_coordinator = Arc::new(TaskCoordinator::new(task_permits, permit_wait));

    Ok(ServerContext {
        state,
        lifecycle,
        handler,
        task_coordinator,
        listener,
        shutdown_tx,
        background_tasks,
        connection_permits,
        metrics_task,
        metrics_shutdown_tx,
    })
}

/// Resolves the node's starting topology. An admin-authority node loads
/// its own store; a genesis node with nothing local waits for an operator
/// `configure` call; everyone else serves control-plane traffic and takes
/// the first snapshot a peer pushes.
async fn bootstrap_topology(state: &Arc<NodeState>) -> Result<()> {
    let (is_authority, genesis, topology_file) = {
        let config = state.config.lock().await;
        (
            config.admin.authority,
            config.node.genesis,
            config.topology_file(),
        )
    };

    if is_authority {
        let store = Arc::new(TopologyStore::open(&topology_file)?);
        if let Some(topology) = store.current() {
            state.topology.publish(Arc::new(topology));
        }
        state.set_admin_store(store);
    }

    match state.topology.sequence() {
        Some(sequence) => {
            info!("Topology bootstrap complete at sequence {sequence}.");
        }
        None if genesis => {
            info!(
                "No local topology and this is the genesis node; waiting for an operator 'configure' call."
            );
        }
        None => {
            info!("No local topology; peers will push the current snapshot.");
        }
    }
    Ok(())
}
