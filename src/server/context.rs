// src/server/context.rs

use crate::core::handler::RequestHandler;
use crate::core::state::NodeState;
use crate::core::tasks::permits::TaskCoordinator;
use crate::server::lifecycle::ServiceLifecycle;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the node's main loop.
pub struct ServerContext {
    pub state: Arc<NodeState>,
    pub lifecycle: Arc<ServiceLifecycle>,
    pub handler: Arc<RequestHandler>,
    pub task_coordinator: Arc<TaskCoordinator>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub connection_permits: Arc<tokio::sync::Semaphore>,
    /// The monitoring sink runs outside the shared JoinSet and has its own
    /// shutdown signal: it starts first and stops last, so shutdown events
    /// are still reported.
    pub metrics_task: Option<tokio::task::JoinHandle<()>>,
    pub metrics_shutdown_tx: broadcast::Sender<()>,
}
