// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling
//! graceful shutdown. Stop is the reverse of start: the data plane drains
//! first, the environment detaches, and the monitoring sink goes last.

use super::connection::ConnectionHandler;
use super::context::ServerContext;
use crate::core::env::ReplicaState;
use crate::core::metrics;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

// Platform-specific signal handling imports
#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
/// On Windows, it listens for Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("Failed to create Ctrl+C stream");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown."); } } => {},
    }
}

/// The main loop: accept connections until a shutdown signal or a failed
/// background task, then unwind in reverse start order.
pub async fn run(mut ctx: ServerContext) {
    ctx.lifecycle.mark_running();
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased; // Prioritize shutdown signals over other events.

            _ = await_shutdown_signal() => {
                break;
            },

            // Monitor background tasks for unexpected termination.
            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("A background task has completed. This is expected for tasks whose features are disabled."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            // Accept new incoming TCP connections.
            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
                            warn!("Connection from {addr} refused: client limit reached.");
                            continue;
                        };
                        metrics::CONNECTED_CLIENTS.inc();

                        let handler = ctx.handler.clone();
                        let shutdown_rx = ctx.shutdown_tx.subscribe();
                        client_tasks.spawn(async move {
                            let mut connection =
                                ConnectionHandler::new(socket, addr, handler, shutdown_rx);
                            if let Err(e) = connection.run().await {
                                warn!("Connection from {addr} terminated: {e}");
                            }
                            metrics::CONNECTED_CLIENTS.dec();
                            drop(permit);
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            // Reap completed client tasks.
            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!("A connection handler panicked: {e:?}");
                    }
                }
            },
        }
    }

    // --- Graceful shutdown, reverse of the start order ---
    ctx.lifecycle.request_stop();
    let shutdown_timeout = ctx.state.config.lock().await.shutdown_timeout;

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No task was listening for the shutdown signal.");
    }

    // Stop accepting and drain client connections.
    drop(ctx.listener);
    client_tasks.shutdown().await;
    info!("All client connections closed.");

    // Background tasks get a bounded grace period, then are abandoned.
    if tokio::time::timeout(shutdown_timeout, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!(
            "Timed out after {:?} waiting for background tasks; abandoning the stragglers.",
            shutdown_timeout
        );
    }

    // No more maintenance once the tasks are gone.
    ctx.task_coordinator.shut_down();

    // Detach the environment; its last state change is still reported
    // because the monitoring sink is the very last thing to go.
    if let Ok(env) = ctx.state.env() {
        env.note_state_change(ReplicaState::Detached);
    }

    ctx.lifecycle.mark_stopped();

    // The monitoring sink goes last.
    if let Some(metrics_task) = ctx.metrics_task {
        let _ = ctx.metrics_shutdown_tx.send(());
        let _ = metrics_task.await;
    }
    info!("Node shutdown complete.");
}
