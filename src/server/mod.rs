// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection;
mod connection_loop;
mod context;
mod initialization;
mod lifecycle;
mod metrics_server;
mod spawner;

pub use context::ServerContext;
pub use lifecycle::{ServiceLifecycle, ServicePhase};

/// The main node startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Walk the ordered startup checkpoints: state, version gate,
    //    environment, topology bootstrap, services.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Start the main connection acceptance loop. This runs until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
