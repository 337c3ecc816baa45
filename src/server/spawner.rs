// src/server/spawner.rs

//! Spawns the node's long-running background tasks.

use super::context::ServerContext;
use crate::core::stats::csv::{StatCsvWriter, StatsFileConfig};
use crate::core::tasks::key_distribution::KeyDistributionSampler;
use crate::core::tasks::stats_collector::StatsCollector;
use anyhow::Result;
use tracing::info;

/// Spawns all background tasks into the context's JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    let config = state.config.lock().await.clone();

    // --- Replica-state listener ---
    if let Ok(env) = state.env() {
        let mut state_rx = env.subscribe_state();
        let mut shutdown_rx_listener = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            loop {
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        info!("Replica state is now {}.", *state_rx.borrow());
                    }
                    _ = shutdown_rx_listener.recv() => break,
                }
            }
            Ok(())
        });
    }

    // --- Statistics capture ---
    if config.stats.enabled {
        let writer = StatCsvWriter::create(
            StatsFileConfig {
                dir: config.stats_dir(),
                base_name: "citrinekv_stats".to_string(),
                max_file_size: config.stats.max_file_size,
                max_files: config.stats.max_files,
            },
            config.stats.columns.clone(),
        )?;
        let collector = StatsCollector::new(
            state.clone(),
            ctx.task_coordinator.clone(),
            writer,
            config.stats.capture_interval,
        );
        let shutdown_rx_stats = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            collector.run(shutdown_rx_stats).await;
            Ok(())
        });

        let sampler = KeyDistributionSampler::new(
            state.clone(),
            config.stats.key_distribution_interval,
        );
        let shutdown_rx_sampler = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            sampler.run(shutdown_rx_sampler).await;
            Ok(())
        });
    } else {
        info!("Statistics capture is disabled in the configuration.");
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
