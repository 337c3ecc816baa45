// src/core/tasks/stats_collector.rs

//! Periodically flushes the sampled statistics registry to the CSV
//! capture file. Each flush holds a task-coordinator permit so capture
//! never competes with client traffic unboundedly.

use super::permits::TaskCoordinator;
use crate::core::CitrineError;
use crate::core::state::NodeState;
use crate::core::stats::csv::StatCsvWriter;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The CSV capture task.
pub struct StatsCollector {
    state: Arc<NodeState>,
    coordinator: Arc<TaskCoordinator>,
    writer: StatCsvWriter,
    interval: Duration,
}

impl StatsCollector {
    pub fn new(
        state: Arc<NodeState>,
        coordinator: Arc<TaskCoordinator>,
        writer: StatCsvWriter,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            coordinator,
            writer,
            interval,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Stats collector started with a {:?} capture interval.",
            self.interval
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.capture().await {
                        Ok(()) => {}
                        Err(CitrineError::Timeout(_)) => {
                            warn!("Stats capture skipped: no permit within the configured wait.");
                        }
                        Err(CitrineError::ThreadInterrupted) => {
                            // The permit pool is gone; the environment is
                            // shutting down underneath us.
                            error!("Stats collector interrupted while waiting on its permit.");
                            return;
                        }
                        Err(e) => {
                            warn!("Stats capture failed: {e}");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Stats collector shutting down; flushing a final capture.");
                    let _ = self.capture().await;
                    return;
                }
            }
        }
    }

    async fn capture(&mut self) -> Result<(), CitrineError> {
        let _permit = self.coordinator.acquire().await?;
        let sample = self.state.stats.sample();
        self.writer.append_row(Utc::now(), &sample)
    }
}
