// src/core/tasks/key_distribution.rs

//! Samples per-partition record counts into the stats registry, where the
//! collector picks them up for the CSV capture and the metrics endpoint.

use crate::core::metrics;
use crate::core::state::NodeState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

pub struct KeyDistributionSampler {
    state: Arc<NodeState>,
    interval: Duration,
}

impl KeyDistributionSampler {
    pub fn new(state: Arc<NodeState>, interval: Duration) -> Self {
        Self { state, interval }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Key distribution sampler started with a {:?} interval.",
            self.interval
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.sample(),
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    fn sample(&self) {
        let Ok(env) = self.state.env() else {
            // Still in minimal mode; nothing to sample yet.
            return;
        };
        let mut partitions = env.owned_partitions();
        partitions.sort();
        metrics::OWNED_PARTITIONS.set(partitions.len() as f64);

        let distribution: serde_json::Map<String, serde_json::Value> = partitions
            .into_iter()
            .map(|p| (p.to_string(), env.record_count(p).into()))
            .collect();
        self.state.stats.record(
            "node",
            "keyDistribution",
            serde_json::Value::Object(distribution),
        );
    }
}
