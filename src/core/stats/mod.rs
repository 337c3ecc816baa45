// src/core/stats/mod.rs

//! Operator-facing statistics: the sampled stat registry, the CSV capture
//! files, and the event-key encoding used in operator logs.

pub mod csv;
pub mod event_key;

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Server-wide counters plus the sampled values the collector flushes to
/// CSV. Sampled stats are keyed `<group>:<stat>`, matching the CSV column
/// headers.
#[derive(Debug, Default)]
pub struct StatsState {
    pub requests_handled: AtomicU64,
    pub requests_forwarded: AtomicU64,
    pub requests_rejected: AtomicU64,
    sampled: DashMap<String, serde_json::Value>,
}

impl StatsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_handled(&self) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_forwarded(&self) {
        self.requests_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a sampled stat under `<group>:<stat>`.
    pub fn record(&self, group: &str, stat: &str, value: serde_json::Value) {
        self.sampled.insert(format!("{group}:{stat}"), value);
    }

    /// A point-in-time copy of everything the collector should flush, in
    /// column order.
    pub fn sample(&self) -> BTreeMap<String, serde_json::Value> {
        let mut out: BTreeMap<String, serde_json::Value> = self
            .sampled
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.insert(
            "node:requestsHandled".to_string(),
            self.requests_handled.load(Ordering::Relaxed).into(),
        );
        out.insert(
            "node:requestsForwarded".to_string(),
            self.requests_forwarded.load(Ordering::Relaxed).into(),
        );
        out.insert(
            "node:requestsRejected".to_string(),
            self.requests_rejected.load(Ordering::Relaxed).into(),
        );
        out
    }
}
