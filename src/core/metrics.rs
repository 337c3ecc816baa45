// src/core/metrics.rs

//! Defines and registers Prometheus metrics for node monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire process lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of clients currently connected to this node.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("citrinekv_connected_clients", "Number of currently connected clients.").unwrap();
    /// The sequence number of the topology snapshot this node holds.
    pub static ref TOPOLOGY_SEQUENCE: Gauge =
        register_gauge!("citrinekv_topology_sequence", "Sequence number of the current topology snapshot.").unwrap();
    /// The number of partitions this node currently stores.
    pub static ref OWNED_PARTITIONS: Gauge =
        register_gauge!("citrinekv_owned_partitions", "Number of partitions held locally.").unwrap();

    // --- Counters ---
    /// Requests handled, labeled by outcome classification.
    pub static ref REQUESTS_TOTAL: CounterVec =
        register_counter_vec!("citrinekv_requests_total", "Requests handled, labeled by outcome.", &["outcome"]).unwrap();
    /// Requests forwarded within a group toward the master.
    pub static ref FORWARDS_TOTAL: Counter =
        register_counter!("citrinekv_forwards_total", "Requests forwarded within a replication group.").unwrap();
    /// Dispatch attempts retried after a recoverable failure.
    pub static ref DISPATCH_RETRIES_TOTAL: Counter =
        register_counter!("citrinekv_dispatch_retries_total", "Client-side dispatch retries.").unwrap();
    /// Topology snapshots accepted by this node's manager.
    pub static ref TOPOLOGY_PUBLICATIONS_TOTAL: Counter =
        register_counter!("citrinekv_topology_publications_total", "Topology snapshots published locally.").unwrap();
    /// Migrations finished, labeled by terminal state.
    pub static ref MIGRATIONS_TOTAL: CounterVec =
        register_counter_vec!("citrinekv_migrations_total", "Partition migrations finished, labeled by terminal state.", &["state"]).unwrap();
    /// Login cache lookups that found an existing handle.
    pub static ref LOGIN_CACHE_HITS_TOTAL: Counter =
        register_counter!("citrinekv_login_cache_hits_total", "Login cache hits.").unwrap();
    /// Login cache lookups that had to create a handle.
    pub static ref LOGIN_CACHE_MISSES_TOTAL: Counter =
        register_counter!("citrinekv_login_cache_misses_total", "Login cache misses.").unwrap();

    // --- Histograms ---
    /// A histogram of request handling latencies.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("citrinekv_request_latency_seconds", "Latency of request handling in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
