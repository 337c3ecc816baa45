// src/config.rs

//! Manages node configuration: loading, defaulting, and validation.

use crate::core::dispatch::DispatcherConfig;
use crate::core::migration::RetryDelays;
use crate::core::topology::{GroupId, NodeId, ZoneId};
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// This node's identity within the cluster.
#[derive(Deserialize, Debug, Clone)]
pub struct NodeConfig {
    /// The replication group this node belongs to.
    #[serde(default)]
    pub group: u32,
    /// The node's position in the group's ordered member list.
    #[serde(default)]
    pub index: u8,
    /// The zone this node runs in.
    #[serde(default)]
    pub zone: u32,
    /// A genesis node with no local topology waits for an operator
    /// `configure` call instead of expecting a peer to push one.
    #[serde(default)]
    pub genesis: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            group: 0,
            index: 0,
            zone: 0,
            genesis: false,
        }
    }
}

impl NodeConfig {
    pub fn node_id(&self) -> NodeId {
        NodeId {
            group: GroupId(self.group),
            index: self.index,
        }
    }

    pub fn zone_id(&self) -> ZoneId {
        ZoneId(self.zone)
    }
}

/// Worker-pool sizing and the maintenance permit discipline.
#[derive(Deserialize, Debug, Clone)]
pub struct PoolConfig {
    /// Bound on concurrently executing request handlers.
    #[serde(default = "default_handler_pool_size")]
    pub handler_pool_size: usize,
    /// Bound on accepted client connections.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Permits available to background maintenance tasks.
    #[serde(default = "default_task_permits")]
    pub task_permits: usize,
    /// How long a maintenance task waits for a permit before skipping its
    /// cycle.
    #[serde(with = "humantime_serde", default = "default_permit_wait")]
    pub permit_wait: Duration,
}

fn default_handler_pool_size() -> usize {
    64
}
fn default_max_clients() -> usize {
    10000
}
fn default_task_permits() -> usize {
    2
}
fn default_permit_wait() -> Duration {
    Duration::from_secs(5)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            handler_pool_size: default_handler_pool_size(),
            max_clients: default_max_clients(),
            task_permits: default_task_permits(),
            permit_wait: default_permit_wait(),
        }
    }
}

/// Statistics capture to CSV.
#[derive(Deserialize, Debug, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_enabled")]
    pub enabled: bool,
    /// Capture directory; defaults to `<data_dir>/stats` when empty.
    #[serde(default)]
    pub dir: String,
    #[serde(with = "humantime_serde", default = "default_capture_interval")]
    pub capture_interval: Duration,
    /// The capture file rolls over past this size.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Rolled files kept before the oldest is pruned.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// The `<group>:<stat>` columns captured. Order fixes the CSV header.
    #[serde(default = "default_stat_columns")]
    pub columns: Vec<String>,
    #[serde(with = "humantime_serde", default = "default_sample_interval")]
    pub key_distribution_interval: Duration,
}

fn default_stats_enabled() -> bool {
    true
}
fn default_capture_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_max_file_size() -> u64 {
    4 * 1024 * 1024
}
fn default_max_files() -> usize {
    10
}
fn default_stat_columns() -> Vec<String> {
    vec![
        "node:requestsHandled".to_string(),
        "node:requestsForwarded".to_string(),
        "node:requestsRejected".to_string(),
        "node:keyDistribution".to_string(),
    ]
}
fn default_sample_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: default_stats_enabled(),
            dir: String::new(),
            capture_interval: default_capture_interval(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            columns: default_stat_columns(),
            key_distribution_interval: default_sample_interval(),
        }
    }
}

/// Request signing between nodes and clients.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SecurityConfig {
    /// When set, every non-ping request must carry a signature under this
    /// secret. When unset, only unsigned requests are accepted.
    #[serde(default)]
    pub shared_secret: Option<String>,
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    8878
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

/// The admin role: whether this node hosts the authoritative topology.
#[derive(Deserialize, Debug, Clone)]
pub struct AdminConfig {
    #[serde(default)]
    pub authority: bool,
    /// Authoritative topology file; defaults to `<data_dir>/topology.json`
    /// when empty.
    #[serde(default)]
    pub topology_file: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            authority: false,
            topology_file: String::new(),
        }
    }
}

/// The node's full configuration, loaded from a TOML file.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub pools: PoolConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub migration: RetryDelays,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(with = "humantime_serde", default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8870
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_data_dir() -> String {
    "citrinekv_data".to_string()
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            node: NodeConfig::default(),
            pools: PoolConfig::default(),
            dispatcher: DispatcherConfig::default(),
            migration: RetryDelays::default(),
            stats: StatsConfig::default(),
            security: SecurityConfig::default(),
            metrics: MetricsConfig::default(),
            admin: AdminConfig::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("could not read configuration file '{path}'"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("could not parse configuration file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("'port' must be non-zero"));
        }
        if self.pools.handler_pool_size == 0 {
            return Err(anyhow!("'pools.handler_pool_size' must be non-zero"));
        }
        if self.pools.task_permits == 0 {
            return Err(anyhow!("'pools.task_permits' must be non-zero"));
        }
        if self.stats.enabled && self.stats.max_files == 0 {
            return Err(anyhow!("'stats.max_files' must be non-zero when stats are enabled"));
        }
        if self.dispatcher.default_ttl < 0 {
            return Err(anyhow!("'dispatcher.default_ttl' cannot be negative"));
        }
        Ok(())
    }

    /// The directory stats capture files go to.
    pub fn stats_dir(&self) -> PathBuf {
        if self.stats.dir.is_empty() {
            PathBuf::from(&self.data_dir).join("stats")
        } else {
            PathBuf::from(&self.stats.dir)
        }
    }

    /// The authoritative topology file, for nodes with the admin role.
    pub fn topology_file(&self) -> PathBuf {
        if self.admin.topology_file.is_empty() {
            PathBuf::from(&self.data_dir).join("topology.json")
        } else {
            PathBuf::from(&self.admin.topology_file)
        }
    }
}
