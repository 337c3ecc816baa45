// src/core/stats/csv.rs

//! CSV capture files for sampled statistics. One row per capture interval;
//! columns are fixed at creation from the `<group>:<stat>` names. Files
//! roll over by size, and rolled files are pruned by count.

use crate::core::CitrineError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

/// Where capture files live and when they roll.
#[derive(Debug, Clone)]
pub struct StatsFileConfig {
    pub dir: PathBuf,
    pub base_name: String,
    pub max_file_size: u64,
    pub max_files: usize,
}

/// Appends capture rows to `<dir>/<base_name>.csv`, rolling the file aside
/// when it outgrows the size limit.
#[derive(Debug)]
pub struct StatCsvWriter {
    config: StatsFileConfig,
    columns: Vec<String>,
    file: File,
    bytes_written: u64,
}

impl StatCsvWriter {
    /// Opens the capture file, writing the header row when starting fresh.
    pub fn create(
        config: StatsFileConfig,
        columns: Vec<String>,
    ) -> Result<Self, CitrineError> {
        std::fs::create_dir_all(&config.dir)?;
        let path = Self::active_path(&config);
        let existing_len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut bytes_written = existing_len;
        if existing_len == 0 {
            let header = Self::header_row(&columns);
            file.write_all(header.as_bytes())?;
            bytes_written = header.len() as u64;
        }
        Ok(Self {
            config,
            columns,
            file,
            bytes_written,
        })
    }

    fn active_path(config: &StatsFileConfig) -> PathBuf {
        config.dir.join(format!("{}.csv", config.base_name))
    }

    fn header_row(columns: &[String]) -> String {
        let mut header = String::from("time");
        for column in columns {
            header.push(',');
            header.push_str(column);
        }
        header.push('\n');
        header
    }

    /// Appends one capture row. A stat missing from `values` is emitted as
    /// a single space, keeping the column positions stable.
    pub fn append_row(
        &mut self,
        time: DateTime<Utc>,
        values: &BTreeMap<String, Value>,
    ) -> Result<(), CitrineError> {
        let mut row = time.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        for column in &self.columns {
            row.push(',');
            match values.get(column) {
                Some(value) => row.push_str(&Self::render(value)),
                None => row.push(' '),
            }
        }
        row.push('\n');
        self.file.write_all(row.as_bytes())?;
        self.bytes_written += row.len() as u64;

        if self.bytes_written >= self.config.max_file_size {
            self.roll_over()?;
        }
        Ok(())
    }

    /// Renders a stat value for one cell. JSON-valued stats can contain
    /// commas; those are substituted with semicolons to keep the column
    /// structure parseable.
    fn render(value: &Value) -> String {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered.replace(',', ";").replace('\n', " ")
    }

    /// Moves the active file aside under a timestamped name, starts a fresh
    /// file with the header, and prunes the oldest rolled files beyond the
    /// configured count.
    fn roll_over(&mut self) -> Result<(), CitrineError> {
        self.file.flush()?;
        let active = Self::active_path(&self.config);
        let rolled = self.config.dir.join(format!(
            "{}.{}.csv",
            self.config.base_name,
            Utc::now().timestamp_millis()
        ));
        std::fs::rename(&active, &rolled)?;
        info!("Rolled stats capture file to {}.", rolled.display());

        self.file = OpenOptions::new().create(true).append(true).open(&active)?;
        let header = Self::header_row(&self.columns);
        self.file.write_all(header.as_bytes())?;
        self.bytes_written = header.len() as u64;

        self.prune_rolled_files();
        Ok(())
    }

    fn prune_rolled_files(&self) {
        let prefix = format!("{}.", self.config.base_name);
        let mut rolled: Vec<PathBuf> = match std::fs::read_dir(&self.config.dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
                        && *p != Self::active_path(&self.config)
                })
                .collect(),
            Err(e) => {
                warn!("Could not scan stats directory for pruning: {e}");
                return;
            }
        };
        rolled.sort();
        while rolled.len() > self.config.max_files {
            let oldest = rolled.remove(0);
            if let Err(e) = std::fs::remove_file(&oldest) {
                warn!("Could not prune rolled stats file {}: {e}", oldest.display());
            }
        }
    }
}
