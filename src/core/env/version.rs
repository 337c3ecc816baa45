// src/core/env/version.rs

//! The persisted version stamp. A small, non-replicated local database
//! holding a single record; consulted before the replicated environment is
//! allowed to open.

use crate::core::CitrineError;
use crc::{CRC_32_ISO_HDLC, Crc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// The fixed name of the local version database file.
pub const VERSION_DATABASE_NAME: &str = "VersionDatabase";

/// The fixed key the stamp record is stored under.
pub const VERSION_KEY: &str = "local.version";

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// The code or on-disk software version.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct VersionStamp {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl VersionStamp {
    pub fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The version this binary was built as.
    pub fn current() -> Self {
        let mut parts = env!("CARGO_PKG_VERSION")
            .split('.')
            .map(|p| p.parse::<u16>().unwrap_or(0));
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }

    /// The default upgrade predicate: the code may be at most one major
    /// version ahead of the stamp, and never behind it.
    pub fn is_upgrade_compatible(stored: &VersionStamp, code: &VersionStamp) -> bool {
        code >= stored && code.major.saturating_sub(stored.major) <= 1
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The single-record local database. Not replicated, not transactional;
/// each write replaces the whole file and is fsynced before the rename
/// lands it.
#[derive(Debug)]
pub struct VersionDatabase {
    path: PathBuf,
}

impl VersionDatabase {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(VERSION_DATABASE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stamp, or `None` on a first-time open. A record whose
    /// checksum or key does not match is treated as corruption, not as a
    /// missing stamp.
    pub fn read(&self) -> Result<Option<VersionStamp>, CitrineError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < 4 {
            return Err(CitrineError::Internal(format!(
                "version database {} is truncated",
                self.path.display()
            )));
        }
        let (record, trailer) = bytes.split_at(bytes.len() - 4);
        let stored_crc = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if CRC32.checksum(record) != stored_crc {
            return Err(CitrineError::Internal(format!(
                "version database {} failed its checksum",
                self.path.display()
            )));
        }
        let ((key, stamp), _): ((String, VersionStamp), usize) =
            bincode::decode_from_slice(record, bincode::config::standard())?;
        if key != VERSION_KEY {
            return Err(CitrineError::Internal(format!(
                "version database {} holds unexpected key '{key}'",
                self.path.display()
            )));
        }
        Ok(Some(stamp))
    }

    /// Writes the stamp: temp file, fsync, rename. An in-memory upgrade
    /// must never outrun the persisted stamp, so any failure here is
    /// surfaced to the caller and aborts startup.
    pub fn write(&self, stamp: &VersionStamp) -> Result<(), CitrineError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = bincode::encode_to_vec(
            (VERSION_KEY.to_string(), *stamp),
            bincode::config::standard(),
        )?;
        let crc = CRC32.checksum(&record);

        let temp_path = self
            .path
            .with_extension(format!("tmp-{}", rand::random::<u32>()));
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)?;
        file.write_all(&record)?;
        file.write_all(&crc.to_be_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            // The rename must itself be durable before the environment opens.
            File::open(parent)?.sync_all()?;
        }
        info!("Version stamp {stamp} written to {}.", self.path.display());
        Ok(())
    }
}
