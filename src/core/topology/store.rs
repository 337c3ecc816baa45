// src/core/topology/store.rs

//! The authoritative topology record kept by the admin. Stored as a JSON
//! file and rewritten atomically (temp file + rename), so a crashed update
//! never leaves a torn record behind.

use super::map::{GroupId, GroupInfo, PartitionId, Topology, ZoneId};
use crate::core::CitrineError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// JSON-friendly shape of the topology record. Maps keyed by integer
/// newtypes do not survive JSON, so assignments are flattened to lists.
#[derive(Debug, Serialize, Deserialize)]
struct SerializableTopology {
    sequence: u32,
    partitions: Vec<PartitionAssignment>,
    groups: Vec<GroupRecord>,
    zones: Vec<ZoneRecord>,
    #[serde(default)]
    migrating: Vec<PartitionAssignment>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionAssignment {
    partition: u32,
    group: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupRecord {
    group: u32,
    #[serde(flatten)]
    info: GroupInfo,
}

#[derive(Debug, Serialize, Deserialize)]
struct ZoneRecord {
    name: String,
    id: u32,
}

impl From<&Topology> for SerializableTopology {
    fn from(t: &Topology) -> Self {
        Self {
            sequence: t.sequence,
            partitions: t
                .partition_map
                .iter()
                .map(|(p, g)| PartitionAssignment {
                    partition: p.0,
                    group: g.0,
                })
                .collect(),
            groups: t
                .group_map
                .iter()
                .map(|(g, info)| GroupRecord {
                    group: g.0,
                    info: info.clone(),
                })
                .collect(),
            zones: t
                .zone_map
                .iter()
                .map(|(name, id)| ZoneRecord {
                    name: name.clone(),
                    id: id.0,
                })
                .collect(),
            migrating: t
                .migrating
                .iter()
                .map(|(p, g)| PartitionAssignment {
                    partition: p.0,
                    group: g.0,
                })
                .collect(),
        }
    }
}

impl From<SerializableTopology> for Topology {
    fn from(s: SerializableTopology) -> Self {
        Topology {
            sequence: s.sequence,
            partition_map: s
                .partitions
                .into_iter()
                .map(|a| (PartitionId(a.partition), GroupId(a.group)))
                .collect(),
            group_map: s
                .groups
                .into_iter()
                .map(|r| (GroupId(r.group), r.info))
                .collect(),
            zone_map: s
                .zones
                .into_iter()
                .map(|z| (z.name, ZoneId(z.id)))
                .collect::<BTreeMap<_, _>>(),
            migrating: s
                .migrating
                .into_iter()
                .map(|a| (PartitionId(a.partition), GroupId(a.group)))
                .collect(),
        }
    }
}

/// File-backed authoritative topology. All mutation goes through this store;
/// the sequence number is bumped on every accepted change.
#[derive(Debug)]
pub struct TopologyStore {
    path: PathBuf,
    current: Mutex<Option<Topology>>,
}

impl TopologyStore {
    /// Opens the store, loading the existing record if the file is present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CitrineError> {
        let path = path.as_ref().to_path_buf();
        let current = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let record: SerializableTopology = serde_json::from_str(&content)?;
            let topology: Topology = record.into();
            topology.validate()?;
            info!(
                "Loaded authoritative topology at sequence {} from {}.",
                topology.sequence,
                path.display()
            );
            Some(topology)
        } else {
            None
        };
        Ok(Self {
            path,
            current: Mutex::new(current),
        })
    }

    pub fn current(&self) -> Option<Topology> {
        self.current.lock().clone()
    }

    /// Installs an operator-supplied topology, e.g. at genesis. Rejects
    /// snapshots that do not advance the sequence number.
    pub fn install(&self, topology: Topology) -> Result<(), CitrineError> {
        topology.validate()?;
        let mut slot = self.current.lock();
        if let Some(existing) = slot.as_ref() {
            if existing.sequence >= topology.sequence {
                return Err(CitrineError::TopologyError(format!(
                    "refusing to install sequence {} over {}",
                    topology.sequence, existing.sequence
                )));
            }
        }
        self.write_file(&topology)?;
        *slot = Some(topology);
        Ok(())
    }

    /// Reassigns one partition to `target`, bumping the sequence number.
    /// Idempotent: replaying an already-applied reassignment returns
    /// `Ok(None)` and leaves the record untouched, which lets the migration
    /// coordinator skip the broadcast on replay.
    pub fn reassign_partition(
        &self,
        partition: PartitionId,
        target: GroupId,
    ) -> Result<Option<Topology>, CitrineError> {
        let mut slot = self.current.lock();
        let current = slot.as_ref().ok_or_else(|| {
            CitrineError::InvalidState("no authoritative topology to update".to_string())
        })?;

        if current.group_for_partition(partition)? == target {
            return Ok(None);
        }
        if !current.group_map.contains_key(&target) {
            return Err(CitrineError::TopologyError(format!(
                "cannot reassign {partition}: unknown {target}"
            )));
        }

        let mut updated = current.clone();
        updated.sequence += 1;
        updated.partition_map.insert(partition, target);
        updated.migrating.remove(&partition);
        self.write_file(&updated)?;
        info!(
            "Authoritative topology: {partition} reassigned to {target} at sequence {}.",
            updated.sequence
        );
        *slot = Some(updated.clone());
        Ok(Some(updated))
    }

    /// Marks or clears the in-migration flag for a partition.
    pub fn set_migrating(
        &self,
        partition: PartitionId,
        target: Option<GroupId>,
    ) -> Result<Topology, CitrineError> {
        let mut slot = self.current.lock();
        let current = slot.as_ref().ok_or_else(|| {
            CitrineError::InvalidState("no authoritative topology to update".to_string())
        })?;
        let mut updated = current.clone();
        updated.sequence += 1;
        match target {
            Some(group) => {
                updated.migrating.insert(partition, group);
            }
            None => {
                updated.migrating.remove(&partition);
            }
        }
        self.write_file(&updated)?;
        *slot = Some(updated.clone());
        Ok(updated)
    }

    /// Writes the record atomically: serialize to a temp file next to the
    /// target, then rename over it.
    fn write_file(&self, topology: &Topology) -> Result<(), CitrineError> {
        let record = SerializableTopology::from(topology);
        let content = serde_json::to_string_pretty(&record)?;
        let temp_path = self
            .path
            .with_extension(format!("tmp-{}", rand::random::<u32>()));
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
