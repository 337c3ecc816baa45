// src/core/migration/service.rs

//! The node-side half of a migration: the target master pulls the
//! partition's records from the source group and installs them; the source
//! master answers status probes and cancel requests.

use super::{MigrationState, MigrationStateReport};
use crate::core::CitrineError;
use crate::core::dispatch::Dispatcher;
use crate::core::env::ReplicatedEnvManager;
use crate::core::request::{Consistency, OpResult, Operation, Request, RequestTarget};
use crate::core::topology::{GroupId, PartitionId};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{error, info};

/// What this node knows about migrations it is a party to.
#[derive(Debug, Default)]
pub struct MigrationTable {
    /// Inbound pulls, keyed by partition. Present on the target master.
    inbound: DashMap<PartitionId, InboundMigration>,
    /// Outbound hand-offs cancelled under this node, keyed by partition
    /// with the abandoned target as value. Present on the source master.
    cancelled_outbound: DashMap<PartitionId, GroupId>,
}

#[derive(Debug, Clone)]
struct InboundMigration {
    source: GroupId,
    report: MigrationStateReport,
}

/// Executes migration operations against the local environment.
pub struct MigrationService {
    table: Arc<MigrationTable>,
    env: Arc<ReplicatedEnvManager>,
    /// Used by the inbound task to read the partition off the source group.
    dispatcher: Arc<Dispatcher>,
}

impl MigrationService {
    pub fn new(env: Arc<ReplicatedEnvManager>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            table: Arc::new(MigrationTable::default()),
            env,
            dispatcher,
        }
    }

    /// Starts (or reports on) an inbound migration. Idempotent: a repeated
    /// start for the same partition reports the existing pull rather than
    /// spawning a second one.
    pub fn start_inbound(&self, partition: PartitionId, source: GroupId) -> MigrationStateReport {
        if let Some(existing) = self.table.inbound.get(&partition) {
            info!(
                "Inbound migration of {partition} from {} already underway; reporting its state.",
                existing.source
            );
            return existing.report.clone();
        }

        let report = MigrationStateReport::of(MigrationState::Pending);
        self.table.inbound.insert(
            partition,
            InboundMigration {
                source,
                report: report.clone(),
            },
        );
        self.env.mark_pending_open(partition);

        let table = self.table.clone();
        let env = self.env.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            Self::set_inbound_state(&table, partition, MigrationState::Running, None);
            match Self::pull_partition(&dispatcher, partition, source).await {
                Ok(records) => {
                    info!(
                        "Installed {} records for migrated-in {partition} from {source}.",
                        records.len()
                    );
                    env.install_partition(partition, records);
                    env.clear_pending_open(partition);
                    Self::set_inbound_state(&table, partition, MigrationState::Succeeded, None);
                }
                Err(e) => {
                    error!("Inbound migration of {partition} failed: {e}");
                    env.clear_pending_open(partition);
                    Self::set_inbound_state(
                        &table,
                        partition,
                        MigrationState::Error,
                        Some(e.to_string()),
                    );
                }
            }
        });

        report
    }

    async fn pull_partition(
        dispatcher: &Dispatcher,
        partition: PartitionId,
        source: GroupId,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CitrineError> {
        let payload = Bytes::from(Operation::PartitionSnapshot { partition }.encode()?);
        let mut opts = crate::core::request::RequestOptions::new(dispatcher.id().clone());
        opts.no_charge = true;
        let request = Request::read(
            RequestTarget::Group(source),
            Consistency::Absolute,
            payload,
            opts,
        )?;
        match dispatcher.dispatch(request).await? {
            OpResult::Snapshot(records) => Ok(records),
            other => Err(CitrineError::MigrationError(format!(
                "unexpected snapshot result: {other:?}"
            ))),
        }
    }

    fn set_inbound_state(
        table: &MigrationTable,
        partition: PartitionId,
        state: MigrationState,
        cause: Option<String>,
    ) {
        if let Some(mut entry) = table.inbound.get_mut(&partition) {
            entry.report = MigrationStateReport { state, cause };
        }
    }

    /// The target master's answer to a status poll. A node with no record
    /// of the migration answers `UNKNOWN`, which the coordinator treats as
    /// "a replica may have answered; re-ask the master".
    pub fn status(&self, partition: PartitionId) -> MigrationStateReport {
        self.table
            .inbound
            .get(&partition)
            .map(|m| m.report.clone())
            .unwrap_or_else(|| MigrationStateReport::of(MigrationState::Unknown))
    }

    /// The source master's confirmation that an outbound migration is
    /// abandoned. Idempotent; records the cancel so a replayed request
    /// confirms again.
    pub fn cancel_outbound(&self, partition: PartitionId, target: GroupId) -> bool {
        self.table.cancelled_outbound.insert(partition, target);
        info!("Outbound migration of {partition} toward {target} cancelled.");
        true
    }

    /// Whether an outbound migration was cancelled under this node.
    pub fn outbound_cancelled(&self, partition: PartitionId) -> bool {
        self.table.cancelled_outbound.contains_key(&partition)
    }

    /// The target's answer to a cleanup probe: the inbound state decides
    /// whether the coordinator finishes the migration or unwinds it.
    pub fn can_cancel(&self, partition: PartitionId) -> MigrationStateReport {
        self.status(partition)
    }
}
