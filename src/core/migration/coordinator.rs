// src/core/migration/coordinator.rs

//! The admin-side migration coordinator: a retrying, idempotent state
//! machine that asks the target group to pull a partition over, updates the
//! authoritative topology once the pull succeeds, and broadcasts the new
//! snapshot. Cancellation unwinds through a cleanup probe of the target.

use super::locks::GroupLockTable;
use super::runner::{MigrationPlan, NextJob, RetryDelays, StepMachine, drive};
use super::{MigrationRecord, MigrationState, MigrationStateReport, RecordState};
use crate::core::CitrineError;
use crate::core::metrics;
use crate::core::topology::{GroupId, NodeId, PartitionId, TopologyManager};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Cleanup gives up after this many fruitless probes of the target.
const MAX_CLEANUP_ATTEMPTS: u32 = 10;

/// The migration RPCs the coordinator issues against shard masters.
#[async_trait]
pub trait ShardRpc: Send + Sync {
    async fn start_migration(
        &self,
        master: NodeId,
        partition: PartitionId,
        source: GroupId,
    ) -> Result<MigrationStateReport, CitrineError>;

    async fn migration_status(
        &self,
        master: NodeId,
        partition: PartitionId,
    ) -> Result<MigrationStateReport, CitrineError>;

    /// Asks the source master to abandon the outbound migration. `true`
    /// once the source has confirmed.
    async fn cancel_migration(
        &self,
        source_master: NodeId,
        partition: PartitionId,
        target: GroupId,
    ) -> Result<bool, CitrineError>;

    /// Probes the target for whether the inbound migration can still be
    /// abandoned.
    async fn can_cancel(
        &self,
        master: NodeId,
        partition: PartitionId,
    ) -> Result<MigrationStateReport, CitrineError>;
}

/// The authoritative topology the coordinator commits results into.
#[async_trait]
pub trait TopologyAuthority: Send + Sync {
    /// Moves the partition to `target` in the admin record. `Ok(true)` when
    /// the record changed; `Ok(false)` when it already reflected the target
    /// (an idempotent replay), in which case the broadcast is skipped.
    async fn reassign_partition(
        &self,
        partition: PartitionId,
        target: GroupId,
    ) -> Result<bool, CitrineError>;

    /// Pushes the current authoritative snapshot to a quorum of nodes.
    async fn broadcast(&self) -> Result<(), CitrineError>;
}

/// How one migration ended, from the plan's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MigrationEnd {
    /// The partition moved and the authoritative topology reflects it.
    Succeeded,
    /// The target reported an error and the source confirmed the cancel.
    Errored,
    /// The plan was interrupted before the migration converged.
    Interrupted,
}

/// The finished record plus the plan-level classification.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub end: MigrationEnd,
    pub record: MigrationRecord,
}

/// The steps of the migration state machine. Every step is idempotent:
/// re-running it against the same cluster state lands in the same place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    RequestSend,
    StatusPoll,
    CancelSource,
    TopologyUpdate,
    TopologyBroadcast,
}

/// Drives one partition's move from `source` to `target`.
pub struct MigrationCoordinator {
    topology: Arc<TopologyManager>,
    rpc: Arc<dyn ShardRpc>,
    authority: Arc<dyn TopologyAuthority>,
    locks: Arc<GroupLockTable>,
    delays: RetryDelays,
    record: MigrationRecord,
    /// Once the authoritative record is updated, an interrupt no longer
    /// unwinds through cleanup; the migration itself is already decided.
    topology_updated: bool,
}

impl MigrationCoordinator {
    pub fn new(
        record: MigrationRecord,
        topology: Arc<TopologyManager>,
        rpc: Arc<dyn ShardRpc>,
        authority: Arc<dyn TopologyAuthority>,
        locks: Arc<GroupLockTable>,
        delays: RetryDelays,
    ) -> Self {
        Self {
            topology,
            rpc,
            authority,
            locks,
            delays,
            record,
            topology_updated: false,
        }
    }

    /// Runs the migration to a terminal state. Holds both group locks for
    /// the duration; they release when this returns, whatever the outcome.
    pub async fn run(mut self, plan: &MigrationPlan) -> MigrationOutcome {
        let source = self.record.source;
        let target = self.record.target;
        let _locks = self.locks.lock_pair(source, target).await;
        info!(
            "Migration of {} from {source} to {target} holds both group locks.",
            self.record.partition
        );

        // A failed source shard has nothing to move; ownership is
        // reassigned administratively.
        let initial = if self.record.failed_source {
            info!("{source} is marked failed; proceeding straight to the topology update.");
            Step::TopologyUpdate
        } else {
            Step::RequestSend
        };

        let end = match drive(&mut self, plan, initial).await {
            Ok(()) => match self.record.state {
                RecordState::Succeeded => MigrationEnd::Succeeded,
                RecordState::Errored => MigrationEnd::Errored,
                other => {
                    warn!("Migration finished in unexpected record state {other}.");
                    MigrationEnd::Errored
                }
            },
            Err(CitrineError::Interrupted) if self.topology_updated => {
                // The move is committed; only the broadcast was cut short.
                MigrationEnd::Interrupted
            }
            Err(CitrineError::Interrupted) => self.cleanup().await,
            Err(e) => {
                self.record.state = RecordState::Errored;
                self.record.cause = Some(e.to_string());
                MigrationEnd::Errored
            }
        };

        let end_label = end.to_string();
        metrics::MIGRATIONS_TOTAL
            .with_label_values(&[end_label.as_str()])
            .inc();
        info!(
            "Migration of {} from {source} to {target} finished: {end}.",
            self.record.partition
        );
        MigrationOutcome {
            end,
            record: self.record,
        }
    }

    fn target_master(&self) -> Option<NodeId> {
        self.topology
            .current()
            .and_then(|t| t.master_of(self.record.target))
    }

    fn source_master(&self) -> Option<NodeId> {
        self.topology
            .current()
            .and_then(|t| t.master_of(self.record.source))
    }

    /// Records the operator-visible status strings while a migration is
    /// under way. Best effort; a failed detail fetch never fails the step.
    async fn observe_details(&mut self, target_report: &MigrationStateReport) {
        self.record.observed_target_status = Some(target_report.state.to_string());
        if let Some(source_master) = self.source_master() {
            if let Ok(report) = self
                .rpc
                .migration_status(source_master, self.record.partition)
                .await
            {
                self.record.observed_source_status = Some(report.state.to_string());
            }
        }
    }

    /// The cleanup path, entered when the plan is cancelled mid-flight.
    /// Probes the target: a migration that already completed is finished
    /// normally, one that errored is cancelled on the source too, and an
    /// unreachable target is retried on a fixed backoff a bounded number
    /// of times.
    async fn cleanup(&mut self) -> MigrationEnd {
        info!(
            "Plan interrupted; cleaning up migration of {}.",
            self.record.partition
        );
        let partition = self.record.partition;

        for _ in 0..MAX_CLEANUP_ATTEMPTS {
            let Some(master) = self.target_master() else {
                tokio::time::sleep(self.delays.cleanup).await;
                continue;
            };
            match self.rpc.can_cancel(master, partition).await {
                Ok(report) if report.state == MigrationState::Succeeded => {
                    // The move already happened; all that is left is to
                    // commit and announce it.
                    return self.finish_after_cleanup(partition).await;
                }
                Ok(report) if report.state == MigrationState::Error => {
                    self.record.cause = report.cause.clone();
                    return self.cancel_source_after_cleanup(partition).await;
                }
                Ok(_) | Err(_) => {
                    tokio::time::sleep(self.delays.cleanup).await;
                }
            }
        }

        warn!("Cleanup could not converge for {partition}; leaving the migration interrupted.");
        self.record.state = RecordState::Unknown;
        MigrationEnd::Interrupted
    }

    async fn finish_after_cleanup(&mut self, partition: PartitionId) -> MigrationEnd {
        for _ in 0..MAX_CLEANUP_ATTEMPTS {
            match self
                .authority
                .reassign_partition(partition, self.record.target)
                .await
            {
                Ok(changed) => {
                    self.topology_updated = true;
                    if changed {
                        let _ = self.authority.broadcast().await;
                    }
                    self.record.state = RecordState::Succeeded;
                    return MigrationEnd::Succeeded;
                }
                Err(e) => {
                    warn!("Topology update during cleanup failed: {e}");
                    tokio::time::sleep(self.delays.admin_failover).await;
                }
            }
        }
        self.record.state = RecordState::Unknown;
        MigrationEnd::Interrupted
    }

    async fn cancel_source_after_cleanup(&mut self, partition: PartitionId) -> MigrationEnd {
        for _ in 0..MAX_CLEANUP_ATTEMPTS {
            let Some(source_master) = self.source_master() else {
                tokio::time::sleep(self.delays.cleanup).await;
                continue;
            };
            match self
                .rpc
                .cancel_migration(source_master, partition, self.record.target)
                .await
            {
                Ok(true) => {
                    self.record.state = RecordState::Errored;
                    return MigrationEnd::Errored;
                }
                Ok(false) | Err(_) => tokio::time::sleep(self.delays.cleanup).await,
            }
        }
        self.record.state = RecordState::Unknown;
        MigrationEnd::Interrupted
    }
}

#[async_trait]
impl StepMachine for MigrationCoordinator {
    type Step = Step;

    async fn execute(&mut self, step: Step) -> Result<NextJob<Step>, CitrineError> {
        let partition = self.record.partition;
        match step {
            Step::RequestSend => {
                let Some(master) = self.target_master() else {
                    return Ok(NextJob::RunAfter(Step::RequestSend, self.delays.rn_failover));
                };
                match self
                    .rpc
                    .start_migration(master, partition, self.record.source)
                    .await
                {
                    Err(e) => {
                        warn!("start-migration against {master} failed: {e}");
                        Ok(NextJob::RunAfter(Step::RequestSend, self.delays.rn_failover))
                    }
                    Ok(report) => self.route_report(report, Step::RequestSend),
                }
            }
            Step::StatusPoll => {
                let Some(master) = self.target_master() else {
                    return Ok(NextJob::RunAfter(Step::StatusPoll, self.delays.rn_failover));
                };
                match self.rpc.migration_status(master, partition).await {
                    Err(e) => {
                        warn!("migration-status against {master} failed: {e}");
                        Ok(NextJob::RunAfter(Step::StatusPoll, self.delays.rn_failover))
                    }
                    Ok(report) => {
                        if matches!(
                            report.state,
                            MigrationState::Running | MigrationState::Succeeded
                        ) {
                            self.observe_details(&report).await;
                        }
                        self.route_report(report, Step::StatusPoll)
                    }
                }
            }
            Step::CancelSource => {
                let Some(source_master) = self.source_master() else {
                    return Ok(NextJob::RunAfter(
                        Step::CancelSource,
                        self.delays.check_migration,
                    ));
                };
                match self
                    .rpc
                    .cancel_migration(source_master, partition, self.record.target)
                    .await
                {
                    Ok(true) => {
                        self.record.state = RecordState::Errored;
                        Ok(NextJob::Finished)
                    }
                    Ok(false) => Ok(NextJob::RunAfter(
                        Step::CancelSource,
                        self.delays.check_migration,
                    )),
                    Err(e) => {
                        warn!("cancel against {source_master} failed: {e}");
                        Ok(NextJob::RunAfter(
                            Step::CancelSource,
                            self.delays.check_migration,
                        ))
                    }
                }
            }
            Step::TopologyUpdate => {
                match self
                    .authority
                    .reassign_partition(partition, self.record.target)
                    .await
                {
                    Ok(true) => {
                        self.topology_updated = true;
                        Ok(NextJob::RunNow(Step::TopologyBroadcast))
                    }
                    Ok(false) => {
                        // Replay: the record already names the target.
                        self.topology_updated = true;
                        self.record.state = RecordState::Succeeded;
                        Ok(NextJob::Finished)
                    }
                    Err(e) => {
                        warn!("Authoritative topology update failed: {e}");
                        Ok(NextJob::RunAfter(
                            Step::TopologyUpdate,
                            self.delays.admin_failover,
                        ))
                    }
                }
            }
            Step::TopologyBroadcast => match self.authority.broadcast().await {
                Ok(()) => {
                    self.record.state = RecordState::Succeeded;
                    Ok(NextJob::Finished)
                }
                Err(e) => {
                    warn!("Topology broadcast incomplete: {e}");
                    Ok(NextJob::RunAfter(
                        Step::TopologyBroadcast,
                        self.delays.service_unreachable,
                    ))
                }
            },
        }
    }
}

impl MigrationCoordinator {
    /// Routes a reported migration state exactly the same way from the
    /// initial request and from a poll, except that `UNKNOWN` answers a
    /// poll with a fresh request: a replica may have answered, and
    /// re-asking the master is safe.
    fn route_report(
        &mut self,
        report: MigrationStateReport,
        from: Step,
    ) -> Result<NextJob<Step>, CitrineError> {
        match report.state {
            MigrationState::Pending | MigrationState::Running => {
                self.record.state = RecordState::Running;
                Ok(NextJob::RunAfter(
                    Step::StatusPoll,
                    self.delays.check_migration,
                ))
            }
            MigrationState::Succeeded => Ok(NextJob::RunNow(Step::TopologyUpdate)),
            MigrationState::Error => {
                self.record.cause = report.cause;
                Ok(NextJob::RunNow(Step::CancelSource))
            }
            MigrationState::Unknown => {
                info!(
                    "Target answered UNKNOWN during {from:?}; re-sending the request to the master."
                );
                self.record.state = RecordState::Unknown;
                Ok(NextJob::RunAfter(Step::RequestSend, self.delays.rn_failover))
            }
        }
    }
}
