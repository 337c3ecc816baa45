// src/core/migration/runner.rs

//! The plan plumbing the coordinator runs on: an interruptible plan
//! handle, the per-cause retry delays, and a small deadline-ordered job
//! runner. There is no dedicated coordinator thread; each job executes one
//! step and schedules its successor.

use crate::core::CitrineError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// The handle by which an admin plan is cancelled. Steps poll
/// [`MigrationPlan::interrupted`] between retry sleeps.
#[derive(Debug, Default)]
pub struct MigrationPlan {
    interrupted: AtomicBool,
    notify: Notify,
}

impl MigrationPlan {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Sleeps until `due`, waking early if the plan is interrupted.
    pub async fn sleep_until(&self, due: Instant) -> Result<(), CitrineError> {
        if self.interrupted() {
            return Err(CitrineError::Interrupted);
        }
        tokio::select! {
            _ = tokio::time::sleep_until(due) => {}
            _ = self.notify.notified() => {}
        }
        if self.interrupted() {
            return Err(CitrineError::Interrupted);
        }
        Ok(())
    }
}

/// The retry delay for each failure cause the coordinator distinguishes.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryDelays {
    /// The target or source group has no reachable master yet.
    #[serde(with = "humantime_serde", default = "default_rn_failover")]
    pub rn_failover: Duration,
    /// A node service did not answer (e.g. during broadcast).
    #[serde(with = "humantime_serde", default = "default_service_unreachable")]
    pub service_unreachable: Duration,
    /// Period between migration status polls.
    #[serde(with = "humantime_serde", default = "default_check_migration")]
    pub check_migration: Duration,
    /// The admin database update failed.
    #[serde(with = "humantime_serde", default = "default_admin_failover")]
    pub admin_failover: Duration,
    /// Fixed backoff while probing during cleanup.
    #[serde(with = "humantime_serde", default = "default_cleanup")]
    pub cleanup: Duration,
}

fn default_rn_failover() -> Duration {
    Duration::from_secs(2)
}
fn default_service_unreachable() -> Duration {
    Duration::from_secs(1)
}
fn default_check_migration() -> Duration {
    Duration::from_millis(500)
}
fn default_admin_failover() -> Duration {
    Duration::from_secs(1)
}
fn default_cleanup() -> Duration {
    Duration::from_secs(1)
}

impl Default for RetryDelays {
    fn default() -> Self {
        Self {
            rn_failover: default_rn_failover(),
            service_unreachable: default_service_unreachable(),
            check_migration: default_check_migration(),
            admin_failover: default_admin_failover(),
            cleanup: default_cleanup(),
        }
    }
}

/// What a step tells the runner to do next.
#[derive(Debug)]
pub enum NextJob<S> {
    RunNow(S),
    RunAfter(S, Duration),
    Finished,
}

/// One step-executing state machine, driven by [`drive`].
#[async_trait]
pub trait StepMachine: Send {
    type Step: Send;

    async fn execute(&mut self, step: Self::Step) -> Result<NextJob<Self::Step>, CitrineError>;
}

/// Runs a machine's jobs off a deadline-ordered queue until it finishes or
/// the plan is interrupted. With one migration in flight this degenerates
/// to sequential steps separated by their scheduled delays, which is
/// exactly the intended behavior.
pub async fn drive<M: StepMachine>(
    machine: &mut M,
    plan: &MigrationPlan,
    initial: M::Step,
) -> Result<(), CitrineError> {
    let mut queue: Vec<(Instant, M::Step)> = vec![(Instant::now(), initial)];

    while !queue.is_empty() {
        let next = queue
            .iter()
            .enumerate()
            .min_by_key(|(_, (due, _))| *due)
            .map(|(i, _)| i)
            .expect("queue is non-empty");
        let (due, step) = queue.swap_remove(next);

        plan.sleep_until(due).await?;
        match machine.execute(step).await? {
            NextJob::RunNow(step) => queue.push((Instant::now(), step)),
            NextJob::RunAfter(step, delay) => queue.push((Instant::now() + delay, step)),
            NextJob::Finished => {}
        }
    }
    Ok(())
}
