// src/server/lifecycle.rs

//! The service lifecycle: ordered start steps with stop-requested
//! checkpoints, reverse-order stop, and idempotent terminal states.

use crate::core::CitrineError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Where the supervisor is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ServicePhase {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Tracks the supervisor's phase and the stop-requested flag that start
/// checkpoints poll. A stop requested during start makes the next
/// checkpoint raise, unwinding the start cleanly.
#[derive(Debug)]
pub struct ServiceLifecycle {
    phase: Mutex<ServicePhase>,
    stop_requested: Arc<AtomicBool>,
}

impl ServiceLifecycle {
    pub fn new(stop_requested: Arc<AtomicBool>) -> Self {
        Self {
            phase: Mutex::new(ServicePhase::Created),
            stop_requested,
        }
    }

    pub fn phase(&self) -> ServicePhase {
        *self.phase.lock()
    }

    pub fn begin_start(&self) {
        *self.phase.lock() = ServicePhase::Starting;
    }

    pub fn mark_running(&self) {
        *self.phase.lock() = ServicePhase::Running;
        info!("Node is running.");
    }

    /// One ordered start step. Raises `Interrupted` when a stop arrived
    /// while starting, so the caller aborts the remaining steps.
    pub fn checkpoint(&self, step: &str) -> Result<(), CitrineError> {
        if self.stop_requested.load(Ordering::SeqCst) {
            warn!("Stop requested during start; aborting before step '{step}'.");
            *self.phase.lock() = ServicePhase::Stopping;
            return Err(CitrineError::Interrupted);
        }
        info!("Startup step: {step}.");
        Ok(())
    }

    /// Requests a stop. Idempotent; calls after a terminal state are
    /// no-ops.
    pub fn request_stop(&self) {
        let mut phase = self.phase.lock();
        match *phase {
            ServicePhase::Stopping | ServicePhase::Stopped => {}
            _ => {
                self.stop_requested.store(true, Ordering::SeqCst);
                *phase = ServicePhase::Stopping;
                info!("Stop requested.");
            }
        }
    }

    pub fn mark_stopped(&self) {
        *self.phase.lock() = ServicePhase::Stopped;
        info!("Node is stopped.");
    }
}
