// src/core/tasks/permits.rs

//! The task coordinator: a bounded pool of permits background maintenance
//! must hold while it could compete with client traffic.

use crate::core::CitrineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Hands out maintenance permits with a bounded wait.
#[derive(Debug)]
pub struct TaskCoordinator {
    permits: Arc<Semaphore>,
    max_wait: Duration,
}

impl TaskCoordinator {
    pub fn new(permits: usize, max_wait: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(permits)),
            max_wait,
        }
    }

    /// Acquires one permit. Waiting longer than the configured bound
    /// returns `Timeout` so the task can skip a cycle; a closed pool means
    /// the owning environment is going away and the task must treat it as
    /// fatal.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, CitrineError> {
        match tokio::time::timeout(self.max_wait, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CitrineError::ThreadInterrupted),
            Err(_) => Err(CitrineError::Timeout(self.max_wait.as_millis() as u64)),
        }
    }

    /// Closes the pool, interrupting every current and future waiter.
    pub fn shut_down(&self) {
        self.permits.close();
    }
}
