//! Capacity Pool
//!
//! Aggregate-capacity gate shared by every unit of a run. A unit holds one
//! worker slot plus its ceiling's memory for the whole invocation, so the sum
//! of live ceilings never exceeds the environment's total and the number of
//! live external processes never exceeds `max_workers`.

use std::sync::Arc;

use strain_cascade_core::{CoreError, CoreResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Permits held by one running unit. Released on drop.
#[derive(Debug)]
pub struct CapacityLease {
    _worker: OwnedSemaphorePermit,
    _memory: OwnedSemaphorePermit,
    memory_mb: u32,
}

impl CapacityLease {
    pub fn memory_mb(&self) -> u32 {
        self.memory_mb
    }
}

#[derive(Debug, Clone)]
pub struct CapacityPool {
    workers: Arc<Semaphore>,
    memory: Arc<Semaphore>,
    max_workers: usize,
    total_memory_mb: u32,
}

impl CapacityPool {
    pub fn new(max_workers: usize, total_memory_mb: u64) -> Self {
        let max_workers = max_workers.max(1);
        let total_memory_mb = u32::try_from(total_memory_mb).unwrap_or(u32::MAX).max(1);
        Self {
            workers: Arc::new(Semaphore::new(max_workers)),
            memory: Arc::new(Semaphore::new(total_memory_mb as usize)),
            max_workers,
            total_memory_mb,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn total_memory_mb(&self) -> u64 {
        u64::from(self.total_memory_mb)
    }

    /// Units of `per_job_mb` that can run at once: `max(1, min(workers, total / per_job))`.
    pub fn max_concurrent(&self, per_job_mb: u64) -> usize {
        let by_memory = (self.total_memory_mb() / per_job_mb.max(1)) as usize;
        by_memory.min(self.max_workers).max(1)
    }

    /// Wait for a worker slot and `memory_mb` of memory.
    ///
    /// # Errors
    ///
    /// `Config` if the request can never be satisfied.
    pub async fn acquire(&self, memory_mb: u64) -> CoreResult<CapacityLease> {
        let request = u32::try_from(memory_mb)
            .ok()
            .filter(|mb| *mb <= self.total_memory_mb)
            .ok_or_else(|| {
                CoreError::config(format!(
                    "Unit needs {} MB but total capacity is {} MB",
                    memory_mb, self.total_memory_mb
                ))
            })?
            .max(1);

        let worker = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| CoreError::internal(format!("worker pool closed: {}", e)))?;
        let memory = self
            .memory
            .clone()
            .acquire_many_owned(request)
            .await
            .map_err(|e| CoreError::internal(format!("memory pool closed: {}", e)))?;

        Ok(CapacityLease {
            _worker: worker,
            _memory: memory,
            memory_mb: request,
        })
    }

    /// Free worker slots right now.
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Free memory right now, in megabytes.
    pub fn available_memory_mb(&self) -> usize {
        self.memory.available_permits()
    }
}
