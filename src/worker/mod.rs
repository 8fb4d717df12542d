//! Worker tracking and the pool controller.
//!
//! A worker is an out-of-process execution unit carrying out one task's
//! payload. The controller tracks workers, enforces the concurrency
//! ceiling, and survives restarts by re-verifying that every tracked
//! worker is still alive. What a worker actually *does* is entirely the
//! executor's business; the core only records the start and consumes the
//! completion or failure report.

mod liveness;
mod pool;

pub use liveness::{DiskHeadroom, ProcessLauncher, ProcessProbe, ResourceCheck, WorkerLauncher, WorkerProbe};
pub use pool::{DeferReason, PoolProgress, RecoveryReport, SpawnOutcome, WorkerPool};

#[cfg(test)]
pub(crate) use liveness::fakes;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::Task;

/// Opaque handle to a spawned worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub pid: u32,
}

/// Tracked state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Stopped,
}

/// One tracked worker execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: Uuid,
    pub task_id: Uuid,
    pub handle: WorkerHandle,
    pub status: WorkerStatus,
    pub started_at: DateTime<Utc>,
    /// Refreshed by executor progress reports; staleness is judged
    /// against it.
    pub last_update: DateTime<Utc>,
    pub log_location: PathBuf,
}

/// The payload handed to a worker at launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub task_id: Uuid,
    pub title: String,
    pub category: String,
    pub estimated_effort_hours: f64,
    pub description: String,
}

impl WorkOrder {
    /// Build the work order for a task.
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            title: task.title.clone(),
            category: task.category.clone(),
            estimated_effort_hours: task.estimated_effort_hours,
            description: task.description.clone(),
        }
    }
}
