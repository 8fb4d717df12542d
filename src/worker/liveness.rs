//! Boundary capabilities for the worker pool.
//!
//! Launching a process, asking the OS whether a pid is alive, and checking
//! disk headroom are all adapters behind narrow traits, so the controller
//! logic is testable with fakes and the real OS probing stays at the edge.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};

use crate::error::WorkerError;
use crate::worker::{WorkOrder, WorkerHandle};

/// Starts the out-of-process executor for one work order.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launch a worker, returning its handle. The worker's stdout/stderr
    /// land in `log_location`.
    async fn launch(
        &self,
        order: &WorkOrder,
        log_location: &Path,
    ) -> Result<WorkerHandle, WorkerError>;
}

/// Answers "is this work handle still active?".
#[async_trait]
pub trait WorkerProbe: Send + Sync {
    async fn is_alive(&self, handle: &WorkerHandle) -> bool;
}

/// Coarse best-effort resource check consulted before a spawn.
pub trait ResourceCheck: Send + Sync {
    fn disk_has_headroom(&self) -> bool;
}

/// Real launcher: spawns the configured executor command with the work
/// order JSON as its single argument, detached from this process.
pub struct ProcessLauncher {
    command: String,
}

impl ProcessLauncher {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        order: &WorkOrder,
        log_location: &Path,
    ) -> Result<WorkerHandle, WorkerError> {
        let launch_err = |reason: String| WorkerError::Launch { reason };

        let payload = serde_json::to_string(order)
            .map_err(|e| launch_err(format!("could not encode work order: {}", e)))?;

        if let Some(parent) = log_location.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| launch_err(format!("could not create log dir: {}", e)))?;
        }
        let log = std::fs::File::create(log_location)
            .map_err(|e| launch_err(format!("could not create log file: {}", e)))?;
        let log_err = log
            .try_clone()
            .map_err(|e| launch_err(format!("could not clone log handle: {}", e)))?;

        let child = tokio::process::Command::new(&self.command)
            .arg(&payload)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| launch_err(format!("could not spawn {}: {}", self.command, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| launch_err("worker exited before it could be tracked".to_string()))?;

        // The child runs detached; its outcome arrives through the
        // executor's complete/fail report, not through waiting here.
        drop(child);

        tracing::info!(pid, task_id = %order.task_id, "worker launched");
        Ok(WorkerHandle { pid })
    }
}

/// Real probe: asks the OS process table.
pub struct ProcessProbe;

#[async_trait]
impl WorkerProbe for ProcessProbe {
    async fn is_alive(&self, handle: &WorkerHandle) -> bool {
        let pid = Pid::from_u32(handle.pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).is_some()
    }
}

/// Real disk check: every mounted disk must be under the utilization
/// ceiling. Best effort: a host with no readable disk list passes.
pub struct DiskHeadroom {
    max_percent: f64,
}

impl DiskHeadroom {
    pub fn new(max_percent: f64) -> Self {
        Self { max_percent }
    }
}

impl ResourceCheck for DiskHeadroom {
    fn disk_has_headroom(&self) -> bool {
        let disks = Disks::new_with_refreshed_list();
        for disk in disks.list() {
            let total = disk.total_space();
            if total == 0 {
                continue;
            }
            let used = total.saturating_sub(disk.available_space());
            let pct = used as f64 / total as f64 * 100.0;
            if pct > self.max_percent {
                tracing::warn!(
                    disk = %disk.name().to_string_lossy(),
                    used_percent = pct,
                    ceiling = self.max_percent,
                    "disk over utilization ceiling"
                );
                return false;
            }
        }
        true
    }
}
