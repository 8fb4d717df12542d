//! The worker-pool controller.
//!
//! The pool owns the worker-set snapshot: which executions are running,
//! which recently finished. Spawn preconditions run in a fixed order
//! (capacity, resources, guardrail), and a precondition miss is a deferral,
//! not an error: the task stays queued and the next pass retries it.
//!
//! The snapshot is persisted on every change and reconciled against real
//! process liveness at startup, so the in-memory view and the disk view
//! never silently diverge.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::Context;
use crate::error::WorkerError;
use crate::guardrail::{ActionKind, ActionLevel, DenyReason, Gate, Verdict};
use crate::store::StateDir;
use crate::task::Task;
use crate::worker::{
    ResourceCheck, WorkOrder, WorkerLauncher, WorkerProbe, WorkerRecord, WorkerStatus,
};

/// Persisted document name, owned by the pool.
const WORKERS_DOC: &str = "workers.json";

/// The persisted worker set.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolState {
    active: HashMap<Uuid, WorkerRecord>,
    history: VecDeque<WorkerRecord>,
}

/// Why a spawn did not happen. The task stays queued in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    /// The concurrency ceiling is reached.
    CapacityReached,
    /// The coarse resource check failed.
    ResourcesLow,
    /// The guardrail gate said no.
    Denied(DenyReason),
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityReached => write!(f, "concurrency ceiling reached"),
            Self::ResourcesLow => write!(f, "insufficient disk headroom"),
            Self::Denied(reason) => write!(f, "guardrail denied [{}]: {}", reason.code(), reason),
        }
    }
}

/// Result of a spawn attempt.
#[derive(Debug)]
pub enum SpawnOutcome {
    Spawned(WorkerRecord),
    Deferred(DeferReason),
}

/// What restart recovery found.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Workers verified alive and kept running.
    pub alive: Vec<Uuid>,
    /// Records demoted to stopped because their process is gone.
    pub demoted: Vec<WorkerRecord>,
}

/// One active worker with elapsed time, for the progress view.
#[derive(Debug, Clone)]
pub struct PoolProgress {
    pub record: WorkerRecord,
    pub elapsed_minutes: i64,
}

/// Tracks and persists concurrently running task executions.
pub struct WorkerPool {
    state: RwLock<PoolState>,
    store: StateDir,
    launcher: Arc<dyn WorkerLauncher>,
    probe: Arc<dyn WorkerProbe>,
    resources: Arc<dyn ResourceCheck>,
    log_dir: PathBuf,
    max_history: usize,
}

impl WorkerPool {
    /// Open the pool, restoring the persisted worker set.
    ///
    /// Call [`WorkerPool::recover`] afterwards to reconcile the restored
    /// set against real process liveness.
    pub fn open(
        store: StateDir,
        launcher: Arc<dyn WorkerLauncher>,
        probe: Arc<dyn WorkerProbe>,
        resources: Arc<dyn ResourceCheck>,
        log_dir: PathBuf,
        max_history: usize,
    ) -> Result<Self, WorkerError> {
        let state = store.load::<PoolState>(WORKERS_DOC)?.unwrap_or_default();
        Ok(Self {
            state: RwLock::new(state),
            store,
            launcher,
            probe,
            resources,
            log_dir,
            max_history,
        })
    }

    /// Number of workers currently counted against the ceiling.
    pub async fn running_count(&self) -> usize {
        self.state
            .read()
            .await
            .active
            .values()
            .filter(|r| r.status == WorkerStatus::Running)
            .count()
    }

    /// Attempt to spawn a worker for a task.
    ///
    /// Preconditions, in order: capacity below the context ceiling, disk
    /// headroom, guardrail approval for the spawn action. The whole check
    /// runs under one lock so two concurrent calls cannot both observe a
    /// free slot and both proceed.
    pub async fn spawn(
        &self,
        task: &Task,
        context: &Context,
        gate: &Gate,
        now: DateTime<Utc>,
    ) -> Result<SpawnOutcome, WorkerError> {
        let mut state = self.state.write().await;

        let running = state
            .active
            .values()
            .filter(|r| r.status == WorkerStatus::Running)
            .count();
        if running >= context.max_concurrency {
            tracing::debug!(
                task_id = %task.id,
                running,
                ceiling = context.max_concurrency,
                "spawn deferred: ceiling reached"
            );
            return Ok(SpawnOutcome::Deferred(DeferReason::CapacityReached));
        }

        if !self.resources.disk_has_headroom() {
            tracing::warn!(task_id = %task.id, "spawn deferred: insufficient disk headroom");
            return Ok(SpawnOutcome::Deferred(DeferReason::ResourcesLow));
        }

        let verdict = gate
            .can_execute_at(
                ActionKind::SpawnWorker,
                Some(task.title.as_str()),
                now,
                task.auto_approve,
            )
            .await?;
        let level = match verdict {
            Verdict::Allowed { level } => level,
            Verdict::Denied { reason } => {
                return Ok(SpawnOutcome::Deferred(DeferReason::Denied(reason)));
            }
        };
        if level == ActionLevel::NotifyThenExecute {
            tracing::info!(task_id = %task.id, title = %task.title, "notify: spawning worker");
        }

        let worker_id = Uuid::new_v4();
        let order = WorkOrder::for_task(task);
        let log_location = self.log_dir.join(format!("{}.log", worker_id));
        let handle = self.launcher.launch(&order, &log_location).await?;

        let record = WorkerRecord {
            worker_id,
            task_id: task.id,
            handle,
            status: WorkerStatus::Running,
            started_at: now,
            last_update: now,
            log_location,
        };
        state.active.insert(worker_id, record.clone());
        self.store.save(WORKERS_DOC, &*state)?;
        self.store.append_audit(&serde_json::json!({
            "at": now,
            "event": "worker_spawned",
            "worker_id": worker_id,
            "task_id": task.id,
            "order": order,
        }))?;

        tracing::info!(worker_id = %worker_id, task_id = %task.id, pid = handle.pid, "worker spawned");
        Ok(SpawnOutcome::Spawned(record))
    }

    /// Record a worker's successful completion, freeing its slot.
    pub async fn complete(&self, worker_id: Uuid) -> Result<WorkerRecord, WorkerError> {
        self.finish(worker_id, "worker_completed").await
    }

    /// Record a worker's failure, freeing its slot.
    pub async fn fail(&self, worker_id: Uuid) -> Result<WorkerRecord, WorkerError> {
        self.finish(worker_id, "worker_failed").await
    }

    async fn finish(&self, worker_id: Uuid, event: &str) -> Result<WorkerRecord, WorkerError> {
        let mut state = self.state.write().await;
        let mut record = state
            .active
            .remove(&worker_id)
            .ok_or(WorkerError::NotFound { id: worker_id })?;
        record.status = WorkerStatus::Stopped;
        record.last_update = Utc::now();

        push_history(&mut state.history, record.clone(), self.max_history);
        self.store.save(WORKERS_DOC, &*state)?;
        self.store.append_audit(&serde_json::json!({
            "at": record.last_update,
            "event": event,
            "worker_id": worker_id,
            "task_id": record.task_id,
        }))?;

        Ok(record)
    }

    /// Reconcile the restored worker set against real liveness.
    ///
    /// Every record marked running is independently verified against the
    /// OS; any non-alive record is demoted to stopped and stops counting
    /// against the ceiling. Idempotent: a second call finds nothing new to
    /// demote. Task statuses are not touched here.
    pub async fn recover(&self) -> Result<RecoveryReport, WorkerError> {
        let mut state = self.state.write().await;
        let mut report = RecoveryReport::default();

        let mut dead = Vec::new();
        for (worker_id, record) in &state.active {
            if self.probe.is_alive(&record.handle).await {
                report.alive.push(*worker_id);
            } else {
                dead.push(*worker_id);
            }
        }

        for worker_id in dead {
            if let Some(mut record) = state.active.remove(&worker_id) {
                tracing::warn!(
                    worker_id = %worker_id,
                    task_id = %record.task_id,
                    pid = record.handle.pid,
                    "tracked worker is not alive, demoting to stopped"
                );
                record.status = WorkerStatus::Stopped;
                push_history(&mut state.history, record.clone(), self.max_history);
                report.demoted.push(record);
            }
        }

        if !report.demoted.is_empty() {
            self.store.save(WORKERS_DOC, &*state)?;
        }
        tracing::info!(
            alive = report.alive.len(),
            demoted = report.demoted.len(),
            "worker set reconciled"
        );
        Ok(report)
    }

    /// Warn about running workers whose last update is older than the
    /// staleness threshold. Never kills anything.
    pub async fn sweep_stale(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<Uuid> {
        let state = self.state.read().await;
        let mut stale = Vec::new();
        for record in state.active.values() {
            if record.status == WorkerStatus::Running && now - record.last_update > threshold {
                tracing::warn!(
                    worker_id = %record.worker_id,
                    task_id = %record.task_id,
                    last_update = %record.last_update,
                    "worker looks stale"
                );
                stale.push(record.worker_id);
            }
        }
        stale
    }

    /// Refresh a worker's last-update timestamp.
    pub async fn touch(&self, worker_id: Uuid, now: DateTime<Utc>) -> Result<(), WorkerError> {
        let mut state = self.state.write().await;
        let record = state
            .active
            .get_mut(&worker_id)
            .ok_or(WorkerError::NotFound { id: worker_id })?;
        record.last_update = now;
        self.store.save(WORKERS_DOC, &*state)?;
        Ok(())
    }

    /// Active workers with elapsed time, for the progress view.
    pub async fn progress(&self, now: DateTime<Utc>) -> Vec<PoolProgress> {
        let state = self.state.read().await;
        let mut rows: Vec<PoolProgress> = state
            .active
            .values()
            .map(|record| PoolProgress {
                record: record.clone(),
                elapsed_minutes: (now - record.started_at).num_minutes(),
            })
            .collect();
        rows.sort_by_key(|p| p.record.started_at);
        rows
    }

    /// Finished workers, most recent last.
    pub async fn history(&self) -> Vec<WorkerRecord> {
        self.state.read().await.history.iter().cloned().collect()
    }
}

fn push_history(history: &mut VecDeque<WorkerRecord>, record: WorkerRecord, max: usize) {
    history.push_back(record);
    while history.len() > max {
        history.pop_front();
    }
}
