//! The scheduling pass.
//!
//! One `Scheduler` per process glues the queue, classifier, gate, pool,
//! and planner together. A pass is the unit of work: detect the current
//! context, rank the eligible backlog, and spawn workers until the pass is
//! exhausted. Completion and failure reports from executors feed back in
//! here and immediately trigger a fill pass, so freed slots never wait for
//! the next tick.
//!
//! Every pass runs under one mutex: state-mutating operations never
//! interleave, so two concurrent callers cannot both observe a free slot
//! and overshoot the ceiling.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::context::ContextClassifier;
use crate::error::SchedulerError;
use crate::guardrail::{DenyReason, Gate};
use crate::plan::{PhaseAdvance, Plan, Planner};
use crate::task::{TaskQueue, rank};
use crate::worker::{DeferReason, RecoveryReport, SpawnOutcome, WorkerPool, WorkerRecord};

/// What a single pass did.
#[derive(Debug, Default)]
pub struct PassSummary {
    pub context_label: String,
    /// Task ids spawned this pass.
    pub spawned: Vec<Uuid>,
    /// Tasks skipped for a per-task reason (e.g. pending approval).
    pub skipped: usize,
    /// The reason the pass stopped early, if it did.
    pub halted: Option<DeferReason>,
}

/// Coordinates one scheduling pass at a time.
pub struct Scheduler {
    queue: Arc<TaskQueue>,
    classifier: Arc<ContextClassifier>,
    gate: Arc<Gate>,
    pool: Arc<WorkerPool>,
    planner: Arc<Planner>,
    pass_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<TaskQueue>,
        classifier: Arc<ContextClassifier>,
        gate: Arc<Gate>,
        pool: Arc<WorkerPool>,
        planner: Arc<Planner>,
    ) -> Self {
        Self {
            queue,
            classifier,
            gate,
            pool,
            planner,
            pass_lock: Mutex::new(()),
        }
    }

    /// Run one scheduling pass as of `now`.
    ///
    /// Ranks the eligible backlog under the detected context, then spawns
    /// top-down. Capacity, resource, and global guardrail denials end the
    /// pass; nothing below the halting task could spawn either. A
    /// missing approval only skips that task.
    pub async fn run_pass(&self, now: DateTime<Local>) -> Result<PassSummary, SchedulerError> {
        let _guard = self.pass_lock.lock().await;
        self.fill(now).await
    }

    async fn fill(&self, now: DateTime<Local>) -> Result<PassSummary, SchedulerError> {
        let now_utc = now.with_timezone(&Utc);
        let context = self.classifier.detect(now).await?;

        let mut summary = PassSummary {
            context_label: context.label.clone(),
            ..PassSummary::default()
        };

        let eligible = self.queue.eligible_tasks().await;
        let candidates: Vec<_> = eligible
            .iter()
            .filter(|t| context.allows_category(&t.category))
            .collect();
        let ranked = rank(&candidates, now_utc, &context);

        for task in ranked {
            match self.pool.spawn(task, &context, &self.gate, now_utc).await? {
                SpawnOutcome::Spawned(record) => {
                    self.queue.mark_in_progress(task.id).await?;
                    tracing::info!(
                        task_id = %task.id,
                        worker_id = %record.worker_id,
                        context = %context.label,
                        "task started"
                    );
                    summary.spawned.push(task.id);
                }
                SpawnOutcome::Deferred(DeferReason::Denied(
                    reason @ DenyReason::ApprovalRequired { .. },
                )) => {
                    // Only this task is waiting on a human; others may
                    // still be spawnable.
                    tracing::debug!(task_id = %task.id, code = reason.code(), "task skipped");
                    summary.skipped += 1;
                }
                SpawnOutcome::Deferred(reason) => {
                    tracing::debug!(reason = %reason, "pass halted");
                    summary.halted = Some(reason);
                    break;
                }
            }
        }

        Ok(summary)
    }

    /// Apply an executor's success report, then immediately fill the
    /// freed slot.
    pub async fn complete(
        &self,
        worker_id: Uuid,
        now: DateTime<Local>,
    ) -> Result<PassSummary, SchedulerError> {
        let _guard = self.pass_lock.lock().await;
        let record = self.pool.complete(worker_id).await?;
        self.queue.complete_task(record.task_id).await?;
        self.fill(now).await
    }

    /// Apply an executor's failure report (bounded retry or escalation),
    /// then immediately fill the freed slot.
    pub async fn fail(
        &self,
        worker_id: Uuid,
        error: &str,
        now: DateTime<Local>,
    ) -> Result<PassSummary, SchedulerError> {
        let _guard = self.pass_lock.lock().await;
        let record = self.pool.fail(worker_id).await?;
        self.queue.fail_task(record.task_id, error).await?;
        self.fill(now).await
    }

    /// Restart recovery: reconcile the worker set against real liveness,
    /// then route every demoted worker's task through the normal bounded
    /// fail path.
    pub async fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        let _guard = self.pass_lock.lock().await;
        let report = self.pool.recover().await?;
        for record in &report.demoted {
            self.queue
                .fail_task(record.task_id, "worker not alive after restart")
                .await?;
        }
        Ok(report)
    }

    /// Select a task for an extended session. The task goes in-progress:
    /// the session itself is its worker.
    pub async fn select_plan(&self, task_id: Uuid) -> Result<Plan, SchedulerError> {
        let _guard = self.pass_lock.lock().await;
        let task = self.queue.get(task_id).await?;
        let plan = self.planner.select(&task).await?;
        self.queue.mark_in_progress(task_id).await?;
        Ok(plan)
    }

    /// Advance the active plan by one phase. On the final phase the plan
    /// completes and the underlying task is completed through the queue;
    /// the planner itself never touches task status.
    pub async fn advance_plan_phase(&self, phase: &str) -> Result<PhaseAdvance, SchedulerError> {
        let _guard = self.pass_lock.lock().await;
        let advance = self.planner.advance_phase(phase).await?;
        if advance == PhaseAdvance::PlanCompleted {
            if let Some(plan) = self.planner.active().await {
                self.queue.complete_task(plan.task_id).await?;
            }
        }
        Ok(advance)
    }

    /// One finished-worker record by task, for callers that only know the
    /// task id.
    pub async fn worker_for_task(&self, task_id: Uuid) -> Option<WorkerRecord> {
        self.pool
            .progress(Utc::now())
            .await
            .into_iter()
            .map(|p| p.record)
            .find(|r| r.task_id == task_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::context::ContextClassifier;
    use crate::guardrail::ActionRegistry;
    use crate::settings::GuardrailSettings;
    use crate::store::StateDir;
    use crate::task::{LogEscalation, NewTask, Priority, TaskStatus};
    use crate::worker::fakes::{FakeLauncher, FakeProbe, FakeResources};

    struct Fixture {
        scheduler: Scheduler,
        queue: Arc<TaskQueue>,
        classifier: Arc<ContextClassifier>,
        gate: Arc<Gate>,
        pool: Arc<WorkerPool>,
        probe: Arc<FakeProbe>,
        store: StateDir,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();

        let queue = Arc::new(
            TaskQueue::open(store.clone(), 3, 25, Arc::new(LogEscalation)).unwrap(),
        );
        let classifier = Arc::new(ContextClassifier::new(store.clone()).unwrap());
        let registry = ActionRegistry::from_settings(&GuardrailSettings::default()).unwrap();
        let gate = Arc::new(Gate::open(store.clone(), registry, 1000, 1000).unwrap());
        let probe = Arc::new(FakeProbe::new([]));
        let pool = Arc::new(
            WorkerPool::open(
                store.clone(),
                Arc::new(FakeLauncher::new()),
                probe.clone(),
                Arc::new(FakeResources::new(true)),
                dir.path().join("logs"),
                10,
            )
            .unwrap(),
        );
        let planner = Arc::new(Planner::open(store.clone(), 3.0, 12.0).unwrap());

        let scheduler = Scheduler::new(
            queue.clone(),
            classifier.clone(),
            gate.clone(),
            pool.clone(),
            planner,
        );
        Fixture {
            scheduler,
            queue,
            classifier,
            gate,
            pool,
            probe,
            store,
            _dir: dir,
        }
    }

    /// Monday 2026-08-03 at the given hour, local time.
    fn monday_at(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 3, hour, 15, 0).unwrap()
    }

    fn draft(title: &str, category: &str, hours: f64, priority: Priority) -> NewTask {
        NewTask::new(title, "do the thing", category, hours, priority)
    }

    #[tokio::test]
    async fn test_spawn_under_open_context() {
        // Scenario: high-priority bugfix, ceiling 3, nothing running.
        let f = fixture();
        f.classifier
            .set_explicit("overnight", monday_at(12))
            .await
            .unwrap();

        let a = f
            .queue
            .enqueue(draft("fix importer", "bugfix", 2.0, Priority::High))
            .await
            .unwrap();

        let summary = f.scheduler.run_pass(monday_at(12)).await.unwrap();
        assert_eq!(summary.spawned, vec![a]);
        assert_eq!(f.queue.get(a).await.unwrap().status, TaskStatus::InProgress);
        assert_eq!(f.pool.running_count().await, 1);
    }

    #[tokio::test]
    async fn test_ceiling_one_then_cascade_fill() {
        // Scenario: ceiling 1; B waits until A completes, then the
        // completion itself fills the slot.
        let f = fixture();
        f.classifier
            .set_explicit("evening", monday_at(12))
            .await
            .unwrap();

        let a = f
            .queue
            .enqueue(draft("first", "maintenance", 1.0, Priority::High))
            .await
            .unwrap();
        let b = f
            .queue
            .enqueue(draft("second", "maintenance", 1.0, Priority::High))
            .await
            .unwrap();

        let summary = f.scheduler.run_pass(monday_at(12)).await.unwrap();
        assert_eq!(summary.spawned, vec![a]);
        assert_eq!(summary.halted, Some(DeferReason::CapacityReached));
        assert_eq!(f.queue.get(b).await.unwrap().status, TaskStatus::Queued);

        let worker = f.scheduler.worker_for_task(a).await.unwrap();
        let fill = f
            .scheduler
            .complete(worker.worker_id, monday_at(13))
            .await
            .unwrap();

        assert_eq!(f.queue.get(a).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(fill.spawned, vec![b]);
        assert_eq!(f.queue.get(b).await.unwrap().status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_dependencies_gate_spawning() {
        let f = fixture();
        f.classifier
            .set_explicit("overnight", monday_at(12))
            .await
            .unwrap();

        let d = f
            .queue
            .enqueue(draft("dep", "bugfix", 1.0, Priority::Normal))
            .await
            .unwrap();
        let c = f
            .queue
            .enqueue(draft("dependent", "bugfix", 1.0, Priority::Critical).with_dependencies([d]))
            .await
            .unwrap();

        // Only the dependency spawns, despite C's higher priority.
        let summary = f.scheduler.run_pass(monday_at(12)).await.unwrap();
        assert_eq!(summary.spawned, vec![d]);

        let worker = f.scheduler.worker_for_task(d).await.unwrap();
        let fill = f
            .scheduler
            .complete(worker.worker_id, monday_at(13))
            .await
            .unwrap();
        assert_eq!(fill.spawned, vec![c]);
    }

    #[tokio::test]
    async fn test_context_category_policy_filters_backlog() {
        let f = fixture();
        // Workday allows maintenance/bugfix/research/data_entry only.
        f.classifier
            .set_explicit("workday", monday_at(12))
            .await
            .unwrap();

        let allowed = f
            .queue
            .enqueue(draft("tidy", "maintenance", 1.0, Priority::Low))
            .await
            .unwrap();
        let _blocked = f
            .queue
            .enqueue(draft("post", "content", 1.0, Priority::Critical))
            .await
            .unwrap();

        let summary = f.scheduler.run_pass(monday_at(12)).await.unwrap();
        assert_eq!(summary.spawned, vec![allowed]);
    }

    #[tokio::test]
    async fn test_brake_halts_the_pass() {
        let f = fixture();
        f.classifier
            .set_explicit("overnight", monday_at(12))
            .await
            .unwrap();
        f.gate.set_emergency_brake(true).await.unwrap();

        f.queue
            .enqueue(draft("anything", "bugfix", 1.0, Priority::High))
            .await
            .unwrap();

        let summary = f.scheduler.run_pass(monday_at(12)).await.unwrap();
        assert!(summary.spawned.is_empty());
        assert_eq!(
            summary.halted,
            Some(DeferReason::Denied(DenyReason::EmergencyBrakeActive))
        );
    }

    #[tokio::test]
    async fn test_failure_retries_then_spawns_again() {
        let f = fixture();
        f.classifier
            .set_explicit("overnight", monday_at(12))
            .await
            .unwrap();

        let a = f
            .queue
            .enqueue(draft("flaky", "bugfix", 1.0, Priority::High))
            .await
            .unwrap();
        f.scheduler.run_pass(monday_at(12)).await.unwrap();

        let worker = f.scheduler.worker_for_task(a).await.unwrap();
        let fill = f
            .scheduler
            .fail(worker.worker_id, "exit 1", monday_at(13))
            .await
            .unwrap();

        // Requeued by the bounded retry path and immediately respawned by
        // the cascade fill.
        assert_eq!(fill.spawned, vec![a]);
        let task = f.queue.get(a).await.unwrap();
        assert_eq!(task.retries, 1);
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_recovery_requeues_dead_workers_task() {
        let f = fixture();
        f.classifier
            .set_explicit("overnight", monday_at(12))
            .await
            .unwrap();

        let a = f
            .queue
            .enqueue(draft("doomed", "bugfix", 1.0, Priority::High))
            .await
            .unwrap();
        let b = f
            .queue
            .enqueue(draft("survivor", "bugfix", 1.0, Priority::High))
            .await
            .unwrap();
        f.scheduler.run_pass(monday_at(12)).await.unwrap();

        let dead = f.scheduler.worker_for_task(a).await.unwrap();
        let alive = f.scheduler.worker_for_task(b).await.unwrap();
        f.probe.mark_alive(alive.handle.pid);
        f.probe.mark_dead(dead.handle.pid);

        let report = f.scheduler.recover().await.unwrap();
        assert_eq!(report.demoted.len(), 1);
        assert_eq!(report.demoted[0].task_id, a);

        // The dead worker's task went through the fail path; the
        // survivor's task was untouched.
        assert_eq!(f.queue.get(a).await.unwrap().status, TaskStatus::Queued);
        assert_eq!(f.queue.get(a).await.unwrap().retries, 1);
        assert_eq!(f.queue.get(b).await.unwrap().status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_plan_completion_goes_through_the_queue() {
        // Scenario: a five-phase plan; the task completes on the fifth
        // advance only, and only via the state machine.
        let f = fixture();

        let a = f
            .queue
            .enqueue(draft("big write-up", "content", 5.0, Priority::Normal))
            .await
            .unwrap();

        let plan = f.scheduler.select_plan(a).await.unwrap();
        assert_eq!(plan.phases.len(), 5);
        assert_eq!(f.queue.get(a).await.unwrap().status, TaskStatus::InProgress);

        let phases = ["research", "outline", "draft", "polish", "publish_prep"];
        for (i, phase) in phases.iter().enumerate() {
            let advance = f.scheduler.advance_plan_phase(phase).await.unwrap();
            if i < phases.len() - 1 {
                assert!(matches!(advance, PhaseAdvance::Advanced { .. }));
                assert_eq!(
                    f.queue.get(a).await.unwrap().status,
                    TaskStatus::InProgress,
                    "task must not complete before the final phase"
                );
            } else {
                assert_eq!(advance, PhaseAdvance::PlanCompleted);
            }
        }

        assert_eq!(f.queue.get(a).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_state_survives_restart_mid_flight() {
        let f = fixture();
        f.classifier
            .set_explicit("overnight", monday_at(12))
            .await
            .unwrap();

        let a = f
            .queue
            .enqueue(draft("long haul", "bugfix", 2.0, Priority::High))
            .await
            .unwrap();
        f.scheduler.run_pass(monday_at(12)).await.unwrap();
        let worker = f.scheduler.worker_for_task(a).await.unwrap();
        f.probe.mark_alive(worker.handle.pid);

        // Rebuild everything over the same state directory.
        let queue = Arc::new(
            TaskQueue::open(f.store.clone(), 3, 25, Arc::new(LogEscalation)).unwrap(),
        );
        let registry = ActionRegistry::from_settings(&GuardrailSettings::default()).unwrap();
        let pool = Arc::new(
            WorkerPool::open(
                f.store.clone(),
                Arc::new(FakeLauncher::new()),
                f.probe.clone(),
                Arc::new(FakeResources::new(true)),
                f.store.root().join("logs"),
                10,
            )
            .unwrap(),
        );
        let restarted = Scheduler::new(
            queue.clone(),
            Arc::new(ContextClassifier::new(f.store.clone()).unwrap()),
            Arc::new(Gate::open(f.store.clone(), registry, 1000, 1000).unwrap()),
            pool.clone(),
            Arc::new(Planner::open(f.store.clone(), 3.0, 12.0).unwrap()),
        );

        let report = restarted.recover().await.unwrap();
        assert_eq!(report.alive, vec![worker.worker_id]);
        assert!(report.demoted.is_empty());
        assert_eq!(queue.get(a).await.unwrap().status, TaskStatus::InProgress);
        assert_eq!(pool.running_count().await, 1);
    }
}
