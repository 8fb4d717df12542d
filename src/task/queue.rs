//! Durable task queue and lifecycle state machine.
//!
//! The queue owns every `Task` record from enqueue to archive. All status
//! changes go through it, every mutation is persisted before returning, and
//! the human-facing report is always rebuilt from the task records: the
//! records are the single source of truth, the report a disposable
//! projection.
//!
//! Completed tasks are archived, never deleted, so dependency checks keep
//! seeing them after they leave the report's recent window.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::QueueError;
use crate::store::StateDir;
use crate::task::{NewTask, Task, TaskStatus};

/// Persisted document name, owned by the queue.
const TASKS_DOC: &str = "tasks.json";

/// Terminal handoff of a repeatedly failed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub task_id: Uuid,
    pub retry_count: u32,
    pub last_error: String,
}

/// Where escalations go. Real delivery (chat message, email, pager) is an
/// external collaborator; the core only hands over the event.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn escalate(&self, event: EscalationEvent);
}

/// Default sink: log and move on. Nothing is silently dropped; the event
/// also lands in the task record's `last_error`.
pub struct LogEscalation;

#[async_trait]
impl EscalationSink for LogEscalation {
    async fn escalate(&self, event: EscalationEvent) {
        tracing::error!(
            task_id = %event.task_id,
            retry_count = event.retry_count,
            last_error = %event.last_error,
            "task escalated after exhausting retries"
        );
    }
}

/// The persisted queue ledger.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    tasks: HashMap<Uuid, Task>,
    next_sequence: u64,
}

/// One line of the queue report.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub priority: String,
    pub status: TaskStatus,
    pub estimated_effort_hours: f64,
    pub retries: u32,
}

/// Partitioned ledger views, rebuilt from the task records on every call.
#[derive(Debug, Clone, Serialize)]
pub struct QueueReport {
    pub building: Vec<TaskSummary>,
    pub queued: Vec<TaskSummary>,
    pub recently_completed: Vec<TaskSummary>,
    pub failed: Vec<TaskSummary>,
}

/// Durable task backlog and state machine.
pub struct TaskQueue {
    state: RwLock<QueueState>,
    store: StateDir,
    max_retries: u32,
    recent_window: usize,
    sink: Arc<dyn EscalationSink>,
}

impl TaskQueue {
    /// Open the queue, restoring the persisted ledger.
    pub fn open(
        store: StateDir,
        max_retries: u32,
        recent_window: usize,
        sink: Arc<dyn EscalationSink>,
    ) -> Result<Self, QueueError> {
        let state = store.load::<QueueState>(TASKS_DOC)?.unwrap_or_default();
        Ok(Self {
            state: RwLock::new(state),
            store,
            max_retries,
            recent_window,
            sink,
        })
    }

    /// Enqueue a new task.
    ///
    /// Validation is all-or-nothing: a rejected task is never partially
    /// inserted. Dependencies must name existing tasks, and the insert is
    /// refused if the dependency graph would contain a cycle.
    pub async fn enqueue(&self, new: NewTask) -> Result<Uuid, QueueError> {
        let reject = |reason: &str| QueueError::Validation {
            reason: reason.to_string(),
        };
        if new.title.trim().is_empty() {
            return Err(reject("title must not be empty"));
        }
        if new.description.trim().is_empty() {
            return Err(reject("description must not be empty"));
        }
        if new.category.trim().is_empty() {
            return Err(reject("category must not be empty"));
        }
        if !new.estimated_effort_hours.is_finite() || new.estimated_effort_hours <= 0.0 {
            return Err(reject("estimated effort must be a positive number of hours"));
        }

        let mut state = self.state.write().await;

        for dep in &new.dependencies {
            if !state.tasks.contains_key(dep) {
                return Err(QueueError::UnknownDependency { id: *dep });
            }
        }

        let id = Uuid::new_v4();
        if reaches(&state.tasks, &new.dependencies, id) {
            return Err(QueueError::DependencyCycle { id });
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let task = Task {
            id,
            title: new.title,
            description: new.description,
            category: new.category,
            estimated_effort_hours: new.estimated_effort_hours,
            priority: new.priority,
            dependencies: new.dependencies,
            auto_approve: new.auto_approve,
            status: TaskStatus::Queued,
            sequence,
            retries: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
        };

        state.tasks.insert(id, task);
        self.store.save(TASKS_DOC, &*state)?;

        tracing::info!(task_id = %id, sequence, "task enqueued");
        Ok(id)
    }

    /// Fetch a task by id.
    pub async fn get(&self, id: Uuid) -> Result<Task, QueueError> {
        self.state
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or(QueueError::NotFound { id })
    }

    /// Ids of all completed tasks.
    pub async fn completed_ids(&self) -> BTreeSet<Uuid> {
        self.state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id)
            .collect()
    }

    /// All tasks currently eligible to run: queued, dependencies complete.
    pub async fn eligible_tasks(&self) -> Vec<Task> {
        let state = self.state.read().await;
        let completed: BTreeSet<Uuid> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id)
            .collect();
        state
            .tasks
            .values()
            .filter(|t| t.eligible(&completed))
            .cloned()
            .collect()
    }

    /// Move a task to in-progress when a worker picks it up.
    pub async fn mark_in_progress(&self, id: Uuid) -> Result<(), QueueError> {
        self.transition(id, TaskStatus::InProgress, |task| {
            task.started_at = Some(Utc::now());
        })
        .await
    }

    /// Mark a task completed.
    pub async fn complete_task(&self, id: Uuid) -> Result<(), QueueError> {
        self.transition(id, TaskStatus::Completed, |task| {
            task.completed_at = Some(Utc::now());
        })
        .await?;
        tracing::info!(task_id = %id, "task completed");
        Ok(())
    }

    /// Record a failure, re-queueing within the retry budget.
    ///
    /// The first `max_retries` failures requeue the task with an
    /// incremented attempt count; the next one is terminal and hands an
    /// escalation event to the sink. Returns the resulting status.
    pub async fn fail_task(&self, id: Uuid, error: &str) -> Result<TaskStatus, QueueError> {
        let (status, escalation) = {
            let mut state = self.state.write().await;
            let max_retries = self.max_retries;
            let task = state.tasks.get_mut(&id).ok_or(QueueError::NotFound { id })?;

            if task.status != TaskStatus::InProgress {
                return Err(QueueError::InvalidTransition {
                    id,
                    from: task.status.to_string(),
                    to: TaskStatus::Failed.to_string(),
                });
            }

            task.last_error = Some(error.to_string());

            if task.retries < max_retries {
                task.retries += 1;
                task.status = TaskStatus::Queued;
                task.started_at = None;
                tracing::warn!(
                    task_id = %id,
                    attempt = task.retries,
                    max_retries,
                    error,
                    "task failed, requeued for retry"
                );
                (TaskStatus::Queued, None)
            } else {
                task.status = TaskStatus::Failed;
                let event = EscalationEvent {
                    task_id: id,
                    retry_count: task.retries,
                    last_error: error.to_string(),
                };
                (TaskStatus::Failed, Some(event))
            }
        };

        // Persist before escalating: the terminal status must be on disk
        // even if the sink is slow or the process dies in it.
        self.store.save(TASKS_DOC, &*self.state.read().await)?;

        if let Some(event) = escalation {
            self.sink.escalate(event).await;
        }
        Ok(status)
    }

    /// Kill a queued task. Operator action only; running tasks cannot be
    /// killed here; releasing their worker slot is the controller's job.
    pub async fn kill_task(&self, id: Uuid) -> Result<(), QueueError> {
        self.transition(id, TaskStatus::Killed, |_| {}).await?;
        tracing::warn!(task_id = %id, "task killed by operator");
        Ok(())
    }

    /// Build the partitioned ledger report from the task records.
    pub async fn report(&self) -> QueueReport {
        let state = self.state.read().await;

        let summary = |t: &Task| TaskSummary {
            id: t.id,
            title: t.title.clone(),
            category: t.category.clone(),
            priority: t.priority.to_string(),
            status: t.status,
            estimated_effort_hours: t.estimated_effort_hours,
            retries: t.retries,
        };

        let mut building: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::InProgress)
            .collect();
        building.sort_by_key(|t| t.sequence);

        let mut queued: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .collect();
        queued.sort_by_key(|t| t.sequence);

        let mut completed: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .collect();
        completed.sort_by_key(|t| std::cmp::Reverse(t.completed_at));
        completed.truncate(self.recent_window);

        let mut failed: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect();
        failed.sort_by_key(|t| t.sequence);

        QueueReport {
            building: building.into_iter().map(summary).collect(),
            queued: queued.into_iter().map(summary).collect(),
            recently_completed: completed.into_iter().map(summary).collect(),
            failed: failed.into_iter().map(summary).collect(),
        }
    }

    /// Count of tasks by status.
    pub async fn count(&self, status: TaskStatus) -> usize {
        self.state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.status == status)
            .count()
    }

    async fn transition<F>(&self, id: Uuid, to: TaskStatus, apply: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut Task),
    {
        {
            let mut state = self.state.write().await;
            let task = state.tasks.get_mut(&id).ok_or(QueueError::NotFound { id })?;

            if !task.status.can_transition(to) {
                return Err(QueueError::InvalidTransition {
                    id,
                    from: task.status.to_string(),
                    to: to.to_string(),
                });
            }

            task.status = to;
            apply(task);
        }
        self.store.save(TASKS_DOC, &*self.state.read().await)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn insert_raw(&self, task: Task) {
        self.state.write().await.tasks.insert(task.id, task);
    }
}

/// Reachability walk over dependency edges: is `target` reachable from any
/// of `roots`? Used to refuse inserts that would close a cycle, and to
/// catch a corrupted ledger whose graph already loops.
fn reaches(tasks: &HashMap<Uuid, Task>, roots: &BTreeSet<Uuid>, target: Uuid) -> bool {
    let mut stack: Vec<Uuid> = roots.iter().copied().collect();
    let mut seen: BTreeSet<Uuid> = BTreeSet::new();

    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(task) = tasks.get(&id) {
            stack.extend(task.dependencies.iter().copied());
        }
    }
    false
}
