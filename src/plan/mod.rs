//! Extended-session planning.
//!
//! A task whose effort estimate lands in the extended-session band can be
//! promoted to a `Plan`: an ordered list of phases derived from its
//! category, tracked phase by phase. The planner never touches task
//! status: when the final phase lands it only *reports* completion, and
//! the caller delegates the status change to the queue state machine.
//!
//! At most one plan is active at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PlanError;
use crate::store::StateDir;
use crate::task::{Task, TaskStatus};

/// Persisted document name, owned by the planner.
const PLAN_DOC: &str = "plan.json";

/// Lifecycle of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Selected,
    InProgress,
    Completed,
}

/// A multi-phase breakdown of one large task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub task_id: Uuid,
    pub phases: Vec<String>,
    /// Always a prefix of `phases`.
    pub completed_phases: Vec<String>,
    pub status: PlanStatus,
    pub selected_at: DateTime<Utc>,
    pub estimated_effort_hours: f64,
}

impl Plan {
    /// The phase to work on next, or `None` when the plan is complete.
    pub fn current_phase(&self) -> Option<&str> {
        self.phases
            .get(self.completed_phases.len())
            .map(String::as_str)
    }
}

/// Outcome of advancing a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseAdvance {
    /// More phases remain; this is the next one.
    Advanced { next_phase: String },
    /// That was the last phase. The caller must now complete the
    /// underlying task through the queue.
    PlanCompleted,
}

/// Phase-by-phase progress against the effort estimate.
#[derive(Debug, Clone)]
pub struct PlanProgress {
    pub task_id: Uuid,
    pub completed: usize,
    pub total: usize,
    pub current_phase: Option<String>,
    pub elapsed_hours: f64,
    pub estimated_hours: f64,
    /// Elapsed exceeds the estimate and the plan is not done.
    pub off_track: bool,
}

/// Selects and tracks one extended-session plan at a time.
pub struct Planner {
    active: RwLock<Option<Plan>>,
    store: StateDir,
    min_session_hours: f64,
    max_session_hours: f64,
}

impl Planner {
    /// Open the planner, restoring a persisted plan if present.
    pub fn open(
        store: StateDir,
        min_session_hours: f64,
        max_session_hours: f64,
    ) -> Result<Self, PlanError> {
        let active = store.load::<Plan>(PLAN_DOC)?;
        Ok(Self {
            active: RwLock::new(active),
            store,
            min_session_hours,
            max_session_hours,
        })
    }

    /// Build a plan from a task in the extended-session band.
    ///
    /// A completed previous plan is replaced; an unfinished one blocks
    /// selection.
    pub async fn select(&self, task: &Task) -> Result<Plan, PlanError> {
        if task.status != TaskStatus::Queued {
            return Err(PlanError::NotPlannable {
                reason: format!("task is {}, expected queued", task.status),
            });
        }

        let hours = task.estimated_effort_hours;
        if hours < self.min_session_hours || hours > self.max_session_hours {
            return Err(PlanError::EffortOutOfBand {
                hours,
                min: self.min_session_hours,
                max: self.max_session_hours,
            });
        }

        let mut active = self.active.write().await;
        if let Some(existing) = active.as_ref() {
            if existing.status != PlanStatus::Completed {
                return Err(PlanError::AlreadyActive {
                    task_id: existing.task_id,
                });
            }
        }

        let plan = Plan {
            task_id: task.id,
            phases: phases_for(&task.category),
            completed_phases: Vec::new(),
            status: PlanStatus::Selected,
            selected_at: Utc::now(),
            estimated_effort_hours: hours,
        };
        *active = Some(plan.clone());
        self.store.save(PLAN_DOC, &plan)?;

        tracing::info!(task_id = %task.id, phases = plan.phases.len(), "plan selected");
        Ok(plan)
    }

    /// Record completion of the named phase.
    ///
    /// The name must match the current phase exactly: phases complete in
    /// order, keeping `completed_phases` a prefix of `phases`.
    pub async fn advance_phase(&self, phase: &str) -> Result<PhaseAdvance, PlanError> {
        let mut active = self.active.write().await;
        let plan = active.as_mut().ok_or(PlanError::NoActivePlan)?;

        if plan.status == PlanStatus::Completed {
            return Err(PlanError::AlreadyCompleted);
        }

        match plan.current_phase() {
            Some(current) if current == phase => {}
            expected => {
                return Err(PlanError::PhaseOutOfOrder {
                    expected: expected.map(String::from),
                    got: phase.to_string(),
                });
            }
        }

        plan.completed_phases.push(phase.to_string());

        let advance = match plan.current_phase().map(String::from) {
            Some(next) => {
                plan.status = PlanStatus::InProgress;
                PhaseAdvance::Advanced {
                    next_phase: next,
                }
            }
            None => {
                plan.status = PlanStatus::Completed;
                PhaseAdvance::PlanCompleted
            }
        };

        self.store.save(PLAN_DOC, plan)?;
        tracing::info!(
            task_id = %plan.task_id,
            phase,
            completed = plan.completed_phases.len(),
            total = plan.phases.len(),
            "phase completed"
        );
        Ok(advance)
    }

    /// Progress of the active plan against its effort estimate.
    pub async fn progress(&self, now: DateTime<Utc>) -> Result<PlanProgress, PlanError> {
        let active = self.active.read().await;
        let plan = active.as_ref().ok_or(PlanError::NoActivePlan)?;

        let elapsed_hours = (now - plan.selected_at).num_minutes().max(0) as f64 / 60.0;
        let off_track =
            plan.status != PlanStatus::Completed && elapsed_hours > plan.estimated_effort_hours;

        if off_track {
            tracing::warn!(
                task_id = %plan.task_id,
                elapsed_hours,
                estimated_hours = plan.estimated_effort_hours,
                "plan is off track"
            );
        }

        Ok(PlanProgress {
            task_id: plan.task_id,
            completed: plan.completed_phases.len(),
            total: plan.phases.len(),
            current_phase: plan.current_phase().map(String::from),
            elapsed_hours,
            estimated_hours: plan.estimated_effort_hours,
            off_track,
        })
    }

    /// The active plan, if any.
    pub async fn active(&self) -> Option<Plan> {
        self.active.read().await.clone()
    }
}

/// Category -> phase list, with a generic fallback.
fn phases_for(category: &str) -> Vec<String> {
    let phases: &[&str] = match category {
        "content" => &["research", "outline", "draft", "polish", "publish_prep"],
        "dashboard" => &["gather_data", "transform", "render", "review"],
        "research" => &["collect", "analyze", "summarize"],
        "bugfix" => &["reproduce", "diagnose", "implement", "verify"],
        _ => &["prepare", "execute", "review"],
    };
    phases.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::task::Priority;

    fn planner() -> (Planner, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();
        let planner = Planner::open(store, 3.0, 12.0).unwrap();
        (planner, dir)
    }

    fn make_task(category: &str, hours: f64) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: "big one".to_string(),
            description: "a large piece of work".to_string(),
            category: category.to_string(),
            estimated_effort_hours: hours,
            priority: Priority::Normal,
            dependencies: BTreeSet::new(),
            auto_approve: false,
            status: TaskStatus::Queued,
            sequence: 0,
            retries: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_select_derives_phases_from_category() {
        let (planner, _dir) = planner();
        let plan = planner.select(&make_task("content", 5.0)).await.unwrap();

        assert_eq!(plan.phases.len(), 5);
        assert_eq!(plan.status, PlanStatus::Selected);
        assert_eq!(plan.current_phase(), Some("research"));
    }

    #[tokio::test]
    async fn test_unlisted_category_gets_generic_phases() {
        let (planner, _dir) = planner();
        let plan = planner.select(&make_task("golf", 4.0)).await.unwrap();
        assert_eq!(plan.phases, vec!["prepare", "execute", "review"]);
    }

    #[tokio::test]
    async fn test_effort_band_is_enforced() {
        let (planner, _dir) = planner();

        let small = planner.select(&make_task("content", 1.0)).await;
        assert!(matches!(small, Err(PlanError::EffortOutOfBand { .. })));

        let huge = planner.select(&make_task("content", 40.0)).await;
        assert!(matches!(huge, Err(PlanError::EffortOutOfBand { .. })));
    }

    #[tokio::test]
    async fn test_only_one_active_plan() {
        let (planner, _dir) = planner();
        planner.select(&make_task("content", 5.0)).await.unwrap();

        let second = planner.select(&make_task("research", 4.0)).await;
        assert!(matches!(second, Err(PlanError::AlreadyActive { .. })));
    }

    #[tokio::test]
    async fn test_phases_complete_in_order_only() {
        let (planner, _dir) = planner();
        planner.select(&make_task("content", 5.0)).await.unwrap();

        let wrong = planner.advance_phase("draft").await;
        assert!(matches!(wrong, Err(PlanError::PhaseOutOfOrder { .. })));

        let advance = planner.advance_phase("research").await.unwrap();
        assert_eq!(
            advance,
            PhaseAdvance::Advanced {
                next_phase: "outline".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_five_phases_complete_on_fifth_call_only() {
        let (planner, _dir) = planner();
        planner.select(&make_task("content", 5.0)).await.unwrap();

        let phases = ["research", "outline", "draft", "polish", "publish_prep"];
        for (i, phase) in phases.iter().enumerate() {
            let advance = planner.advance_phase(phase).await.unwrap();
            if i < phases.len() - 1 {
                assert!(matches!(advance, PhaseAdvance::Advanced { .. }));
                assert_eq!(planner.active().await.unwrap().status, PlanStatus::InProgress);
            } else {
                assert_eq!(advance, PhaseAdvance::PlanCompleted);
            }
        }

        let plan = planner.active().await.unwrap();
        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(plan.completed_phases.len(), 5);

        // Terminal: a sixth call is refused.
        assert!(matches!(
            planner.advance_phase("encore").await,
            Err(PlanError::AlreadyCompleted)
        ));
    }

    #[tokio::test]
    async fn test_completed_plan_can_be_replaced() {
        let (planner, _dir) = planner();
        planner.select(&make_task("research", 4.0)).await.unwrap();
        for phase in ["collect", "analyze", "summarize"] {
            planner.advance_phase(phase).await.unwrap();
        }

        let next = planner.select(&make_task("content", 5.0)).await.unwrap();
        assert_eq!(next.status, PlanStatus::Selected);
    }

    #[tokio::test]
    async fn test_progress_and_off_track_flag() {
        let (planner, _dir) = planner();
        planner.select(&make_task("research", 4.0)).await.unwrap();
        planner.advance_phase("collect").await.unwrap();

        let now = Utc::now();
        let progress = planner.progress(now).await.unwrap();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.current_phase.as_deref(), Some("analyze"));
        assert!(!progress.off_track);

        // Well past the estimate and not finished: off track.
        let late = now + chrono::Duration::hours(10);
        let progress = planner.progress(late).await.unwrap();
        assert!(progress.off_track);
    }

    #[tokio::test]
    async fn test_plan_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();

        let planner = Planner::open(store.clone(), 3.0, 12.0).unwrap();
        planner.select(&make_task("content", 5.0)).await.unwrap();
        planner.advance_phase("research").await.unwrap();
        drop(planner);

        let reloaded = Planner::open(store, 3.0, 12.0).unwrap();
        let plan = reloaded.active().await.unwrap();
        assert_eq!(plan.completed_phases, vec!["research"]);
        assert_eq!(plan.current_phase(), Some("outline"));
    }

    #[tokio::test]
    async fn test_non_queued_task_not_plannable() {
        let (planner, _dir) = planner();
        let mut task = make_task("content", 5.0);
        task.status = TaskStatus::Completed;

        assert!(matches!(
            planner.select(&task).await,
            Err(PlanError::NotPlannable { .. })
        ));
    }
}
