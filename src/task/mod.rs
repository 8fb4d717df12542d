//! The backlog task model.
//!
//! A `Task` is a unit of candidate work: what to do, how big it is, how
//! urgent it is, and what must finish first. Tasks are created by producers
//! (content generators, domain scripts, the operator) and mutated only by
//! the queue state machine; producers never touch status.

mod score;
pub mod queue;

pub use queue::{EscalationEvent, EscalationSink, LogEscalation, QueueReport, TaskQueue, TaskSummary};
pub use score::{rank, score};

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority ordinal for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Numeric weight for scoring and comparison.
    pub fn weight(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Parse a priority name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" | "medium" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" | "urgent" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight().cmp(&other.weight())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Killed,
}

impl TaskStatus {
    /// Whether a transition to `next` is allowed.
    ///
    /// Transitions are monotonic except the bounded `Failed -> Queued`
    /// retry path, which only the queue drives. `Killed` is reachable only
    /// from `Queued`, by explicit operator action.
    pub fn can_transition(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, InProgress)
                | (Queued, Killed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, Queued)
        )
    }

    /// Terminal states never change again (for `Failed`, only once the
    /// retry budget is exhausted; the queue enforces the bound).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Killed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

/// A unit of candidate work in the backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub estimated_effort_hours: f64,
    pub priority: Priority,
    pub dependencies: BTreeSet<Uuid>,
    pub auto_approve: bool,
    pub status: TaskStatus,
    /// Monotonic enqueue order, the deterministic FIFO tie-break.
    pub sequence: u64,
    /// Recorded retry attempts so far.
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Task {
    /// True iff the task is queued and every dependency is completed.
    pub fn eligible(&self, completed_ids: &BTreeSet<Uuid>) -> bool {
        self.status == TaskStatus::Queued
            && self.dependencies.iter().all(|dep| completed_ids.contains(dep))
    }
}

/// Fields a producer supplies at enqueue time.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub category: String,
    pub estimated_effort_hours: f64,
    pub priority: Priority,
    pub dependencies: BTreeSet<Uuid>,
    pub auto_approve: bool,
}

impl NewTask {
    /// Create a task with empty dependencies and manual approval.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
        estimated_effort_hours: f64,
        priority: Priority,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            category: category.into(),
            estimated_effort_hours,
            priority,
            dependencies: BTreeSet::new(),
            auto_approve: false,
        }
    }

    /// Add dependencies.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = Uuid>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Mark the task as pre-approved for autonomous execution.
    pub fn auto_approved(mut self) -> Self {
        self.auto_approve = true;
        self
    }
}
