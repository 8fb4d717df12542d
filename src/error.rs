//! Error types for the scheduling core.
//!
//! Each subsystem gets its own error enum. Guardrail denials are
//! deliberately *not* errors; they are verdicts (see `guardrail::Verdict`),
//! since a denial is an expected answer, not a failure.

use std::path::PathBuf;

use uuid::Uuid;

/// Errors from the durable state store.
///
/// A store error is fatal for the operation that hit it: callers must not
/// proceed on an unverified assumption, and must surface the error to the
/// operator rather than silently retry.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying filesystem failure.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to acquire the state lock.
    #[error("could not lock state file {}: {reason}", .path.display())]
    Lock { path: PathBuf, reason: String },

    /// State document could not be (de)serialized.
    #[error("corrupt state document {}: {source}", .path.display())]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the task queue and its state machine.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Malformed fields at enqueue.
    #[error("invalid task: {reason}")]
    Validation { reason: String },

    /// A dependency references a task id that does not exist.
    #[error("unknown dependency: {id}")]
    UnknownDependency { id: Uuid },

    /// Inserting the task would create a dependency cycle.
    #[error("dependency cycle through task {id}")]
    DependencyCycle { id: Uuid },

    /// No task with this id.
    #[error("task not found: {id}")]
    NotFound { id: Uuid },

    /// The requested status transition is not allowed.
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    /// Persistence failed mid-operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the worker-pool controller.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The launcher could not start the executor process.
    #[error("failed to launch worker: {reason}")]
    Launch { reason: String },

    /// No tracked worker with this id.
    #[error("worker not found: {id}")]
    NotFound { id: Uuid },

    /// Persistence failed mid-operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the planning extension.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// There is no active plan to operate on.
    #[error("no active plan")]
    NoActivePlan,

    /// A plan is already in flight; only one may be active.
    #[error("a plan is already active for task {task_id}")]
    AlreadyActive { task_id: Uuid },

    /// The task's effort estimate is outside the extended-session band.
    #[error("effort of {hours}h is outside the extended-session band ({min}h..={max}h)")]
    EffortOutOfBand { hours: f64, min: f64, max: f64 },

    /// The named phase is not the next expected phase.
    #[error("phase out of order: expected {expected:?}, got {got:?}")]
    PhaseOutOfOrder { expected: Option<String>, got: String },

    /// The plan has already run through all its phases.
    #[error("plan is already completed")]
    AlreadyCompleted,

    /// The task to plan does not exist or is not plannable.
    #[error("task not plannable: {reason}")]
    NotPlannable { reason: String },

    /// Persistence failed mid-operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the guardrail gate.
///
/// Denials are not here: `can_execute` answers with a `Verdict`.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No pending approval with this id.
    #[error("unknown approval: {id}")]
    UnknownApproval { id: Uuid },

    /// Persistence failed mid-operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the context classifier.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// An explicit override named a label no rule defines.
    #[error("unknown context label: {label}")]
    UnknownLabel { label: String },

    /// Persistence failed mid-operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Umbrella error for a scheduling pass, which touches every subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while loading or validating configuration at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An action name in the settings does not map to a known action kind.
    #[error("unknown action kind in settings: {name}")]
    UnknownAction { name: String },

    /// An approval level in the settings is not one of the known levels.
    #[error("unknown approval level for action {action}: {level}")]
    UnknownLevel { action: String, level: String },

    /// A settings value is out of range or malformed.
    #[error("invalid setting {path}: {reason}")]
    Invalid { path: String, reason: String },

    /// Settings file could not be read or written.
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be parsed.
    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
