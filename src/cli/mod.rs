//! Operator CLI commands.
//!
//! Every command is one-shot: build the runtime from settings, do the
//! thing, print a human-readable answer (with the structured code where a
//! guardrail is involved), exit 0 on success and 1 on failure.

mod config;
mod context;
mod guardrail;
mod queue;

pub use config::{ConfigCommand, run_config_command};
pub use context::{ContextCommand, run_context_command};
pub use guardrail::{GuardrailCommand, run_guardrail_command};
pub use queue::{QueueCommand, run_queue_command};

use std::sync::Arc;

use crate::context::ContextClassifier;
use crate::guardrail::{ActionRegistry, Gate};
use crate::plan::Planner;
use crate::scheduler::Scheduler;
use crate::settings::Settings;
use crate::store::StateDir;
use crate::task::{LogEscalation, TaskQueue};
use crate::worker::{DiskHeadroom, ProcessLauncher, ProcessProbe, WorkerPool};

/// Everything a command needs, wired from settings.
pub(crate) struct Runtime {
    pub settings: Settings,
    pub queue: Arc<TaskQueue>,
    pub classifier: Arc<ContextClassifier>,
    pub gate: Arc<Gate>,
    pub pool: Arc<WorkerPool>,
    pub scheduler: Scheduler,
}

impl Runtime {
    /// Build the runtime. Configuration problems (unknown action kinds,
    /// unknown levels) fail here, before any command runs.
    pub fn init() -> anyhow::Result<Self> {
        let settings = Settings::load();
        let store = StateDir::open(settings.state_dir())?;

        let registry = ActionRegistry::from_settings(&settings.guardrail)?;
        let gate = Arc::new(Gate::open(
            store.clone(),
            registry,
            settings.guardrail.hourly_budget,
            settings.guardrail.per_action_budget,
        )?);

        let queue = Arc::new(TaskQueue::open(
            store.clone(),
            settings.scheduler.max_retries,
            settings.scheduler.recent_window,
            Arc::new(LogEscalation),
        )?);

        let classifier = Arc::new(ContextClassifier::new(store.clone())?);

        let log_dir = settings
            .executor
            .log_dir
            .clone()
            .unwrap_or_else(|| store.root().join("logs"));
        let pool = Arc::new(WorkerPool::open(
            store.clone(),
            Arc::new(ProcessLauncher::new(settings.executor.command.clone())),
            Arc::new(ProcessProbe),
            Arc::new(DiskHeadroom::new(settings.scheduler.disk_max_percent)),
            log_dir,
            settings.scheduler.worker_history,
        )?);

        let planner = Arc::new(Planner::open(
            store.clone(),
            settings.planning.min_session_hours,
            settings.planning.max_session_hours,
        )?);

        let scheduler = Scheduler::new(
            queue.clone(),
            classifier.clone(),
            gate.clone(),
            pool.clone(),
            planner,
        );

        Ok(Self {
            settings,
            queue,
            classifier,
            gate,
            pool,
            scheduler,
        })
    }
}
