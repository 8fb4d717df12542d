//! Persistent settings.
//!
//! Settings live as a JSON document under the user config directory and are
//! edited through the `config` CLI commands with dotted paths
//! (e.g. `scheduler.max_retries`). Environment overrides are loaded via
//! `dotenvy` at startup; `STEWARD_STATE_DIR` wins over the stored
//! `state_dir`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where state documents live. `None` means the platform data dir.
    pub state_dir: Option<PathBuf>,
    pub scheduler: SchedulerSettings,
    pub guardrail: GuardrailSettings,
    pub planning: PlanningSettings,
    pub executor: ExecutorSettings,
}

/// Scheduling and worker-pool knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Bounded retry budget for failed tasks.
    pub max_retries: u32,
    /// How many finished worker records to keep in history.
    pub worker_history: usize,
    /// How many completed tasks the report's recent window shows.
    pub recent_window: usize,
    /// A running worker is flagged stale after this many minutes
    /// without an update.
    pub stale_after_minutes: u64,
    /// Spawns are deferred when disk utilization exceeds this percentage.
    pub disk_max_percent: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            worker_history: 50,
            recent_window: 25,
            stale_after_minutes: 90,
            disk_max_percent: 90.0,
        }
    }
}

/// Guardrail budgets and the action classification table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailSettings {
    /// Global autonomous-action budget per rolling hour.
    pub hourly_budget: u32,
    /// Per-action-kind budget per rolling hour.
    pub per_action_budget: u32,
    /// Action kind name -> approval level name.
    ///
    /// Validated into a closed registry at startup; unknown names or levels
    /// fail startup rather than becoming runtime no-ops.
    pub action_levels: BTreeMap<String, String>,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        let mut action_levels = BTreeMap::new();
        action_levels.insert("spawn_worker".to_string(), "auto".to_string());
        action_levels.insert("send_notification".to_string(), "auto".to_string());
        action_levels.insert("refresh_dashboard".to_string(), "auto".to_string());
        action_levels.insert("data_entry".to_string(), "notify".to_string());
        action_levels.insert("draft_email".to_string(), "approval".to_string());
        action_levels.insert("publish_post".to_string(), "approval".to_string());

        Self {
            hourly_budget: 20,
            per_action_budget: 10,
            action_levels,
        }
    }
}

/// Extended-session planning band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningSettings {
    pub min_session_hours: f64,
    pub max_session_hours: f64,
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            min_session_hours: 3.0,
            max_session_hours: 12.0,
        }
    }
}

/// How workers are launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Command invoked with the work order JSON as its single argument.
    pub command: String,
    /// Directory for per-worker log files. `None` means `<state_dir>/logs`.
    pub log_dir: Option<PathBuf>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            command: "steward-exec".to_string(),
            log_dir: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: None,
            scheduler: SchedulerSettings::default(),
            guardrail: GuardrailSettings::default(),
            planning: PlanningSettings::default(),
            executor: ExecutorSettings::default(),
        }
    }
}

impl Settings {
    /// Default settings file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("steward")
            .join("settings.json")
    }

    /// Load settings from the default path, falling back to defaults.
    ///
    /// A missing file is normal (first run); a corrupt file is logged and
    /// replaced by defaults so the CLI stays usable.
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    /// Load settings from a specific path.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt settings file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Save settings to the default path.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Resolve the state directory: env override, then settings, then the
    /// platform data dir.
    pub fn state_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("STEWARD_STATE_DIR") {
            return PathBuf::from(dir);
        }
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("steward")
        })
    }

    /// Get a setting by dotted path, rendered as a string.
    pub fn get(&self, path: &str) -> Option<String> {
        match path {
            "state_dir" => Some(
                self.state_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(default)".to_string()),
            ),
            "scheduler.max_retries" => Some(self.scheduler.max_retries.to_string()),
            "scheduler.worker_history" => Some(self.scheduler.worker_history.to_string()),
            "scheduler.recent_window" => Some(self.scheduler.recent_window.to_string()),
            "scheduler.stale_after_minutes" => Some(self.scheduler.stale_after_minutes.to_string()),
            "scheduler.disk_max_percent" => Some(self.scheduler.disk_max_percent.to_string()),
            "guardrail.hourly_budget" => Some(self.guardrail.hourly_budget.to_string()),
            "guardrail.per_action_budget" => Some(self.guardrail.per_action_budget.to_string()),
            "planning.min_session_hours" => Some(self.planning.min_session_hours.to_string()),
            "planning.max_session_hours" => Some(self.planning.max_session_hours.to_string()),
            "executor.command" => Some(self.executor.command.clone()),
            "executor.log_dir" => Some(
                self.executor
                    .log_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(default)".to_string()),
            ),
            _ => path
                .strip_prefix("guardrail.action_levels.")
                .and_then(|action| self.guardrail.action_levels.get(action).cloned()),
        }
    }

    /// Set a setting by dotted path from a string value.
    pub fn set(&mut self, path: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        match path {
            "state_dir" => self.state_dir = Some(PathBuf::from(value)),
            "scheduler.max_retries" => {
                self.scheduler.max_retries = value.parse().map_err(|_| invalid("expected u32"))?;
            }
            "scheduler.worker_history" => {
                self.scheduler.worker_history =
                    value.parse().map_err(|_| invalid("expected usize"))?;
            }
            "scheduler.recent_window" => {
                self.scheduler.recent_window =
                    value.parse().map_err(|_| invalid("expected usize"))?;
            }
            "scheduler.stale_after_minutes" => {
                self.scheduler.stale_after_minutes =
                    value.parse().map_err(|_| invalid("expected u64"))?;
            }
            "scheduler.disk_max_percent" => {
                let pct: f64 = value.parse().map_err(|_| invalid("expected f64"))?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(invalid("expected a percentage in 0..=100"));
                }
                self.scheduler.disk_max_percent = pct;
            }
            "guardrail.hourly_budget" => {
                self.guardrail.hourly_budget =
                    value.parse().map_err(|_| invalid("expected u32"))?;
            }
            "guardrail.per_action_budget" => {
                self.guardrail.per_action_budget =
                    value.parse().map_err(|_| invalid("expected u32"))?;
            }
            "planning.min_session_hours" => {
                self.planning.min_session_hours =
                    value.parse().map_err(|_| invalid("expected f64"))?;
            }
            "planning.max_session_hours" => {
                self.planning.max_session_hours =
                    value.parse().map_err(|_| invalid("expected f64"))?;
            }
            "executor.command" => self.executor.command = value.to_string(),
            "executor.log_dir" => self.executor.log_dir = Some(PathBuf::from(value)),
            _ => {
                if let Some(action) = path.strip_prefix("guardrail.action_levels.") {
                    self.guardrail
                        .action_levels
                        .insert(action.to_string(), value.to_string());
                } else {
                    return Err(invalid("unknown setting"));
                }
            }
        }
        Ok(())
    }

    /// Reset a setting to its default value.
    pub fn reset(&mut self, path: &str) -> Result<(), ConfigError> {
        let default = Self::default();
        let value = default.get(path).ok_or_else(|| ConfigError::Invalid {
            path: path.to_string(),
            reason: "unknown setting".to_string(),
        })?;
        if value == "(default)" {
            // Optional paths reset to None rather than a rendered string.
            match path {
                "state_dir" => self.state_dir = None,
                "executor.log_dir" => self.executor.log_dir = None,
                _ => {}
            }
            return Ok(());
        }
        self.set(path, &value)
    }

    /// List all settings as (path, value) pairs.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let paths = [
            "state_dir",
            "scheduler.max_retries",
            "scheduler.worker_history",
            "scheduler.recent_window",
            "scheduler.stale_after_minutes",
            "scheduler.disk_max_percent",
            "guardrail.hourly_budget",
            "guardrail.per_action_budget",
            "planning.min_session_hours",
            "planning.max_session_hours",
            "executor.command",
            "executor.log_dir",
        ];
        for path in paths {
            if let Some(value) = self.get(path) {
                out.push((path.to_string(), value));
            }
        }
        for (action, level) in &self.guardrail.action_levels {
            out.push((
                format!("guardrail.action_levels.{}", action),
                level.clone(),
            ));
        }
        out
    }
}
