//! The closed set of autonomous action kinds.
//!
//! Action kinds are an enum, not strings: the settings file maps names to
//! approval levels, and that mapping is validated into a registry once at
//! startup. An unknown name or level is a configuration error that stops
//! startup, never a silent runtime no-op.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::settings::GuardrailSettings;

/// Every autonomous action the platform knows how to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Start a worker process for a task.
    SpawnWorker,
    /// Send the human a notification.
    SendNotification,
    /// Draft an email for review.
    DraftEmail,
    /// Publish a social post.
    PublishPost,
    /// Enter data into an external tracker.
    DataEntry,
    /// Regenerate a dashboard.
    RefreshDashboard,
}

impl ActionKind {
    /// All known kinds, for registry completeness checks.
    pub const ALL: [ActionKind; 6] = [
        ActionKind::SpawnWorker,
        ActionKind::SendNotification,
        ActionKind::DraftEmail,
        ActionKind::PublishPost,
        ActionKind::DataEntry,
        ActionKind::RefreshDashboard,
    ];

    /// Stable configuration/wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SpawnWorker => "spawn_worker",
            Self::SendNotification => "send_notification",
            Self::DraftEmail => "draft_email",
            Self::PublishPost => "publish_post",
            Self::DataEntry => "data_entry",
            Self::RefreshDashboard => "refresh_dashboard",
        }
    }

    /// Parse a configuration name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == s)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How much human involvement an action kind requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLevel {
    /// Run without asking.
    AutoExecute,
    /// Run, but tell the human it happened.
    NotifyThenExecute,
    /// Wait for an explicit approval first.
    ApprovalRequired,
}

impl ActionLevel {
    /// Stable configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AutoExecute => "auto",
            Self::NotifyThenExecute => "notify",
            Self::ApprovalRequired => "approval",
        }
    }

    /// Parse a configuration name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::AutoExecute),
            "notify" => Some(Self::NotifyThenExecute),
            "approval" => Some(Self::ApprovalRequired),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Action kind -> approval level, built once at startup.
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    levels: HashMap<ActionKind, ActionLevel>,
}

impl ActionRegistry {
    /// Build the registry from settings, validating names, levels, and
    /// completeness: every known kind must be classified exactly once.
    pub fn from_settings(settings: &GuardrailSettings) -> Result<Self, ConfigError> {
        let mut levels = HashMap::new();

        for (name, level_name) in &settings.action_levels {
            let kind = ActionKind::parse(name).ok_or_else(|| ConfigError::UnknownAction {
                name: name.clone(),
            })?;
            let level = ActionLevel::parse(level_name).ok_or_else(|| ConfigError::UnknownLevel {
                action: name.clone(),
                level: level_name.clone(),
            })?;
            levels.insert(kind, level);
        }

        for kind in ActionKind::ALL {
            if !levels.contains_key(&kind) {
                return Err(ConfigError::Invalid {
                    path: format!("guardrail.action_levels.{}", kind),
                    reason: "action kind is not classified".to_string(),
                });
            }
        }

        Ok(Self { levels })
    }

    /// The configured level for an action kind.
    pub fn level(&self, action: ActionKind) -> ActionLevel {
        // Completeness is enforced at construction.
        self.levels[&action]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_build_a_registry() {
        let registry = ActionRegistry::from_settings(&GuardrailSettings::default()).unwrap();
        assert_eq!(registry.level(ActionKind::SpawnWorker), ActionLevel::AutoExecute);
        assert_eq!(
            registry.level(ActionKind::PublishPost),
            ActionLevel::ApprovalRequired
        );
    }

    #[test]
    fn test_unknown_action_name_fails_startup() {
        let mut settings = GuardrailSettings::default();
        settings
            .action_levels
            .insert("launch_rocket".to_string(), "auto".to_string());

        let err = ActionRegistry::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAction { name } if name == "launch_rocket"));
    }

    #[test]
    fn test_unknown_level_fails_startup() {
        let mut settings = GuardrailSettings::default();
        settings
            .action_levels
            .insert("spawn_worker".to_string(), "yolo".to_string());

        let err = ActionRegistry::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLevel { .. }));
    }

    #[test]
    fn test_missing_classification_fails_startup() {
        let mut settings = GuardrailSettings::default();
        settings.action_levels.remove("draft_email");

        let err = ActionRegistry::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_action_kind_names_roundtrip() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(ActionKind::parse("unknown_thing"), None);
    }
}
