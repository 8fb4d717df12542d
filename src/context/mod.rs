//! Context classification.
//!
//! The current `Context` is the policy bundle every scheduling pass runs
//! under: how many workers may run, which task categories are fair game,
//! and how heavy a task the pass should prefer. It is inferred from
//! wall-clock time and day via ordered calendar-window rules, or set
//! explicitly by the operator.

mod classifier;

pub use classifier::{ClassifierRule, ContextClassifier, DayFilter, TransitionRecord};

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which task categories a context admits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFilter {
    /// Every category is allowed.
    All,
    /// Only the listed categories are allowed.
    Only(BTreeSet<String>),
}

/// Task-sizing hint for downstream selection. Never enforced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Light,
    Standard,
    Deep,
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Standard => write!(f, "standard"),
            Self::Deep => write!(f, "deep"),
        }
    }
}

/// The current policy bundle. Recomputed on demand, never persisted;
/// only the transition log survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub label: String,
    pub detected_at: DateTime<Utc>,
    /// Concurrency ceiling for the worker pool. Always at least 1.
    pub max_concurrency: usize,
    pub allowed_categories: CategoryFilter,
    pub intensity: Intensity,
}

impl Context {
    /// The conservative fallback when no rule matches.
    pub fn unknown(detected_at: DateTime<Utc>) -> Self {
        Self {
            label: "unknown".to_string(),
            detected_at,
            max_concurrency: 1,
            allowed_categories: CategoryFilter::Only(
                ["maintenance".to_string()].into_iter().collect(),
            ),
            intensity: Intensity::Light,
        }
    }

    /// Whether this context admits the given task category.
    pub fn allows_category(&self, category: &str) -> bool {
        match &self.allowed_categories {
            CategoryFilter::All => true,
            CategoryFilter::Only(set) => set.contains(category),
        }
    }

    /// Replace the category filter with "all".
    pub fn with_all_categories(mut self) -> Self {
        self.allowed_categories = CategoryFilter::All;
        self
    }

    /// Replace the category filter with an explicit list.
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_categories =
            CategoryFilter::Only(categories.into_iter().map(Into::into).collect());
        self
    }
}
