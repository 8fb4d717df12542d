//! The guardrail gate.
//!
//! One `Gate` instance per process owns the guardrail state: flags, rolling
//! rate counters, block list, and the pending-approval queue. Every
//! mutation persists before the call returns, so a crash between a check
//! and the action it allowed never leaves memory ahead of disk.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{GateError, StoreError};
use crate::guardrail::{ActionKind, ActionLevel, ActionRegistry};
use crate::store::StateDir;

/// Persisted document name, owned by the gate.
const GUARDRAIL_DOC: &str = "guardrail.json";

/// A rolling-hour counter.
///
/// The boundary is set lazily on first use and advanced exactly once when
/// crossed; the count never goes negative because it only ever resets to
/// zero or increments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RateWindow {
    count: u32,
    resets_at: Option<DateTime<Utc>>,
}

impl RateWindow {
    /// Establish or advance the window boundary for `now`.
    fn roll(&mut self, now: DateTime<Utc>) {
        match self.resets_at {
            None => self.resets_at = Some(now + Duration::hours(1)),
            Some(boundary) if now > boundary => {
                self.count = 0;
                self.resets_at = Some(now + Duration::hours(1));
            }
            Some(_) => {}
        }
    }
}

/// An approval waiting on (or granted by) the human.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub approval_id: Uuid,
    pub action: ActionKind,
    pub description: String,
    pub context: Option<String>,
    pub approved: bool,
    pub requested_at: DateTime<Utc>,
}

/// The persisted guardrail state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GuardrailState {
    dry_run: bool,
    emergency_brake: bool,
    global: RateWindow,
    per_action: HashMap<ActionKind, RateWindow>,
    blocked: BTreeSet<ActionKind>,
    pending: Vec<PendingApproval>,
}

/// Why an action was denied. `code()` is the stable machine-readable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    EmergencyBrakeActive,
    ActionBlocked,
    DryRunMode,
    RateLimitExceeded,
    ApprovalRequired { approval_id: Uuid },
}

impl DenyReason {
    /// Stable reason code surfaced to callers and the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmergencyBrakeActive => "emergency_brake_active",
            Self::ActionBlocked => "action_blocked",
            Self::DryRunMode => "dry_run_mode",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::ApprovalRequired { .. } => "approval_required",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmergencyBrakeActive => write!(f, "the emergency brake is engaged"),
            Self::ActionBlocked => write!(f, "this action kind is on the block list"),
            Self::DryRunMode => write!(f, "dry-run mode is on, simulating only"),
            Self::RateLimitExceeded => write!(f, "the hourly action budget is spent"),
            Self::ApprovalRequired { approval_id } => {
                write!(f, "human approval is required (approval {})", approval_id)
            }
        }
    }
}

/// The gate's answer for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Go ahead, at the configured involvement level.
    Allowed { level: ActionLevel },
    /// Do not proceed.
    Denied { reason: DenyReason },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Snapshot of the guardrail state for the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct GuardrailStatus {
    pub dry_run: bool,
    pub emergency_brake: bool,
    pub actions_this_hour: u32,
    pub hourly_budget: u32,
    pub window_resets_at: Option<DateTime<Utc>>,
    pub blocked: Vec<String>,
    pub pending: Vec<PendingApproval>,
}

/// Process-wide guardrail gate.
pub struct Gate {
    registry: ActionRegistry,
    hourly_budget: u32,
    per_action_budget: u32,
    state: RwLock<GuardrailState>,
    store: StateDir,
}

impl Gate {
    /// Open the gate, restoring persisted state.
    pub fn open(
        store: StateDir,
        registry: ActionRegistry,
        hourly_budget: u32,
        per_action_budget: u32,
    ) -> Result<Self, StoreError> {
        let state = store.load::<GuardrailState>(GUARDRAIL_DOC)?.unwrap_or_default();
        Ok(Self {
            registry,
            hourly_budget,
            per_action_budget,
            state: RwLock::new(state),
            store,
        })
    }

    /// Ask whether an autonomous action may proceed, as of now.
    pub async fn can_execute(
        &self,
        action: ActionKind,
        context: Option<&str>,
    ) -> Result<Verdict, StoreError> {
        self.can_execute_at(action, context, Utc::now(), false).await
    }

    /// `can_execute` with an explicit clock and an optional pre-approval.
    ///
    /// `pre_approved` is set for tasks enqueued with `auto_approve`: it
    /// downgrades an approval-required action to notify-then-execute for
    /// this one check. Brake, block list, dry-run, and rate limits still
    /// apply.
    ///
    /// Checks run in strict short-circuit order; a denial from an earlier
    /// layer never touches the later layers' state.
    pub async fn can_execute_at(
        &self,
        action: ActionKind,
        context: Option<&str>,
        now: DateTime<Utc>,
        pre_approved: bool,
    ) -> Result<Verdict, StoreError> {
        let mut state = self.state.write().await;

        // 1. Emergency brake.
        if state.emergency_brake {
            return Ok(self.deny(action, DenyReason::EmergencyBrakeActive));
        }

        // 2. Block list.
        if state.blocked.contains(&action) {
            return Ok(self.deny(action, DenyReason::ActionBlocked));
        }

        // 3. Dry run: simulate only.
        if state.dry_run {
            tracing::info!(action = %action, "dry-run: would execute");
            return Ok(self.deny(action, DenyReason::DryRunMode));
        }

        // 4. Rolling-hour budgets. Rolling the window may mutate state, so
        // everything from here on persists before returning.
        state.global.roll(now);
        state.per_action.entry(action).or_default().roll(now);

        if state.global.count >= self.hourly_budget
            || state.per_action[&action].count >= self.per_action_budget
        {
            self.store.save(GUARDRAIL_DOC, &*state)?;
            return Ok(self.deny(action, DenyReason::RateLimitExceeded));
        }

        // 5. Approval tier.
        let mut level = self.registry.level(action);
        if pre_approved && level == ActionLevel::ApprovalRequired {
            level = ActionLevel::NotifyThenExecute;
        }

        if level == ActionLevel::ApprovalRequired {
            let granted = state
                .pending
                .iter()
                .position(|p| p.action == action && p.approved);

            match granted {
                Some(idx) => {
                    // Single use: the grant is consumed by this check.
                    let consumed = state.pending.remove(idx);
                    tracing::info!(
                        action = %action,
                        approval_id = %consumed.approval_id,
                        "approval consumed"
                    );
                }
                None => {
                    let approval_id = match state.pending.iter().find(|p| p.action == action) {
                        Some(existing) => existing.approval_id,
                        None => {
                            let entry = PendingApproval {
                                approval_id: Uuid::new_v4(),
                                action,
                                description: format!("approve autonomous action: {}", action),
                                context: context.map(String::from),
                                approved: false,
                                requested_at: now,
                            };
                            let id = entry.approval_id;
                            state.pending.push(entry);
                            id
                        }
                    };
                    self.store.save(GUARDRAIL_DOC, &*state)?;
                    return Ok(self.deny(action, DenyReason::ApprovalRequired { approval_id }));
                }
            }
        }

        // 6. Allowed. Only executed actions count against the budgets.
        state.global.count += 1;
        if let Some(window) = state.per_action.get_mut(&action) {
            window.count += 1;
        }
        self.store.save(GUARDRAIL_DOC, &*state)?;

        Ok(Verdict::Allowed { level })
    }

    /// Grant a pending approval. The grant is consumed by the next
    /// successful check for that action; it is not a standing permission.
    pub async fn approve(&self, approval_id: Uuid) -> Result<(), GateError> {
        let mut state = self.state.write().await;
        let entry = state
            .pending
            .iter_mut()
            .find(|p| p.approval_id == approval_id)
            .ok_or(GateError::UnknownApproval { id: approval_id })?;
        entry.approved = true;
        self.store.save(GUARDRAIL_DOC, &*state)?;
        tracing::info!(approval_id = %approval_id, "approval granted");
        Ok(())
    }

    /// Reject and remove a pending approval.
    pub async fn deny_approval(&self, approval_id: Uuid) -> Result<(), GateError> {
        let mut state = self.state.write().await;
        let idx = state
            .pending
            .iter()
            .position(|p| p.approval_id == approval_id)
            .ok_or(GateError::UnknownApproval { id: approval_id })?;
        let removed = state.pending.remove(idx);
        self.store.save(GUARDRAIL_DOC, &*state)?;
        tracing::info!(approval_id = %approval_id, action = %removed.action, "approval denied");
        Ok(())
    }

    /// Toggle dry-run mode.
    pub async fn set_dry_run(&self, on: bool) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.dry_run = on;
        self.store.save(GUARDRAIL_DOC, &*state)?;
        tracing::warn!(dry_run = on, "dry-run mode changed");
        Ok(())
    }

    /// Engage or release the emergency brake.
    pub async fn set_emergency_brake(&self, on: bool) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.emergency_brake = on;
        self.store.save(GUARDRAIL_DOC, &*state)?;
        if on {
            tracing::error!("emergency brake engaged: all autonomous actions denied");
        } else {
            tracing::warn!("emergency brake released");
        }
        Ok(())
    }

    /// Add an action kind to the block list.
    pub async fn block(&self, action: ActionKind) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.blocked.insert(action);
        self.store.save(GUARDRAIL_DOC, &*state)?;
        Ok(())
    }

    /// Remove an action kind from the block list.
    pub async fn unblock(&self, action: ActionKind) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.blocked.remove(&action);
        self.store.save(GUARDRAIL_DOC, &*state)?;
        Ok(())
    }

    /// Snapshot for the CLI.
    pub async fn status(&self) -> GuardrailStatus {
        let state = self.state.read().await;
        GuardrailStatus {
            dry_run: state.dry_run,
            emergency_brake: state.emergency_brake,
            actions_this_hour: state.global.count,
            hourly_budget: self.hourly_budget,
            window_resets_at: state.global.resets_at,
            blocked: state.blocked.iter().map(|a| a.to_string()).collect(),
            pending: state.pending.clone(),
        }
    }

    fn deny(&self, action: ActionKind, reason: DenyReason) -> Verdict {
        tracing::warn!(action = %action, code = reason.code(), "action denied");
        Verdict::Denied { reason }
    }
}
