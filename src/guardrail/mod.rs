//! Guardrails gating every autonomous action.
//!
//! Before the controller spawns a worker or an external surface performs
//! anything on the human's behalf, the gate is asked. The checks are
//! layered and short-circuit in a fixed order: emergency brake, block
//! list, dry-run, rate limits, approval tier. A denial is a verdict with a
//! stable reason code, not an error; callers decide whether to wait,
//! request approval, or give up.

mod action;
mod gate;

pub use action::{ActionKind, ActionLevel, ActionRegistry};
pub use gate::{DenyReason, Gate, GuardrailStatus, PendingApproval, Verdict};
