//! Priority scoring.
//!
//! A score is derived, never stored: it is recomputed on every scheduling
//! pass so aging can surface stale low-priority work without mutating the
//! task. Ties break by enqueue order, so equal-score ranking is FIFO and
//! deterministic across passes.

use chrono::{DateTime, Utc};

use crate::context::Context;
use crate::task::Task;

/// Weight applied to the priority ordinal.
const PRIORITY_WEIGHT: f64 = 10.0;
/// Score gained per hour of backlog age.
const URGENCY_PER_HOUR: f64 = 0.25;
/// Cap on the aging term, so age never outranks two priority steps.
const URGENCY_CAP: f64 = 15.0;
/// Scale of the small-task bonus.
const EFFORT_SCALE: f64 = 4.0;
/// Bonus for matching the current context's allowed categories.
const AFFINITY_BONUS: f64 = 5.0;

/// Compute the priority score of a task at `now` under `context`.
pub fn score(task: &Task, now: DateTime<Utc>, context: &Context) -> f64 {
    let base = f64::from(task.priority.weight()) * PRIORITY_WEIGHT;

    let age_hours = (now - task.created_at).num_minutes().max(0) as f64 / 60.0;
    let urgency = (age_hours * URGENCY_PER_HOUR).min(URGENCY_CAP);

    // Mildly favor small tasks: under a constrained ceiling they free
    // slots sooner.
    let effort = EFFORT_SCALE / (1.0 + task.estimated_effort_hours.max(0.0));

    let affinity = if context.allows_category(&task.category) {
        AFFINITY_BONUS
    } else {
        0.0
    };

    base + urgency + effort + affinity
}

/// Rank tasks by descending score, FIFO (enqueue sequence) on ties.
///
/// Returns references ordered best-first; the input order is irrelevant.
pub fn rank<'a>(tasks: &[&'a Task], now: DateTime<Utc>, context: &Context) -> Vec<&'a Task> {
    let mut scored: Vec<(f64, &Task)> = tasks
        .iter()
        .map(|t| (score(t, now, context), *t))
        .collect();

    scored.sort_by(|(sa, ta), (sb, tb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ta.sequence.cmp(&tb.sequence))
    });

    scored.into_iter().map(|(_, t)| t).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::context::Context;
    use crate::task::{Priority, TaskStatus};

    fn task(priority: Priority, effort: f64, category: &str, sequence: u64) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: "t".to_string(),
            description: "d".to_string(),
            category: category.to_string(),
            estimated_effort_hours: effort,
            priority,
            dependencies: BTreeSet::new(),
            auto_approve: false,
            status: TaskStatus::Queued,
            sequence,
            retries: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    fn open_context() -> Context {
        Context::unknown(Utc::now()).with_all_categories()
    }

    #[test]
    fn test_higher_priority_scores_higher() {
        let now = Utc::now();
        let ctx = open_context();
        let high = task(Priority::High, 2.0, "bugfix", 0);
        let low = task(Priority::Low, 2.0, "bugfix", 1);

        assert!(score(&high, now, &ctx) > score(&low, now, &ctx));
    }

    #[test]
    fn test_aging_surfaces_stale_tasks() {
        let now = Utc::now();
        let ctx = open_context();

        let mut old = task(Priority::Low, 2.0, "bugfix", 0);
        old.created_at = now - Duration::hours(24);
        let fresh = task(Priority::Low, 2.0, "bugfix", 1);

        assert!(score(&old, now, &ctx) > score(&fresh, now, &ctx));
    }

    #[test]
    fn test_aging_is_capped_below_two_priority_steps() {
        let now = Utc::now();
        let ctx = open_context();

        let mut ancient = task(Priority::Low, 2.0, "bugfix", 0);
        ancient.created_at = now - Duration::days(365);
        let critical = task(Priority::Critical, 2.0, "bugfix", 1);

        assert!(score(&critical, now, &ctx) > score(&ancient, now, &ctx));
    }

    #[test]
    fn test_smaller_effort_scores_higher() {
        let now = Utc::now();
        let ctx = open_context();
        let small = task(Priority::Normal, 0.5, "bugfix", 0);
        let big = task(Priority::Normal, 8.0, "bugfix", 1);

        assert!(score(&small, now, &ctx) > score(&big, now, &ctx));
    }

    #[test]
    fn test_category_affinity_bonus() {
        let now = Utc::now();
        let ctx = Context::unknown(now).with_categories(["bugfix"]);

        let matching = task(Priority::Normal, 2.0, "bugfix", 0);
        let other = task(Priority::Normal, 2.0, "research", 1);

        assert!(score(&matching, now, &ctx) > score(&other, now, &ctx));
    }

    #[test]
    fn test_rank_ties_break_fifo() {
        let now = Utc::now();
        let ctx = open_context();

        let a = {
            let mut t = task(Priority::Normal, 2.0, "bugfix", 7);
            t.created_at = now;
            t
        };
        let b = {
            let mut t = task(Priority::Normal, 2.0, "bugfix", 3);
            t.created_at = now;
            t
        };

        let ranked = rank(&[&a, &b], now, &ctx);
        assert_eq!(ranked[0].sequence, 3);
        assert_eq!(ranked[1].sequence, 7);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let now = Utc::now();
        let ctx = open_context();
        let tasks: Vec<Task> = (0..10)
            .map(|i| task(Priority::Normal, 2.0, "bugfix", i))
            .collect();
        let refs: Vec<&Task> = tasks.iter().collect();

        let first = rank(&refs, now, &ctx);
        let second = rank(&refs, now, &ctx);
        let ids_first: Vec<Uuid> = first.iter().map(|t| t.id).collect();
        let ids_second: Vec<Uuid> = second.iter().map(|t| t.id).collect();
        assert_eq!(ids_first, ids_second);
    }
}
