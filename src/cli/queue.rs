//! Queue CLI commands.

use chrono::{Local, Utc};
use clap::Subcommand;
use uuid::Uuid;

use crate::cli::Runtime;
use crate::task::{NewTask, Priority, TaskSummary};

#[derive(Subcommand, Debug, Clone)]
pub enum QueueCommand {
    /// Enqueue a new task and print its id
    Add {
        title: String,
        description: String,
        /// Estimated effort in hours
        hours: f64,
        /// Task category (e.g. bugfix, content, dashboard)
        category: String,
        /// Priority: low, normal, high, critical
        priority: String,
    },

    /// Show active workers with elapsed/estimated time and log locations
    Progress,

    /// Show recently completed and in-progress tasks
    Report,

    /// Reconcile workers against liveness, then run one scheduling pass
    Pass,

    /// Kill a queued task
    Kill {
        /// Task id
        task_id: String,
    },
}

/// Run a queue command.
pub async fn run_queue_command(cmd: QueueCommand) -> anyhow::Result<()> {
    let runtime = Runtime::init()?;

    match cmd {
        QueueCommand::Add {
            title,
            description,
            hours,
            category,
            priority,
        } => {
            let priority = Priority::parse(&priority).ok_or_else(|| {
                anyhow::anyhow!("unknown priority '{}' (expected low|normal|high|critical)", priority)
            })?;
            let id = runtime
                .queue
                .enqueue(NewTask::new(title, description, category, hours, priority))
                .await?;
            println!("{}", id);
        }

        QueueCommand::Progress => {
            let rows = runtime.pool.progress(Utc::now()).await;
            if rows.is_empty() {
                println!("No active workers.");
                return Ok(());
            }
            for row in rows {
                let estimate = match runtime.queue.get(row.record.task_id).await {
                    Ok(task) => format!("{:.1}h estimated", task.estimated_effort_hours),
                    Err(_) => "estimate unknown".to_string(),
                };
                println!(
                    "{}  task {}  {}m elapsed / {}  log: {}",
                    row.record.worker_id,
                    row.record.task_id,
                    row.elapsed_minutes,
                    estimate,
                    row.record.log_location.display()
                );
            }
        }

        QueueCommand::Report => {
            let report = runtime.queue.report().await;
            print_section("Building", &report.building);
            print_section("Queued", &report.queued);
            print_section("Recently completed", &report.recently_completed);
            if !report.failed.is_empty() {
                print_section("Failed (escalated)", &report.failed);
            }
        }

        QueueCommand::Pass => {
            let recovery = runtime.scheduler.recover().await?;
            if !recovery.demoted.is_empty() {
                println!(
                    "Recovery demoted {} dead worker(s); their tasks were requeued.",
                    recovery.demoted.len()
                );
            }

            let stale = runtime
                .pool
                .sweep_stale(
                    Utc::now(),
                    chrono::Duration::minutes(
                        runtime.settings.scheduler.stale_after_minutes as i64,
                    ),
                )
                .await;
            for worker_id in &stale {
                println!("warning: worker {} looks stale (no recent update)", worker_id);
            }

            let summary = runtime.scheduler.run_pass(Local::now()).await?;
            println!(
                "Pass under '{}' context: {} spawned, {} skipped.",
                summary.context_label,
                summary.spawned.len(),
                summary.skipped
            );
            for id in &summary.spawned {
                println!("  spawned {}", id);
            }
            if let Some(reason) = summary.halted {
                println!("  halted: {}", reason);
            }
        }

        QueueCommand::Kill { task_id } => {
            let id: Uuid = task_id
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid task id: {}", task_id))?;
            runtime.queue.kill_task(id).await?;
            println!("Killed task {}.", id);
        }
    }

    Ok(())
}

fn print_section(heading: &str, rows: &[TaskSummary]) {
    println!("{} ({}):", heading, rows.len());
    for row in rows {
        println!(
            "  {}  [{}/{}]  {:.1}h  {}{}",
            row.id,
            row.category,
            row.priority,
            row.estimated_effort_hours,
            row.title,
            if row.retries > 0 {
                format!("  ({} retries)", row.retries)
            } else {
                String::new()
            }
        );
    }
    println!();
}
