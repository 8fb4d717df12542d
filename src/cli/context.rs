//! Context CLI commands.

use chrono::Local;
use clap::Subcommand;

use crate::cli::Runtime;
use crate::context::{CategoryFilter, Context};

#[derive(Subcommand, Debug, Clone)]
pub enum ContextCommand {
    /// Detect and print the current context
    Detect,

    /// Show the current context, any operator pin, and recent transitions
    Summary,

    /// Pin the context to a rule label, or `auto` to resume detection
    Set {
        /// A known context label, or `auto`
        label: String,
    },
}

/// Run a context command.
pub async fn run_context_command(cmd: ContextCommand) -> anyhow::Result<()> {
    let runtime = Runtime::init()?;
    let classifier = &runtime.classifier;

    match cmd {
        ContextCommand::Detect => {
            let context = classifier.detect(Local::now()).await?;
            print_context(&context);
        }

        ContextCommand::Summary => {
            let context = classifier.detect(Local::now()).await?;
            print_context(&context);

            match classifier.override_label().await {
                Some(label) => println!("pinned: {} (use `context set auto` to resume detection)", label),
                None => println!("pinned: no (detected from time of day)"),
            }
            println!("known labels: {}", classifier.labels().join(", "));

            let transitions = classifier.transitions().await;
            if !transitions.is_empty() {
                println!("recent transitions:");
                for t in transitions.iter().rev().take(10) {
                    println!(
                        "  {}  {} -> {}{}",
                        t.timestamp.format("%Y-%m-%d %H:%M"),
                        t.from.as_deref().unwrap_or("(start)"),
                        t.to,
                        if t.explicit { "  (explicit)" } else { "" }
                    );
                }
            }
        }

        ContextCommand::Set { label } => {
            let context = classifier.set_explicit(&label, Local::now()).await?;
            if label.eq_ignore_ascii_case("auto") {
                println!("Resumed automatic detection.");
            } else {
                println!("Context pinned.");
            }
            print_context(&context);
        }
    }

    Ok(())
}

fn print_context(context: &Context) {
    let categories = match &context.allowed_categories {
        CategoryFilter::All => "all".to_string(),
        CategoryFilter::Only(set) => set.iter().cloned().collect::<Vec<_>>().join(", "),
    };
    println!(
        "context: {}\nmax concurrency: {}\nallowed categories: {}\nintensity: {}",
        context.label, context.max_concurrency, categories, context.intensity
    );
}
