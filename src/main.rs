//! The `steward` CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use steward::cli::{
    ConfigCommand, ContextCommand, GuardrailCommand, QueueCommand, run_config_command,
    run_context_command, run_guardrail_command, run_queue_command,
};

#[derive(Parser, Debug)]
#[command(
    name = "steward",
    version,
    about = "Autonomous work scheduling and execution guardrails"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the task backlog and workers
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Inspect and toggle the guardrails
    #[command(subcommand)]
    Guardrail(GuardrailCommand),

    /// Inspect or override the current context
    #[command(subcommand)]
    Context(ContextCommand),

    /// View and modify settings
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("steward=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Queue(cmd) => run_queue_command(cmd).await,
        Command::Guardrail(cmd) => run_guardrail_command(cmd).await,
        Command::Context(cmd) => run_context_command(cmd).await,
        Command::Config(cmd) => run_config_command(cmd),
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
