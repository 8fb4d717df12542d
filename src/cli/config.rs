//! Configuration management CLI commands.
//!
//! Commands for viewing and modifying settings.

use clap::Subcommand;

use crate::settings::Settings;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// List all settings and their current values
    List {
        /// Show only settings matching this prefix (e.g. "scheduler", "guardrail")
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Get a specific setting value
    Get {
        /// Setting path (e.g. "scheduler.max_retries")
        path: String,
    },

    /// Set a setting value
    Set {
        /// Setting path (e.g. "scheduler.max_retries")
        path: String,

        /// Value to set
        value: String,
    },

    /// Reset a setting to its default value
    Reset {
        /// Setting path (e.g. "scheduler.max_retries")
        path: String,
    },

    /// Show the settings file path
    Path,
}

/// Run a config command.
pub fn run_config_command(cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::List { filter } => list_settings(filter),
        ConfigCommand::Get { path } => get_setting(&path),
        ConfigCommand::Set { path, value } => set_setting(&path, &value),
        ConfigCommand::Reset { path } => reset_setting(&path),
        ConfigCommand::Path => show_path(),
    }
}

/// List all settings.
fn list_settings(filter: Option<String>) -> anyhow::Result<()> {
    let settings = Settings::load();
    let all = settings.list();

    let max_key_len = all.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

    println!("Settings:");
    println!();

    for (key, value) in all {
        if let Some(ref f) = filter {
            if !key.starts_with(f) {
                continue;
            }
        }
        println!("  {:width$}  {}", key, value, width = max_key_len);
    }

    Ok(())
}

/// Get a specific setting.
fn get_setting(path: &str) -> anyhow::Result<()> {
    let settings = Settings::load();

    match settings.get(path) {
        Some(value) => {
            println!("{}", value);
            Ok(())
        }
        None => {
            anyhow::bail!("Setting not found: {}", path);
        }
    }
}

/// Set a setting value.
fn set_setting(path: &str, value: &str) -> anyhow::Result<()> {
    let mut settings = Settings::load();

    settings.set(path, value)?;
    settings.save()?;

    println!("Set {} = {}", path, value);
    Ok(())
}

/// Reset a setting to default.
fn reset_setting(path: &str) -> anyhow::Result<()> {
    let mut settings = Settings::load();

    settings.reset(path)?;
    settings.save()?;

    let default_value = Settings::default().get(path).unwrap_or_default();
    println!("Reset {} to default: {}", path, default_value);
    Ok(())
}

/// Show the settings file path.
fn show_path() -> anyhow::Result<()> {
    let path = Settings::default_path();
    println!("{}", path.display());

    if path.exists() {
        let metadata = std::fs::metadata(&path)?;
        println!("  Size: {} bytes", metadata.len());
    } else {
        println!("  (does not exist, using defaults)");
    }

    Ok(())
}
