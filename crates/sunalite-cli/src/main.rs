//! Sunalite CLI — entry point.
//!
//! # Commands
//!
//! - `sunalite agent [-m MESSAGE] [--config PATH] [--logs]` — chat (single-shot or REPL)
//! - `sunalite status` — show configuration, enabled tools, and workspace usage
//! - `sunalite cleanup` — sweep stale session workspaces

mod helpers;
mod repl;
mod status;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sunalite_agent::SessionManager;
use sunalite_core::config::schema::LoggingConfig;
use sunalite_core::config::{load_config, Config};
use sunalite_core::utils::expand_home;
use sunalite_providers::HttpProvider;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// ☀ Sunalite — a sandboxed tool-using AI agent
#[derive(Parser)]
#[command(name = "sunalite", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent (single-shot or interactive REPL)
    Agent {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Config file (defaults to ~/.sunalite/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration, enabled tools, and workspace usage
    Status {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print machine-readable JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Remove session workspaces older than the retention period
    Cleanup {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent {
            message,
            config,
            logs,
        } => {
            let config = load(config.as_deref())?;
            init_logging(&config.logging, logs)?;
            run_agent(config, message).await
        }
        Commands::Status { config, json } => {
            let config = load(config.as_deref())?;
            status::run(&config, json)
        }
        Commands::Cleanup { config } => {
            let config = load(config.as_deref())?;
            init_logging(&config.logging, false)?;
            status::cleanup(&config)
        }
    }
}

fn load(path: Option<&Path>) -> Result<Config> {
    load_config(path).context("failed to load configuration")
}

// ─────────────────────────────────────────────
// Agent command
// ─────────────────────────────────────────────

async fn run_agent(config: Config, message: Option<String>) -> Result<()> {
    let provider = HttpProvider::from_config(&config.agent).context("failed to create model provider")?;
    let manager = SessionManager::new(Arc::new(provider));
    let handle = manager
        .start_session(&config)
        .await
        .context("failed to start session")?;

    let result = match message {
        Some(msg) => {
            // Single-shot mode
            info!(session = %handle, "processing single message");
            repl::submit_interruptible(&manager, &handle, &msg)
                .await
                .map(|outcome| helpers::print_outcome(&outcome))
                .context("agent processing failed")
        }
        None => repl::run(&manager, &handle).await,
    };

    match manager.end_session(&handle).await {
        Ok(stats) => info!(session = %handle, turns = stats.turns, "session closed"),
        Err(e) => warn!(session = %handle, error = %e, "failed to end session cleanly"),
    }
    result
}

/// Initialize tracing. `--logs` forces debug output for the Sunalite crates;
/// otherwise `RUST_LOG` wins over `logging.level`.
fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("sunalite=debug,sunalite_agent=debug,sunalite_providers=debug,sunalite_core=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    match &config.file {
        Some(file) => {
            let path = expand_home(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let sink = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(sink)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn agent_flags_parse() {
        let cli = Cli::try_parse_from(["sunalite", "agent", "-m", "hi", "--config", "/tmp/c.json", "--logs"]).unwrap();
        match cli.command {
            Commands::Agent { message, config, logs } => {
                assert_eq!(message.as_deref(), Some("hi"));
                assert_eq!(config, Some(PathBuf::from("/tmp/c.json")));
                assert!(logs);
            }
            _ => panic!("expected agent command"),
        }
    }

    #[test]
    fn status_json_flag() {
        let cli = Cli::try_parse_from(["sunalite", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { json: true, .. }));
    }
}
