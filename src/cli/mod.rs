//! CLI module — command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod agent;
pub mod common;
pub mod cron;
pub mod run;
pub mod status;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nanoclaw")]
#[command(version)]
#[command(about = "Lightweight agent orchestration runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Talk to the agent directly (one message or an interactive session)
    Agent {
        /// Message to process (non-interactive mode)
        #[arg(short, long)]
        message: Option<String>,
        /// Session key used for conversation context
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Start the bus, agent and cron service; read messages from stdin
    Run,
    /// Manage scheduled jobs
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
    /// Show runtime status as JSON
    Status,
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum CronAction {
    /// List stored jobs
    List,
    /// Add or replace a job
    Add(CronAddArgs),
    /// Remove a job by name
    Remove {
        /// Job name
        name: String,
    },
    /// Run a job once, right now
    Run {
        /// Job name
        name: String,
    },
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("schedule").required(true).args(["every", "cron"]))]
pub struct CronAddArgs {
    /// Job name (replaces an existing job with the same name)
    pub name: String,
    /// Prompt sent to the agent on every run
    pub message: String,
    /// Run every N seconds
    #[arg(long, value_name = "SECONDS")]
    pub every: Option<u64>,
    /// Minute schedule: "N" or "*/N" (every N minutes)
    #[arg(long, value_name = "EXPR")]
    pub cron: Option<String>,
    /// Publish each result on the bus `cron` channel
    #[arg(long)]
    pub deliver: bool,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Logging follows the config file when it is readable; defaults otherwise.
    let logging_cfg = nanoclaw::config::Config::load()
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = nanoclaw::utils::logging::init_logging(&logging_cfg) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Agent { message, session }) => {
            agent::cmd_agent(message, session).await?;
        }
        Some(Commands::Run) => {
            run::cmd_run().await?;
        }
        Some(Commands::Cron { action }) => {
            cron::cmd_cron(action).await?;
        }
        Some(Commands::Status) => {
            status::cmd_status().await?;
        }
        Some(Commands::Version) => {
            cmd_version();
        }
    }

    Ok(())
}

fn cmd_version() {
    println!("nanoclaw {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Lightweight agent orchestration runtime");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_agent_message() {
        let cli = Cli::try_parse_from(["nanoclaw", "agent", "-m", "hi", "--session", "s1"]).unwrap();
        match cli.command {
            Some(Commands::Agent { message, session }) => {
                assert_eq!(message.as_deref(), Some("hi"));
                assert_eq!(session, "s1");
            }
            _ => panic!("expected agent command"),
        }
    }

    #[test]
    fn test_cron_add_requires_schedule() {
        assert!(Cli::try_parse_from(["nanoclaw", "cron", "add", "daily", "hello"]).is_err());
        assert!(Cli::try_parse_from([
            "nanoclaw", "cron", "add", "daily", "hello", "--every", "60", "--cron", "5"
        ])
        .is_err());
        assert!(
            Cli::try_parse_from(["nanoclaw", "cron", "add", "daily", "hello", "--cron", "*/5"])
                .is_ok()
        );
    }
}
