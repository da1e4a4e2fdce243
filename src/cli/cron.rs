//! Cron command handlers.

use anyhow::{bail, Context, Result};

use nanoclaw::cron::CronSchedule;

use super::common::{build_orchestrator, load_config};
use super::{CronAction, CronAddArgs};

/// Manage stored cron jobs. Jobs only fire while `nanoclaw run` is active.
pub(crate) async fn cmd_cron(action: CronAction) -> Result<()> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(config).await?;
    let cron = orchestrator.cron();
    cron.load_jobs()
        .await
        .with_context(|| "Failed to read cron store")?;

    match action {
        CronAction::List => {
            let jobs = cron.jobs().await;
            if jobs.is_empty() {
                println!("No cron jobs.");
                return Ok(());
            }
            println!("Cron jobs ({})", jobs.len());
            println!();
            for job in jobs {
                let schedule = match &job.schedule {
                    CronSchedule::Every { every_ms } => format!("every {}ms", every_ms),
                    CronSchedule::Cron { expr } => format!("cron {}", expr),
                };
                let last_run = job
                    .last_run_at
                    .and_then(chrono::DateTime::from_timestamp_millis)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "  {:<20} {:<16} {} deliver={} last_run={}",
                    job.name,
                    schedule,
                    if job.enabled { "enabled " } else { "disabled" },
                    job.deliver,
                    last_run
                );
                println!("      {}", job.message);
            }
        }
        CronAction::Add(args) => {
            let CronAddArgs {
                name,
                message,
                every,
                cron: expr,
                deliver,
            } = args;
            let schedule = match (every, expr) {
                (Some(secs), None) => CronSchedule::Every {
                    every_ms: secs.saturating_mul(1000),
                },
                (None, Some(expr)) => CronSchedule::Cron { expr },
                _ => bail!("Specify exactly one of --every or --cron"),
            };
            let job = cron
                .add_job(&name, schedule, &message, deliver)
                .await
                .with_context(|| format!("Failed to add job '{}'", name))?;
            println!("Added job '{}' ({})", job.name, job.id);
        }
        CronAction::Remove { name } => {
            if cron.remove_job(&name).await? {
                println!("Removed job '{}'", name);
            } else {
                println!("No job named '{}'", name);
            }
        }
        CronAction::Run { name } => {
            let executed = cron
                .run_job(&name)
                .await
                .with_context(|| format!("Failed to run job '{}'", name))?;
            println!("{}", executed.result);
            if !executed.success {
                bail!("Job '{}' failed after {}ms", name, executed.duration_ms);
            }
        }
    }

    Ok(())
}
