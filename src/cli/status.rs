//! Status command handler.

use anyhow::{Context, Result};

use nanoclaw::config::Config;

use super::common::{build_orchestrator, load_config};

/// Print a JSON snapshot of the assembled (not started) runtime.
pub(crate) async fn cmd_status() -> Result<()> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(config).await?;

    // Stats only see in-memory jobs; read the store so the count is real.
    if let Err(e) = orchestrator.cron().load_jobs().await {
        eprintln!("Warning: could not read cron store: {}", e);
    }

    let mut stats = orchestrator.stats().await;
    stats["config_path"] = serde_json::json!(Config::path());
    stats["workspace"] = serde_json::json!(orchestrator.config().workspace_path());
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).with_context(|| "Failed to render status")?
    );
    Ok(())
}
