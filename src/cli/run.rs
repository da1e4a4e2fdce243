//! `run` command: the long-running bus-driven mode.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use nanoclaw::bus::{handler_fn, BusMessage, MessageType};

use super::common::{build_orchestrator, load_config};

/// Channel stdin lines are published on.
const INPUT_CHANNEL: &str = "direct";
/// Chat id identifying this terminal on the bus.
const CLI_CHAT_ID: &str = "cli";

/// Start everything, feed stdin lines to the agent through the bus and print
/// its replies until EOF or Ctrl+C.
pub(crate) async fn cmd_run() -> Result<()> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(config).await?;
    orchestrator
        .start()
        .await
        .with_context(|| "Failed to start runtime")?;

    let bus = orchestrator.bus().clone();
    let printer = bus
        .subscribe(
            INPUT_CHANNEL,
            handler_fn(|msg: BusMessage| async move {
                if msg.message_type == MessageType::Outbound && msg.chat_id == CLI_CHAT_ID {
                    println!("{}", msg.content);
                    println!();
                }
                Ok(())
            }),
        )
        .await;

    println!("NanoClaw running. Type a message and press Enter; Ctrl+C to stop.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.with_context(|| "Failed to read stdin")? {
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        bus.publish_inbound(BusMessage::inbound(INPUT_CHANNEL, "user", CLI_CHAT_ID, line))
                            .await
                            .with_context(|| "Failed to publish message")?;
                    }
                    None => {
                        // EOF: keep serving cron and in-flight requests until Ctrl+C.
                        tokio::signal::ctrl_c()
                            .await
                            .with_context(|| "Failed to listen for Ctrl+C")?;
                        break;
                    }
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.with_context(|| "Failed to listen for Ctrl+C")?;
                break;
            }
        }
    }

    println!();
    println!("Shutting down...");
    bus.unsubscribe(INPUT_CHANNEL, printer).await;
    orchestrator.stop().await;
    Ok(())
}
