//! Agent command handler (one-shot and interactive).

use std::io::{self, BufRead, Write};

use anyhow::Result;

use super::common::{build_orchestrator, load_config};

/// Interactive or single-message agent mode.
///
/// Calls the agent loop directly; the bus is not started.
pub(crate) async fn cmd_agent(message: Option<String>, session: String) -> Result<()> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(config).await?;
    let agent = orchestrator.agent();

    if let Some(msg) = message {
        println!("{}", agent.process(&session, &msg).await);
        return Ok(());
    }

    println!("NanoClaw Interactive Agent (session: {})", session);
    println!("Type your message and press Enter. Type 'quit' or 'exit' to stop.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => {
                // EOF
                println!();
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "quit" || input == "exit" {
                    println!("Goodbye!");
                    break;
                }
                if input == "/clear" {
                    agent.context().clear_session(&session);
                    println!("Context cleared.");
                    println!();
                    continue;
                }

                let response = agent.process(&session, input).await;
                println!();
                println!("{}", response);
                println!();
            }
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
    }

    Ok(())
}
