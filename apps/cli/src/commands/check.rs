//! Check command implementation.
//!
//! Connects to the backend once and reports the outcome.

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use tubeseg_core::rpc::transport::WebSocketConnector;
use tubeseg_core::{ClientConfig, Session};

/// Execute the check command.
pub async fn execute(config: &ClientConfig, json_output: bool) -> anyhow::Result<()> {
    let session_config = config.session();
    let url = session_config.endpoint.url();
    let session = Session::new(session_config, WebSocketConnector::new());

    let outcome = session.connect().await;
    let state = session.state();
    session.close();

    if json_output {
        let report = json!({
            "url": url,
            "application": config.backend.application,
            "state": state,
            "error": outcome.as_ref().err().map(ToString::to_string),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", "TubeSeg Backend Check".bold().cyan());
        println!("  URL: {}", url.dimmed());
        println!("  Application: {}", config.backend.application);
        match &outcome {
            Ok(()) => println!("  Status: {}", "✓ Ready".green()),
            Err(err) => println!("  Status: {}", format!("✗ {}", err).red()),
        }
    }

    outcome.with_context(|| format!("Backend at {} is not reachable", url))
}

/// Print the effective configuration.
pub fn print_config(config: &ClientConfig) -> anyhow::Result<()> {
    let session = config.session();
    println!("{}", "Configuration".bold().cyan());
    println!("  URL: {}", session.endpoint.url());
    println!("  Application: {}", session.endpoint.application);
    println!("  Max attempts: {}", session.retry.max_attempts);
    println!("  Retry interval: {}ms", config.retry.interval_ms);
    match session.call_timeout {
        Some(timeout) => println!("  Call timeout: {}s", timeout.as_secs()),
        None => println!("  Call timeout: {}", "none".dimmed()),
    }
    Ok(())
}
