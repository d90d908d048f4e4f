//! caskeep: durable aggregates driven by JSON lines.
//!
//! Reads one request per line on stdin, runs the matching saga, and writes
//! each saga's notification as a JSON line on stdout. Logs go to stderr.
//!
//! ```text
//! stdin ──► gateway ──► Supervisor ──► saga ──► aggregate actor ──► store
//!                                        └──► StdoutNotifier ──► stdout
//! ```
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: http
//!   endpoint: http://localhost:8500
//! commit:
//!   max_retries: 10
//!   retry_delay_ms: 50
//! ```

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use caskeep::config::Config;
use caskeep::gateway;
use caskeep::saga::StdoutNotifier;
use caskeep::storage::init_store;
use caskeep::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    caskeep::utils::bootstrap::init_tracing();

    let config_path = caskeep::utils::bootstrap::parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting caskeep");

    let store = init_store(&config.storage)?;
    let supervisor = Supervisor::new(store, &config, Arc::new(StdoutNotifier::new()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sagas = Vec::new();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match gateway::parse_request(&line) {
                    Ok(request) => sagas.push(gateway::dispatch(&supervisor, request)),
                    Err(e) => warn!(error = %e, "Ignoring request"),
                },
                None => {
                    info!("Input closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
        sagas.retain(|saga| !saga.is_finished());
    }

    for result in futures::future::join_all(sagas).await {
        if let Err(e) = result {
            error!(error = %e, "Saga task failed");
        }
    }

    info!("Shutting down...");
    supervisor.shutdown().await;
    Ok(())
}
