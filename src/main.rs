//! cozy-realtime - watch a cozy instance from the terminal
//!
//! Subscribes to the given doctypes or documents and prints every change as
//! one JSON object per line on stdout. Logs go to stderr.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cozy_realtime_client::{
    Change, ConnectionState, EntityRef, EventName, RealtimeClient, RealtimeConfig,
};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

/// How long to wait for the socket to close after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cozy_realtime=info,cozy_realtime_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    match cli.command {
        Command::Watch { targets, events } => watch(config, targets, events).await,
    }
}

async fn watch(
    config: RealtimeConfig,
    targets: Vec<EntityRef>,
    events: Vec<EventName>,
) -> anyhow::Result<()> {
    // Default options leave Ctrl-C to the loop below.
    let client = RealtimeClient::init(config).context("invalid configuration")?;
    tracing::info!(url = client.url(), "connecting");

    let events = if events.is_empty() {
        EventName::ALL.to_vec()
    } else {
        events
    };

    let (tx, mut changes) = mpsc::unbounded_channel::<Change>();
    for target in &targets {
        for &event in &events {
            let mut listener = client
                .listen(target, event)
                .await
                .with_context(|| format!("cannot watch {} {}", event, target))?;
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(change) = listener.recv().await {
                    if tx.send(change).is_err() {
                        break;
                    }
                }
            });
        }
    }
    drop(tx);
    tracing::info!(targets = targets.len(), events = events.len(), "watching");

    let mut errors = client.errors();
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Some(change) => println!("{}", serde_json::to_string(&change)?),
                None => {
                    tracing::warn!("realtime connection lost");
                    break;
                }
            },
            error = errors.recv() => match error {
                Ok(error) => tracing::warn!(%error, "realtime error"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed realtime errors");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    client.close();
    let mut state = client.state_changes();
    let closed = state.wait_for(ConnectionState::is_terminal);
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, closed).await;
    Ok(())
}
