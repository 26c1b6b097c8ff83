//! ness-gate CLI entry point.

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use ness_gate::access::GrantResponse;
use ness_gate::{AccessEvent, AccessManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(cli.json_logs.then(|| fmt::layer().json()))
        .with((!cli.json_logs).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(filter)
        .init();

    info!("ness-gate v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.to_config()?;
    let manager = Arc::new(AccessManager::from_config(&config)?);

    match cli.command {
        Command::Check { user, bot } => {
            print_json(&manager.access_response(&user, &bot).await?)?;
        }
        Command::Grant { user, bot, tx } => {
            let outcome = manager.verify_and_grant(&user, &bot, &tx).await;
            print_json(&GrantResponse::from_outcome(
                &outcome,
                manager.registry().lookup(&bot),
            ))?;
        }
        Command::Reconcile { user, bot } => {
            let active = manager.reconcile_status(&user, &bot).await?;
            print_json(&serde_json::json!({ "access": active }))?;
        }
        Command::Sweep { once: true, .. } => {
            let stats = manager.sweep().await?;
            print_json(&serde_json::json!({
                "checked": stats.checked,
                "revoked": stats.revoked,
                "purged": stats.purged,
                "failed": stats.failed,
            }))?;
        }
        Command::Sweep {
            interval_minutes, ..
        } => {
            let minutes = interval_minutes
                .unwrap_or(config.subscription.sweep_interval_minutes)
                .max(1);
            run_sweeper(manager, Duration::from_secs(minutes * 60)).await;
        }
    }

    Ok(())
}

/// Sweep periodically until Ctrl-C.
async fn run_sweeper(manager: Arc<AccessManager>, interval: Duration) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut events = manager.subscribe_events();

    let sweeper = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run_sweeps(interval, shutdown_rx).await })
    };

    info!("Sweeping every {}s, waiting for shutdown signal", interval.as_secs());

    loop {
        tokio::select! {
            event = events.recv() => {
                if let Ok(AccessEvent::Revoked { user_id, bot_id }) = event {
                    info!("Access to {bot_id} revoked for {user_id}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, initiating shutdown");
                let _ = shutdown_tx.send(true);
                break;
            }
        }
    }

    if let Err(e) = sweeper.await {
        warn!("Sweeper task ended abnormally: {e}");
    }
    info!("Goodbye!");
}

fn print_json<T: serde::Serialize>(value: &T) -> color_eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
