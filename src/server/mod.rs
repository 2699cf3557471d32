// src/server/mod.rs

use crate::config::Config;
use crate::core::errors::AppError;
use std::time::Duration;
use tracing::{info, warn};

mod context;
mod egress;
mod initialization;
mod metrics_server;
mod scheduler;
mod spawner;

pub use context::ServerContext;

/// How long `run` waits for background tasks to wind down after a shutdown
/// signal before abandoning them (spec §5, cancellation).
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Orchestrates the full process lifecycle: setup, spawn, wait for a
/// shutdown signal, broadcast it, and join background tasks with a bounded
/// deadline.
pub async fn run(config: Config) -> Result<(), AppError> {
    let mut ctx = initialization::setup(config).await?;

    spawner::spawn_all(&mut ctx)
        .await
        .map_err(|e| AppError::ConfigInvalid(format!("failed to start background tasks: {e}")))?;

    await_shutdown_signal().await;
    info!("shutdown signal received, notifying background tasks");
    let _ = ctx.shutdown_tx.send(());

    let deadline = tokio::time::sleep(SHUTDOWN_GRACE_PERIOD);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            next = ctx.background_tasks.join_next() => {
                match next {
                    Some(Ok(())) => continue,
                    Some(Err(e)) => { warn!(error = %e, "background task panicked during shutdown"); continue; }
                    None => break,
                }
            }
            _ = &mut deadline => {
                warn!("shutdown grace period elapsed; abandoning remaining background tasks");
                break;
            }
        }
    }

    info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn await_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn await_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
    info!("received ctrl-c");
}
