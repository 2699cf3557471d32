// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks into the
//! context's `JoinSet`: one task per subsystem, each holding its own
//! `shutdown_rx` subscription.

use super::context::ServerContext;
use super::{metrics_server, scheduler};
use crate::core::dbkey::Tag;
use crate::core::storage::TtlSweeper;
use crate::{ingress, parser};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

const TTL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let config = ctx.config.clone();
    let shutdown_tx = ctx.shutdown_tx.clone();
    let background_tasks = &mut ctx.background_tasks;

    ctx_analyzer_start(&ctx.analyzer_manager, &shutdown_tx).await?;

    // --- TTL sweeper: every analyzer's key range plus the rule list's. ---
    let sweeper = TtlSweeper::new(
        ctx.db.clone(),
        vec![
            vec![Tag::RuleList as u8],
            vec![Tag::LeakyBucket as u8],
            vec![Tag::FileSendRatio as u8],
            vec![Tag::RequestFrequency as u8],
        ],
        TTL_SWEEP_INTERVAL,
    );
    let shutdown_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        sweeper.run(shutdown_rx).await;
    });

    // --- Ingress: one adapter task feeding one parsing worker task. ---
    let adapter = ingress::make_adapter(&config.ingress)?;
    let parser = parser::make_parser(&config.ingress.format)?;
    let (tx, rx) = tokio::sync::mpsc::channel(1024);

    let adapter_shutdown_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        adapter.run(tx, adapter_shutdown_rx).await;
    });

    let router = ctx.router.clone();
    background_tasks.spawn(async move {
        ingress::run_worker(rx, parser, router).await;
    });

    // --- Scheduler: periodic report + ACL write + post-exec. ---
    let scheduler_egress = config.egress.clone();
    let scheduler_analyzers = ctx.analyzer_manager.clone();
    let scheduler_rulelist = ctx.rulelist.clone();
    let scheduler_shutdown_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        scheduler::run(
            scheduler_egress,
            scheduler_analyzers,
            scheduler_rulelist,
            scheduler_shutdown_rx,
        )
        .await;
    });

    // --- Metrics server (A4), only when enabled. ---
    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run(&addr, shutdown_rx).await;
        });
    } else {
        info!("metrics server disabled in configuration");
    }

    // --- HTTP API (C9). ---
    let api_addr = config.api.listen_addr.clone();
    let api_rulelist = ctx.rulelist.clone();
    let api_shutdown_rx = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        if let Err(e) = crate::api::run(&api_addr, api_rulelist, api_shutdown_rx).await {
            tracing::error!(error = %e, "API server exited with an error");
        }
    });

    info!("all background tasks have been spawned");
    Ok(())
}

async fn ctx_analyzer_start(
    analyzer_manager: &crate::core::analyzer::AnalyzerManager,
    shutdown_tx: &tokio::sync::broadcast::Sender<()>,
) -> Result<()> {
    analyzer_manager
        .start(shutdown_tx)
        .await
        .context("failed to start analyzers")?;
    Ok(())
}
