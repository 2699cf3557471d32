// src/server/initialization.rs

//! Handles the complete startup sequence: opening the store, building the
//! analyzer set, compiling the router, and wiring the shutdown channel.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::analyzer::AnalyzerManager;
use crate::core::errors::AppError;
use crate::core::router::Router;
use crate::core::rulelist::RuleList;
use crate::core::storage;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

pub async fn setup(config: Config) -> Result<ServerContext, AppError> {
    log_startup_info(&config);

    let (shutdown_tx, _) = broadcast::channel(1);

    let db = storage::open(std::path::Path::new(&config.db.dir))?;
    info!(dir = %config.db.dir, "embedded store opened");

    let analyzer_manager = Arc::new(AnalyzerManager::new(&config.analyzer, db.clone()));
    let router = Arc::new(Router::compile(&config.router, analyzer_manager.analyzer_map())?);
    let rulelist = Arc::new(RuleList::new(db.clone()));

    Ok(ServerContext {
        config,
        db,
        analyzer_manager,
        router,
        rulelist,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

fn log_startup_info(config: &Config) {
    info!(
        ingress_method = %config.ingress.method,
        ingress_format = %config.ingress.format,
        egress_path = %config.egress.path,
        api_listen_addr = %config.api.listen_addr,
        "starting with configuration"
    );
}
