// src/server/context.rs

use crate::config::Config;
use crate::core::analyzer::AnalyzerManager;
use crate::core::router::Router;
use crate::core::rulelist::RuleList;
use crate::core::storage::Tree;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the main loop.
pub struct ServerContext {
    pub config: Config,
    pub db: Tree,
    pub analyzer_manager: Arc<AnalyzerManager>,
    pub router: Arc<Router>,
    pub rulelist: Arc<RuleList>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
}
