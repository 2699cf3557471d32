// src/core/analyzer/mod.rs

//! The analyzer framework (spec §4.3, §4.7): a uniform contract every
//! analyzer implements, and a manager that owns the enabled set, fans the
//! request stream out, and drives the periodic compile into a rule-list
//! transaction.

mod fsr;
mod lbucket;
mod rfreq;

use crate::config::AnalyzerConfig;
use crate::core::dto::Request;
use crate::core::errors::AppError;
use crate::core::rulelist::Tx;
use crate::core::storage::Tree;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

pub use fsr::FileSendRatio;
pub use lbucket::LeakyBucket;
pub use rfreq::RequestFrequency;

/// Every analyzer implements the same three-method contract; the manager
/// never depends on a concrete analyzer type.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Stable name, used in logs and router dispatch.
    fn name(&self) -> &str;

    /// Spawns background work (tickers, startup cleanup). Must return
    /// promptly; ongoing work runs as a task that exits when `shutdown_rx`
    /// fires.
    async fn start(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<(), AppError>;

    /// Single-request update. Called from an ingress worker; must not block.
    fn process(&self, request: &Request) -> Result<(), AppError>;

    /// Reads analyzer-private state and writes derived rules into `tx`.
    /// Idempotent within a single compile cycle.
    async fn report(&self, tx: &mut Tx) -> Result<(), AppError>;
}

/// Owns the enabled analyzer set, in a fixed order, and coordinates the
/// process/report lifecycle.
pub struct AnalyzerManager {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerManager {
    pub fn new(cfg: &AnalyzerConfig, db: Tree) -> Self {
        let mut analyzers: Vec<Arc<dyn Analyzer>> = Vec::new();
        if cfg.leaky_bucket.enabled {
            analyzers.push(Arc::new(LeakyBucket::new(cfg.leaky_bucket.clone(), db.clone())));
        }
        if cfg.file_send_ratio.enabled {
            analyzers.push(Arc::new(FileSendRatio::new(
                cfg.file_send_ratio.clone(),
                db.clone(),
            )));
        }
        if cfg.request_frequency.enabled {
            analyzers.push(Arc::new(RequestFrequency::new(
                cfg.request_frequency.clone(),
                db.clone(),
            )));
        }
        Self { analyzers }
    }

    /// Starts every enabled analyzer in turn, aborting on the first error.
    pub async fn start(&self, shutdown_tx: &broadcast::Sender<()>) -> Result<(), AppError> {
        let names: Vec<&str> = self.analyzers.iter().map(|a| a.name()).collect();
        info!(enabled_analyzers = ?names, "starting analyzers");
        for analyzer in &self.analyzers {
            analyzer.start(shutdown_tx.subscribe()).await.map_err(|e| {
                error!(analyzer = analyzer.name(), error = %e, "failed to start analyzer");
                e
            })?;
        }
        Ok(())
    }

    /// Name-indexed view of the enabled analyzers, used by the router to
    /// dispatch a request to a single named analyzer (spec §4.8) instead of
    /// broadcasting it through [`Self::process`].
    pub fn analyzer_map(&self) -> HashMap<String, Arc<dyn Analyzer>> {
        self.analyzers.iter().map(|a| (a.name().to_string(), Arc::clone(a))).collect()
    }

    /// Feeds a request to every enabled analyzer; a single analyzer's
    /// failure is logged and does not affect the others.
    pub fn process(&self, request: &Request) {
        for analyzer in &self.analyzers {
            if let Err(e) = analyzer.process(request) {
                crate::core::metrics::ANALYZER_ERRORS_TOTAL
                    .with_label_values(&[analyzer.name(), "process"])
                    .inc();
                error!(analyzer = analyzer.name(), error = %e, "failed to process request");
            }
        }
    }

    /// Opens one rule-list transaction, asks every analyzer to report into
    /// it, and commits. A single analyzer's report failure is logged but
    /// does not prevent the others from contributing to the same commit.
    pub async fn save_rules(&self, rulelist: &crate::core::rulelist::RuleList) {
        let mut tx = rulelist.begin_tx();
        for analyzer in &self.analyzers {
            if let Err(e) = analyzer.report(&mut tx).await {
                crate::core::metrics::ANALYZER_ERRORS_TOTAL
                    .with_label_values(&[analyzer.name(), "report"])
                    .inc();
                error!(analyzer = analyzer.name(), error = %e, "analyzer report failed");
            }
        }
        if let Err(e) = tx.commit() {
            error!(error = %e, "failed to commit rulelist transaction");
        }
        match rulelist.list_rules() {
            Ok(rules) => crate::core::metrics::ACTIVE_RULES.set(rules.len() as f64),
            Err(e) => error!(error = %e, "failed to refresh active-rule gauge"),
        }
    }
}
