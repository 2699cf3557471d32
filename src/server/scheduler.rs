// src/server/scheduler.rs

//! The periodic compile job (spec §4.10, C10): `manager.SaveRules`, then an
//! ACL-writer snapshot + file write, then post-exec commands in order.
//! Runs on a single `tokio::time::interval`; because the tick is awaited
//! synchronously before the next one is requested, invocations can never
//! overlap, and `MissedTickBehavior::Skip` drops any tick that arrives
//! while a run is still catching up rather than queuing it.

use crate::config::EgressConfig;
use crate::core::analyzer::AnalyzerManager;
use crate::core::metrics;
use crate::core::rulelist::RuleList;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub async fn run(
    egress: EgressConfig,
    analyzer_manager: Arc<AnalyzerManager>,
    rulelist: Arc<RuleList>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let interval: std::time::Duration = egress.interval.into();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_secs = interval.as_secs(), "compile scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_compile(&egress, &analyzer_manager, &rulelist).await;
            }
            _ = shutdown_rx.recv() => {
                info!("compile scheduler shutting down");
                return;
            }
        }
    }
}

async fn run_compile(egress: &EgressConfig, analyzer_manager: &AnalyzerManager, rulelist: &RuleList) {
    let started = Instant::now();

    analyzer_manager.save_rules(rulelist).await;

    let rules = match rulelist.list_rules() {
        Ok(rules) => rules,
        Err(e) => {
            error!(error = %e, "failed to snapshot rule list for ACL write");
            return;
        }
    };

    if let Err(e) = super::egress::write_acl(egress, &rules) {
        error!(error = %e, "failed to write ACL file");
        return;
    }

    super::egress::run_post_exec(&egress.post_exec).await;

    metrics::COMPILE_RUNS_TOTAL.inc();
    metrics::COMPILE_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
}
