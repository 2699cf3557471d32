// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the analysis pipeline.
//!
//! Uses `lazy_static` so metrics are registered exactly once for the
//! process lifetime.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Ingress / parsing ---
    /// Total requests successfully parsed and handed to the router.
    pub static ref REQUESTS_PROCESSED_TOTAL: Counter =
        register_counter!("vigilroute_requests_processed_total", "Total requests parsed and routed.").unwrap();
    /// Total lines dropped because the parser rejected them.
    pub static ref PARSE_ERRORS_TOTAL: Counter =
        register_counter!("vigilroute_parse_errors_total", "Total ingress lines dropped due to parse errors.").unwrap();

    // --- Analyzers ---
    /// Analyzer `process` or `report` failures, labeled by analyzer name and phase.
    pub static ref ANALYZER_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "vigilroute_analyzer_errors_total",
        "Total analyzer failures, labeled by analyzer and phase.",
        &["analyzer", "phase"]
    )
    .unwrap();

    // --- Rule list ---
    /// Current number of non-expired rules held by the rule list, refreshed each compile.
    pub static ref ACTIVE_RULES: Gauge =
        register_gauge!("vigilroute_active_rules", "Number of active (non-expired) rules.").unwrap();
    /// Rules newly written during the most recent compile, labeled by outcome.
    pub static ref RULES_EMITTED_TOTAL: CounterVec = register_counter_vec!(
        "vigilroute_rules_emitted_total",
        "Total rules written by analyzers, labeled by outcome (banned/rate_limited).",
        &["outcome"]
    )
    .unwrap();

    // --- Compile / egress ---
    /// Total completed compile cycles (report + ACL write + post-exec).
    pub static ref COMPILE_RUNS_TOTAL: Counter =
        register_counter!("vigilroute_compile_runs_total", "Total completed compile cycles.").unwrap();
    /// Wall-clock duration of a compile cycle.
    pub static ref COMPILE_DURATION_SECONDS: Histogram = register_histogram!(
        "vigilroute_compile_duration_seconds",
        "Duration of a full compile cycle in seconds."
    )
    .unwrap();
    /// Total post-exec commands that exited non-zero or failed to spawn.
    pub static ref POST_EXEC_FAILURES_TOTAL: Counter = register_counter!(
        "vigilroute_post_exec_failures_total",
        "Total post-exec commands that failed."
    )
    .unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
