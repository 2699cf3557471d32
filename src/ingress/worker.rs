// src/ingress/worker.rs

//! The ingress worker (spec §4.9, C9): one task per configured source,
//! gluing the adapter's raw lines through the parser and into the router.
//! Parse errors are logged and dropped, never retried.

use crate::core::metrics;
use crate::core::router::Router;
use crate::parser::Parser;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Drains `lines` until the channel closes (the adapter exited, which
/// itself happens on shutdown), parsing and routing each one in turn.
pub async fn run_worker(mut lines: mpsc::Receiver<Vec<u8>>, parser: Box<dyn Parser>, router: std::sync::Arc<Router>) {
    while let Some(line) = lines.recv().await {
        match parser.parse(&line) {
            Ok(request) => {
                metrics::REQUESTS_PROCESSED_TOTAL.inc();
                router.route(&request);
            }
            Err(e) => {
                metrics::PARSE_ERRORS_TOTAL.inc();
                warn!(error = %e, line = %String::from_utf8_lossy(&line), "failed to parse ingress line");
                debug!("dropping unparseable line");
            }
        }
    }
}
