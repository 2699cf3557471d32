// src/ingress/mod.rs

//! Source adapters (spec §4.9, C9): each yields a stream of raw byte lines
//! on an internal channel. A separate worker owns parsing and routing, so
//! an adapter never needs to know about [`crate::parser`] or
//! [`crate::core::router`].

mod syslog;
mod tail;
mod worker;

use crate::config::IngressConfig;
use crate::core::errors::AppError;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

pub use worker::run_worker;

/// One adapter per configured source. `run` owns the source's lifetime:
/// it must return promptly once `shutdown_rx` fires.
#[async_trait]
pub trait Adapter: Send {
    async fn run(self: Box<Self>, out: mpsc::Sender<Vec<u8>>, shutdown_rx: broadcast::Receiver<()>);
}

/// Builds the configured adapter. `method` is validated at config load
/// time, so an unsupported value here means validation was bypassed.
pub fn make_adapter(cfg: &IngressConfig) -> Result<Box<dyn Adapter>, AppError> {
    match cfg.method.as_str() {
        "tail" => Ok(Box::new(tail::TailAdapter::new(cfg.tail.clone()))),
        "syslog" => syslog::SyslogAdapter::new(cfg.syslog.clone()).map(|a| Box::new(a) as Box<dyn Adapter>),
        other => Err(AppError::ConfigInvalid(format!("unsupported ingress method '{other}'"))),
    }
}
