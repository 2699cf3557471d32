// src/ingress/tail.rs

//! Poll-based file tailing (spec §4.9): seeks to end-of-file at startup,
//! then follows appended lines directly on `tokio::fs` (documented in
//! DESIGN.md).

use super::Adapter;
use crate::config::TailConfig;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct TailAdapter {
    cfg: TailConfig,
}

impl TailAdapter {
    pub fn new(cfg: TailConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Adapter for TailAdapter {
    async fn run(self: Box<Self>, out: mpsc::Sender<Vec<u8>>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(path = %self.cfg.path, "starting file tail");

        let mut file = match File::open(&self.cfg.path).await {
            Ok(f) => f,
            Err(e) => {
                error!(path = %self.cfg.path, error = %e, "failed to open tail target, adapter exiting");
                return;
            }
        };
        // Seek to end: only lines written after startup are delivered.
        if let Err(e) = file.seek(SeekFrom::End(0)).await {
            error!(path = %self.cfg.path, error = %e, "failed to seek tail target");
            return;
        }

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!(path = %self.cfg.path, "shutting down file tail");
                    return;
                }
                result = reader.read_line(&mut line) => {
                    match result {
                        Ok(0) => {
                            // EOF: wait and re-check. Covers both the normal
                            // "no new data yet" case and a truncated file.
                            sleep(POLL_INTERVAL).await;
                        }
                        Ok(_) => {
                            let text = line.trim_end_matches(['\n', '\r']).to_string();
                            line.clear();
                            if !text.is_empty() && out.send(text.into_bytes()).await.is_err() {
                                warn!("ingress worker channel closed, stopping file tail");
                                return;
                            }
                        }
                        Err(e) => {
                            error!(path = %self.cfg.path, error = %e, "tail read failed");
                            return;
                        }
                    }
                }
            }
        }
    }
}
