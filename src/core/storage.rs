// src/core/storage.rs

//! Thin wrapper around the embedded ordered KV store (`sled`), plus a
//! value-level TTL envelope. `sled` has no native per-entry expiry (unlike
//! the badger store this design is modeled on), so every TTL-bearing record
//! is stored as `[8-byte big-endian expires_at unix-nanos][payload]`; reads
//! filter expired entries lazily and a background sweeper
//! (`core::storage::TtlSweeper`) purges them on a timer, an active-expiration
//! idiom mirrored from this store's background-ticker conventions.

use crate::core::errors::AppError;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub type Tree = sled::Db;

/// Opens (or creates) the embedded KV store directory.
pub fn open(dir: &Path) -> Result<Tree, AppError> {
    sled::open(dir).map_err(AppError::from)
}

const TTL_HEADER_LEN: usize = 8;

/// Encodes a TTL envelope around a payload.
pub fn encode_with_ttl(expires_at: DateTime<Utc>, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TTL_HEADER_LEN + payload.len());
    out.extend_from_slice(&expires_at.timestamp_nanos_opt().unwrap_or(i64::MAX).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decodes a TTL envelope, returning `None` if the record is expired as of
/// `now` (TTL purity: an expired record is equivalent to absence).
pub fn decode_with_ttl(now: DateTime<Utc>, raw: &[u8]) -> Option<&[u8]> {
    if raw.len() < TTL_HEADER_LEN {
        return None;
    }
    let nanos = i64::from_be_bytes(raw[..TTL_HEADER_LEN].try_into().ok()?);
    let expires_at = DateTime::<Utc>::from_timestamp_nanos(nanos);
    if expires_at <= now {
        None
    } else {
        Some(&raw[TTL_HEADER_LEN..])
    }
}

pub fn envelope_expires_at(raw: &[u8]) -> Option<DateTime<Utc>> {
    if raw.len() < TTL_HEADER_LEN {
        return None;
    }
    let nanos = i64::from_be_bytes(raw[..TTL_HEADER_LEN].try_into().ok()?);
    Some(DateTime::<Utc>::from_timestamp_nanos(nanos))
}

/// Periodically scans a set of key prefixes and deletes TTL-expired entries.
/// This does a direct prefix scan each tick rather than random sampling:
/// the record counts here are bounded by client/resource cardinality rather
/// than total keyspace size, so a full scan is cheap (see DESIGN.md).
pub struct TtlSweeper {
    db: Tree,
    prefixes: Vec<Vec<u8>>,
    interval: StdDuration,
}

impl TtlSweeper {
    pub fn new(db: Tree, prefixes: Vec<Vec<u8>>, interval: StdDuration) -> Self {
        Self {
            db,
            prefixes,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("TTL sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                _ = shutdown_rx.recv() => {
                    info!("TTL sweeper shutting down");
                    return;
                }
            }
        }
    }

    fn sweep_once(&self) {
        let now = Utc::now();
        let mut purged = 0usize;
        for prefix in &self.prefixes {
            for item in self.db.scan_prefix(prefix) {
                let Ok((key, value)) = item else { continue };
                if let Some(expires_at) = envelope_expires_at(&value)
                    && expires_at <= now
                {
                    let _ = self.db.remove(key);
                    purged += 1;
                }
            }
        }
        if purged > 0 {
            debug!("TTL sweeper purged {} expired records", purged);
        }
    }
}

/// Shared handle to the store, cheaply cloneable.
pub type SharedStore = Arc<Tree>;
