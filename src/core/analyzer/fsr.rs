// src/core/analyzer/fsr.rs

//! Send-ratio (FSR) analyzer (spec §4.5, C5): detects clients that
//! repeatedly re-download a single resource within one unit window by
//! comparing bytes sent against the resource's on-disk size.

use super::Analyzer;
use crate::config::FileSendRatioConfig;
use crate::core::dbkey::{KeyBuilder, SubTag, Tag};
use crate::core::dto::{Request, Rule};
use crate::core::errors::AppError;
use crate::core::prefix::{Addr, Prefix};
use crate::core::rulelist::Tx;
use crate::core::storage::{self, Tree};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const ANALYZER_NAME: &str = "file_send_ratio";

#[derive(Debug, Clone)]
struct HistoricRecord {
    addr: Addr,
    url: String,
    ratio: f64,
}

fn encode_historic(rec: &HistoricRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + rec.url.len());
    out.extend_from_slice(&rec.ratio.to_be_bytes());
    out.extend_from_slice(rec.url.as_bytes());
    out
}

fn decode_historic(addr: Addr, data: &[u8]) -> Option<HistoricRecord> {
    if data.len() < 8 {
        return None;
    }
    let ratio = f64::from_be_bytes(data[..8].try_into().ok()?);
    let url = String::from_utf8_lossy(&data[8..]).to_string();
    Some(HistoricRecord { addr, url, ratio })
}

pub struct FileSendRatio {
    cfg: FileSendRatioConfig,
    db: Tree,
    cr_kb: KeyBuilder,
    hr_kb: KeyBuilder,
    fs_kb: KeyBuilder,
    ip_kb: KeyBuilder,
}

impl FileSendRatio {
    pub fn new(cfg: FileSendRatioConfig, db: Tree) -> Self {
        let kb = KeyBuilder::new().with_tag(Tag::FileSendRatio);
        Self {
            cfg,
            db,
            cr_kb: kb.with_subtag(SubTag::Current),
            hr_kb: kb.with_subtag(SubTag::Historic),
            fs_kb: kb.with_subtag(SubTag::FileSize),
            ip_kb: kb.with_subtag(SubTag::IpMarker),
        }
    }

    fn current_key(&self, addr: Addr, url: &str) -> Vec<u8> {
        self.cr_kb.with_bytes(&addr.to_be_bytes()).with_bytes(url.as_bytes()).build()
    }

    fn ip_key(&self, addr: Addr) -> Vec<u8> {
        self.ip_kb.with_bytes(&addr.to_be_bytes()).build()
    }

    fn file_size_key(&self, url: &str) -> Vec<u8> {
        self.fs_kb.with_bytes(url.as_bytes()).build()
    }

    /// Clears all Current and IP-marker records; used both at startup
    /// (stale on restart) and at the end of every window tick.
    fn clear_window_state(&self) -> Result<(), AppError> {
        for prefix in [self.cr_kb.build(), self.ip_kb.build()] {
            for item in self.db.scan_prefix(&prefix) {
                let (key, _) = item?;
                self.db.remove(key)?;
            }
        }
        Ok(())
    }

    /// Resolves a URL's on-disk size from the file-size cache. On a cache
    /// miss, fires a background stat job and returns `None` immediately;
    /// `Process` and the window tick never block on disk I/O.
    fn lookup_or_refresh_size(&self, url: &str) {
        let key = self.file_size_key(url);
        match self.db.get(&key) {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(url, "file size cache miss");
                self.spawn_size_lookup(url.to_string());
            }
            Err(e) => error!(error = %e, "failed to read file size cache"),
        }
    }

    fn resolve_size(&self, url: &str) -> Option<i64> {
        let key = self.file_size_key(url);
        match self.db.get(&key) {
            Ok(Some(raw)) => storage::decode_with_ttl(Utc::now(), &raw)
                .and_then(|payload| payload.try_into().ok())
                .map(i64::from_be_bytes),
            _ => None,
        }
    }

    fn spawn_size_lookup(&self, url: String) {
        let path_map = self.cfg.path_map.clone();
        let db = self.db.clone();
        let key = self.file_size_key(&url);
        let ttl: std::time::Duration = self.cfg.size_info_ttl.into();
        tokio::spawn(async move {
            let Some(disk_path) = resolve_disk_path(&path_map, &url) else {
                warn!(url, "dropping path without prefix in path map");
                return;
            };
            match tokio::fs::metadata(&disk_path).await {
                Ok(meta) => {
                    let size = meta.len() as i64;
                    let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
                    let value = storage::encode_with_ttl(expires_at, &size.to_be_bytes());
                    if let Err(e) = db.insert(key, value) {
                        error!(error = %e, "failed to put file size record");
                    }
                }
                Err(e) => error!(path = %disk_path, error = %e, "failed to stat file"),
            }
        });
    }

    /// Window tick: aggregates Current records per client into one Historic
    /// record per client, then unconditionally clears Current and IP state
    /// (spec §4.5, §9: a window with no resolved ratios still clears).
    async fn tick_once(&self) -> Result<(), AppError> {
        let ip_prefix = self.ip_kb.build();
        let mut clients = Vec::new();
        for item in self.db.scan_prefix(&ip_prefix) {
            let (key, _) = item?;
            if let Some(addr_bytes) = key.get(ip_prefix.len()..ip_prefix.len() + 16) {
                if let Ok(bytes) = <[u8; 16]>::try_from(addr_bytes) {
                    clients.push(bytes);
                }
            }
        }

        let now = Utc::now();
        let record_ttl: std::time::Duration = self.cfg.record_ttl.into();
        let window_expires_at = now + chrono::Duration::from_std(record_ttl).unwrap_or_default();

        for addr_bytes in &clients {
            // Family is irrelevant for ratio computation; treat as v6 for
            // the 128-bit round trip, the rule-emitting side re-derives
            // family correctly from the original request address space.
            let addr = Addr::from_be_bytes(*addr_bytes, is_probably_v4(addr_bytes));
            let cur_prefix = self.cr_kb.with_bytes(addr_bytes).build();
            let mut best: Option<(String, f64)> = None;
            for item in self.db.scan_prefix(&cur_prefix) {
                let (key, value) = item?;
                let url = String::from_utf8_lossy(&key[cur_prefix.len()..]).to_string();
                let Ok(sent_bytes) = <[u8; 8]>::try_from(value.as_ref()) else {
                    continue;
                };
                let sent = i64::from_be_bytes(sent_bytes);
                match self.resolve_size(&url) {
                    Some(size) if size > 0 => {
                        let ratio = sent as f64 / size as f64;
                        if best.as_ref().map(|(_, r)| ratio > *r).unwrap_or(true) {
                            best = Some((url, ratio));
                        }
                    }
                    Some(_) => {}
                    None => self.lookup_or_refresh_size(&url),
                }
            }

            if let Some((url, ratio)) = best {
                let key = self
                    .hr_kb
                    .with_bytes(addr_bytes)
                    .with_bytes(&now.timestamp_nanos_opt().unwrap_or_default().to_be_bytes())
                    .build();
                let rec = HistoricRecord { addr, url, ratio };
                let value = storage::encode_with_ttl(window_expires_at, &encode_historic(&rec));
                self.db.insert(key, value)?;
            }
        }

        self.clear_window_state()
    }
}

fn is_probably_v4(bytes: &[u8; 16]) -> bool {
    bytes[..12].iter().all(|b| *b == 0)
}

fn resolve_disk_path(path_map: &[crate::config::PathMapEntry], url: &str) -> Option<String> {
    path_map
        .iter()
        .filter(|m| url.starts_with(&m.url_prefix))
        .max_by_key(|m| m.url_prefix.len())
        .map(|m| format!("{}{}", m.dir_prefix, &url[m.url_prefix.len()..]))
}

#[async_trait]
impl Analyzer for FileSendRatio {
    fn name(&self) -> &str {
        ANALYZER_NAME
    }

    async fn start(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), AppError> {
        self.clear_window_state()?;

        let cfg = self.cfg.clone();
        let db = self.db.clone();
        let handle = FileSendRatio::new(cfg.clone(), db);
        let unit_time: std::time::Duration = cfg.unit_time.into();
        tokio::spawn(async move {
            info!("starting file-send-ratio window ticker");
            let mut ticker = tokio::time::interval(unit_time);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = handle.tick_once().await {
                            error!(error = %e, "file-send-ratio window tick failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("stopping file-send-ratio window ticker");
                        return;
                    }
                }
            }
        });
        Ok(())
    }

    fn process(&self, request: &Request) -> Result<(), AppError> {
        let addr = request.client_addr();
        let key = self.current_key(addr, &request.url);
        let prior = match self.db.get(&key)? {
            Some(raw) => i64::from_be_bytes(raw.as_ref().try_into().unwrap_or([0; 8])),
            None => 0,
        };
        let sent = prior + request.sent;
        self.db.insert(key, sent.to_be_bytes().to_vec())?;
        self.db.insert(self.ip_key(addr), Vec::new())?;
        Ok(())
    }

    async fn report(&self, tx: &mut Tx) -> Result<(), AppError> {
        let prefix = self.hr_kb.build();
        let mut best_per_client: HashMap<[u8; 16], HistoricRecord> = HashMap::new();
        for item in self.db.scan_prefix(&prefix) {
            let (key, raw) = item?;
            let Some(addr_bytes) = key.get(prefix.len()..prefix.len() + 16) else {
                continue;
            };
            let Ok(addr_bytes): Result<[u8; 16], _> = addr_bytes.try_into() else {
                continue;
            };
            let Some(payload) = storage::decode_with_ttl(Utc::now(), &raw) else {
                continue;
            };
            let addr = Addr::from_be_bytes(addr_bytes, is_probably_v4(&addr_bytes));
            let Some(rec) = decode_historic(addr, payload) else {
                continue;
            };
            best_per_client
                .entry(addr_bytes)
                .and_modify(|cur| {
                    if rec.ratio > cur.ratio {
                        *cur = rec.clone();
                    }
                })
                .or_insert(rec);
        }

        let expires_at = Utc::now() + chrono::Duration::from_std(self.cfg.export.ttl.into()).unwrap_or_default();
        for rec in best_per_client.into_values() {
            if rec.ratio < self.cfg.export.ratio_threshold {
                continue;
            }
            let bits = if rec.addr.is_v4() {
                self.cfg.export.prefix_length.ipv4
            } else {
                self.cfg.export.prefix_length.ipv6
            };
            let prefix = Prefix::new(rec.addr, bits).masked();
            tx.put_rule(Rule {
                prefix,
                banned: true,
                rate_limit: 0,
                blame: format!("send ratio {:.2} for '{}' exceeds threshold", rec.ratio, rec.url),
                expires_at,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Duration as CfgDuration, FileSendRatioExportConfig, PathMapEntry, PrefixLengthConfig};
    use std::net::IpAddr;
    use std::time::Duration as StdDuration;

    fn cfg() -> FileSendRatioConfig {
        FileSendRatioConfig {
            enabled: true,
            unit_time: CfgDuration(StdDuration::from_secs(60)),
            record_ttl: CfgDuration(StdDuration::from_secs(3600)),
            path_map: vec![PathMapEntry {
                url_prefix: "/dl/".into(),
                dir_prefix: "/srv/".into(),
            }],
            size_info_ttl: CfgDuration(StdDuration::from_secs(21600)),
            export: FileSendRatioExportConfig {
                prefix_length: PrefixLengthConfig { ipv4: 32, ipv6: 128 },
                ttl: CfgDuration(StdDuration::from_secs(3600)),
                ratio_threshold: 2.0,
            },
        }
    }

    fn test_db() -> Tree {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn request_from(client: &str, url: &str, sent: i64) -> Request {
        Request {
            time: Utc::now(),
            client: client.parse::<IpAddr>().unwrap(),
            server: "0.0.0.0".parse().unwrap(),
            method: "GET".into(),
            url: url.into(),
            host: String::new(),
            agent: String::new(),
            status: 200,
            sent,
            duration: chrono::Duration::zero(),
        }
    }

    #[test]
    fn process_accumulates_sent_per_client_and_url() {
        let fsr = FileSendRatio::new(cfg(), test_db());
        for _ in 0..5 {
            fsr.process(&request_from("192.0.2.7", "/dl/big.iso", 60_000_000)).unwrap();
        }
        let addr = Addr::from_ip("192.0.2.7".parse().unwrap());
        let key = fsr.current_key(addr, "/dl/big.iso");
        let raw = fsr.db.get(&key).unwrap().unwrap();
        let sent = i64::from_be_bytes(raw.as_ref().try_into().unwrap());
        assert_eq!(sent, 300_000_000);
    }

    #[tokio::test]
    async fn window_tick_detects_leech_and_always_clears() {
        let fsr = FileSendRatio::new(cfg(), test_db());
        let addr = Addr::from_ip("192.0.2.7".parse().unwrap());
        for _ in 0..5 {
            fsr.process(&request_from("192.0.2.7", "/dl/big.iso", 60_000_000)).unwrap();
        }
        // Simulate a resolved file-size cache entry instead of touching disk.
        let size_key = fsr.file_size_key("/dl/big.iso");
        let value = storage::encode_with_ttl(Utc::now() + chrono::Duration::hours(1), &100_000_000i64.to_be_bytes());
        fsr.db.insert(size_key, value).unwrap();

        fsr.tick_once().await.unwrap();

        let hr_prefix = fsr.hr_kb.with_bytes(&addr.to_be_bytes()).build();
        let mut found = false;
        for item in fsr.db.scan_prefix(&hr_prefix) {
            let (_, raw) = item.unwrap();
            let payload = storage::decode_with_ttl(Utc::now(), &raw).unwrap();
            let rec = decode_historic(addr, payload).unwrap();
            assert!((rec.ratio - 3.0).abs() < 1e-9);
            found = true;
        }
        assert!(found);

        assert!(fsr.db.scan_prefix(fsr.cr_kb.build()).next().is_none());
        assert!(fsr.db.scan_prefix(fsr.ip_kb.build()).next().is_none());
    }

    #[tokio::test]
    async fn report_emits_ban_rule_above_threshold() {
        let fsr = FileSendRatio::new(cfg(), test_db());
        let addr = Addr::from_ip("192.0.2.7".parse().unwrap());
        let key = fsr
            .hr_kb
            .with_bytes(&addr.to_be_bytes())
            .with_bytes(&Utc::now().timestamp_nanos_opt().unwrap().to_be_bytes())
            .build();
        let rec = HistoricRecord {
            addr,
            url: "/dl/big.iso".into(),
            ratio: 3.0,
        };
        let value = storage::encode_with_ttl(Utc::now() + chrono::Duration::hours(1), &encode_historic(&rec));
        fsr.db.insert(key, value).unwrap();

        let rl = crate::core::rulelist::RuleList::new(fsr.db.clone());
        let mut tx = rl.begin_tx();
        fsr.report(&mut tx).await.unwrap();
        tx.commit().unwrap();

        let rules = rl.list_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].banned);
        assert!(rules[0].blame.contains("big.iso"));
        assert!(rules[0].blame.contains("3.00"));
    }
}
