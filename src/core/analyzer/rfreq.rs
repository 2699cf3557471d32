// src/core/analyzer/rfreq.rs

//! Request-frequency analyzer (spec §4.6, C6): counts requests per client
//! per unit window and bans clients whose requests-per-second exceed a
//! threshold.

use super::Analyzer;
use crate::config::RequestFrequencyConfig;
use crate::core::dbkey::{KeyBuilder, Tag};
use crate::core::dto::{Request, Rule};
use crate::core::errors::AppError;
use crate::core::prefix::{Addr, Prefix};
use crate::core::rulelist::Tx;
use crate::core::storage::{self, Tree};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

const ANALYZER_NAME: &str = "request_frequency";

fn encode_rps(rps: f64) -> [u8; 8] {
    rps.to_be_bytes()
}

fn decode_rps(data: &[u8]) -> Option<f64> {
    Some(f64::from_be_bytes(data.try_into().ok()?))
}

pub struct RequestFrequency {
    cfg: RequestFrequencyConfig,
    db: Tree,
    kb: KeyBuilder,
    counts: Arc<DashMap<Addr, u64>>,
    blame_template: String,
}

impl RequestFrequency {
    pub fn new(cfg: RequestFrequencyConfig, db: Tree) -> Self {
        let blame_template = format!("RPS exceeded {:.6}.", cfg.rps_threshold);
        Self {
            kb: KeyBuilder::new().with_tag(Tag::RequestFrequency),
            cfg,
            db,
            counts: Arc::new(DashMap::new()),
            blame_template,
        }
    }

    fn record_key(&self, addr: Addr, at_nanos: i64) -> Vec<u8> {
        self.kb
            .with_bytes(&addr.to_be_bytes())
            .with_bytes(&at_nanos.to_be_bytes())
            .build()
    }

    fn compile_window(&self) -> Result<(), AppError> {
        compile_window(&self.db, &self.kb, &self.counts, std::time::Duration::from(self.cfg.unit_time), self.cfg.record_ttl.into())
    }
}

/// Snapshots and clears the in-memory counter map, persisting one Historic
/// record per client. Shared by the background ticker and tests so the two
/// never drift.
fn compile_window(
    db: &Tree,
    kb: &KeyBuilder,
    counts: &DashMap<Addr, u64>,
    unit_time: std::time::Duration,
    record_ttl: std::time::Duration,
) -> Result<(), AppError> {
    let snapshot: Vec<(Addr, u64)> = counts.iter().map(|e| (*e.key(), *e.value())).collect();
    counts.clear();

    if snapshot.is_empty() {
        return Ok(());
    }

    let unit_time_secs = unit_time.as_secs_f64().max(f64::EPSILON);
    let now = Utc::now();
    let expires_at = now + chrono::Duration::from_std(record_ttl).unwrap_or_default();
    let nanos = now.timestamp_nanos_opt().unwrap_or_default();

    for (addr, count) in snapshot {
        let rps = count as f64 / unit_time_secs;
        let key = kb.with_bytes(&addr.to_be_bytes()).with_bytes(&nanos.to_be_bytes()).build();
        let value = storage::encode_with_ttl(expires_at, &encode_rps(rps));
        db.insert(key, value)?;
    }
    Ok(())
}

#[async_trait]
impl Analyzer for RequestFrequency {
    fn name(&self) -> &str {
        ANALYZER_NAME
    }

    async fn start(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), AppError> {
        let counts = Arc::clone(&self.counts);
        let db = self.db.clone();
        let kb = self.kb.clone();
        let cfg = self.cfg.clone();
        let unit_time: std::time::Duration = cfg.unit_time.into();
        let record_ttl: std::time::Duration = cfg.record_ttl.into();

        tokio::spawn(async move {
            info!("starting request-frequency compile ticker");
            let mut ticker = tokio::time::interval(unit_time);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = compile_window(&db, &kb, &counts, unit_time, record_ttl) {
                            error!(error = %e, "failed to persist request-frequency records");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("stopping request-frequency compile ticker");
                        return;
                    }
                }
            }
        });
        Ok(())
    }

    fn process(&self, request: &Request) -> Result<(), AppError> {
        *self.counts.entry(request.client_addr()).or_insert(0) += 1;
        Ok(())
    }

    async fn report(&self, tx: &mut Tx) -> Result<(), AppError> {
        let prefix = self.kb.build();
        let mut max_per_client: HashMap<[u8; 16], f64> = HashMap::new();
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
            let Some(rps) = decode_rps(payload) else {
                continue;
            };
            if rps >= self.cfg.rps_threshold {
                max_per_client
                    .entry(addr_bytes)
                    .and_modify(|cur| {
                        if rps > *cur {
                            *cur = rps;
                        }
                    })
                    .or_insert(rps);
            }
        }

        let expires_at = Utc::now() + chrono::Duration::from_std(self.cfg.export.ttl.into()).unwrap_or_default();
        for (addr_bytes, rps) in max_per_client {
            let is_v4 = addr_bytes[..12].iter().all(|b| *b == 0);
            let addr = Addr::from_be_bytes(addr_bytes, is_v4);
            let bits = if is_v4 {
                self.cfg.export.prefix_length.ipv4
            } else {
                self.cfg.export.prefix_length.ipv6
            };
            let prefix = Prefix::new(addr, bits).masked();
            tx.put_rule(Rule {
                prefix,
                banned: true,
                rate_limit: 0,
                blame: format!("{} Actual RPS {:.2}.", self.blame_template, rps),
                expires_at,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Duration as CfgDuration, PrefixLengthConfig, RequestFrequencyExportConfig};
    use std::net::IpAddr;
    use std::time::Duration as StdDuration;

    fn cfg() -> RequestFrequencyConfig {
        RequestFrequencyConfig {
            enabled: true,
            unit_time: CfgDuration(StdDuration::from_secs(10)),
            record_ttl: CfgDuration(StdDuration::from_secs(3600)),
            rps_threshold: 50.0,
            export: RequestFrequencyExportConfig {
                prefix_length: PrefixLengthConfig { ipv4: 32, ipv6: 128 },
                ttl: CfgDuration(StdDuration::from_secs(3600)),
            },
        }
    }

    fn test_db() -> Tree {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn request_from(client: &str) -> Request {
        Request {
            time: Utc::now(),
            client: client.parse::<IpAddr>().unwrap(),
            server: "0.0.0.0".parse().unwrap(),
            method: "GET".into(),
            url: "/".into(),
            host: String::new(),
            agent: String::new(),
            status: 200,
            sent: 0,
            duration: chrono::Duration::zero(),
        }
    }

    #[test]
    fn compile_window_computes_rps() {
        let rf = RequestFrequency::new(cfg(), test_db());
        for _ in 0..1000 {
            rf.process(&request_from("203.0.113.1")).unwrap();
        }
        rf.compile_window().unwrap();

        let addr = Addr::from_ip("203.0.113.1".parse().unwrap());
        let prefix = rf.kb.with_bytes(&addr.to_be_bytes()).build();
        let (_, raw) = rf.db.scan_prefix(&prefix).next().unwrap().unwrap();
        let payload = storage::decode_with_ttl(Utc::now(), &raw).unwrap();
        let rps = decode_rps(payload).unwrap();
        assert!((rps - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn report_emits_ban_rule_with_exact_blame_text() {
        let rf = RequestFrequency::new(cfg(), test_db());
        for _ in 0..1000 {
            rf.process(&request_from("203.0.113.1")).unwrap();
        }
        rf.compile_window().unwrap();

        let rl = crate::core::rulelist::RuleList::new(rf.db.clone());
        let mut tx = rl.begin_tx();
        rf.report(&mut tx).await.unwrap();
        tx.commit().unwrap();

        let rules = rl.list_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].blame, "RPS exceeded 50.000000. Actual RPS 100.00.");
    }
}
