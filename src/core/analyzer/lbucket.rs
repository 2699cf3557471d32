// src/core/analyzer/lbucket.rs

//! Leaky-bucket bandwidth analyzer (spec §4.4, C4). Tracks a per-client byte
//! bucket that leaks at a fixed rate; overflow past `capacity` caches a
//! progressively tighter rate-limit rule, flushed on `report`.

use super::Analyzer;
use crate::config::LeakyBucketConfig;
use crate::core::dbkey::{KeyBuilder, Tag};
use crate::core::dto::{Request, Rule};
use crate::core::errors::AppError;
use crate::core::prefix::{Addr, Prefix};
use crate::core::rulelist::Tx;
use crate::core::storage::{self, Tree};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

const ANALYZER_NAME: &str = "leaky_bucket";

/// Fixed 32-byte on-disk layout: 16-byte address, 8-byte big-endian bucket,
/// 8-byte big-endian last-modified unix-nanos.
#[derive(Debug, Clone, Copy)]
struct Record {
    addr: Addr,
    bucket: i64,
    last_modified: DateTime<Utc>,
}

const RECORD_LEN: usize = 32;

impl Record {
    fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..16].copy_from_slice(&self.addr.to_be_bytes());
        buf[16..24].copy_from_slice(&self.bucket.to_be_bytes());
        let nanos = self.last_modified.timestamp_nanos_opt().unwrap_or(0);
        buf[24..32].copy_from_slice(&nanos.to_be_bytes());
        buf
    }

    fn decode(addr: Addr, data: &[u8]) -> Option<Self> {
        if data.len() < RECORD_LEN {
            return None;
        }
        let bucket = i64::from_be_bytes(data[16..24].try_into().ok()?);
        let nanos = i64::from_be_bytes(data[24..32].try_into().ok()?);
        Some(Record {
            addr,
            bucket,
            last_modified: DateTime::<Utc>::from_timestamp_nanos(nanos),
        })
    }
}

pub struct LeakyBucket {
    cfg: LeakyBucketConfig,
    db: Tree,
    kb: KeyBuilder,
    cached_rules: Mutex<Vec<Rule>>,
}

impl LeakyBucket {
    pub fn new(cfg: LeakyBucketConfig, db: Tree) -> Self {
        let kb = KeyBuilder::new().with_tag(Tag::LeakyBucket);
        Self {
            cfg,
            db,
            kb,
            cached_rules: Mutex::new(Vec::new()),
        }
    }

    fn record_key(&self, addr: Addr) -> Vec<u8> {
        self.kb.with_bytes(&addr.to_be_bytes()).build()
    }

    fn get_record(&self, addr: Addr, at: DateTime<Utc>) -> Result<Record, AppError> {
        let key = self.record_key(addr);
        match self.db.get(&key)? {
            None => Ok(Record {
                addr,
                bucket: 0,
                last_modified: at,
            }),
            Some(raw) => match storage::decode_with_ttl(Utc::now(), &raw) {
                None => Ok(Record {
                    addr,
                    bucket: 0,
                    last_modified: at,
                }),
                Some(payload) => {
                    Record::decode(addr, payload).ok_or_else(|| AppError::StorageError("corrupt leaky bucket record".into()))
                }
            },
        }
    }

    fn put_record(&self, rec: &Record) -> Result<(), AppError> {
        let key = self.record_key(rec.addr);
        let expires_at = Utc::now() + chrono::Duration::from_std(self.cfg.bucket_ttl.into()).unwrap_or_default();
        let value = storage::encode_with_ttl(expires_at, &rec.encode());
        self.db.insert(key, value)?;
        Ok(())
    }
}

#[async_trait]
impl Analyzer for LeakyBucket {
    fn name(&self) -> &str {
        ANALYZER_NAME
    }

    async fn start(&self, _shutdown_rx: broadcast::Receiver<()>) -> Result<(), AppError> {
        // No background ticker: the bucket is updated synchronously on
        // every request and carries no in-window state to reset.
        Ok(())
    }

    fn process(&self, request: &Request) -> Result<(), AppError> {
        if request.sent <= 0 {
            return Ok(());
        }

        let addr = request.client_addr();
        let mut rec = self.get_record(addr, request.time)?;

        if request.time > rec.last_modified {
            let elapsed_secs = (request.time - rec.last_modified).num_seconds().max(0);
            let leaked = elapsed_secs.saturating_mul(i64::from(self.cfg.leak_rate));
            rec.bucket = (rec.bucket - leaked).max(0);
            rec.last_modified = request.time;
        }
        rec.bucket += request.sent;

        let capacity: i64 = self.cfg.capacity.into();
        if rec.bucket > capacity {
            let severity = rec.bucket as f64 / capacity as f64;
            let leak_rate: i64 = self.cfg.leak_rate.into();
            let min_rate: i64 = self.cfg.export.min_rate.into();
            let rate = (leak_rate as f64 / (severity * severity)).max(min_rate as f64);

            let bits = if addr.is_v4() {
                self.cfg.export.prefix_length.ipv4
            } else {
                self.cfg.export.prefix_length.ipv6
            };
            let prefix = Prefix::new(addr, bits).masked();

            self.cached_rules.lock().push(Rule {
                prefix,
                banned: false,
                rate_limit: rate as i64,
                blame: format!("leaky bucket overflow, severity {severity:.2}"),
                // Replaced with `now + export.ttl` at report time.
                expires_at: Utc::now(),
            });
        }

        self.put_record(&rec)
    }

    async fn report(&self, tx: &mut Tx) -> Result<(), AppError> {
        let mut cached = self.cached_rules.lock();
        if cached.is_empty() {
            return Ok(());
        }
        let expires_at = Utc::now() + chrono::Duration::from_std(self.cfg.export.ttl.into()).unwrap_or_default();
        for mut rule in cached.drain(..) {
            rule.expires_at = expires_at;
            tx.put_rule(rule)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ByteSize, Duration as CfgDuration, LeakyBucketExportConfig, PrefixLengthConfig};
    use std::net::IpAddr;
    use std::time::Duration as StdDuration;

    fn cfg() -> LeakyBucketConfig {
        LeakyBucketConfig {
            enabled: true,
            leak_rate: ByteSize(1_000_000),
            capacity: ByteSize(10_000_000),
            bucket_ttl: CfgDuration(StdDuration::from_secs(3600)),
            export: LeakyBucketExportConfig {
                prefix_length: PrefixLengthConfig { ipv4: 24, ipv6: 128 },
                ttl: CfgDuration(StdDuration::from_secs(3600)),
                min_rate: ByteSize(100_000),
            },
        }
    }

    fn test_db() -> Tree {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn request_from(client: &str, sent: i64, at: DateTime<Utc>) -> Request {
        Request {
            time: at,
            client: client.parse::<IpAddr>().unwrap(),
            server: "0.0.0.0".parse().unwrap(),
            method: "GET".into(),
            url: "/f".into(),
            host: String::new(),
            agent: String::new(),
            status: 200,
            sent,
            duration: chrono::Duration::zero(),
        }
    }

    #[test]
    fn bucket_fills_and_emits_rate_limit() {
        let lb = LeakyBucket::new(cfg(), test_db());
        let t0 = Utc::now();
        for _ in 0..12 {
            lb.process(&request_from("10.0.0.5", 1_000_000, t0)).unwrap();
        }
        let cached = lb.cached_rules.lock();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].prefix.to_string(), "10.0.0.0/24");
        assert!(!cached[0].banned);
        let expected = 1_000_000f64 / (12.0f64 / 10.0).powi(2);
        assert!((cached[0].rate_limit as f64 - expected).abs() < 1.0);
    }

    #[test]
    fn bucket_leaks_over_time() {
        let lb = LeakyBucket::new(cfg(), test_db());
        let t0 = Utc::now();
        for _ in 0..12 {
            lb.process(&request_from("10.0.0.5", 1_000_000, t0)).unwrap();
        }
        lb.cached_rules.lock().clear();
        let t1 = t0 + chrono::Duration::seconds(15);
        lb.process(&request_from("10.0.0.5", 1_000_000, t1)).unwrap();
        assert!(lb.cached_rules.lock().is_empty());
        let rec = lb.get_record(Addr::from_ip("10.0.0.5".parse().unwrap()), t1).unwrap();
        assert_eq!(rec.bucket, 1_000_000);
    }

    #[test]
    fn retrograde_request_still_adds_sent_without_leaking() {
        let lb = LeakyBucket::new(cfg(), test_db());
        let t0 = Utc::now();
        lb.process(&request_from("10.0.0.9", 1_000_000, t0)).unwrap();
        let earlier = t0 - chrono::Duration::seconds(30);
        lb.process(&request_from("10.0.0.9", 500_000, earlier)).unwrap();
        let rec = lb.get_record(Addr::from_ip("10.0.0.9".parse().unwrap()), t0).unwrap();
        assert_eq!(rec.bucket, 1_500_000);
        assert_eq!(rec.last_modified, t0);
    }

    #[test]
    fn zero_or_negative_sent_is_discarded() {
        let lb = LeakyBucket::new(cfg(), test_db());
        let t0 = Utc::now();
        lb.process(&request_from("10.0.0.1", 0, t0)).unwrap();
        lb.process(&request_from("10.0.0.1", -5, t0)).unwrap();
        assert!(lb.db.get(lb.record_key(Addr::from_ip("10.0.0.1".parse().unwrap()))).unwrap().is_none());
    }
}
