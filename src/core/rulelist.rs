// src/core/rulelist.rs

//! Persistent set of emitted rules, keyed by masked prefix, with TTL-driven
//! expiry (spec §4.2). Backed by the shared embedded KV store; the rule
//! list exclusively owns the `Tag::RuleList` key range.

use crate::core::dbkey::{KeyBuilder, Tag};
use crate::core::dto::Rule;
use crate::core::errors::AppError;
use crate::core::prefix::{Addr, Prefix};
use crate::core::storage::{self, Tree};
use chrono::Utc;

fn rule_key(prefix: Prefix) -> Vec<u8> {
    KeyBuilder::new()
        .with_tag(Tag::RuleList)
        .with_bytes(&prefix.db_key())
        .build()
}

fn encode_rule(rule: &Rule) -> Vec<u8> {
    serde_json::to_vec(&crate::core::dto::RuleJson::from(rule)).expect("rule encodes")
}

fn decode_rule(prefix_hint: Prefix, bytes: &[u8]) -> Result<Rule, AppError> {
    let json: crate::core::dto::RuleJson =
        serde_json::from_slice(bytes).map_err(|e| AppError::StorageError(e.to_string()))?;
    let mut rule: Rule = json
        .try_into()
        .map_err(|e: anyhow::Error| AppError::StorageError(e.to_string()))?;
    // The key is the primary source of truth for the prefix; the encoded
    // JSON is expected to agree, but defend against skew.
    rule.prefix = prefix_hint;
    Ok(rule)
}

fn prefix_from_key(key: &[u8]) -> Option<Prefix> {
    // key = [tag(1)][addr(16)][bits(1)]
    if key.len() != 18 {
        return None;
    }
    let addr_bytes: [u8; 16] = key[1..17].try_into().ok()?;
    let bits = key[17];
    // Heuristic: an IPv4 mapping never sets any of the high 96 bits; this
    // matches the zero-extended encoding `Addr::to_be_bytes` produces.
    let is_v4 = addr_bytes[..12].iter().all(|b| *b == 0) && bits <= 32;
    Some(Prefix::new(Addr::from_be_bytes(addr_bytes, is_v4), bits))
}

#[derive(Clone)]
pub struct RuleList {
    db: Tree,
}

impl RuleList {
    pub fn new(db: Tree) -> Self {
        Self { db }
    }

    pub fn put_rule(&self, rule: &Rule) -> Result<(), AppError> {
        let key = rule_key(rule.prefix.masked());
        let value = storage::encode_with_ttl(rule.expires_at, &encode_rule(rule));
        self.db.insert(key, value)?;
        Ok(())
    }

    pub fn get_rule(&self, prefix: Prefix) -> Result<Option<Rule>, AppError> {
        let prefix = prefix.masked();
        let key = rule_key(prefix);
        match self.db.get(&key)? {
            None => Ok(None),
            Some(raw) => match storage::decode_with_ttl(Utc::now(), &raw) {
                None => Ok(None),
                Some(payload) => Ok(Some(decode_rule(prefix, payload)?)),
            },
        }
    }

    pub fn del_rule(&self, prefix: Prefix) -> Result<(), AppError> {
        self.db.remove(rule_key(prefix.masked()))?;
        Ok(())
    }

    /// Range scan over the rule prefix in key order; expired rules are
    /// filtered out (TTL purity).
    pub fn list_rules(&self) -> Result<Vec<Rule>, AppError> {
        let scan_prefix = KeyBuilder::new().with_tag(Tag::RuleList).build();
        let now = Utc::now();
        let mut rules = Vec::new();
        for item in self.db.scan_prefix(&scan_prefix) {
            let (key, raw) = item?;
            let Some(prefix) = prefix_from_key(&key) else {
                continue;
            };
            if let Some(payload) = storage::decode_with_ttl(now, &raw) {
                rules.push(decode_rule(prefix, payload)?);
            }
        }
        Ok(rules)
    }

    pub fn begin_tx(&self) -> Tx {
        Tx {
            db: self.db.clone(),
            pending: Vec::new(),
        }
    }
}

/// A batched write: analyzers push rules into it during `Report`, the
/// analyzer manager commits it once all analyzers have reported, making the
/// whole compile cycle atomic on commit.
pub struct Tx {
    db: Tree,
    pending: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Tx {
    pub fn put_rule(&mut self, rule: Rule) -> Result<(), AppError> {
        let key = rule_key(rule.prefix.masked());
        let value = storage::encode_with_ttl(rule.expires_at, &encode_rule(&rule));
        let outcome = if rule.banned { "banned" } else { "rate_limited" };
        crate::core::metrics::RULES_EMITTED_TOTAL.with_label_values(&[outcome]).inc();
        self.pending.push((key, value));
        Ok(())
    }

    pub fn commit(self) -> Result<(), AppError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.db
            .transaction(move |tx_db| -> sled::transaction::ConflictableTransactionResult<(), AppError> {
                for (key, value) in &self.pending {
                    tx_db.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            })
            .map_err(AppError::from)
    }

    pub fn discard(self) {
        // Pending writes are simply dropped without touching the store.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Tree {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let rl = RuleList::new(test_db());
        let rule = Rule {
            prefix: "10.0.0.5/24".parse().unwrap(),
            banned: true,
            rate_limit: 0,
            blame: "test".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        rl.put_rule(&rule).unwrap();
        let got = rl.get_rule("10.0.0.0/24".parse().unwrap()).unwrap().unwrap();
        assert_eq!(got.prefix, rule.prefix.masked());
        assert_eq!(got.banned, rule.banned);
    }

    #[test]
    fn expired_rule_is_absent() {
        let rl = RuleList::new(test_db());
        let rule = Rule {
            prefix: "10.0.0.0/24".parse().unwrap(),
            banned: true,
            rate_limit: 0,
            blame: "test".into(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
        };
        rl.put_rule(&rule).unwrap();
        assert!(rl.get_rule(rule.prefix).unwrap().is_none());
        assert!(rl.list_rules().unwrap().is_empty());
    }

    #[test]
    fn put_rule_is_idempotent() {
        let rl = RuleList::new(test_db());
        let rule = Rule {
            prefix: "10.0.0.0/24".parse().unwrap(),
            banned: false,
            rate_limit: 1000,
            blame: "x".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        rl.put_rule(&rule).unwrap();
        rl.put_rule(&rule).unwrap();
        assert_eq!(rl.list_rules().unwrap().len(), 1);
    }

    #[test]
    fn tx_commit_is_atomic() {
        let rl = RuleList::new(test_db());
        let mut tx = rl.begin_tx();
        tx.put_rule(Rule {
            prefix: "10.0.0.0/24".parse().unwrap(),
            banned: true,
            rate_limit: 0,
            blame: "a".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
        .unwrap();
        tx.put_rule(Rule {
            prefix: "10.0.1.0/24".parse().unwrap(),
            banned: true,
            rate_limit: 0,
            blame: "b".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
        .unwrap();
        tx.commit().unwrap();
        assert_eq!(rl.list_rules().unwrap().len(), 2);
    }
}
