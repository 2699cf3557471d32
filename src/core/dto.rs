// src/core/dto.rs

//! Data transfer objects shared across the pipeline: the parsed `Request`
//! and the emitted `Rule`. See spec §3 for the full invariants.

use crate::core::prefix::{Addr, Prefix};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A single parsed access-log entry. Immutable after parsing; fields may be
/// "absent" (empty string / zero), which matchers must treat accordingly.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub time: DateTime<Utc>,
    pub client: IpAddr,
    pub server: IpAddr,
    pub method: String,
    pub url: String,
    pub host: String,
    pub agent: String,
    pub status: i32,
    pub sent: i64,
    pub duration: chrono::Duration,
}

impl Request {
    pub fn client_addr(&self) -> Addr {
        Addr::from_ip(self.client)
    }

    pub fn server_addr(&self) -> Addr {
        Addr::from_ip(self.server)
    }
}

/// A rule emitted by an analyzer, stored by the rule list, read by the ACL
/// writer and the HTTP API. `Prefix` is the primary key and is always
/// stored masked.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub prefix: Prefix,
    pub banned: bool,
    /// Only meaningful when `banned` is false.
    pub rate_limit: i64,
    pub blame: String,
    pub expires_at: DateTime<Utc>,
}

impl Rule {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Wire representation of a `Rule`, per spec §6: `rate_limit` is a
/// human-readable byte size, `expires_at` is RFC3339.
#[derive(Debug, Serialize, Deserialize)]
pub struct RuleJson {
    pub prefix: String,
    pub banned: bool,
    pub rate_limit: String,
    pub blame: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&Rule> for RuleJson {
    fn from(r: &Rule) -> Self {
        RuleJson {
            prefix: r.prefix.to_string(),
            banned: r.banned,
            rate_limit: bytesize::ByteSize::b(r.rate_limit.max(0) as u64).to_string(),
            blame: r.blame.clone(),
            expires_at: r.expires_at,
        }
    }
}

impl TryFrom<RuleJson> for Rule {
    type Error = anyhow::Error;

    fn try_from(j: RuleJson) -> Result<Self, Self::Error> {
        let prefix: Prefix = j.prefix.parse()?;
        let rate_limit: bytesize::ByteSize = j
            .rate_limit
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid rate_limit '{}': {e}", j.rate_limit))?;
        Ok(Rule {
            prefix,
            banned: j.banned,
            rate_limit: rate_limit.as_u64() as i64,
            blame: j.blame,
            expires_at: j.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_json_round_trips() {
        let rule = Rule {
            prefix: "10.0.0.0/24".parse().unwrap(),
            banned: true,
            rate_limit: 0,
            blame: "manual".to_string(),
            expires_at: "2030-01-01T00:00:00Z".parse().unwrap(),
        };
        let json = RuleJson::from(&rule);
        let back: Rule = json.try_into().unwrap();
        assert_eq!(back, rule);
    }
}
