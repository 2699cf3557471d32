// src/parser/nginxjson.rs

//! Parses one JSON object per line, in the shape an nginx `log_format json`
//! directive emits. `status` accepts either a JSON string or a number since
//! nginx's json escaping of variables varies by directive; everything past
//! the five required fields is optional and defaults to "absent" rather than
//! failing the line.

use super::Parser;
use crate::core::dto::Request;
use crate::core::errors::AppError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::IpAddr;

#[derive(Debug, Deserialize)]
struct StatusField(#[serde(deserialize_with = "deserialize_status")] i32);

fn deserialize_status<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i32),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct TimestampField(#[serde(deserialize_with = "deserialize_timestamp")] f64);

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct NginxJsonLogEntry {
    /// `$msec`-style unix seconds with fractional milliseconds; accepts
    /// either a JSON number or a `"sec.frac"` string.
    timestamp: TimestampField,
    remote_addr: String,
    #[serde(default)]
    request_method: String,
    request_uri: String,
    status: StatusField,
    body_bytes_sent: i64,
    #[serde(default)]
    server: Option<String>,
    /// Request duration in seconds, as nginx's `$request_time` reports it.
    #[serde(default)]
    request_time: Option<f64>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    http_user_agent: Option<String>,
}

pub struct NginxJsonParser;

impl Parser for NginxJsonParser {
    fn parse(&self, line: &[u8]) -> Result<Request, AppError> {
        let entry: NginxJsonLogEntry =
            serde_json::from_slice(line).map_err(|e| AppError::ParseError(e.to_string()))?;

        let client: IpAddr = entry
            .remote_addr
            .parse()
            .map_err(|e| AppError::ParseError(format!("invalid remote_addr '{}': {e}", entry.remote_addr)))?;

        let server: IpAddr = match entry.server {
            Some(s) if !s.is_empty() => s
                .parse()
                .map_err(|e| AppError::ParseError(format!("invalid server '{s}': {e}")))?,
            _ => IpAddr::from([0, 0, 0, 0]),
        };

        let timestamp = entry.timestamp.0;
        let secs = timestamp.trunc() as i64;
        let nanos = (timestamp.fract() * 1_000_000_000.0).round() as u32;
        let time = DateTime::<Utc>::from_timestamp(secs, nanos).unwrap_or_else(Utc::now);

        let duration = entry
            .request_time
            .and_then(|secs| chrono::Duration::try_milliseconds((secs * 1000.0) as i64))
            .unwrap_or_else(chrono::Duration::zero);

        Ok(Request {
            time,
            client,
            server,
            method: entry.request_method,
            url: entry.request_uri,
            host: entry.host.unwrap_or_default(),
            agent: entry.http_user_agent.unwrap_or_default(),
            status: entry.status.0,
            sent: entry.body_bytes_sent,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_entry() {
        let line = br#"{"timestamp":1734345934.123,"remote_addr":"203.0.113.9","request_method":"GET","request_uri":"/x","status":"200","body_bytes_sent":512}"#;
        let req = NginxJsonParser.parse(line).unwrap();
        assert_eq!(req.client, "203.0.113.9".parse::<IpAddr>().unwrap());
        assert_eq!(req.url, "/x");
        assert_eq!(req.status, 200);
        assert_eq!(req.sent, 512);
        assert_eq!(req.time.timestamp(), 1734345934);
    }

    #[test]
    fn parses_numeric_status_and_optional_fields() {
        let line = br#"{"timestamp":1.0,"remote_addr":"10.0.0.1","request_uri":"/y","status":404,"body_bytes_sent":0,"server":"10.0.0.2","host":"example.com","http_user_agent":"curl/8","request_time":0.25}"#;
        let req = NginxJsonParser.parse(line).unwrap();
        assert_eq!(req.status, 404);
        assert_eq!(req.server, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(req.host, "example.com");
        assert_eq!(req.agent, "curl/8");
        assert_eq!(req.duration, chrono::Duration::milliseconds(250));
    }

    #[test]
    fn parses_string_timestamp() {
        let line = br#"{"timestamp":"1734345934.500","remote_addr":"10.0.0.1","request_uri":"/","status":200,"body_bytes_sent":0}"#;
        let req = NginxJsonParser.parse(line).unwrap();
        assert_eq!(req.time.timestamp(), 1734345934);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(NginxJsonParser.parse(b"not json").is_err());
    }

    #[test]
    fn rejects_invalid_remote_addr() {
        let line = br#"{"timestamp":1.0,"remote_addr":"not-an-ip","request_uri":"/","status":200,"body_bytes_sent":0}"#;
        assert!(NginxJsonParser.parse(line).is_err());
    }
}
