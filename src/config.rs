// src/config.rs

//! Loads and validates the JSON configuration object described in spec §6.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::time::Duration as StdDuration;

/// A duration that accepts either a humantime string (`"2h"`, `"30m"`) or a
/// plain JSON integer of nanoseconds, per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Duration(#[serde(serialize_with = "serialize_duration")] pub StdDuration);

fn serialize_duration<S: serde::Serializer>(d: &StdDuration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*d).to_string())
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a duration string (e.g. \"2h\") or a nanosecond integer")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Duration, E> {
                humantime::parse_duration(v)
                    .map(Duration)
                    .map_err(|e| E::custom(format!("invalid duration '{v}': {e}")))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration(StdDuration::from_nanos(v)))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Duration, E> {
                if v < 0 {
                    return Err(E::custom("duration nanoseconds cannot be negative"));
                }
                Ok(Duration(StdDuration::from_nanos(v as u64)))
            }
        }
        deserializer.deserialize_any(Visitor)
    }
}

impl From<Duration> for StdDuration {
    fn from(d: Duration) -> Self {
        d.0
    }
}

impl From<Duration> for chrono::Duration {
    fn from(d: Duration) -> Self {
        chrono::Duration::from_std(d.0).unwrap_or(chrono::Duration::zero())
    }
}

/// A byte-size that accepts a human-readable string (`"100MB"`) or a plain
/// integer count of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteSize(#[serde(serialize_with = "serialize_bytesize")] pub i64);

fn serialize_bytesize<S: serde::Serializer>(b: &i64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&bytesize::ByteSize::b((*b).max(0) as u64).to_string())
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a byte-size string (e.g. \"100MB\") or an integer")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<ByteSize, E> {
                v.parse::<bytesize::ByteSize>()
                    .map(|b| ByteSize(b.as_u64() as i64))
                    .map_err(|e| E::custom(format!("invalid byte size '{v}': {e}")))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<ByteSize, E> {
                Ok(ByteSize(v as i64))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<ByteSize, E> {
                Ok(ByteSize(v))
            }
        }
        deserializer.deserialize_any(Visitor)
    }
}

impl From<ByteSize> for i64 {
    fn from(b: ByteSize) -> Self {
        b.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub ip_list: IpListConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_access")]
    pub access: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_access() -> String {
    String::new()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            access: default_log_access(),
            log_level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_dir")]
    pub dir: String,
}

fn default_db_dir() -> String {
    "./data".to_string()
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dir: default_db_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngressConfig {
    #[serde(default = "default_ingress_method")]
    pub method: String,
    #[serde(default = "default_ingress_format")]
    pub format: String,
    #[serde(default)]
    pub syslog: SyslogConfig,
    #[serde(default)]
    pub tail: TailConfig,
}

fn default_ingress_method() -> String {
    "tail".to_string()
}
fn default_ingress_format() -> String {
    "nginxjson".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyslogConfig {
    #[serde(default = "default_syslog_transport")]
    pub transport: String,
    #[serde(default = "default_syslog_listen_addr")]
    pub listen_addr: String,
}

fn default_syslog_transport() -> String {
    "udp".to_string()
}
fn default_syslog_listen_addr() -> String {
    "0.0.0.0:514".to_string()
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            transport: default_syslog_transport(),
            listen_addr: default_syslog_listen_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub poll: bool,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            poll: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrefixLengthConfig {
    #[serde(default = "default_v4_prefix")]
    pub ipv4: u8,
    #[serde(default = "default_v6_prefix")]
    pub ipv6: u8,
}

fn default_v4_prefix() -> u8 {
    32
}
fn default_v6_prefix() -> u8 {
    128
}

impl Default for PrefixLengthConfig {
    fn default() -> Self {
        Self {
            ipv4: default_v4_prefix(),
            ipv6: default_v6_prefix(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub leaky_bucket: LeakyBucketConfig,
    #[serde(default)]
    pub file_send_ratio: FileSendRatioConfig,
    #[serde(default)]
    pub request_frequency: RequestFrequencyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakyBucketExportConfig {
    #[serde(default)]
    pub prefix_length: PrefixLengthConfig,
    pub ttl: Duration,
    pub min_rate: ByteSize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakyBucketConfig {
    #[serde(default)]
    pub enabled: bool,
    pub leak_rate: ByteSize,
    pub capacity: ByteSize,
    pub bucket_ttl: Duration,
    pub export: LeakyBucketExportConfig,
}

impl Default for LeakyBucketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            leak_rate: ByteSize(1_000_000),
            capacity: ByteSize(10_000_000),
            bucket_ttl: Duration(StdDuration::from_secs(3600)),
            export: LeakyBucketExportConfig {
                prefix_length: PrefixLengthConfig::default(),
                ttl: Duration(StdDuration::from_secs(3600)),
                min_rate: ByteSize(100_000),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathMapEntry {
    pub url_prefix: String,
    pub dir_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSendRatioExportConfig {
    #[serde(default)]
    pub prefix_length: PrefixLengthConfig,
    pub ttl: Duration,
    pub ratio_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSendRatioConfig {
    #[serde(default)]
    pub enabled: bool,
    pub unit_time: Duration,
    pub record_ttl: Duration,
    #[serde(default)]
    pub path_map: Vec<PathMapEntry>,
    pub size_info_ttl: Duration,
    pub export: FileSendRatioExportConfig,
}

impl Default for FileSendRatioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            unit_time: Duration(StdDuration::from_secs(60)),
            record_ttl: Duration(StdDuration::from_secs(3600)),
            path_map: Vec::new(),
            size_info_ttl: Duration(StdDuration::from_secs(21600)),
            export: FileSendRatioExportConfig {
                prefix_length: PrefixLengthConfig::default(),
                ttl: Duration(StdDuration::from_secs(3600)),
                ratio_threshold: 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrequencyExportConfig {
    #[serde(default)]
    pub prefix_length: PrefixLengthConfig,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrequencyConfig {
    #[serde(default)]
    pub enabled: bool,
    pub unit_time: Duration,
    pub record_ttl: Duration,
    pub rps_threshold: f64,
    pub export: RequestFrequencyExportConfig,
}

impl Default for RequestFrequencyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            unit_time: Duration(StdDuration::from_secs(10)),
            record_ttl: Duration(StdDuration::from_secs(3600)),
            rps_threshold: 50.0,
            export: RequestFrequencyExportConfig {
                prefix_length: PrefixLengthConfig::default(),
                ttl: Duration(StdDuration::from_secs(3600)),
            },
        }
    }
}

/// The recursive flow-tree configuration described in spec §4.8. Actions and
/// their parameters are parsed with a custom `Deserialize` impl: a sum-type
/// per action, resolved once at load time, never re-parsed per request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub flow: FlowConfig,
}

#[derive(Debug, Clone, Default)]
pub struct FlowConfig {
    pub action: FlowAction,
    pub subflow: Vec<FlowConfig>,
}

#[derive(Debug, Clone)]
pub enum FlowAction {
    Sequence,
    Match { matchers: Vec<MatcherConfig> },
    Dispatch { analyzer: String },
}

impl Default for FlowAction {
    fn default() -> Self {
        FlowAction::Sequence
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MatcherConfig {
    pub client: Option<String>,
    pub server: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub status: Option<i32>,
    pub sent_min: Option<i64>,
    pub sent_max: Option<i64>,
    pub host: Option<String>,
    pub agent: Option<String>,
}

#[derive(Deserialize)]
struct FlowConfigJson {
    action: String,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default)]
    subflow: Vec<FlowConfig>,
}

#[derive(Deserialize)]
struct MatchParamsJson {
    #[serde(default)]
    matchers: Vec<MatcherConfig>,
}

#[derive(Deserialize)]
struct DispatchParamsJson {
    analyzer: String,
}

impl<'de> Deserialize<'de> for FlowConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = FlowConfigJson::deserialize(deserializer)?;
        let action = match raw.action.as_str() {
            "sequence" => FlowAction::Sequence,
            "match" => {
                let p: MatchParamsJson =
                    serde_json::from_value(raw.params).map_err(serde::de::Error::custom)?;
                FlowAction::Match {
                    matchers: p.matchers,
                }
            }
            "dispatch" => {
                let p: DispatchParamsJson =
                    serde_json::from_value(raw.params).map_err(serde::de::Error::custom)?;
                FlowAction::Dispatch {
                    analyzer: p.analyzer,
                }
            }
            other => {
                return Err(serde::de::Error::custom(format!(
                    "unknown router flow action '{other}'"
                )));
            }
        };
        Ok(FlowConfig {
            action,
            subflow: raw.subflow,
        })
    }
}

impl Serialize for FlowConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Only needed so `Config` itself can derive `Serialize` for
        // diagnostics; round-tripping through this path is not required.
        serializer.serialize_str(match &self.action {
            FlowAction::Sequence => "sequence",
            FlowAction::Match { .. } => "match",
            FlowAction::Dispatch { .. } => "dispatch",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpListConfig {
    #[serde(default = "default_entry_ttl")]
    pub entry_ttl: Duration,
    #[serde(default)]
    pub export_prefix_length: PrefixLengthConfig,
}

fn default_entry_ttl() -> Duration {
    Duration(StdDuration::from_secs(86400))
}

impl Default for IpListConfig {
    fn default() -> Self {
        Self {
            entry_ttl: default_entry_ttl(),
            export_prefix_length: PrefixLengthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostExecConfig {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressConfig {
    #[serde(default = "default_egress_interval")]
    pub interval: Duration,
    #[serde(default = "default_egress_path")]
    pub path: String,
    #[serde(default = "default_egress_format")]
    pub format: String,
    #[serde(default)]
    pub post_exec: Vec<PostExecConfig>,
}

fn default_egress_interval() -> Duration {
    Duration(StdDuration::from_secs(60))
}
fn default_egress_path() -> String {
    "acl.conf".to_string()
}
fn default_egress_format() -> String {
    "nginx".to_string()
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            interval: default_egress_interval(),
            path: default_egress_path(),
            format: default_egress_format(),
            post_exec: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_listen_addr")]
    pub listen_addr: String,
}

fn default_api_listen_addr() -> String {
    "127.0.0.1:8088".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_api_listen_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen_addr")]
    pub listen_addr: String,
}

fn default_metrics_listen_addr() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_listen_addr(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration file. The config format is JSON,
    /// per spec §6.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read config file '{path}'"))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.ingress.method.as_str() {
            "syslog" | "tail" => {}
            other => return Err(anyhow!("ingress.method: unsupported method '{other}'")),
        }
        if self.ingress.format != "nginxjson" {
            return Err(anyhow!(
                "ingress.format: unsupported format '{}'",
                self.ingress.format
            ));
        }
        if self.ingress.method == "tail" && self.ingress.tail.path.trim().is_empty() {
            return Err(anyhow!("ingress.tail.path is required when method is 'tail'"));
        }
        if self.ingress.method == "syslog"
            && !matches!(self.ingress.syslog.transport.as_str(), "tcp" | "udp" | "unixgram")
        {
            return Err(anyhow!(
                "ingress.syslog.transport: unsupported transport '{}'",
                self.ingress.syslog.transport
            ));
        }
        if self.egress.format != "nginx" {
            return Err(anyhow!("egress.format: unsupported format '{}'", self.egress.format));
        }
        for (name, pl) in [
            ("analyzer.leaky_bucket.export", self.analyzer.leaky_bucket.export.prefix_length),
            (
                "analyzer.file_send_ratio.export",
                self.analyzer.file_send_ratio.export.prefix_length,
            ),
            (
                "analyzer.request_frequency.export",
                self.analyzer.request_frequency.export.prefix_length,
            ),
        ] {
            if pl.ipv4 > 32 {
                return Err(anyhow!("{name}.prefix_length.ipv4 must be in [0,32]"));
            }
            if pl.ipv6 > 128 {
                return Err(anyhow!("{name}.prefix_length.ipv6 must be in [0,128]"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_accepts_string_and_integer() {
        let d: Duration = serde_json::from_str("\"2h\"").unwrap();
        assert_eq!(d.0, StdDuration::from_secs(7200));
        let d: Duration = serde_json::from_str("1000000000").unwrap();
        assert_eq!(d.0, StdDuration::from_secs(1));
    }

    #[test]
    fn bytesize_accepts_string_and_integer() {
        let b: ByteSize = serde_json::from_str("\"100MB\"").unwrap();
        assert_eq!(b.0, 100_000_000);
        let b: ByteSize = serde_json::from_str("512").unwrap();
        assert_eq!(b.0, 512);
    }

    #[test]
    fn flow_config_parses_nested_actions() {
        let json = serde_json::json!({
            "action": "sequence",
            "subflow": [
                {
                    "action": "match",
                    "params": {"matchers": [{"status": 200}]},
                    "subflow": [
                        {"action": "dispatch", "params": {"analyzer": "leaky_bucket"}}
                    ]
                }
            ]
        });
        let flow: FlowConfig = serde_json::from_value(json).unwrap();
        assert!(matches!(flow.action, FlowAction::Sequence));
        assert_eq!(flow.subflow.len(), 1);
    }
}
