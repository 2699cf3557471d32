// src/core/router.rs

//! Request router (spec §4.8, C8): a declarative tree of flows compiled
//! once from configuration. Stateless across requests and safe for
//! concurrent invocation from multiple ingress workers.

use crate::config::{FlowAction, FlowConfig, MatcherConfig};
use crate::core::analyzer::Analyzer;
use crate::core::dto::Request;
use crate::core::errors::AppError;
use crate::core::prefix::Prefix;
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, warn};

/// Cheapest filters run first so a request can be rejected without paying
/// for a regex match (spec §4.8 priority classes).
enum Filter {
    Status(i32),
    Method(String),
    SentMin(i64),
    SentMax(i64),
    Client(Prefix),
    Server(Prefix),
    Url(Regex),
    Host(Regex),
    Agent(Regex),
}

impl Filter {
    fn priority(&self) -> u8 {
        match self {
            Filter::Status(_) | Filter::Method(_) | Filter::SentMin(_) | Filter::SentMax(_) => 0,
            Filter::Client(_) | Filter::Server(_) => 1,
            Filter::Url(_) | Filter::Host(_) | Filter::Agent(_) => 2,
        }
    }

    fn matches(&self, request: &Request) -> bool {
        match self {
            Filter::Status(v) => request.status == *v,
            Filter::Method(v) => &request.method == v,
            Filter::SentMin(v) => request.sent >= *v,
            Filter::SentMax(v) => request.sent <= *v,
            Filter::Client(p) => p.contains(request.client_addr()),
            Filter::Server(p) => p.contains(request.server_addr()),
            Filter::Url(re) => re.is_match(&request.url),
            Filter::Host(re) => re.is_match(&request.host),
            Filter::Agent(re) => re.is_match(&request.agent),
        }
    }
}

/// A matcher matches a request iff every one of its (present) filters does.
struct Matcher {
    filters: Vec<Filter>,
}

impl Matcher {
    fn compile(cfg: &MatcherConfig) -> Result<Self, AppError> {
        let mut filters = Vec::new();
        if let Some(v) = cfg.status {
            filters.push(Filter::Status(v));
        }
        if let Some(v) = &cfg.method {
            filters.push(Filter::Method(v.clone()));
        }
        if let Some(v) = cfg.sent_min {
            filters.push(Filter::SentMin(v));
        }
        if let Some(v) = cfg.sent_max {
            filters.push(Filter::SentMax(v));
        }
        if let Some(v) = &cfg.client {
            filters.push(Filter::Client(Prefix::from_str(v).map_err(|e| {
                AppError::ConfigInvalid(format!("router matcher client '{v}': {e}"))
            })?));
        }
        if let Some(v) = &cfg.server {
            filters.push(Filter::Server(Prefix::from_str(v).map_err(|e| {
                AppError::ConfigInvalid(format!("router matcher server '{v}': {e}"))
            })?));
        }
        if let Some(v) = &cfg.url {
            filters.push(Filter::Url(Regex::new(v).map_err(|e| {
                AppError::ConfigInvalid(format!("router matcher url regex '{v}': {e}"))
            })?));
        }
        if let Some(v) = &cfg.host {
            filters.push(Filter::Host(Regex::new(v).map_err(|e| {
                AppError::ConfigInvalid(format!("router matcher host regex '{v}': {e}"))
            })?));
        }
        if let Some(v) = &cfg.agent {
            filters.push(Filter::Agent(Regex::new(v).map_err(|e| {
                AppError::ConfigInvalid(format!("router matcher agent regex '{v}': {e}"))
            })?));
        }
        filters.sort_by_key(Filter::priority);
        Ok(Matcher { filters })
    }

    fn is_match(&self, request: &Request) -> bool {
        self.filters.iter().all(|f| f.matches(request))
    }
}

enum Flow {
    Sequence(Vec<Flow>),
    /// Empty `matchers` never matches (spec §9, resolved open question).
    Match { matchers: Vec<Matcher>, subflow: Vec<Flow> },
    Dispatch(String),
}

impl Flow {
    fn compile(cfg: &FlowConfig) -> Result<Self, AppError> {
        let subflow: Result<Vec<Flow>, AppError> = cfg.subflow.iter().map(Flow::compile).collect();
        let subflow = subflow?;
        Ok(match &cfg.action {
            FlowAction::Sequence => Flow::Sequence(subflow),
            FlowAction::Match { matchers } => {
                let matchers: Result<Vec<Matcher>, AppError> = matchers.iter().map(Matcher::compile).collect();
                Flow::Match {
                    matchers: matchers?,
                    subflow,
                }
            }
            FlowAction::Dispatch { analyzer } => Flow::Dispatch(analyzer.clone()),
        })
    }
}

/// A compiled, stateless flow tree. Built once at startup from
/// [`crate::config::RouterConfig`]. Holds its own name-indexed view of the
/// enabled analyzers so `dispatch` delivers to exactly the named analyzer,
/// never broadcasting to the full set.
pub struct Router {
    root: Flow,
    analyzers: HashMap<String, Arc<dyn Analyzer>>,
}

impl Router {
    pub fn compile(cfg: &crate::config::RouterConfig, analyzers: HashMap<String, Arc<dyn Analyzer>>) -> Result<Self, AppError> {
        Ok(Router {
            root: Flow::compile(&cfg.flow)?,
            analyzers,
        })
    }

    /// Runs the flow tree against a single request, dispatching to analyzers
    /// along the way. Safe to call concurrently.
    pub fn route(&self, request: &Request) {
        run_flow(&self.root, request, &self.analyzers);
    }
}

fn run_flow(flow: &Flow, request: &Request, analyzers: &HashMap<String, Arc<dyn Analyzer>>) {
    match flow {
        Flow::Sequence(subflow) => {
            for f in subflow {
                run_flow(f, request, analyzers);
            }
        }
        Flow::Match { matchers, subflow } => {
            if matchers.iter().any(|m| m.is_match(request)) {
                for f in subflow {
                    run_flow(f, request, analyzers);
                }
            }
        }
        Flow::Dispatch(name) => match analyzers.get(name) {
            Some(analyzer) => {
                if let Err(e) = analyzer.process(request) {
                    error!(analyzer = name, error = %e, "failed to process request");
                }
            }
            None => warn!(analyzer = name, "dispatch to unknown analyzer name"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowAction, FlowConfig, MatcherConfig};
    use chrono::Utc;
    use std::net::IpAddr;

    fn request(status: i32, sent: i64, url: &str) -> Request {
        Request {
            time: Utc::now(),
            client: "10.0.0.1".parse::<IpAddr>().unwrap(),
            server: "10.0.0.2".parse::<IpAddr>().unwrap(),
            method: "GET".into(),
            url: url.into(),
            host: String::new(),
            agent: String::new(),
            status,
            sent,
            duration: chrono::Duration::zero(),
        }
    }

    #[test]
    fn empty_matchers_never_matches() {
        let matchers: Vec<Matcher> = Vec::new();
        assert!(!matchers.iter().any(|m| m.is_match(&request(200, 1, "/x"))));
    }

    #[test]
    fn matcher_is_and_combined() {
        let cfg = MatcherConfig {
            status: Some(200),
            sent_min: Some(1),
            ..Default::default()
        };
        let m = Matcher::compile(&cfg).unwrap();
        assert!(m.is_match(&request(200, 1, "/x")));
        assert!(!m.is_match(&request(404, 1, "/x")));
        assert!(!m.is_match(&request(200, 0, "/x")));
    }

    #[test]
    fn flow_config_compiles_and_routes() {
        let flow = FlowConfig {
            action: FlowAction::Sequence,
            subflow: vec![
                FlowConfig {
                    action: FlowAction::Match {
                        matchers: vec![MatcherConfig {
                            status: Some(200),
                            sent_min: Some(1),
                            ..Default::default()
                        }],
                    },
                    subflow: vec![FlowConfig {
                        action: FlowAction::Dispatch {
                            analyzer: "leaky_bucket".into(),
                        },
                        subflow: vec![],
                    }],
                },
                FlowConfig {
                    action: FlowAction::Match {
                        matchers: vec![MatcherConfig {
                            url: Some(r"\.iso$".into()),
                            ..Default::default()
                        }],
                    },
                    subflow: vec![FlowConfig {
                        action: FlowAction::Dispatch {
                            analyzer: "file_send_ratio".into(),
                        },
                        subflow: vec![],
                    }],
                },
            ],
        };
        let compiled = Flow::compile(&flow).unwrap();
        assert!(matches!(compiled, Flow::Sequence(_)));
    }
}
