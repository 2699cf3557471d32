// src/parser/mod.rs

//! Log-line parsers: turn a raw ingress line into a [`crate::core::dto::Request`].
//! A single format is implemented today (`nginxjson`); the trait exists so a
//! new format is a new module, not a change to ingress.

mod nginxjson;

use crate::core::dto::Request;
use crate::core::errors::AppError;

pub use nginxjson::NginxJsonParser;

pub trait Parser: Send + Sync {
    fn parse(&self, line: &[u8]) -> Result<Request, AppError>;
}

/// Builds the configured parser. `format` is validated at config load time,
/// so an unsupported value here means validation was bypassed.
pub fn make_parser(format: &str) -> Result<Box<dyn Parser>, AppError> {
    match format {
        "nginxjson" => Ok(Box::new(NginxJsonParser)),
        other => Err(AppError::ConfigInvalid(format!(
            "unsupported ingress log format '{other}'"
        ))),
    }
}
