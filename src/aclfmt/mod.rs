// src/aclfmt/mod.rs

//! ACL output formatters (spec §4.11, C11). A formatter turns the current
//! rule list into a text stream the upstream server is configured to read.

mod nginx;

use crate::core::dto::Rule;
use crate::core::errors::AppError;
use std::io::Write;

pub use nginx::NginxFormatter;

pub trait Formatter: Send + Sync {
    /// Serializes `rules` to `w`. `info` is a single-line metadata comment;
    /// callers must strip embedded newlines before calling (see
    /// [`sanitize_info`]).
    fn marshal(&self, rules: &[Rule], w: &mut dyn Write) -> Result<(), AppError>;
}

/// A line containing a newline can't be emitted as a single-line comment;
/// such info is dropped rather than corrupting the output.
pub fn sanitize_info(info: &str) -> &str {
    if info.contains('\n') { "" } else { info }
}

pub fn make_formatter(format: &str) -> Result<Box<dyn Formatter>, AppError> {
    match format {
        "nginx" => Ok(Box::new(NginxFormatter)),
        other => Err(AppError::ConfigInvalid(format!("unsupported ACL format '{other}'"))),
    }
}
