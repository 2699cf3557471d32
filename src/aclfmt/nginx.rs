// src/aclfmt/nginx.rs

//! nginx-compatible ACL formatter: one `deny` line per banned rule, one
//! `limit_rate` line per rate-limited rule, each carrying its blame as a
//! trailing comment. Intended to be `include`d from an nginx `server` or
//! `location` block.

use super::Formatter;
use crate::core::dto::Rule;
use crate::core::errors::AppError;
use std::io::Write;

pub struct NginxFormatter;

/// Blame text becomes a trailing single-line comment; any embedded newline
/// would otherwise let one rule's blame break the line for rules after it.
fn sanitize_comment(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}

impl Formatter for NginxFormatter {
    fn marshal(&self, rules: &[Rule], w: &mut dyn Write) -> Result<(), AppError> {
        for rule in rules {
            let blame = sanitize_comment(&rule.blame);
            if rule.banned {
                writeln!(w, "deny {}; # {}", rule.prefix, blame)
            } else {
                writeln!(
                    w,
                    "limit_rate {} {}; # {}",
                    rule.prefix,
                    bytesize::ByteSize::b(rule.rate_limit.max(0) as u64),
                    blame
                )
            }
            .map_err(|e| AppError::StorageError(format!("failed to write ACL line: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(banned: bool, rate_limit: i64, blame: &str) -> Rule {
        Rule {
            prefix: "10.0.0.0/24".parse().unwrap(),
            banned,
            rate_limit,
            blame: blame.to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn writes_deny_line_for_banned_rule() {
        let mut buf = Vec::new();
        NginxFormatter
            .marshal(&[rule(true, 0, "manual ban")], &mut buf)
            .unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert_eq!(out, "deny 10.0.0.0/24; # manual ban\n");
    }

    #[test]
    fn writes_limit_rate_line_for_rate_limited_rule() {
        let mut buf = Vec::new();
        NginxFormatter
            .marshal(&[rule(false, 100_000, "leaky bucket overflow")], &mut buf)
            .unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.starts_with("limit_rate 10.0.0.0/24 "));
        assert!(out.trim_end().ends_with("; # leaky bucket overflow"));
    }

    #[test]
    fn sanitizes_embedded_newlines_in_blame() {
        let mut buf = Vec::new();
        NginxFormatter
            .marshal(&[rule(true, 0, "line one\nline two")], &mut buf)
            .unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn empty_ruleset_writes_nothing() {
        let mut buf = Vec::new();
        NginxFormatter.marshal(&[], &mut buf).unwrap();
        assert!(buf.is_empty());
    }
}
