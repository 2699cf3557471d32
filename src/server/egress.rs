// src/server/egress.rs

//! ACL writer (spec §4.11, C11): opens the output path with
//! truncate-or-create semantics, runs the configured formatter, then the
//! post-exec command list in order. The write is not rename-atomic by
//! contract; callers that need atomicity point `egress.path` at a staging
//! file and move it in a post-exec hook.

use crate::aclfmt;
use crate::config::{EgressConfig, PostExecConfig};
use crate::core::dto::Rule;
use crate::core::errors::AppError;
use crate::core::metrics;
use std::fs::OpenOptions;
use tokio::process::Command;
use tracing::{error, info};

pub fn write_acl(cfg: &EgressConfig, rules: &[Rule]) -> Result<(), AppError> {
    let formatter = aclfmt::make_formatter(&cfg.format)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&cfg.path)
        .map_err(|e| AppError::StorageError(format!("failed to open ACL output '{}': {e}", cfg.path)))?;

    let single_line = crate::meta::single_line();
    let info = aclfmt::sanitize_info(&single_line);
    use std::io::Write;
    writeln!(file, "# {info}").map_err(|e| AppError::StorageError(format!("failed to write ACL header: {e}")))?;

    formatter.marshal(rules, &mut file)?;
    info!(path = %cfg.path, rules = rules.len(), "ACL file written");
    Ok(())
}

/// Runs post-exec commands in order; a failing command is logged but does
/// not abort the remaining commands or the compile cycle.
pub async fn run_post_exec(commands: &[PostExecConfig]) {
    for hook in commands {
        let mut cmd = Command::new(&hook.cmd);
        cmd.args(&hook.args);
        if let Some(cwd) = &hook.cwd {
            cmd.current_dir(cwd);
        }
        match cmd.status().await {
            Ok(status) if status.success() => {
                info!(cmd = %hook.cmd, "post-exec command succeeded");
            }
            Ok(status) => {
                metrics::POST_EXEC_FAILURES_TOTAL.inc();
                error!(cmd = %hook.cmd, status = %status, "post-exec command exited non-zero");
            }
            Err(e) => {
                metrics::POST_EXEC_FAILURES_TOTAL.inc();
                error!(cmd = %hook.cmd, error = %e, "failed to spawn post-exec command");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration as StdDuration;
    use tempfile::NamedTempFile;

    #[test]
    fn write_acl_produces_header_and_rule_lines() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let cfg = EgressConfig {
            interval: crate::config::Duration(StdDuration::from_secs(60)),
            path: path.clone(),
            format: "nginx".to_string(),
            post_exec: vec![],
        };
        let rules = vec![Rule {
            prefix: "10.0.0.0/24".parse().unwrap(),
            banned: true,
            rate_limit: 0,
            blame: "test".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }];
        write_acl(&cfg, &rules).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# "));
        assert!(contents.contains("deny 10.0.0.0/24;"));
    }
}
