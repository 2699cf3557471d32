// src/ingress/syslog.rs

//! Syslog ingress (spec §4.9): each supported transport is implemented
//! directly on its `tokio::net` socket type, and a syslog envelope
//! (RFC3164/5424 header) is stripped with a simple heuristic rather than
//! fully parsed (documented in DESIGN.md) — the upstream access-log message
//! is expected to be the trailing JSON object.

use super::Adapter;
use crate::config::SyslogConfig;
use crate::core::errors::AppError;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket, UnixDatagram};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Syslog framing prefixes a priority/timestamp/hostname header before the
/// application message; the message itself starts at the first `{` since
/// every supported log format is a JSON object.
fn strip_envelope(raw: &[u8]) -> &[u8] {
    match raw.iter().position(|&b| b == b'{') {
        Some(idx) => &raw[idx..],
        None => raw,
    }
}

pub struct SyslogAdapter {
    cfg: SyslogConfig,
}

impl SyslogAdapter {
    pub fn new(cfg: SyslogConfig) -> Result<Self, AppError> {
        match cfg.transport.as_str() {
            "tcp" | "udp" | "unixgram" => Ok(Self { cfg }),
            other => Err(AppError::ConfigInvalid(format!("unsupported syslog transport '{other}'"))),
        }
    }

    async fn run_tcp(&self, out: mpsc::Sender<Vec<u8>>, mut shutdown_rx: broadcast::Receiver<()>) {
        let listener = match TcpListener::bind(&self.cfg.listen_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %self.cfg.listen_addr, error = %e, "failed to bind syslog tcp listener");
                return;
            }
        };
        info!(addr = %self.cfg.listen_addr, "syslog tcp listener started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("shutting down syslog tcp listener");
                    return;
                }
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "failed to accept syslog tcp connection");
                            continue;
                        }
                    };
                    let out = out.clone();
                    let mut conn_shutdown = shutdown_rx.resubscribe();
                    tokio::spawn(async move {
                        let mut lines = BufReader::new(socket).lines();
                        loop {
                            tokio::select! {
                                biased;
                                _ = conn_shutdown.recv() => return,
                                line = lines.next_line() => {
                                    match line {
                                        Ok(Some(text)) => {
                                            let msg = strip_envelope(text.as_bytes()).to_vec();
                                            if !msg.is_empty() && out.send(msg).await.is_err() {
                                                return;
                                            }
                                        }
                                        Ok(None) => return,
                                        Err(e) => {
                                            warn!(peer = %peer, error = %e, "syslog tcp connection read failed");
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    });
                }
            }
        }
    }

    async fn run_udp(&self, out: mpsc::Sender<Vec<u8>>, mut shutdown_rx: broadcast::Receiver<()>) {
        let socket = match UdpSocket::bind(&self.cfg.listen_addr).await {
            Ok(s) => s,
            Err(e) => {
                error!(addr = %self.cfg.listen_addr, error = %e, "failed to bind syslog udp socket");
                return;
            }
        };
        info!(addr = %self.cfg.listen_addr, "syslog udp socket started");
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("shutting down syslog udp socket");
                    return;
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, _peer)) => {
                            let msg = strip_envelope(&buf[..n]).to_vec();
                            if !msg.is_empty() && out.send(msg).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "syslog udp recv failed");
                        }
                    }
                }
            }
        }
    }

    async fn run_unixgram(&self, out: mpsc::Sender<Vec<u8>>, mut shutdown_rx: broadcast::Receiver<()>) {
        let _ = std::fs::remove_file(&self.cfg.listen_addr);
        let socket = match UnixDatagram::bind(&self.cfg.listen_addr) {
            Ok(s) => s,
            Err(e) => {
                error!(path = %self.cfg.listen_addr, error = %e, "failed to bind syslog unixgram socket");
                return;
            }
        };
        info!(path = %self.cfg.listen_addr, "syslog unixgram socket started");
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("shutting down syslog unixgram socket");
                    return;
                }
                received = socket.recv(&mut buf) => {
                    match received {
                        Ok(n) => {
                            let msg = strip_envelope(&buf[..n]).to_vec();
                            if !msg.is_empty() && out.send(msg).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "syslog unixgram recv failed");
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Adapter for SyslogAdapter {
    async fn run(self: Box<Self>, out: mpsc::Sender<Vec<u8>>, shutdown_rx: broadcast::Receiver<()>) {
        match self.cfg.transport.as_str() {
            "tcp" => self.run_tcp(out, shutdown_rx).await,
            "udp" => self.run_udp(out, shutdown_rx).await,
            "unixgram" => self.run_unixgram(out, shutdown_rx).await,
            other => error!(transport = other, "unreachable: transport validated at construction"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_envelope_finds_json_after_header() {
        let raw = b"<14>Jan 1 00:00:00 host app: {\"a\":1}";
        assert_eq!(strip_envelope(raw), b"{\"a\":1}");
    }

    #[test]
    fn strip_envelope_passes_through_bare_json() {
        let raw = b"{\"a\":1}";
        assert_eq!(strip_envelope(raw), b"{\"a\":1}");
    }

    #[test]
    fn rejects_unsupported_transport() {
        let cfg = SyslogConfig {
            transport: "quic".into(),
            listen_addr: "0.0.0.0:0".into(),
        };
        assert!(SyslogAdapter::new(cfg).is_err());
    }
}
