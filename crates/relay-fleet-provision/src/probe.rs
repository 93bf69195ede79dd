//! TCP reachability probe.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use relay_fleet_core::NodeIp;
use tokio::net::TcpStream;

/// Result of a reachability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Whether a TCP connection could be established.
    pub reachable: bool,
    /// Categorized detail for logs and operator messages.
    pub detail: String,
}

impl ProbeOutcome {
    fn reachable() -> Self {
        Self {
            reachable: true,
            detail: "reachable".to_string(),
        }
    }

    fn unreachable(detail: impl Into<String>) -> Self {
        Self {
            reachable: false,
            detail: detail.into(),
        }
    }
}

/// Checks whether a node's management port accepts connections.
#[async_trait]
pub trait Reachability: Send + Sync {
    /// Probe `ip:port` once. Never fails; errors become `reachable = false`.
    async fn probe(&self, ip: NodeIp, port: u16) -> ProbeOutcome;
}

/// Connect-only TCP probe with a bounded timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// Create a probe with the given connect timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Reachability for TcpProbe {
    async fn probe(&self, ip: NodeIp, port: u16) -> ProbeOutcome {
        let addr = SocketAddr::new(ip.addr(), port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => ProbeOutcome::reachable(),
            Ok(Err(e)) => {
                let detail = match e.kind() {
                    ErrorKind::ConnectionRefused => "connection refused".to_string(),
                    ErrorKind::TimedOut => "connection timed out".to_string(),
                    ErrorKind::AddrNotAvailable => "address not available".to_string(),
                    _ => format!("connect error: {e}"),
                };
                tracing::debug!(ip = %ip, port, detail = %detail, "Probe failed");
                ProbeOutcome::unreachable(detail)
            }
            Err(_) => {
                tracing::debug!(ip = %ip, port, "Probe timed out");
                ProbeOutcome::unreachable(format!(
                    "no response within {}s",
                    self.timeout.as_secs()
                ))
            }
        }
    }
}
