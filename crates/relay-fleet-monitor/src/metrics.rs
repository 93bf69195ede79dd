//! Node status samples from a text-exposition metrics endpoint.
//!
//! The endpoint exposes one line per relay target, e.g.
//!
//! ```text
//! relay_up{address="10.0.0.5:443",tag="eu-1"} 1
//! relay_latency_ms{address="10.0.0.5:443"} 41.5
//! ```
//!
//! A `1` means online and `0` offline. A missing line, or any other value,
//! means unknown.

use std::time::Duration;

use async_trait::async_trait;
use relay_fleet_core::NodeIp;
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Observed status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// The status metric reported `1`.
    Online,
    /// The status metric reported `0`.
    Offline,
    /// No usable sample.
    Unknown,
}

impl NodeStatus {
    /// Online is "up"; offline and unknown are both "down".
    #[must_use]
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// One sample for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSample {
    /// Derived status.
    pub status: NodeStatus,
    /// Companion latency reading, if exposed.
    pub latency_ms: Option<f64>,
}

impl StatusSample {
    /// A sample carrying no information.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            status: NodeStatus::Unknown,
            latency_ms: None,
        }
    }
}

/// Source of per-node status samples.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Sample one node.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics endpoint cannot be read. Callers map
    /// errors to [`NodeStatus::Unknown`].
    async fn sample(&self, ip: &NodeIp) -> Result<StatusSample>;
}

/// Where to read metrics and which series to look at.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Endpoint URL. A literal `{ip}` is replaced with the node address.
    pub endpoint: String,
    /// Name of the 0/1 status metric.
    pub status_metric: String,
    /// Name of the latency metric, if any.
    pub latency_metric: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9100/metrics".to_string(),
            status_metric: "relay_up".to_string(),
            latency_metric: Some("relay_latency_ms".to_string()),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Reads samples over HTTP.
pub struct HttpMetricsSource {
    config: MetricsConfig,
    client: reqwest::Client,
}

impl HttpMetricsSource {
    /// Create a new source.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Http` if the HTTP client cannot be built.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MonitorError::Http(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn sample(&self, ip: &NodeIp) -> Result<StatusSample> {
        let url = self.config.endpoint.replace("{ip}", &ip.to_string());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MonitorError::Metrics(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Metrics(format!("HTTP {status} from {url}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| MonitorError::Metrics(e.to_string()))?;

        Ok(parse_sample(
            &body,
            &self.config.status_metric,
            self.config.latency_metric.as_deref(),
            ip,
        ))
    }
}

/// Extract the sample for `ip` from an exposition body.
///
/// When several lines match, the last one wins.
#[must_use]
pub fn parse_sample(
    text: &str,
    status_metric: &str,
    latency_metric: Option<&str>,
    ip: &NodeIp,
) -> StatusSample {
    let mut sample = StatusSample::unknown();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, labels, value)) = split_line(line) else {
            continue;
        };
        if !label_value(labels, "address").is_some_and(|addr| address_matches(addr, ip)) {
            continue;
        }

        if name == status_metric {
            sample.status = match value {
                "1" | "1.0" => NodeStatus::Online,
                "0" | "0.0" => NodeStatus::Offline,
                _ => NodeStatus::Unknown,
            };
        } else if Some(name) == latency_metric {
            sample.latency_ms = value.parse().ok();
        }
    }

    sample
}

/// Split `name{labels} value [timestamp]`.
fn split_line(line: &str) -> Option<(&str, &str, &str)> {
    let open = line.find('{')?;
    let close = open + line[open..].find('}')?;
    let name = line[..open].trim();
    let labels = &line[open + 1..close];
    let value = line[close + 1..].split_whitespace().next()?;
    Some((name, labels, value))
}

fn label_value<'a>(labels: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("{key}=\"");
    let mut rest = labels;
    loop {
        let start = rest.find(&needle)?;
        // Reject matches inside a longer label name such as `remote_address`.
        let boundary = start == 0 || matches!(rest.as_bytes()[start - 1], b',' | b' ');
        let after = &rest[start + needle.len()..];
        if boundary {
            let end = after.find('"')?;
            return Some(&after[..end]);
        }
        rest = after;
    }
}

/// Compare an `host:port` label value against a node address.
fn address_matches(address: &str, ip: &NodeIp) -> bool {
    let host = address
        .rsplit_once(':')
        .filter(|(host, port)| !host.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
        .map_or(address, |(host, _)| host);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    NodeIp::parse(host).is_ok_and(|parsed| parsed == *ip)
}
