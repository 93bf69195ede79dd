//! In-memory metrics source and alert sink for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_fleet_core::NodeIp;

use crate::error::{MonitorError, Result};
use crate::metrics::{MetricsSource, NodeStatus, StatusSample};
use crate::notify::{Alert, AlertSink};

/// Returns whatever status was last set for each node.
///
/// Nodes with no status set sample as unknown.
#[derive(Default)]
pub struct StaticMetricsSource {
    statuses: Mutex<HashMap<NodeIp, NodeStatus>>,
    failing: Mutex<Vec<NodeIp>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl StaticMetricsSource {
    /// Create a source with no statuses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status reported for `ip`.
    pub fn set(&self, ip: NodeIp, status: NodeStatus) {
        self.failing.lock().retain(|i| *i != ip);
        self.statuses.lock().insert(ip, status);
    }

    /// Make sampling `ip` return an error.
    pub fn fail(&self, ip: NodeIp) {
        self.failing.lock().push(ip);
    }

    /// Delay every sample.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of samples taken.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn sample(&self, ip: &NodeIp) -> Result<StatusSample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(ip) {
            return Err(MonitorError::Metrics("endpoint unavailable".to_string()));
        }
        let status = self
            .statuses
            .lock()
            .get(ip)
            .copied()
            .unwrap_or(NodeStatus::Unknown);
        Ok(StatusSample {
            status,
            latency_ms: None,
        })
    }
}

/// Records delivered alerts and can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Alert>>,
    fail_remaining: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` delivery attempts.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Alerts delivered so far.
    #[must_use]
    pub fn delivered(&self) -> Vec<Alert> {
        self.delivered.lock().clone()
    }

    /// Delivery attempts so far, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MonitorError::Delivery {
                sink: self.name(),
                message: "sink unavailable".to_string(),
            });
        }
        self.delivered.lock().push(alert.clone());
        Ok(())
    }
}
