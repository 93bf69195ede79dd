//! Settings and result types for orchestration operations.

use std::path::PathBuf;
use std::time::Duration;

use relay_fleet_core::{NodeIp, RetryPolicy, ScriptName};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Most IPs accepted by one add batch.
pub const MAX_ADD_BATCH: usize = 50;

/// Most IPs accepted by one reboot or script batch.
pub const MAX_COMMAND_BATCH: usize = 100;

/// Orchestration settings.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Wait between provisioning and the first health confirmation.
    pub settle_delay: Duration,
    /// Requested worker count for batch operations.
    pub batch_concurrency: usize,
    /// Retry applied to deploys on transport failures.
    pub deploy_retry: RetryPolicy,
    /// TTL for node A records.
    pub dns_ttl: u32,
    /// Script run by reboot batches.
    pub reboot_script: ScriptName,
    /// How often role profiles are re-read.
    pub role_resync_interval: Duration,
    /// Directory the proxy-config target writes to.
    pub proxy_config_dir: PathBuf,
    /// JSON file role profiles are read from, if any.
    pub roles_file: Option<PathBuf>,
}

impl ControlConfig {
    /// Lower bound on batch workers.
    pub const MIN_CONCURRENCY: usize = 5;
    /// Upper bound on batch workers.
    pub const MAX_CONCURRENCY: usize = 20;

    /// Batch worker count, clamped to the accepted range.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.batch_concurrency
            .clamp(Self::MIN_CONCURRENCY, Self::MAX_CONCURRENCY)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(60),
            batch_concurrency: 10,
            deploy_retry: RetryPolicy::default(),
            dns_ttl: 120,
            reboot_script: ScriptName::reboot(),
            role_resync_interval: Duration::from_secs(3600), // 1 hour
            proxy_config_dir: PathBuf::from("proxy-config"),
            roles_file: None,
        }
    }
}

/// Outcome of one IP in a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// The node the result is for.
    pub ip: NodeIp,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Success summary or failure reason.
    pub message: String,
}

impl OperationResult {
    /// A successful result.
    #[must_use]
    pub fn ok(ip: NodeIp, message: impl Into<String>) -> Self {
        Self {
            ip,
            success: true,
            message: message.into(),
        }
    }

    /// A failed result.
    #[must_use]
    pub fn failed(ip: NodeIp, message: impl Into<String>) -> Self {
        Self {
            ip,
            success: false,
            message: message.into(),
        }
    }

    /// Convert an operation outcome into a result entry.
    #[must_use]
    pub fn from_outcome(ip: NodeIp, outcome: Result<String>) -> Self {
        match outcome {
            Ok(message) => Self::ok(ip, message),
            Err(e) => Self::failed(ip, e.to_string()),
        }
    }
}

/// Reject batches larger than `max`.
///
/// # Errors
///
/// Returns `ControlError::BatchTooLarge` if `got` exceeds `max`.
pub const fn check_batch(got: usize, max: usize) -> Result<()> {
    if got > max {
        return Err(ControlError::BatchTooLarge { max, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_is_clamped() {
        let mut config = ControlConfig::default();
        assert_eq!(config.concurrency(), 10);
        config.batch_concurrency = 1;
        assert_eq!(config.concurrency(), 5);
        config.batch_concurrency = 64;
        assert_eq!(config.concurrency(), 20);
    }

    #[test]
    fn batch_limits() {
        assert!(check_batch(50, MAX_ADD_BATCH).is_ok());
        assert!(matches!(
            check_batch(51, MAX_ADD_BATCH),
            Err(ControlError::BatchTooLarge { max: 50, got: 51 })
        ));
    }

    #[test]
    fn result_serializes_flat() {
        let ip = NodeIp::parse("10.0.0.5").unwrap();
        let json = serde_json::to_value(OperationResult::ok(ip, "Node added")).unwrap();
        assert_eq!(json["ip"], "10.0.0.5");
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Node added");
    }
}
