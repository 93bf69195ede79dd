//! Error types for remote provisioning.

use std::time::Duration;

use relay_fleet_core::{NodeIp, ScriptName};
use thiserror::Error;

/// A result type using `ProvisionError`.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that can occur while provisioning a node.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The reachability probe failed; no connection was attempted.
    #[error("server {ip} is not reachable: {detail}")]
    Unreachable {
        /// The node that was probed.
        ip: NodeIp,
        /// Categorized probe detail.
        detail: String,
    },

    /// The script does not exist in the local scripts directory.
    #[error("script '{script}' not found in {dir}")]
    ScriptNotFound {
        /// The requested script.
        script: ScriptName,
        /// The directory that was searched.
        dir: String,
    },

    /// The remote-shell session could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Uploading the script failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The session dropped while a command was running.
    #[error("command failed: {0}")]
    Execution(String),

    /// The script exceeded its wall-clock limit.
    #[error("script timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The script ran and exited non-zero.
    #[error("script execution failed with exit code {exit_code}\nSTDERR: {stderr}\nSTDOUT: {stdout}")]
    ScriptFailed {
        /// The remote exit status.
        exit_code: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
}

impl ProvisionError {
    /// Returns true for transport-class failures that are worth retrying.
    ///
    /// Precondition failures, script failures and exec timeouts are final: a
    /// timed-out script may already have changed the node.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Transfer(_) | Self::Execution(_)
        )
    }
}
