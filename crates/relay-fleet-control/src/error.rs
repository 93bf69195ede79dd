//! Error types for fleet orchestration.
//!
//! This module defines all errors that can occur while adding, editing,
//! deleting and batch-operating on nodes.

use relay_fleet_core::{NodeIp, RoleTag};
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested node is not registered.
    #[error("node not found: {0}")]
    NodeNotFound(NodeIp),

    /// Another node already uses this IP.
    #[error("node already exists: {0}")]
    NodeExists(NodeIp),

    /// The role tag has no profile.
    #[error("role not found: {0}")]
    RoleNotFound(RoleTag),

    /// A collaborator the operation needs is not configured.
    #[error("{0} is not configured")]
    NotConfigured(String),

    /// The role's routing key cannot be turned into a descriptor.
    #[error("invalid routing key for role {role}: {reason}")]
    InvalidRoutingKey {
        /// The role whose key is malformed.
        role: RoleTag,
        /// What is wrong with it.
        reason: String,
    },

    /// Writing or removing a node's proxy config failed.
    #[error("proxy config error: {0}")]
    ProxyConfig(String),

    /// A batch request names more nodes than allowed.
    #[error("batch of {got} nodes exceeds the limit of {max}")]
    BatchTooLarge {
        /// Maximum accepted.
        max: usize,
        /// Size requested.
        got: usize,
    },

    /// Role source could not be read.
    #[error("role source error: {0}")]
    RoleSource(String),

    /// Provisioning failed.
    #[error("provisioning failed: {0}")]
    Provision(#[from] relay_fleet_provision::ProvisionError),

    /// DNS update failed.
    #[error("DNS update failed: {0}")]
    Dns(#[from] relay_fleet_dns::DnsError),

    /// Registry error.
    #[error("registry error: {0}")]
    Store(#[from] relay_fleet_store::StoreError),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NodeNotFound(_) | Self::RoleNotFound(_) => 404,
            Self::NodeExists(_) => 409,
            Self::InvalidRoutingKey { .. } | Self::BatchTooLarge { .. } => 400,
            Self::NotConfigured(_) => 503,
            Self::Provision(_) | Self::Dns(_) | Self::RoleSource(_) => 502,
            Self::ProxyConfig(_) | Self::Store(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Provision(e) => e.is_retriable(),
            Self::Dns(e) => e.is_retriable(),
            Self::RoleSource(_) | Self::ProxyConfig(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_fleet_dns::DnsError;
    use relay_fleet_provision::ProvisionError;

    #[test]
    fn error_status_codes() {
        let ip = NodeIp::parse("10.0.0.5").unwrap();
        let role = RoleTag::new("eu-1").unwrap();

        assert_eq!(ControlError::NodeNotFound(ip).http_status_code(), 404);
        assert_eq!(ControlError::RoleNotFound(role).http_status_code(), 404);
        assert_eq!(ControlError::NodeExists(ip).http_status_code(), 409);
        assert_eq!(
            ControlError::BatchTooLarge { max: 50, got: 51 }.http_status_code(),
            400
        );
        assert_eq!(
            ControlError::NotConfigured("DNS provider".into()).http_status_code(),
            503
        );
    }

    #[test]
    fn retriable_follows_source() {
        let transient = ControlError::Dns(DnsError::Transport("reset".into()));
        let fatal = ControlError::Dns(DnsError::ZoneNotFound("example.com".into()));
        assert!(transient.is_retriable());
        assert!(!fatal.is_retriable());

        let failed = ControlError::Provision(ProvisionError::ScriptFailed {
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".into(),
        });
        assert!(!failed.is_retriable());
    }

    #[test]
    fn not_configured_message_is_distinct() {
        let msg = ControlError::NotConfigured("DNS provider".into()).to_string();
        assert_eq!(msg, "DNS provider is not configured");
    }
}
