//! Error types for DNS record management.

use thiserror::Error;

/// A result type using `DnsError`.
pub type Result<T> = std::result::Result<T, DnsError>;

/// Provider error codes meaning the record is already present.
const ALREADY_EXISTS_CODES: [i64; 2] = [81057, 81058];

/// Provider error code meaning the record is gone.
const RECORD_MISSING_CODE: i64 = 81044;

/// Errors that can occur during DNS operations.
#[derive(Debug, Error)]
pub enum DnsError {
    /// A required credential or setting is missing.
    #[error("DNS provider is not configured: {0}")]
    NotConfigured(String),

    /// The domain has fewer than two labels.
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    /// TTL outside the accepted range.
    #[error("invalid TTL {0}: must be between 60 and 86400 seconds")]
    InvalidTtl(u32),

    /// No zone in the provider account matches the base domain.
    #[error("zone not found for base domain: {0}")]
    ZoneNotFound(String),

    /// The provider rejected the call.
    #[error("provider error {code}: {message}")]
    Provider {
        /// Provider-specific error code (HTTP status when none is given).
        code: i64,
        /// Provider message.
        message: String,
    },

    /// The request did not complete.
    #[error("provider request failed: {0}")]
    Transport(String),

    /// A record that should exist is absent and the manager is not
    /// recreating it yet.
    #[error("DNS record {0} is missing and its update is deferred")]
    RecordDeferred(String),

    /// The provider answered with something unexpected.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl DnsError {
    /// Returns true if the error is transient and the call may be retried.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RecordDeferred(_))
    }

    /// Returns true if the provider reported the record as already present.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Provider { code, message } => {
                ALREADY_EXISTS_CODES.contains(code)
                    || message.to_ascii_lowercase().contains("already exists")
            }
            _ => false,
        }
    }

    /// Returns true if the provider reported the record as missing.
    #[must_use]
    pub const fn is_record_missing(&self) -> bool {
        matches!(self, Self::Provider { code, .. } if *code == RECORD_MISSING_CODE || *code == 404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_detection() {
        let by_code = DnsError::Provider {
            code: 81057,
            message: "Record already exists.".into(),
        };
        let by_message = DnsError::Provider {
            code: 9999,
            message: "An identical record Already Exists".into(),
        };
        let other = DnsError::Provider {
            code: 9109,
            message: "Invalid access token".into(),
        };

        assert!(by_code.is_already_exists());
        assert!(by_message.is_already_exists());
        assert!(!other.is_already_exists());
        assert!(!DnsError::Transport("reset".into()).is_already_exists());
    }

    #[test]
    fn retriable_classification() {
        assert!(DnsError::Transport("timeout".into()).is_retriable());
        assert!(DnsError::RecordDeferred("a.example.com".into()).is_retriable());
        assert!(!DnsError::ZoneNotFound("example.com".into()).is_retriable());
        assert!(!DnsError::NotConfigured("token".into()).is_retriable());
    }

    #[test]
    fn not_configured_is_distinct_from_call_failure() {
        let msg = DnsError::NotConfigured("CLOUDFLARE_API_TOKEN is not set".into()).to_string();
        assert!(msg.contains("not configured"));
        let msg = DnsError::Transport("connection refused".into()).to_string();
        assert!(msg.contains("request failed"));
    }
}
