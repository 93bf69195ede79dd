//! Error types for health monitoring and notification delivery.

use relay_fleet_store::StoreError;
use thiserror::Error;

/// A result type using `MonitorError`.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while sampling, evaluating, or notifying.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The metrics endpoint could not be read.
    #[error("metrics unavailable: {0}")]
    Metrics(String),

    /// A sink did not accept an alert.
    #[error("delivery to {sink} failed: {message}")]
    Delivery {
        /// Sink name.
        sink: &'static str,
        /// What went wrong.
        message: String,
    },

    /// An HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Registry access failed.
    #[error("registry error: {0}")]
    Registry(#[from] StoreError),
}

impl MonitorError {
    /// Returns true if the error is transient and the call may be retried.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Metrics(_) | Self::Delivery { .. })
    }
}
