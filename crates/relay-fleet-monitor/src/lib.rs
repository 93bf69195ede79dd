//! Health monitoring for relay-fleet nodes.
//!
//! Once per tick the [`HealthMonitor`] samples every registered node from a
//! [`MetricsSource`], feeds the sample through the [`evaluate`] state
//! machine, appends the resulting status events to the registry, and hands
//! alerts to the [`NotificationDispatcher`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_fleet_monitor::{
//!     notify, HealthMonitor, HttpMetricsSource, MetricsConfig, MonitorConfig, NotifyConfig,
//! };
//! use relay_fleet_store::RocksRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(RocksRegistry::open("/tmp/relay-fleet-db")?);
//! let metrics = Arc::new(HttpMetricsSource::new(MetricsConfig::default())?);
//! let (queue, dispatcher) = notify::channel(Vec::new(), NotifyConfig::default());
//!
//! let monitor = HealthMonitor::new(registry, metrics, queue, MonitorConfig::default());
//! let summary = monitor.tick().await?;
//! println!("{} nodes evaluated", summary.evaluated);
//! # drop(dispatcher);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{MonitorError, Result};
pub use metrics::{
    parse_sample, HttpMetricsSource, MetricsConfig, MetricsSource, NodeStatus, StatusSample,
};
pub use monitor::{HealthMonitor, MonitorConfig, TickSummary};
pub use notify::{
    Alert, AlertKind, AlertSink, NotificationDispatcher, NotificationQueue, NotifyConfig,
    TelegramConfig, TelegramSink, WebhookSink,
};
pub use state::{evaluate, HealthState, Transition};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{RecordingSink, StaticMetricsSource};
