//! Orchestration of relay node lifecycles.
//!
//! This crate sequences the per-node workflows (add, register, edit, delete,
//! batch reboot and script runs) across the provisioner, the registry, the
//! DNS record manager, the proxy config target and the health monitor.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Operator surface                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     NodeOrchestrator                        │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Node      │ │   Batch     │ │    Confirmation     │    │
//! │  │   CRUD      │ │   Ops       │ │    Scheduling       │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌──────────────┬──────┴───────┬──────────────┐
//!        ▼              ▼              ▼              ▼
//!  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!  │Provision │   │ Registry │   │   DNS    │   │ Monitor  │
//!  │  (SSH)   │   │ (RocksDB)│   │(Provider)│   │ (Alerts) │
//!  └──────────┘   └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_fleet_control::{ControlConfig, DirectoryConfigTarget, FleetControl, NodeOrchestrator};
//! use relay_fleet_core::{NodeIp, RoleTag};
//! use relay_fleet_monitor::{notify, HealthMonitor, HttpMetricsSource, MetricsConfig, MonitorConfig, NotifyConfig};
//! use relay_fleet_provision::{OpenSshTransport, ProvisionConfig, Provisioner, SshSettings, TcpProbe};
//! use relay_fleet_store::RocksRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(RocksRegistry::open("/tmp/relay-fleet")?);
//! let provisioner = Arc::new(Provisioner::new(
//!     Arc::new(TcpProbe::default()),
//!     Arc::new(OpenSshTransport::new(SshSettings::default())),
//!     ProvisionConfig::default(),
//! ));
//! let (queue, _dispatcher) = notify::channel(Vec::new(), NotifyConfig::default());
//! let monitor = Arc::new(HealthMonitor::new(
//!     Arc::clone(&registry),
//!     Arc::new(HttpMetricsSource::new(MetricsConfig::default())?),
//!     queue,
//!     MonitorConfig::default(),
//! ));
//!
//! let fleet = NodeOrchestrator::new(
//!     registry,
//!     provisioner,
//!     None,
//!     monitor,
//!     Arc::new(DirectoryConfigTarget::new("/tmp/outbounds")),
//!     ControlConfig::default(),
//! );
//!
//! let node = fleet
//!     .add_node(NodeIp::parse("10.0.0.5")?, &RoleTag::new("us-1")?)
//!     .await?;
//! println!("Added node {}", node.ip);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod proxy_config;
pub mod resync;
pub mod routing;
pub mod service;
pub mod types;

pub use config::FleetConfig;
pub use error::{ControlError, Result};
pub use proxy_config::{DirectoryConfigTarget, ProxyConfigTarget};
pub use resync::{run_role_resync, sync_roles, JsonFileRoleSource, RoleSource};
pub use routing::{build_descriptor, descriptor_for, VlessKey};
pub use service::{FleetControl, NodeOrchestrator};
pub use types::{ControlConfig, OperationResult, MAX_ADD_BATCH, MAX_COMMAND_BATCH};

// Re-export commonly used types from dependencies for convenience
pub use relay_fleet_core::{NodeIp, RoleTag, ScriptName};
pub use relay_fleet_store::{Node, RoleProfile, StatusEvent};
