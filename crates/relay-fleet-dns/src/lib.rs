//! DNS record management for relay-fleet.
//!
//! Each node whose role has a DNS binding gets one A record,
//! `<role letter>.<domain>`, in the provider zone for the domain's last two
//! labels.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────┐     ┌──────────────┐
//! │  Orchestration       │────>│ DnsRecordManager │────>│ DnsProvider  │
//! │  (add / edit / del)  │     │ pending + cool-  │     │ (Cloudflare) │
//! └──────────────────────┘     │ down under mutex │     └──────────────┘
//!                              └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_fleet_core::{NodeIp, RoleLetter};
//! use relay_fleet_dns::{CloudflareClient, CloudflareConfig, DnsManagerConfig, DnsRecordManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CloudflareClient::new(CloudflareConfig {
//!     api_token: Some("token".to_string()),
//!     ..CloudflareConfig::default()
//! })?;
//! let manager = DnsRecordManager::new(Arc::new(client), DnsManagerConfig::default());
//!
//! let ip = NodeIp::parse("10.0.0.5")?;
//! let letter = RoleLetter::new("a")?;
//! if let Some(record) = manager.ensure_record(ip, &letter, 120, "example.com").await? {
//!     println!("{} -> {}", record.name, record.ip);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod manager;
pub mod provider;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{DnsError, Result};
pub use manager::{base_domain, DnsManagerConfig, DnsRecordManager, RecordHandle, MAX_TTL, MIN_TTL};
pub use provider::{CloudflareClient, CloudflareConfig, DnsProvider, DnsRecord};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockDnsProvider;
