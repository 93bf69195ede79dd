//! Core types and utilities for relay-fleet.
//!
//! This crate provides the foundational types used throughout the relay-fleet workspace:
//!
//! - **Identifiers**: Validated node IPs, role tags, role letters, and script names
//! - **Retry**: An explicit retry policy for fallible async calls
//!
//! # Example
//!
//! ```
//! use relay_fleet_core::{NodeIp, RoleTag};
//!
//! let ip = NodeIp::parse("10.0.0.5").unwrap();
//! let role = RoleTag::new("USA VLESS TCP").unwrap();
//!
//! assert_eq!(ip.to_string(), "10.0.0.5");
//! assert_eq!(role.script_name().as_str(), "usa_vless_tcp.sh");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;
pub mod retry;

pub use ids::{IdError, NodeIp, RoleLetter, RoleTag, ScriptName};
pub use retry::RetryPolicy;
