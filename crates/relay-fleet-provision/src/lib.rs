//! Remote provisioning for relay-fleet nodes.
//!
//! This crate deploys named shell scripts to nodes:
//!
//! - **Probe**: a bounded-timeout TCP connect to the node's management port
//! - **Transport**: remote-shell sessions (upload + exec), backed by the system OpenSSH client
//! - **Provisioner**: precondition checks, upload, `chmod +x`, run, and capture
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_fleet_core::{NodeIp, RetryPolicy, ScriptName};
//! use relay_fleet_provision::{OpenSshTransport, ProvisionConfig, Provisioner, TcpProbe};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provisioner = Provisioner::new(
//!     Arc::new(TcpProbe::default()),
//!     Arc::new(OpenSshTransport::default()),
//!     ProvisionConfig::default(),
//! );
//!
//! let ip = NodeIp::parse("10.0.0.5")?;
//! let script = ScriptName::new("reboot.sh")?;
//! let stdout = provisioner
//!     .deploy_with_retry(ip, &script, provisioner.default_exec_timeout(), &RetryPolicy::default())
//!     .await?;
//! println!("{stdout}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod probe;
pub mod provisioner;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{ProvisionError, Result};
pub use probe::{ProbeOutcome, Reachability, TcpProbe};
pub use provisioner::{ProvisionConfig, Provisioner};
pub use transport::{ExecOutput, OpenSshTransport, RemoteSession, RemoteTransport, SshSettings};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockTransport, StaticProbe};
