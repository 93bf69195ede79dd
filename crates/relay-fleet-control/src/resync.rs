//! Periodic role profile resync.
//!
//! Role profiles come from outside the fleet (a subscription feed exported to
//! a file). Each resync upserts every profile the source yields; profiles
//! missing from the source are kept so existing nodes still resolve.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_fleet_store::{Registry, RoleProfile};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};

/// Source of role profiles.
#[async_trait]
pub trait RoleSource: Send + Sync {
    /// Fetch the current set of profiles.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::RoleSource` if the source cannot be read or parsed.
    async fn fetch(&self) -> Result<Vec<RoleProfile>>;
}

/// Reads a JSON array of profiles from a file.
pub struct JsonFileRoleSource {
    path: PathBuf,
}

impl JsonFileRoleSource {
    /// Create a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RoleSource for JsonFileRoleSource {
    async fn fetch(&self) -> Result<Vec<RoleProfile>> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| ControlError::RoleSource(format!("{}: {e}", self.path.display())))?;
        serde_json::from_slice(&raw)
            .map_err(|e| ControlError::RoleSource(format!("{}: {e}", self.path.display())))
    }
}

/// Fetch profiles and upsert them. Returns how many were written.
///
/// # Errors
///
/// Returns an error if the source fails or a registry write fails.
pub async fn sync_roles<R: Registry>(registry: &R, source: &dyn RoleSource) -> Result<usize> {
    let profiles = source.fetch().await?;
    for profile in &profiles {
        registry.put_role(profile)?;
    }
    Ok(profiles.len())
}

/// Resync on a fixed interval until shutdown is signalled.
///
/// The first resync runs immediately. Failures are logged and retried on the
/// next tick.
pub async fn run_role_resync<R: Registry>(
    registry: Arc<R>,
    source: Arc<dyn RoleSource>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = interval.as_secs(), "Starting role resync");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sync_roles(registry.as_ref(), source.as_ref()).await {
                    Ok(count) => debug!(count, "Role profiles synced"),
                    Err(e) => warn!(error = %e, "Role resync failed, will retry"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Role resync stopped");
}
