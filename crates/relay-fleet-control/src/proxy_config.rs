//! Where per-node routing descriptors are published.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relay_fleet_core::NodeIp;
use serde_json::Value;

use crate::error::{ControlError, Result};

/// Destination for per-node outbound descriptors.
#[async_trait]
pub trait ProxyConfigTarget: Send + Sync {
    /// Publish the descriptor for `ip`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ProxyConfig` if the write fails.
    async fn push(&self, ip: NodeIp, descriptor: &Value) -> Result<()>;

    /// Remove the descriptor for `ip`. Removing a missing descriptor succeeds.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ProxyConfig` if the removal fails.
    async fn remove(&self, ip: NodeIp) -> Result<()>;
}

/// Writes one `<ip>.json` file per node into a directory.
///
/// Files are written to a temporary name and renamed into place, so readers
/// never observe a partial document.
pub struct DirectoryConfigTarget {
    dir: PathBuf,
}

impl DirectoryConfigTarget {
    /// Create a target writing into `dir`. The directory is created on first push.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the descriptor for `ip`.
    #[must_use]
    pub fn path_for(&self, ip: NodeIp) -> PathBuf {
        self.dir.join(format!("{ip}.json"))
    }
}

fn io_err(path: &Path, e: &std::io::Error) -> ControlError {
    ControlError::ProxyConfig(format!("{}: {e}", path.display()))
}

#[async_trait]
impl ProxyConfigTarget for DirectoryConfigTarget {
    async fn push(&self, ip: NodeIp, descriptor: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err(&self.dir, &e))?;

        let body = serde_json::to_vec_pretty(descriptor)
            .map_err(|e| ControlError::ProxyConfig(e.to_string()))?;
        let path = self.path_for(ip);
        let tmp = self.dir.join(format!(".{ip}.json.tmp"));

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| io_err(&tmp, &e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(&path, &e))?;

        tracing::debug!(ip = %ip, path = %path.display(), "Proxy config written");
        Ok(())
    }

    async fn remove(&self, ip: NodeIp) -> Result<()> {
        let path = self.path_for(ip);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(ip = %ip, path = %path.display(), "Proxy config removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, &e)),
        }
    }
}
