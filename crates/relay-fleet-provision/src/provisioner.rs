//! Script deployment over a remote-shell session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relay_fleet_core::{NodeIp, RetryPolicy, ScriptName};

use crate::error::{ProvisionError, Result};
use crate::probe::Reachability;
use crate::transport::{RemoteSession, RemoteTransport};

/// Time allowed for housekeeping commands such as `chmod`.
const SHORT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Provisioner settings.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Local directory holding the provisioning scripts.
    pub scripts_dir: PathBuf,
    /// Remote directory scripts are uploaded to.
    pub remote_dir: String,
    /// Management port checked by the reachability probe.
    pub ssh_port: u16,
    /// Default wall-clock limit for a script run.
    pub exec_timeout: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("scripts"),
            remote_dir: "/tmp".to_string(),
            ssh_port: 22,
            exec_timeout: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Uploads and runs named scripts on nodes.
///
/// The provisioner holds no per-call state; callers bound how many deploys
/// run at once.
pub struct Provisioner {
    probe: Arc<dyn Reachability>,
    transport: Arc<dyn RemoteTransport>,
    config: ProvisionConfig,
}

impl Provisioner {
    /// Create a provisioner.
    #[must_use]
    pub fn new(
        probe: Arc<dyn Reachability>,
        transport: Arc<dyn RemoteTransport>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            probe,
            transport,
            config,
        }
    }

    /// The configured default script timeout.
    #[must_use]
    pub const fn default_exec_timeout(&self) -> Duration {
        self.config.exec_timeout
    }

    /// Deploy `script` to `ip` and run it once.
    ///
    /// Returns the script's standard output on success.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Unreachable` or `ProvisionError::ScriptNotFound`
    /// without connecting when a precondition fails, a transport error if the
    /// session breaks, or `ProvisionError::ScriptFailed` on a non-zero exit.
    pub async fn deploy(
        &self,
        ip: NodeIp,
        script: &ScriptName,
        exec_timeout: Duration,
    ) -> Result<String> {
        let outcome = self.probe.probe(ip, self.config.ssh_port).await;
        if !outcome.reachable {
            return Err(ProvisionError::Unreachable {
                ip,
                detail: outcome.detail,
            });
        }

        let local = self.config.scripts_dir.join(script.as_str());
        let is_file = tokio::fs::metadata(&local)
            .await
            .is_ok_and(|meta| meta.is_file());
        if !is_file {
            return Err(ProvisionError::ScriptNotFound {
                script: script.clone(),
                dir: self.config.scripts_dir.display().to_string(),
            });
        }

        let mut session = self.transport.open(ip).await?;
        let result = self
            .run_script(session.as_mut(), &local, script, exec_timeout)
            .await;
        session.close().await;

        match &result {
            Ok(_) => tracing::info!(ip = %ip, script = %script, "Script executed successfully"),
            Err(e) => tracing::warn!(
                ip = %ip,
                script = %script,
                error = %e,
                "Script deployment failed"
            ),
        }
        result
    }

    /// Deploy with retries on transport-class failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted or a non-retriable
    /// error occurs.
    pub async fn deploy_with_retry(
        &self,
        ip: NodeIp,
        script: &ScriptName,
        exec_timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<String> {
        policy
            .run(
                move |_| self.deploy(ip, script, exec_timeout),
                ProvisionError::is_retriable,
            )
            .await
    }

    async fn run_script(
        &self,
        session: &mut dyn RemoteSession,
        local: &std::path::Path,
        script: &ScriptName,
        exec_timeout: Duration,
    ) -> Result<String> {
        let remote_path = format!("{}/{script}", self.config.remote_dir.trim_end_matches('/'));
        session.upload(local, &remote_path).await?;

        let chmod = session
            .exec(&format!("chmod +x {remote_path}"), SHORT_COMMAND_TIMEOUT)
            .await?;
        check_exit(chmod.exit_code, chmod.stdout, chmod.stderr)?;

        let run = session
            .exec(&format!("bash {remote_path}"), exec_timeout)
            .await?;
        check_exit(run.exit_code, run.stdout, run.stderr)
    }
}

fn check_exit(exit_code: Option<i32>, stdout: String, stderr: String) -> Result<String> {
    match exit_code {
        Some(0) => Ok(stdout),
        Some(code) => Err(ProvisionError::ScriptFailed {
            exit_code: code,
            stdout,
            stderr,
        }),
        None => Err(ProvisionError::Execution(
            "remote command terminated by signal".to_string(),
        )),
    }
}
