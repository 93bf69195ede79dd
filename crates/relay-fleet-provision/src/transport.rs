//! Remote execution transport.
//!
//! The provisioner talks to nodes through [`RemoteTransport`], which opens a
//! [`RemoteSession`] supporting file upload and command execution. The shipped
//! implementation drives the system OpenSSH client (`ssh`/`scp`) with a shared
//! control socket, so one `open` establishes the connection that later uploads
//! and commands reuse.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use relay_fleet_core::NodeIp;
use tokio::process::Command;

use crate::error::{ProvisionError, Result};

/// OpenSSH exits with 255 when the failure is in ssh itself rather than the remote command.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Exit status, `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

/// Opens remote-shell sessions to nodes.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Connect to the node and authenticate.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Connection` if the session cannot be established.
    async fn open(&self, ip: NodeIp) -> Result<Box<dyn RemoteSession>>;
}

/// An established remote-shell session.
#[async_trait]
pub trait RemoteSession: Send {
    /// Copy a local file to `remote_path` on the node.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Transfer` on failure.
    async fn upload(&mut self, local: &Path, remote_path: &str) -> Result<()>;

    /// Run a shell command with a wall-clock limit.
    ///
    /// A non-zero exit status is returned in `ExecOutput`, not as an error.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::Execution` if the session drops and
    /// `ProvisionError::Timeout` if the limit is exceeded.
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput>;

    /// Tear down the session. Errors are logged, not returned.
    async fn close(self: Box<Self>);
}

/// Settings for the OpenSSH-client transport.
#[derive(Debug, Clone)]
pub struct SshSettings {
    /// Remote login user.
    pub user: String,
    /// Private key passed with `-i`, if any.
    pub key_path: Option<PathBuf>,
    /// Remote SSH port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Directory for control sockets.
    pub control_dir: PathBuf,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            key_path: None,
            port: 22,
            connect_timeout: Duration::from_secs(30),
            control_dir: std::env::temp_dir(),
        }
    }
}

impl SshSettings {
    /// Options shared by `ssh` and `scp`.
    fn common_options(&self, ip: NodeIp) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!(
                "ControlPath={}",
                self.control_dir
                    .join(format!("relay-fleet-{ip}-{}.sock", self.port))
                    .display()
            ),
            "-o".to_string(),
            "ControlPersist=120".to_string(),
        ];
        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    /// Arguments for running `command` over `ssh`.
    #[must_use]
    pub fn ssh_args(&self, ip: NodeIp, command: &str) -> Vec<String> {
        let mut args = self.common_options(ip);
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args.push(self.destination(ip));
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }

    /// Arguments for copying `local` to `remote_path` over `scp`.
    #[must_use]
    pub fn scp_args(&self, ip: NodeIp, local: &Path, remote_path: &str) -> Vec<String> {
        let mut args = self.common_options(ip);
        args.push("-P".to_string());
        args.push(self.port.to_string());
        args.push(local.display().to_string());
        args.push(format!("{}:{remote_path}", self.scp_destination(ip)));
        args
    }

    fn destination(&self, ip: NodeIp) -> String {
        format!("{}@{ip}", self.user)
    }

    /// `scp` needs IPv6 literals bracketed to tell them apart from the path separator.
    fn scp_destination(&self, ip: NodeIp) -> String {
        match ip.addr() {
            std::net::IpAddr::V4(v4) => format!("{}@{v4}", self.user),
            std::net::IpAddr::V6(v6) => format!("{}@[{v6}]", self.user),
        }
    }
}

/// Transport backed by the system OpenSSH client.
#[derive(Debug, Clone, Default)]
pub struct OpenSshTransport {
    settings: SshSettings,
}

impl OpenSshTransport {
    /// Create a transport with the given settings.
    #[must_use]
    pub const fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

/// Run a client process to completion with a deadline; the child is killed if it overruns.
async fn run_client(
    program: &str,
    args: &[String],
    limit: Duration,
) -> Result<Option<ExecOutput>> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| ProvisionError::Connection(format!("failed to spawn {program}: {e}")))?;

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(out)) => Ok(Some(ExecOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code: out.status.code(),
        })),
        Ok(Err(e)) => Err(ProvisionError::Execution(format!("{program} wait error: {e}"))),
        Err(_) => Ok(None),
    }
}

#[async_trait]
impl RemoteTransport for OpenSshTransport {
    async fn open(&self, ip: NodeIp) -> Result<Box<dyn RemoteSession>> {
        let args = self.settings.ssh_args(ip, "true");
        // Allow a little slack over ssh's own ConnectTimeout.
        let limit = self.settings.connect_timeout + Duration::from_secs(5);

        match run_client("ssh", &args, limit).await? {
            Some(out) if out.exit_code == Some(0) => {
                tracing::debug!(ip = %ip, "SSH session established");
                Ok(Box::new(OpenSshSession {
                    ip,
                    settings: self.settings.clone(),
                }))
            }
            Some(out) => Err(ProvisionError::Connection(out.stderr.trim().to_string())),
            None => Err(ProvisionError::Connection(format!(
                "timed out after {}s",
                limit.as_secs()
            ))),
        }
    }
}

/// A session multiplexed over an OpenSSH control socket.
struct OpenSshSession {
    ip: NodeIp,
    settings: SshSettings,
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn upload(&mut self, local: &Path, remote_path: &str) -> Result<()> {
        let args = self.settings.scp_args(self.ip, local, remote_path);
        let limit = self.settings.connect_timeout * 2;
        let out = run_client("scp", &args, limit)
            .await
            .map_err(|e| ProvisionError::Transfer(e.to_string()))?
            .ok_or_else(|| {
                ProvisionError::Transfer(format!("upload timed out after {}s", limit.as_secs()))
            })?;

        if out.exit_code == Some(0) {
            Ok(())
        } else {
            Err(ProvisionError::Transfer(out.stderr.trim().to_string()))
        }
    }

    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        let args = self.settings.ssh_args(self.ip, command);
        let out = run_client("ssh", &args, timeout)
            .await?
            .ok_or(ProvisionError::Timeout(timeout))?;

        if out.exit_code != Some(SSH_TRANSPORT_FAILURE) {
            return Ok(out);
        }
        let master_alive = self.control("check").await;
        if master_alive {
            tracing::debug!(ip = %self.ip, "Remote command itself exited with 255");
        }
        classify_exit(out, master_alive)
    }

    async fn close(self: Box<Self>) {
        self.control("exit").await;
    }
}

impl OpenSshSession {
    /// Send a control command (`check`, `exit`) to the master connection.
    /// True if ssh reported success.
    async fn control(&self, op: &str) -> bool {
        let mut args = self.settings.common_options(self.ip);
        args.extend([
            "-O".to_string(),
            op.to_string(),
            self.settings.destination(self.ip),
        ]);
        match run_client("ssh", &args, Duration::from_secs(5)).await {
            Ok(Some(out)) => out.exit_code == Some(0),
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(ip = %self.ip, op, error = %e, "SSH control command failed");
                false
            }
        }
    }
}

/// Decide what an exit status of 255 means.
///
/// OpenSSH uses 255 for its own failures, but a remote command may exit with
/// it too. With the master connection still up the status belongs to the
/// command and is returned as output.
fn classify_exit(out: ExecOutput, master_alive: bool) -> Result<ExecOutput> {
    if out.exit_code == Some(SSH_TRANSPORT_FAILURE) && !master_alive {
        return Err(ProvisionError::Execution(format!(
            "session lost: {}",
            out.stderr.trim()
        )));
    }
    Ok(out)
}
