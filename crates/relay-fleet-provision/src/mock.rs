//! In-memory probe and transport for testing without real nodes.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_fleet_core::NodeIp;

use crate::error::{ProvisionError, Result};
use crate::probe::{ProbeOutcome, Reachability};
use crate::transport::{ExecOutput, RemoteSession, RemoteTransport};

/// A probe that answers from a fixed set of unreachable IPs.
#[derive(Default)]
pub struct StaticProbe {
    unreachable: Mutex<HashSet<NodeIp>>,
    calls: AtomicUsize,
}

impl StaticProbe {
    /// Create a probe that reports every node reachable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a node as unreachable.
    pub fn set_unreachable(&self, ip: NodeIp) {
        self.unreachable.lock().insert(ip);
    }

    /// Number of probes performed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reachability for StaticProbe {
    async fn probe(&self, ip: NodeIp, _port: u16) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().contains(&ip) {
            ProbeOutcome {
                reachable: false,
                detail: "connection refused".to_string(),
            }
        } else {
            ProbeOutcome {
                reachable: true,
                detail: "reachable".to_string(),
            }
        }
    }
}

#[derive(Default)]
struct MockState {
    opens: AtomicUsize,
    failing_opens: AtomicU32,
    uploads: Mutex<Vec<(NodeIp, String)>>,
    commands: Mutex<Vec<(NodeIp, String)>>,
    results: Mutex<HashMap<NodeIp, ExecOutput>>,
    exec_delay: Mutex<Option<Duration>>,
    // Open sessions per node, and the highest count seen for any node.
    active: Mutex<HashMap<NodeIp, usize>>,
    max_active: AtomicUsize,
}

/// A transport that records every call and returns scripted results.
#[derive(Default, Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Create a transport where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `open` fail with a connection error.
    pub fn fail_next_opens(&self, n: u32) {
        self.state.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Make scripts on `ip` exit with `exit_code`.
    pub fn set_exit_code(&self, ip: NodeIp, exit_code: i32, stderr: &str) {
        self.state.results.lock().insert(
            ip,
            ExecOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code: Some(exit_code),
            },
        );
    }

    /// Delay every command by `delay`.
    pub fn set_exec_delay(&self, delay: Duration) {
        *self.state.exec_delay.lock() = Some(delay);
    }

    /// Most sessions ever open at once to a single node.
    #[must_use]
    pub fn max_sessions_per_node(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    /// Number of sessions opened (including failed attempts).
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Uploaded remote paths, in order.
    #[must_use]
    pub fn uploads(&self) -> Vec<(NodeIp, String)> {
        self.state.uploads.lock().clone()
    }

    /// Executed commands, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<(NodeIp, String)> {
        self.state.commands.lock().clone()
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn open(&self, ip: NodeIp) -> Result<Box<dyn RemoteSession>> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self.state.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(ProvisionError::Connection("connection reset by peer".into()));
        }
        let open = {
            let mut active = self.state.active.lock();
            let count = active.entry(ip).or_insert(0);
            *count += 1;
            *count
        };
        self.state.max_active.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            ip,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    ip: NodeIp,
    state: Arc<MockState>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn upload(&mut self, _local: &Path, remote_path: &str) -> Result<()> {
        self.state
            .uploads
            .lock()
            .push((self.ip, remote_path.to_string()));
        Ok(())
    }

    async fn exec(&mut self, command: &str, _timeout: Duration) -> Result<ExecOutput> {
        self.state
            .commands
            .lock()
            .push((self.ip, command.to_string()));
        let delay = *self.state.exec_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.state.results.lock().get(&self.ip).cloned();
        Ok(match scripted {
            Some(output) if command.starts_with("bash ") => output,
            _ => ExecOutput {
                stdout: "ok".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            },
        })
    }

    async fn close(self: Box<Self>) {}
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if let Some(count) = self.state.active.lock().get_mut(&self.ip) {
            *count = count.saturating_sub(1);
        }
    }
}
