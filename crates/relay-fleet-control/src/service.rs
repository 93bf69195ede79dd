//! Orchestration service implementation.
//!
//! This module provides the `FleetControl` trait and the `NodeOrchestrator`
//! implementation that sequences provisioning, proxy config, registry writes,
//! DNS and health-monitor hand-off for every node operation.
//!
//! Operations on the same node are serialized: each one holds that node's
//! lock from its first remote or registry step to its last, so an add, a
//! script run and a delete for one IP never overlap.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use relay_fleet_core::{NodeIp, RoleTag, ScriptName};
use relay_fleet_dns::{DnsError, DnsRecordManager};
use relay_fleet_monitor::HealthMonitor;
use relay_fleet_provision::{ProvisionError, Provisioner};
use relay_fleet_store::{
    DnsBinding, Node, Registry, RoleProfile, StatusEvent, StoreError, MAX_EVENT_LIMIT,
};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};
use crate::proxy_config::ProxyConfigTarget;
use crate::routing;
use crate::types::{check_batch, ControlConfig, OperationResult, MAX_ADD_BATCH, MAX_COMMAND_BATCH};

/// Trait defining the fleet operations.
///
/// Single-node operations return an error on failure. Batch operations
/// always return one [`OperationResult`] per input IP, in input order.
#[async_trait]
pub trait FleetControl: Send + Sync {
    // =========================================================================
    // Node Lifecycle
    // =========================================================================

    /// Provision a node with its role's script and bring it under management.
    ///
    /// Steps: deploy, push routing descriptor, registry upsert, DNS record,
    /// then a delayed health confirmation. A failed step aborts the rest;
    /// earlier steps are not rolled back, and re-running the add is safe.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::RoleNotFound` for an unknown role, or the error
    /// of the step that failed.
    async fn add_node(&self, ip: NodeIp, role: &RoleTag) -> Result<Node>;

    /// Bring an already-installed node under management without deploying.
    ///
    /// # Errors
    ///
    /// Same as [`add_node`](Self::add_node), minus provisioning errors.
    async fn register_node(&self, ip: NodeIp, role: &RoleTag) -> Result<Node>;

    /// Change a node's IP and/or role.
    ///
    /// The old DNS record and proxy config are removed before the new ones
    /// are created. The registry row is replaced in one atomic write.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NodeNotFound` if `old_ip` is unknown,
    /// `ControlError::NodeExists` if `new_ip` belongs to another node.
    async fn edit_node(&self, old_ip: NodeIp, new_ip: NodeIp, role: &RoleTag) -> Result<Node>;

    /// Remove a node.
    ///
    /// The registry row (and its events) goes first; DNS and proxy config
    /// cleanup afterwards is best-effort.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NodeNotFound` if the node is unknown.
    async fn delete_node(&self, ip: NodeIp) -> Result<()>;

    /// List all registered nodes.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    // =========================================================================
    // Batch Operations
    // =========================================================================

    /// Add up to 50 nodes with the same role.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::BatchTooLarge` for oversize requests.
    async fn add_nodes(&self, ips: &[NodeIp], role: &RoleTag) -> Result<Vec<OperationResult>>;

    /// Reboot up to 100 nodes.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::BatchTooLarge` for oversize requests.
    async fn reboot_nodes(&self, ips: &[NodeIp]) -> Result<Vec<OperationResult>>;

    /// Run a script on up to 100 nodes.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::BatchTooLarge` for oversize requests.
    async fn run_script(&self, ips: &[NodeIp], script: &ScriptName)
        -> Result<Vec<OperationResult>>;

    // =========================================================================
    // Queries
    // =========================================================================

    /// Status events from the last `window_hours`, newest first.
    ///
    /// `limit` is clamped to `1..=1000`.
    async fn list_events(
        &self,
        window_hours: u32,
        ip: Option<&NodeIp>,
        limit: usize,
    ) -> Result<Vec<StatusEvent>>;
}

/// The main orchestration service.
pub struct NodeOrchestrator<R: Registry + 'static> {
    registry: Arc<R>,
    provisioner: Arc<Provisioner>,
    dns: Option<Arc<DnsRecordManager>>,
    monitor: Arc<HealthMonitor<R>>,
    proxy_config: Arc<dyn ProxyConfigTarget>,
    confirmations: Mutex<JoinSet<()>>,
    node_locks: Mutex<HashMap<NodeIp, Arc<AsyncMutex<()>>>>,
    config: ControlConfig,
}

impl<R: Registry + 'static> NodeOrchestrator<R> {
    /// Create an orchestrator. Pass `None` for `dns` when no provider is
    /// configured; roles with a DNS binding then fail with `NotConfigured`.
    #[must_use]
    pub fn new(
        registry: Arc<R>,
        provisioner: Arc<Provisioner>,
        dns: Option<Arc<DnsRecordManager>>,
        monitor: Arc<HealthMonitor<R>>,
        proxy_config: Arc<dyn ProxyConfigTarget>,
        config: ControlConfig,
    ) -> Self {
        Self {
            registry,
            provisioner,
            dns,
            monitor,
            proxy_config,
            confirmations: Mutex::new(JoinSet::new()),
            node_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Number of confirmation checks still waiting to run.
    #[must_use]
    pub fn pending_confirmations(&self) -> usize {
        let mut tasks = self.confirmations.lock();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Cancel every pending confirmation check and wait for them to stop.
    pub async fn shutdown(&self) {
        let mut tasks = std::mem::take(&mut *self.confirmations.lock());
        let pending = tasks.len();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        info!(cancelled = pending, "Confirmation checks drained");
    }

    /// Wait for exclusive use of `ip`.
    async fn lock_node(&self, ip: NodeIp) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.node_locks.lock();
            // Entries nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(ip).or_default())
        };
        lock.lock_owned().await
    }

    /// Lock two nodes in address order. Locks once if they are the same.
    async fn lock_pair(
        &self,
        a: NodeIp,
        b: NodeIp,
    ) -> (OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>) {
        if a == b {
            return (self.lock_node(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock_node(first).await;
        let second = self.lock_node(second).await;
        (first, Some(second))
    }

    fn profile(&self, role: &RoleTag) -> Result<RoleProfile> {
        self.registry
            .get_role(role)?
            .ok_or_else(|| ControlError::RoleNotFound(role.clone()))
    }

    fn dns(&self) -> Result<&DnsRecordManager> {
        self.dns
            .as_deref()
            .ok_or_else(|| ControlError::NotConfigured("DNS provider".to_string()))
    }

    /// Everything after provisioning: config, registry, DNS, confirmation.
    async fn activate(&self, ip: NodeIp, profile: &RoleProfile, descriptor: &Value) -> Result<Node> {
        self.proxy_config.push(ip, descriptor).await?;

        let node = match self.registry.get_node(&ip)? {
            Some(existing) => Node {
                role: profile.role.clone(),
                updated_at: Utc::now(),
                ..existing
            },
            None => Node::new(ip, profile.role.clone()),
        };
        self.registry.add_or_update_node(&node)?;

        if let Some(binding) = &profile.dns {
            self.publish_dns(ip, binding).await?;
        }

        self.schedule_confirmation(ip);
        info!(ip = %ip, role = %profile.role, "Node active");
        Ok(node)
    }

    async fn publish_dns(&self, ip: NodeIp, binding: &DnsBinding) -> Result<()> {
        let dns = self.dns()?;
        let record = dns
            .ensure_record(ip, &binding.letter, self.config.dns_ttl, &binding.domain)
            .await?;
        match record {
            Some(record) => debug!(
                ip = %ip,
                name = %record.name,
                record_id = %record.record_id,
                "DNS record ready"
            ),
            // Skipped by the manager; only acceptable if the record is there.
            None => match dns.lookup(ip, &binding.letter, &binding.domain).await? {
                Some(record) => debug!(
                    ip = %ip,
                    name = %record.name,
                    "DNS record present, update skipped"
                ),
                None => {
                    warn!(ip = %ip, name = %binding.record_name(), "DNS record missing during cool-down");
                    return Err(DnsError::RecordDeferred(binding.record_name()).into());
                }
            },
        }
        Ok(())
    }

    /// Delete the node's record for this binding. Returns false if there was none.
    ///
    /// The key's cool-down is cleared either way, so a later publish for the
    /// same node recreates the record.
    async fn retract_dns(&self, ip: NodeIp, binding: &DnsBinding) -> Result<bool> {
        let dns = self.dns()?;
        let record = dns.lookup(ip, &binding.letter, &binding.domain).await?;
        let deleted = match record {
            Some(record) => dns.delete(&record.record_id, &binding.domain).await?,
            None => false,
        };
        dns.release(ip, &binding.domain, &binding.letter);
        Ok(deleted)
    }

    /// Best-effort removal of DNS and proxy config for a deleted node.
    async fn cleanup(&self, ip: NodeIp, role: &RoleTag) {
        match self.registry.get_role(role) {
            Ok(Some(RoleProfile {
                dns: Some(binding), ..
            })) => {
                if let Err(e) = self.retract_dns(ip, &binding).await {
                    warn!(ip = %ip, error = %e, "DNS cleanup failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(ip = %ip, role = %role, error = %e, "Role lookup for cleanup failed"),
        }

        if let Err(e) = self.proxy_config.remove(ip).await {
            warn!(ip = %ip, error = %e, "Proxy config cleanup failed");
        }
    }

    fn schedule_confirmation(&self, ip: NodeIp) {
        self.monitor.mark_new(ip);

        let monitor = Arc::clone(&self.monitor);
        let settle = self.config.settle_delay;
        let mut tasks = self.confirmations.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            tokio::time::sleep(settle).await;
            monitor.confirm(ip).await;
        });
        debug!(ip = %ip, settle_secs = settle.as_secs(), "Confirmation check scheduled");
    }

    /// Run `op` for every IP with bounded concurrency.
    async fn run_batch<F, Fut>(&self, ips: &[NodeIp], op: F) -> Vec<OperationResult>
    where
        F: Fn(NodeIp) -> Fut + Send + Sync,
        Fut: Future<Output = Result<String>> + Send,
    {
        let permits = Semaphore::new(self.config.concurrency());
        let mut seen = HashSet::new();

        let tasks: Vec<_> = ips
            .iter()
            .map(|&ip| {
                let work = seen.insert(ip).then(|| op(ip));
                let permits = &permits;
                async move {
                    let Some(work) = work else {
                        return OperationResult::failed(ip, "duplicate IP in batch");
                    };
                    let Ok(_permit) = permits.acquire().await else {
                        return OperationResult::failed(ip, "worker pool closed");
                    };
                    let outcome = work.await;
                    if let Err(e) = &outcome {
                        warn!(ip = %ip, error = %e, "Batch item failed");
                    }
                    OperationResult::from_outcome(ip, outcome)
                }
            })
            .collect();

        let results = join_all(tasks).await;
        let failed = results.iter().filter(|r| !r.success).count();
        info!(total = results.len(), failed, "Batch complete");
        results
    }
}

#[async_trait]
impl<R: Registry + 'static> FleetControl for NodeOrchestrator<R> {
    async fn add_node(&self, ip: NodeIp, role: &RoleTag) -> Result<Node> {
        let profile = self.profile(role)?;
        let descriptor = routing::descriptor_for(ip, &profile)?;
        let script = role.script_name();

        let _node = self.lock_node(ip).await;
        info!(ip = %ip, role = %role, script = %script, "Adding node");
        self.provisioner
            .deploy_with_retry(
                ip,
                &script,
                self.provisioner.default_exec_timeout(),
                &self.config.deploy_retry,
            )
            .await?;

        self.activate(ip, &profile, &descriptor).await
    }

    async fn register_node(&self, ip: NodeIp, role: &RoleTag) -> Result<Node> {
        let profile = self.profile(role)?;
        let descriptor = routing::descriptor_for(ip, &profile)?;
        let _node = self.lock_node(ip).await;
        info!(ip = %ip, role = %role, "Registering node");
        self.activate(ip, &profile, &descriptor).await
    }

    async fn edit_node(&self, old_ip: NodeIp, new_ip: NodeIp, role: &RoleTag) -> Result<Node> {
        let _nodes = self.lock_pair(old_ip, new_ip).await;
        let current = self
            .registry
            .get_node(&old_ip)?
            .ok_or(ControlError::NodeNotFound(old_ip))?;

        let ip_changed = old_ip != new_ip;
        if !ip_changed && current.role == *role {
            return Ok(current);
        }
        if ip_changed && self.registry.get_node(&new_ip)?.is_some() {
            return Err(ControlError::NodeExists(new_ip));
        }

        let profile = self.profile(role)?;
        let descriptor = routing::descriptor_for(new_ip, &profile)?;
        let old_binding = self.registry.get_role(&current.role)?.and_then(|p| p.dns);
        let dns_changed = ip_changed || old_binding != profile.dns;

        if dns_changed {
            if let Some(binding) = &old_binding {
                self.retract_dns(old_ip, binding).await?;
            }
        }
        if ip_changed {
            self.proxy_config.remove(old_ip).await?;
        }
        self.proxy_config.push(new_ip, &descriptor).await?;

        let node = Node {
            ip: new_ip,
            role: role.clone(),
            installed_at: current.installed_at,
            updated_at: Utc::now(),
        };
        self.registry
            .replace_node(&old_ip, &node)
            .map_err(|e| match e {
                StoreError::NotFound => ControlError::NodeNotFound(old_ip),
                StoreError::Conflict(_) => ControlError::NodeExists(new_ip),
                other => other.into(),
            })?;

        if dns_changed {
            if let Some(binding) = &profile.dns {
                self.publish_dns(new_ip, binding).await?;
            }
        }
        if ip_changed {
            self.monitor.forget(&old_ip);
            self.schedule_confirmation(new_ip);
        }

        info!(old_ip = %old_ip, new_ip = %new_ip, role = %role, "Node updated");
        Ok(node)
    }

    async fn delete_node(&self, ip: NodeIp) -> Result<()> {
        let _node = self.lock_node(ip).await;
        let node = self
            .registry
            .get_node(&ip)?
            .ok_or(ControlError::NodeNotFound(ip))?;

        self.registry.delete_node(&ip).map_err(|e| match e {
            StoreError::NotFound => ControlError::NodeNotFound(ip),
            other => other.into(),
        })?;
        self.monitor.forget(&ip);
        info!(ip = %ip, role = %node.role, "Node deleted");

        self.cleanup(ip, &node.role).await;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.registry.list_nodes()?)
    }

    async fn add_nodes(&self, ips: &[NodeIp], role: &RoleTag) -> Result<Vec<OperationResult>> {
        check_batch(ips.len(), MAX_ADD_BATCH)?;
        Ok(self
            .run_batch(ips, |ip| async move {
                self.add_node(ip, role).await.map(|_| "Node added".to_string())
            })
            .await)
    }

    async fn reboot_nodes(&self, ips: &[NodeIp]) -> Result<Vec<OperationResult>> {
        check_batch(ips.len(), MAX_COMMAND_BATCH)?;
        let script = &self.config.reboot_script;
        Ok(self
            .run_batch(ips, |ip| async move {
                let _node = self.lock_node(ip).await;
                let timeout = self.provisioner.default_exec_timeout();
                match self.provisioner.deploy(ip, script, timeout).await {
                    Ok(_) => Ok("Reboot initiated".to_string()),
                    // The session drops as the node goes down.
                    Err(ProvisionError::Execution(_)) => {
                        Ok("Reboot initiated, connection closed".to_string())
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await)
    }

    async fn run_script(
        &self,
        ips: &[NodeIp],
        script: &ScriptName,
    ) -> Result<Vec<OperationResult>> {
        check_batch(ips.len(), MAX_COMMAND_BATCH)?;
        Ok(self
            .run_batch(ips, |ip| async move {
                let _node = self.lock_node(ip).await;
                let stdout = self
                    .provisioner
                    .deploy_with_retry(
                        ip,
                        script,
                        self.provisioner.default_exec_timeout(),
                        &self.config.deploy_retry,
                    )
                    .await?;
                let last_line = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty());
                Ok(match last_line {
                    Some(line) => format!("{script} completed: {line}"),
                    None => format!("{script} completed"),
                })
            })
            .await)
    }

    async fn list_events(
        &self,
        window_hours: u32,
        ip: Option<&NodeIp>,
        limit: usize,
    ) -> Result<Vec<StatusEvent>> {
        let limit = limit.clamp(1, MAX_EVENT_LIMIT);
        Ok(self.registry.list_events(window_hours, ip, limit)?)
    }
}
