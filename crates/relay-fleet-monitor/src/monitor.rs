//! Periodic health evaluation for every registered node.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use relay_fleet_core::NodeIp;
use relay_fleet_store::{Registry, StatusEvent};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::metrics::{MetricsSource, NodeStatus};
use crate::notify::{Alert, NotificationQueue};
use crate::state::{evaluate, HealthState};

/// Monitor timing.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between ticks.
    pub poll_interval: Duration,
    /// Per-node sample timeout. Slower samples count as unknown.
    pub sample_timeout: Duration,
    /// Minimum time between repeated still-down alerts.
    pub alert_cooldown: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            sample_timeout: Duration::from_secs(10),
            alert_cooldown: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Counters from one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Nodes whose sample was evaluated.
    pub evaluated: usize,
    /// Events appended.
    pub events: usize,
    /// Alerts enqueued.
    pub alerts: usize,
}

#[derive(Default)]
struct Table {
    health: HashMap<NodeIp, HealthState>,
    // Newly-added nodes whose settle-delay check has not run yet.
    awaiting_confirmation: HashSet<NodeIp>,
    // Nodes forgotten since the current tick started sampling.
    forgotten: HashSet<NodeIp>,
}

/// Samples every node once per tick and turns transitions into events and
/// alerts.
pub struct HealthMonitor<R: Registry> {
    registry: Arc<R>,
    metrics: Arc<dyn MetricsSource>,
    notifications: NotificationQueue,
    table: Mutex<Table>,
    config: MonitorConfig,
}

impl<R: Registry> HealthMonitor<R> {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        registry: Arc<R>,
        metrics: Arc<dyn MetricsSource>,
        notifications: NotificationQueue,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            notifications,
            table: Mutex::new(Table::default()),
            config,
        }
    }

    /// The monitor's configuration.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Current health state for a node, if tracked.
    #[must_use]
    pub fn snapshot(&self, ip: &NodeIp) -> Option<HealthState> {
        self.table.lock().health.get(ip).cloned()
    }

    /// Flag a freshly provisioned node.
    ///
    /// Ticks skip the node until [`confirm`](Self::confirm) runs, and its
    /// first evaluation afterwards is forced.
    pub fn mark_new(&self, ip: NodeIp) {
        let mut table = self.table.lock();
        table.health.insert(ip, HealthState::newly_added(Utc::now()));
        table.awaiting_confirmation.insert(ip);
        table.forgotten.remove(&ip);
        debug!(ip = %ip, "Node flagged as newly added");
    }

    /// Drop all state for a node.
    ///
    /// A tick already sampling the node discards its result.
    pub fn forget(&self, ip: &NodeIp) {
        let mut table = self.table.lock();
        table.health.remove(ip);
        table.awaiting_confirmation.remove(ip);
        table.forgotten.insert(*ip);
    }

    /// Settle-delay check for a newly added node.
    ///
    /// If the node is online it is evaluated immediately, producing an
    /// `online` event and an up alert. Otherwise it stays flagged and the
    /// next tick evaluates it. Returns `None` if the node was forgotten in
    /// the meantime.
    pub async fn confirm(&self, ip: NodeIp) -> Option<NodeStatus> {
        if !self.table.lock().awaiting_confirmation.remove(&ip) {
            debug!(ip = %ip, "Confirmation skipped, node no longer tracked");
            return None;
        }

        let status = self.sample(ip).await;
        if status.is_up() {
            let outcome = self.apply(ip, status, Utc::now());
            self.publish(outcome.0, outcome.1);
            info!(ip = %ip, "New node confirmed online");
        } else {
            warn!(
                ip = %ip,
                status = ?status,
                "New node not online after settle delay, next tick will evaluate it"
            );
        }
        Some(status)
    }

    /// Run one evaluation pass over every registered node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node list cannot be read.
    pub async fn tick(&self) -> Result<TickSummary> {
        self.tick_at(Utc::now()).await
    }

    pub(crate) async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let nodes = self.registry.list_nodes()?;
        let registered: HashSet<NodeIp> = nodes.iter().map(|n| n.ip).collect();

        let targets: Vec<NodeIp> = {
            let mut table = self.table.lock();
            table.health.retain(|ip, _| registered.contains(ip));
            table.awaiting_confirmation.retain(|ip| registered.contains(ip));
            table.forgotten.clear();
            registered
                .iter()
                .filter(|ip| !table.awaiting_confirmation.contains(*ip))
                .copied()
                .collect()
        };

        let samples = join_all(
            targets
                .iter()
                .map(|&ip| async move { (ip, self.sample(ip).await) }),
        )
        .await;

        let mut events = Vec::new();
        let mut alerts = Vec::new();
        let mut evaluated = 0;
        {
            let mut table = self.table.lock();
            for (ip, status) in &samples {
                // Confirmation may have been requested while sampling.
                if table.awaiting_confirmation.contains(ip) {
                    continue;
                }
                if table.forgotten.contains(ip) {
                    debug!(ip = %ip, "Node forgotten during tick, sample discarded");
                    continue;
                }
                evaluated += 1;
                let transition = evaluate(
                    table.health.get(ip),
                    *status,
                    now,
                    self.config.alert_cooldown,
                );
                if let Some((kind, duration)) = transition.event {
                    events.push(StatusEvent::new(*ip, kind, now, Some(duration)));
                }
                if let Some((kind, duration)) = transition.alert {
                    alerts.push(Alert::new(*ip, kind, duration));
                }
                table.health.insert(*ip, transition.next);
            }
        }

        let summary = TickSummary {
            evaluated,
            events: events.len(),
            alerts: alerts.len(),
        };
        for alert in alerts {
            self.notifications.enqueue(alert);
        }
        for event in &events {
            self.persist(event);
        }

        debug!(
            evaluated = summary.evaluated,
            events = summary.events,
            alerts = summary.alerts,
            "Health tick complete"
        );
        Ok(summary)
    }

    /// Tick on the configured interval until shutdown is signalled.
    ///
    /// Ticks never overlap; a tick that overruns the interval delays the
    /// next one instead of queueing it.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            cooldown_secs = self.config.alert_cooldown.as_secs(),
            "Starting health monitor"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Health tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Health monitor stopped");
    }

    async fn sample(&self, ip: NodeIp) -> NodeStatus {
        let sample = tokio::time::timeout(self.config.sample_timeout, self.metrics.sample(&ip));
        match sample.await {
            Ok(Ok(sample)) => sample.status,
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Sample failed, treating as unknown");
                NodeStatus::Unknown
            }
            Err(_) => {
                debug!(ip = %ip, "Sample timed out, treating as unknown");
                NodeStatus::Unknown
            }
        }
    }

    fn apply(
        &self,
        ip: NodeIp,
        status: NodeStatus,
        now: DateTime<Utc>,
    ) -> (Option<StatusEvent>, Option<Alert>) {
        let mut table = self.table.lock();
        let transition = evaluate(
            table.health.get(&ip),
            status,
            now,
            self.config.alert_cooldown,
        );
        table.health.insert(ip, transition.next);
        (
            transition
                .event
                .map(|(kind, duration)| StatusEvent::new(ip, kind, now, Some(duration))),
            transition
                .alert
                .map(|(kind, duration)| Alert::new(ip, kind, duration)),
        )
    }

    fn publish(&self, event: Option<StatusEvent>, alert: Option<Alert>) {
        if let Some(alert) = alert {
            self.notifications.enqueue(alert);
        }
        if let Some(event) = event {
            self.persist(&event);
        }
    }

    fn persist(&self, event: &StatusEvent) {
        match self.registry.append_event(event) {
            Ok(()) => info!(
                ip = %event.ip,
                kind = %event.kind,
                duration_secs = ?event.duration_seconds,
                "Status event"
            ),
            Err(e) => error!(
                ip = %event.ip,
                kind = %event.kind,
                error = %e,
                "Failed to persist status event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{RecordingSink, StaticMetricsSource};
    use crate::notify::{self, AlertKind, AlertSink, NotificationDispatcher, NotifyConfig};
    use relay_fleet_core::RoleTag;
    use relay_fleet_store::{EventKind, Node, RocksRegistry};
    use tempfile::TempDir;

    struct Harness {
        monitor: HealthMonitor<RocksRegistry>,
        registry: Arc<RocksRegistry>,
        metrics: Arc<StaticMetricsSource>,
        sink: Arc<RecordingSink>,
        dispatcher: NotificationDispatcher,
        start: DateTime<Utc>,
        _dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let registry = Arc::new(RocksRegistry::open(dir.path()).unwrap());
            let metrics = Arc::new(StaticMetricsSource::new());
            let sink = Arc::new(RecordingSink::new());
            let sinks: Vec<Arc<dyn AlertSink>> = vec![sink.clone()];
            let (queue, dispatcher) = notify::channel(sinks, NotifyConfig::default());
            let monitor = HealthMonitor::new(
                Arc::clone(&registry),
                metrics.clone(),
                queue,
                MonitorConfig::default(),
            );
            Self {
                monitor,
                registry,
                metrics,
                sink,
                dispatcher,
                start: Utc::now() - chrono::Duration::hours(1),
                _dir: dir,
            }
        }

        /// Simulated clock, `n` minutes after the harness start.
        fn at(&self, n: i64) -> DateTime<Utc> {
            self.start + chrono::Duration::minutes(n)
        }

        fn register(&self, ip: NodeIp) {
            let node = Node::new(ip, RoleTag::new("eu-1").unwrap());
            self.registry.add_or_update_node(&node).unwrap();
        }

        fn events(&self, ip: &NodeIp) -> Vec<StatusEvent> {
            let mut events = self.registry.list_events(24, Some(ip), 100).unwrap();
            events.reverse();
            events
        }

        async fn flush(&mut self) -> Vec<AlertKind> {
            self.dispatcher.drain().await;
            self.sink.delivered().iter().map(|a| a.kind).collect()
        }
    }

    fn ip(s: &str) -> NodeIp {
        NodeIp::parse(s).unwrap()
    }

    #[tokio::test]
    async fn outage_produces_one_start_and_one_end() {
        let mut h = Harness::new();
        let node = ip("10.0.0.5");
        h.register(node);

        h.metrics.set(node, NodeStatus::Online);
        h.monitor.tick_at(h.at(0)).await.unwrap();

        h.metrics.set(node, NodeStatus::Offline);
        for n in 1..=3 {
            h.monitor.tick_at(h.at(n)).await.unwrap();
        }
        h.metrics.set(node, NodeStatus::Online);
        h.monitor.tick_at(h.at(4)).await.unwrap();

        let kinds: Vec<_> = h.events(&node).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Online, EventKind::OfflineStart, EventKind::OfflineEnd]
        );
        assert_eq!(h.events(&node)[2].duration_seconds, Some(180));

        assert_eq!(
            h.flush().await,
            vec![AlertKind::Up, AlertKind::Down, AlertKind::Up]
        );
    }

    #[tokio::test]
    async fn sample_errors_count_as_down() {
        let mut h = Harness::new();
        let node = ip("10.0.0.6");
        h.register(node);

        h.metrics.set(node, NodeStatus::Online);
        h.monitor.tick_at(h.at(0)).await.unwrap();
        h.metrics.fail(node);
        let summary = h.monitor.tick_at(h.at(1)).await.unwrap();

        assert_eq!(summary.events, 1);
        assert_eq!(h.monitor.snapshot(&node).unwrap().status, NodeStatus::Unknown);
        assert_eq!(h.flush().await, vec![AlertKind::Up, AlertKind::Down]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_samples_time_out_as_unknown() {
        let h = Harness::new();
        let node = ip("10.0.0.7");
        h.register(node);
        h.metrics.set(node, NodeStatus::Online);
        h.metrics.set_delay(Duration::from_secs(30));

        h.monitor.tick_at(h.at(0)).await.unwrap();
        assert_eq!(h.monitor.snapshot(&node).unwrap().status, NodeStatus::Unknown);
    }

    #[tokio::test]
    async fn unregistered_nodes_are_forgotten() {
        let h = Harness::new();
        let node = ip("10.0.0.8");
        h.register(node);
        h.monitor.tick_at(h.at(0)).await.unwrap();
        assert!(h.monitor.snapshot(&node).is_some());

        h.registry.delete_node(&node).unwrap();
        let summary = h.monitor.tick_at(h.at(1)).await.unwrap();
        assert_eq!(summary.evaluated, 0);
        assert!(h.monitor.snapshot(&node).is_none());
    }

    #[tokio::test]
    async fn new_node_online_at_confirmation() {
        let mut h = Harness::new();
        let node = ip("10.0.0.5");
        h.register(node);
        h.monitor.mark_new(node);

        // Ticks leave the node alone until confirmation.
        let summary = h.monitor.tick_at(h.at(0)).await.unwrap();
        assert_eq!(summary.evaluated, 0);

        h.metrics.set(node, NodeStatus::Online);
        assert_eq!(h.monitor.confirm(node).await, Some(NodeStatus::Online));

        let kinds: Vec<_> = h.events(&node).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Online]);
        assert_eq!(h.flush().await, vec![AlertKind::Up]);

        // Steady online afterwards is silent.
        let summary = h.monitor.tick_at(h.at(1)).await.unwrap();
        assert_eq!(summary.events, 0);
        assert_eq!(summary.alerts, 0);
    }

    #[tokio::test]
    async fn new_node_offline_at_confirmation_is_forced_next_tick() {
        let mut h = Harness::new();
        let node = ip("10.0.0.5");
        h.register(node);
        h.monitor.mark_new(node);

        h.metrics.set(node, NodeStatus::Offline);
        assert_eq!(h.monitor.confirm(node).await, Some(NodeStatus::Offline));
        assert!(h.events(&node).is_empty());
        assert!(h.monitor.snapshot(&node).unwrap().newly_added);

        let summary = h.monitor.tick_at(h.at(1)).await.unwrap();
        assert_eq!(summary.events, 1);
        assert_eq!(h.events(&node)[0].kind, EventKind::OfflineStart);
        assert_eq!(h.flush().await, vec![AlertKind::Down]);
    }

    #[tokio::test]
    async fn confirmation_after_forget_is_skipped() {
        let h = Harness::new();
        let node = ip("10.0.0.5");
        h.register(node);
        h.monitor.mark_new(node);
        h.monitor.forget(&node);

        assert_eq!(h.monitor.confirm(node).await, None);
        assert_eq!(h.metrics.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn node_forgotten_while_sampling_is_not_evaluated() {
        let mut h = Harness::new();
        let node = ip("10.0.0.9");
        h.register(node);
        h.metrics.set(node, NodeStatus::Online);
        h.metrics.set_delay(Duration::from_secs(2));

        let (summary, ()) = tokio::join!(h.monitor.tick_at(h.at(0)), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.monitor.forget(&node);
        });

        let summary = summary.unwrap();
        assert_eq!(summary.evaluated, 0);
        assert_eq!(summary.events, 0);
        assert!(h.monitor.snapshot(&node).is_none());
        assert!(h.events(&node).is_empty());
        assert!(h.flush().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let h = Harness::new();
        let node = ip("10.0.0.5");
        h.register(node);
        h.metrics.set(node, NodeStatus::Online);

        let monitor = Arc::new(h.monitor);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&monitor).run(rx));

        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // Ticks at 0s, 60s and 120s.
        assert_eq!(h.metrics.calls(), 3);
        assert_eq!(monitor.snapshot(&node).unwrap().status, NodeStatus::Online);
    }
}
