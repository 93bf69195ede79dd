//! Alert delivery.
//!
//! Alerts are enqueued on a [`NotificationQueue`] and delivered by a single
//! [`NotificationDispatcher`] task to every configured [`AlertSink`]. Each
//! sink gets a bounded retry. An alert a sink still rejects goes to a
//! deferred queue that is retried on a fixed period.
//!
//! While a sink has deferred alerts it is treated as down: new alerts for it
//! are deferred without an attempt, and each redelivery pass makes a single
//! attempt per alert and stops trying that sink at its first failure. A sink
//! outage therefore never holds up delivery to the other sinks.
//!
//! The deferred queue holds at most [`NotifyConfig::max_deferred`] entries.
//! Beyond that the oldest entry is dropped and logged at error level.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use relay_fleet_core::{NodeIp, RetryPolicy};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::error::{MonitorError, Result};

/// What an alert announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Node is online (first seen, or recovered).
    Up,
    /// Node went down.
    Down,
    /// Node is still down after the cooldown.
    StillDown,
}

impl AlertKind {
    /// True for the kinds that report an outage.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Down | Self::StillDown)
    }
}

/// A notification about a node's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert id.
    pub alert_id: Uuid,
    /// Node the alert is about.
    pub ip: NodeIp,
    /// What happened.
    pub kind: AlertKind,
    /// Downtime in seconds, where meaningful.
    pub duration_seconds: u64,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Create an alert stamped with the current time.
    #[must_use]
    pub fn new(ip: NodeIp, kind: AlertKind, duration_seconds: u64) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            ip,
            kind,
            duration_seconds,
            created_at: Utc::now(),
        }
    }
}

/// Human-readable message for chat sinks.
#[must_use]
pub fn alert_text(alert: &Alert) -> String {
    let ip = &alert.ip;
    match (alert.kind, alert.duration_seconds) {
        (AlertKind::Up, 0) => format!("🟢 Node {ip} is online"),
        (AlertKind::Up, secs) => format!(
            "🟢 Node {ip} is back online, was down for {}",
            format_duration(secs)
        ),
        (AlertKind::Down, _) => format!("🔴 Node {ip} is down"),
        (AlertKind::StillDown, secs) => format!(
            "🔴 Node {ip} is still down, down for {}",
            format_duration(secs)
        ),
    }
}

/// Render a duration as minutes, or hours and minutes.
#[must_use]
pub fn format_duration(secs: u64) -> String {
    fn plural(n: u64, unit: &str) -> String {
        if n == 1 {
            format!("1 {unit}")
        } else {
            format!("{n} {unit}s")
        }
    }

    let minutes = secs / 60;
    if minutes == 0 {
        return "less than a minute".to_string();
    }
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let (hours, rest) = (minutes / 60, minutes % 60);
    if rest == 0 {
        plural(hours, "hour")
    } else {
        format!("{} {}", plural(hours, "hour"), plural(rest, "minute"))
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// A destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Deliver one alert.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Delivery` if the destination rejects the alert
    /// or cannot be reached.
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| MonitorError::Http(e.to_string()))
}

/// Posts a heartbeat-style JSON payload to a webhook URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    heartbeat: Heartbeat,
    monitor: MonitorInfo<'a>,
}

#[derive(Serialize)]
struct Heartbeat {
    msg: &'static str,
}

#[derive(Serialize)]
struct MonitorInfo<'a> {
    description: &'a str,
}

impl WebhookSink {
    /// Create a sink posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Http` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let ip = alert.ip.to_string();
        let payload = WebhookPayload {
            heartbeat: Heartbeat {
                msg: if alert.kind.is_failure() { "fail" } else { "ok" },
            },
            monitor: MonitorInfo { description: &ip },
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| delivery_error(self.name(), e))?;

        if !response.status().is_success() {
            return Err(MonitorError::Delivery {
                sink: self.name(),
                message: format!("HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Telegram bot settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot API base URL.
    pub api_base: String,
    /// Bot token.
    pub bot_token: String,
    /// Target chat.
    pub chat_id: String,
}

impl TelegramConfig {
    /// Settings for the public Bot API.
    #[must_use]
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }
}

/// Sends alert text to a Telegram chat.
pub struct TelegramSink {
    client: reqwest::Client,
    config: TelegramConfig,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
}

#[derive(Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramSink {
    /// Create a sink for the given chat.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Http` if the HTTP client cannot be built.
    pub fn new(config: TelegramConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            config,
        })
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        );
        let body = SendMessage {
            chat_id: &self.config.chat_id,
            text: alert_text(alert),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| delivery_error(self.name(), e))?;

        let status = response.status();
        let parsed: BotResponse = response
            .json()
            .await
            .map_err(|e| delivery_error(self.name(), e))?;
        if !status.is_success() || !parsed.ok {
            return Err(MonitorError::Delivery {
                sink: self.name(),
                message: parsed
                    .description
                    .unwrap_or_else(|| format!("HTTP {status}")),
            });
        }
        Ok(())
    }
}

fn delivery_error(sink: &'static str, e: reqwest::Error) -> MonitorError {
    // Strip the URL so bot tokens never reach the logs.
    let message = if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else {
        e.without_url().to_string()
    };
    MonitorError::Delivery { sink, message }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Per-sink retry for each delivery attempt.
    pub retry: RetryPolicy,
    /// How often deferred alerts are retried.
    pub redelivery_interval: Duration,
    /// Oldest deferred alerts are dropped beyond this many.
    pub max_deferred: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::new(3, Duration::from_secs(2)),
            redelivery_interval: Duration::from_secs(60),
            max_deferred: 1000,
        }
    }
}

/// Handle for enqueuing alerts. Cheap to clone.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Alert>,
}

impl NotificationQueue {
    /// Enqueue an alert for delivery.
    ///
    /// Returns false if the dispatcher has stopped.
    pub fn notify(&self, ip: NodeIp, kind: AlertKind, duration_seconds: u64) -> bool {
        self.enqueue(Alert::new(ip, kind, duration_seconds))
    }

    /// Enqueue a prepared alert.
    pub fn enqueue(&self, alert: Alert) -> bool {
        let ip = alert.ip;
        let sent = self.tx.send(alert).is_ok();
        if !sent {
            tracing::warn!(ip = %ip, "Notification dispatcher stopped, alert dropped");
        }
        sent
    }
}

struct Deferred {
    alert: Alert,
    sink: usize,
    cycles: u32,
}

/// Delivers queued alerts to every sink.
pub struct NotificationDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
    config: NotifyConfig,
    rx: mpsc::UnboundedReceiver<Alert>,
    deferred: Vec<Deferred>,
}

/// Create a queue and the dispatcher that drains it.
#[must_use]
pub fn channel(
    sinks: Vec<Arc<dyn AlertSink>>,
    config: NotifyConfig,
) -> (NotificationQueue, NotificationDispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        NotificationQueue { tx },
        NotificationDispatcher {
            sinks,
            config,
            rx,
            deferred: Vec::new(),
        },
    )
}

async fn deliver(sink: &dyn AlertSink, alert: &Alert, retry: &RetryPolicy) -> Result<()> {
    retry
        .run(|_| sink.deliver(alert), MonitorError::is_retriable)
        .await
}

impl NotificationDispatcher {
    /// Number of (alert, sink) deliveries awaiting redelivery.
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Run until shutdown is signalled or every queue handle is dropped.
    ///
    /// Alerts already queued at shutdown are delivered once more before
    /// returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.redelivery_interval;
        let mut redelivery = tokio::time::interval_at(Instant::now() + period, period);
        redelivery.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(sinks = self.sinks.len(), "Notification dispatcher started");

        loop {
            tokio::select! {
                alert = self.rx.recv() => match alert {
                    Some(alert) => self.dispatch(alert).await,
                    None => break,
                },
                _ = redelivery.tick() => {
                    self.redeliver().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        if !self.deferred.is_empty() {
            tracing::warn!(
                count = self.deferred.len(),
                "Dropping undelivered notifications at shutdown"
            );
        }
        tracing::info!("Notification dispatcher stopped");
    }

    /// Deliver every alert already queued without waiting for more.
    /// Returns how many were taken off the queue.
    pub async fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Ok(alert) = self.rx.try_recv() {
            self.dispatch(alert).await;
            count += 1;
        }
        count
    }

    /// Deliver one alert to every sink concurrently.
    pub async fn dispatch(&mut self, alert: Alert) {
        if self.sinks.is_empty() {
            tracing::debug!(ip = %alert.ip, kind = ?alert.kind, "No sinks configured");
            return;
        }

        let retry = self.config.retry;
        let down = self.down_sinks();
        let results = join_all(self.sinks.iter().enumerate().map(|(index, sink)| {
            let alert = &alert;
            let down = down.contains(&index);
            async move {
                if down {
                    None
                } else {
                    Some(deliver(sink.as_ref(), alert, &retry).await)
                }
            }
        }))
        .await;

        for (index, result) in results.into_iter().enumerate() {
            match result {
                None => {
                    tracing::debug!(
                        ip = %alert.ip,
                        kind = ?alert.kind,
                        sink = self.sinks[index].name(),
                        "Sink has deferred alerts, alert queued behind them"
                    );
                    self.defer(Deferred {
                        alert: alert.clone(),
                        sink: index,
                        cycles: 0,
                    });
                }
                Some(Ok(())) => tracing::debug!(
                    ip = %alert.ip,
                    kind = ?alert.kind,
                    sink = self.sinks[index].name(),
                    "Alert delivered"
                ),
                Some(Err(e)) => {
                    tracing::warn!(
                        ip = %alert.ip,
                        kind = ?alert.kind,
                        error = %e,
                        "Alert deferred for redelivery"
                    );
                    self.defer(Deferred {
                        alert: alert.clone(),
                        sink: index,
                        cycles: 0,
                    });
                }
            }
        }
    }

    /// Make one delivery attempt per deferred alert, oldest first.
    ///
    /// A sink that fails is not tried again in the same pass; its remaining
    /// alerts stay deferred. Returns how many remain deferred.
    pub async fn redeliver(&mut self) -> usize {
        let mut failed: HashSet<usize> = HashSet::new();
        for mut item in std::mem::take(&mut self.deferred) {
            if failed.contains(&item.sink) {
                self.deferred.push(item);
                continue;
            }
            let sink = Arc::clone(&self.sinks[item.sink]);
            match sink.deliver(&item.alert).await {
                Ok(()) => tracing::info!(
                    ip = %item.alert.ip,
                    sink = sink.name(),
                    cycles = item.cycles + 1,
                    "Deferred alert delivered"
                ),
                Err(e) => {
                    item.cycles += 1;
                    failed.insert(item.sink);
                    tracing::error!(
                        ip = %item.alert.ip,
                        sink = sink.name(),
                        cycles = item.cycles,
                        error = %e,
                        "Redelivery failed"
                    );
                    self.deferred.push(item);
                }
            }
        }
        self.deferred.len()
    }

    fn down_sinks(&self) -> HashSet<usize> {
        self.deferred.iter().map(|d| d.sink).collect()
    }

    fn defer(&mut self, item: Deferred) {
        if self.deferred.len() >= self.config.max_deferred {
            let dropped = self.deferred.remove(0);
            tracing::error!(
                ip = %dropped.alert.ip,
                alert_id = %dropped.alert.alert_id,
                "Deferred queue full, oldest alert dropped"
            );
        }
        self.deferred.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingSink;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ip() -> NodeIp {
        NodeIp::parse("10.0.0.5").unwrap()
    }

    fn fast_config() -> NotifyConfig {
        NotifyConfig {
            retry: RetryPolicy::new(3, Duration::from_millis(10)),
            ..NotifyConfig::default()
        }
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(30), "less than a minute");
        assert_eq!(format_duration(60), "1 minute");
        assert_eq!(format_duration(180), "3 minutes");
        assert_eq!(format_duration(3600), "1 hour");
        assert_eq!(format_duration(3600 + 120), "1 hour 2 minutes");
    }

    #[test]
    fn alert_texts() {
        let up = Alert::new(ip(), AlertKind::Up, 180);
        assert_eq!(
            alert_text(&up),
            "🟢 Node 10.0.0.5 is back online, was down for 3 minutes"
        );
        let first = Alert::new(ip(), AlertKind::Up, 0);
        assert_eq!(alert_text(&first), "🟢 Node 10.0.0.5 is online");
        let still = Alert::new(ip(), AlertKind::StillDown, 600);
        assert!(alert_text(&still).contains("still down, down for 10 minutes"));
    }

    #[tokio::test]
    async fn webhook_posts_heartbeat_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({
                "heartbeat": {"msg": "fail"},
                "monitor": {"description": "10.0.0.5"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        let sink = WebhookSink::new(url, Duration::from_secs(5)).unwrap();
        sink.deliver(&Alert::new(ip(), AlertKind::Down, 0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn telegram_sends_message_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_json(json!({
                "chat_id": "42",
                "text": "🟢 Node 10.0.0.5 is back online, was down for 3 minutes"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let config = TelegramConfig {
            api_base: server.uri(),
            ..TelegramConfig::new("TOKEN", "42")
        };
        let sink = TelegramSink::new(config, Duration::from_secs(5)).unwrap();
        sink.deliver(&Alert::new(ip(), AlertKind::Up, 180))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn telegram_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"ok": false, "description": "chat not found"})),
            )
            .mount(&server)
            .await;

        let config = TelegramConfig {
            api_base: server.uri(),
            ..TelegramConfig::new("TOKEN", "42")
        };
        let sink = TelegramSink::new(config, Duration::from_secs(5)).unwrap();
        let err = sink
            .deliver(&Alert::new(ip(), AlertKind::Down, 0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_sink_does_not_block_others() {
        let healthy = Arc::new(RecordingSink::new());
        let broken = Arc::new(RecordingSink::new());
        broken.fail_next(100);

        let sinks: Vec<Arc<dyn AlertSink>> = vec![healthy.clone(), broken.clone()];
        let (_queue, mut dispatcher) = channel(sinks, fast_config());
        dispatcher.dispatch(Alert::new(ip(), AlertKind::Down, 0)).await;

        assert_eq!(healthy.delivered().len(), 1);
        assert_eq!(broken.attempts(), 3);
        assert_eq!(dispatcher.deferred_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_alert_is_redelivered() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_next(4);

        let sinks: Vec<Arc<dyn AlertSink>> = vec![sink.clone()];
        let (_queue, mut dispatcher) = channel(sinks, fast_config());
        dispatcher.dispatch(Alert::new(ip(), AlertKind::Down, 0)).await;
        assert_eq!(dispatcher.deferred_count(), 1);

        // One attempt per pass: the fourth fails, the fifth succeeds.
        assert_eq!(dispatcher.redeliver().await, 1);
        assert_eq!(sink.attempts(), 4);
        assert_eq!(dispatcher.redeliver().await, 0);
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(sink.attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn down_sink_defers_new_alerts_without_attempts() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_next(100);

        let sinks: Vec<Arc<dyn AlertSink>> = vec![sink.clone()];
        let (_queue, mut dispatcher) = channel(sinks, fast_config());
        dispatcher.dispatch(Alert::new(ip(), AlertKind::Down, 0)).await;
        dispatcher.dispatch(Alert::new(ip(), AlertKind::StillDown, 300)).await;
        dispatcher.dispatch(Alert::new(ip(), AlertKind::StillDown, 600)).await;
        assert_eq!(sink.attempts(), 3);
        assert_eq!(dispatcher.deferred_count(), 3);

        // The first failure ends the pass for this sink.
        assert_eq!(dispatcher.redeliver().await, 3);
        assert_eq!(sink.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn redelivery_does_not_hold_up_new_alerts() {
        let healthy = Arc::new(RecordingSink::new());
        let broken = Arc::new(RecordingSink::new());
        broken.fail_next(1000);

        let sinks: Vec<Arc<dyn AlertSink>> = vec![healthy.clone(), broken.clone()];
        let (queue, mut dispatcher) = channel(sinks, NotifyConfig::default());
        for n in 0..5 {
            dispatcher
                .dispatch(Alert::new(ip(), AlertKind::StillDown, n * 300))
                .await;
        }
        assert_eq!(dispatcher.deferred_count(), 5);
        assert_eq!(broken.attempts(), 3);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(shutdown_rx));

        // First redelivery pass fires at 60s.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(broken.attempts(), 4);

        assert!(queue.notify(ip(), AlertKind::Up, 1500));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(healthy.delivered().len(), 6);
        assert_eq!(broken.attempts(), 4);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_queue_drops_oldest_beyond_cap() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_next(3);

        let sinks: Vec<Arc<dyn AlertSink>> = vec![sink.clone()];
        let config = NotifyConfig {
            max_deferred: 2,
            ..fast_config()
        };
        let (_queue, mut dispatcher) = channel(sinks, config);
        dispatcher.dispatch(Alert::new(ip(), AlertKind::Down, 0)).await;
        dispatcher.dispatch(Alert::new(ip(), AlertKind::StillDown, 300)).await;
        dispatcher.dispatch(Alert::new(ip(), AlertKind::Up, 600)).await;
        assert_eq!(dispatcher.deferred_count(), 2);

        assert_eq!(dispatcher.redeliver().await, 0);
        let kinds: Vec<_> = sink.delivered().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::StillDown, AlertKind::Up]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_queue_and_stops_on_shutdown() {
        let sink = Arc::new(RecordingSink::new());
        let sinks: Vec<Arc<dyn AlertSink>> = vec![sink.clone()];
        let (queue, dispatcher) = channel(sinks, fast_config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        assert!(queue.notify(ip(), AlertKind::Down, 0));
        assert!(queue.notify(ip(), AlertKind::Up, 120));

        let handle = tokio::spawn(dispatcher.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let kinds: Vec<_> = sink.delivered().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::Down, AlertKind::Up]);
        assert!(!queue.notify(ip(), AlertKind::Up, 0));
    }
}
