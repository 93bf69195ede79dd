//! Daemon configuration.
//!
//! Every component has its own config struct with defaults; [`FleetConfig`]
//! gathers them and overrides fields from environment variables. Values that
//! fail to parse fall back to the default with a warning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use relay_fleet_dns::{CloudflareConfig, DnsManagerConfig};
use relay_fleet_monitor::{MetricsConfig, MonitorConfig, NotifyConfig, TelegramConfig};
use relay_fleet_provision::{ProvisionConfig, SshSettings};

use crate::types::ControlConfig;

/// Configuration for the whole daemon.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Registry data directory.
    pub data_dir: PathBuf,
    /// Health endpoint listen address.
    pub listen_addr: String,
    /// Reachability probe timeout.
    pub probe_timeout: Duration,
    /// Provisioner settings.
    pub provision: ProvisionConfig,
    /// SSH transport settings.
    pub ssh: SshSettings,
    /// DNS provider client settings.
    pub dns: CloudflareConfig,
    /// DNS record manager settings.
    pub dns_manager: DnsManagerConfig,
    /// Metrics source settings.
    pub metrics: MetricsConfig,
    /// Health monitor timing.
    pub monitor: MonitorConfig,
    /// Dispatcher retry settings.
    pub notify: NotifyConfig,
    /// Webhook sink target, if any.
    pub webhook_url: Option<String>,
    /// Chat sink target, if any.
    pub telegram: Option<TelegramConfig>,
    /// Timeout for sink HTTP calls.
    pub notify_timeout: Duration,
    /// Orchestration settings.
    pub control: ControlConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data"),
            listen_addr: "0.0.0.0:8080".to_string(),
            probe_timeout: Duration::from_secs(5),
            provision: ProvisionConfig::default(),
            ssh: SshSettings::default(),
            dns: CloudflareConfig::default(),
            dns_manager: DnsManagerConfig::default(),
            metrics: MetricsConfig::default(),
            monitor: MonitorConfig::default(),
            notify: NotifyConfig::default(),
            webhook_url: None,
            telegram: None,
            notify_timeout: Duration::from_secs(10),
            control: ControlConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("FLEET_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FLEET_LISTEN_ADDR") {
            config.listen_addr = v;
        }

        if let Some(v) = get("FLEET_SCRIPTS_DIR") {
            config.provision.scripts_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FLEET_SSH_USER") {
            config.ssh.user = v;
        }
        if let Some(v) = get("FLEET_SSH_KEY_PATH") {
            config.ssh.key_path = Some(PathBuf::from(v));
        }

        config.dns.api_token = get("CLOUDFLARE_API_TOKEN");
        if let Some(secs) = parsed::<u64>(&get, "FLEET_DNS_COOLDOWN_SECS") {
            config.dns_manager.cooldown = Duration::from_secs(secs);
        }
        if let Some(ttl) = parsed(&get, "FLEET_DNS_TTL") {
            config.control.dns_ttl = ttl;
        }

        if let Some(v) = get("FLEET_METRICS_URL") {
            config.metrics.endpoint = v;
        }
        if let Some(secs) = parsed::<u64>(&get, "FLEET_POLL_INTERVAL_SECS") {
            config.monitor.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parsed::<u64>(&get, "FLEET_ALERT_COOLDOWN_SECS") {
            config.monitor.alert_cooldown = Duration::from_secs(secs);
        }

        config.webhook_url = get("FLEET_WEBHOOK_URL");
        config.telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(token), Some(chat)) => Some(TelegramConfig::new(token, chat)),
            (None, None) => None,
            _ => {
                tracing::warn!("Telegram alerts need both TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID");
                None
            }
        };

        if let Some(n) = parsed(&get, "FLEET_BATCH_CONCURRENCY") {
            config.control.batch_concurrency = n;
        }
        if let Some(v) = get("FLEET_PROXY_CONFIG_DIR") {
            config.control.proxy_config_dir = PathBuf::from(v);
        }
        config.control.roles_file = get("FLEET_ROLES_FILE").map(PathBuf::from);

        config
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}
