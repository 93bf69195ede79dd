//! DNS record lifecycle manager.
//!
//! Keeps one A record per `(ip, domain, role letter)` and guards provider
//! calls with two pieces of process-wide state behind a single mutex:
//!
//! - a pending set of in-flight keys, so a second concurrent caller backs off
//! - a map of key to last successful create, so the same key is not rechecked
//!   within the cool-down window
//!
//! A failed create leaves no cool-down behind, and [`release`] clears it once
//! the record is deleted, so the key can be recreated straight away.
//!
//! The lock is only held for check-and-mark; provider calls run outside it.
//!
//! [`release`]: DnsRecordManager::release

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_fleet_core::{NodeIp, RoleLetter};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{DnsError, Result};
use crate::provider::{DnsProvider, DnsRecord};

/// Smallest TTL accepted for new records.
pub const MIN_TTL: u32 = 60;

/// Largest TTL accepted for new records.
pub const MAX_TTL: u32 = 86_400;

/// A record managed on behalf of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHandle {
    /// Zone the record lives in.
    pub zone_id: String,
    /// Provider record id.
    pub record_id: String,
    /// Fully-qualified name, `<letter>.<domain>`.
    pub name: String,
    /// Target address.
    pub ip: NodeIp,
    /// Time to live in seconds.
    pub ttl: u32,
}

impl RecordHandle {
    fn from_record(zone_id: &str, ip: NodeIp, record: DnsRecord) -> Self {
        Self {
            zone_id: zone_id.to_string(),
            record_id: record.id,
            name: record.name,
            ip,
            ttl: record.ttl,
        }
    }
}

/// Manager settings.
#[derive(Debug, Clone)]
pub struct DnsManagerConfig {
    /// Minimum interval between operations on the same key.
    pub cooldown: Duration,
    /// How long pending and completed entries are kept before sweeping.
    pub retention: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for DnsManagerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),      // 5 minutes
            retention: Duration::from_secs(3600),    // 1 hour
            sweep_interval: Duration::from_secs(600), // 10 minutes
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OperationKey {
    ip: NodeIp,
    domain: String,
    letter: RoleLetter,
}

#[derive(Default)]
struct GuardState {
    pending: HashMap<OperationKey, Instant>,
    completed: HashMap<OperationKey, Instant>,
}

/// Releases a pending key when dropped, stamping the cool-down map if the
/// operation succeeded.
struct PendingRelease<'a> {
    guard: &'a Mutex<GuardState>,
    key: OperationKey,
    succeeded: bool,
}

impl Drop for PendingRelease<'_> {
    fn drop(&mut self) {
        let mut state = self.guard.lock();
        state.pending.remove(&self.key);
        if self.succeeded {
            state.completed.insert(self.key.clone(), Instant::now());
        }
    }
}

impl OperationKey {
    fn new(ip: NodeIp, domain: &str, letter: &RoleLetter) -> Self {
        Self {
            ip,
            domain: domain.to_string(),
            letter: letter.clone(),
        }
    }
}

/// The zone a domain belongs to: its last two labels.
///
/// # Errors
///
/// Returns `DnsError::InvalidDomain` if the domain has fewer than two labels.
pub fn base_domain(domain: &str) -> Result<String> {
    let labels: Vec<&str> = domain
        .trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .collect();
    match labels.as_slice() {
        [.., parent, tld] => Ok(format!("{parent}.{tld}")),
        _ => Err(DnsError::InvalidDomain(domain.to_string())),
    }
}

/// Idempotent create/find/delete of node A records.
pub struct DnsRecordManager {
    provider: Arc<dyn DnsProvider>,
    guard: Mutex<GuardState>,
    config: DnsManagerConfig,
}

impl DnsRecordManager {
    /// Create a manager over the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn DnsProvider>, config: DnsManagerConfig) -> Self {
        Self {
            provider,
            guard: Mutex::new(GuardState::default()),
            config,
        }
    }

    /// Check-and-mark: returns true if the caller now owns the operation for this key.
    ///
    /// A caller that gets `true` must follow with [`create`](Self::create),
    /// which releases the key.
    pub fn should_proceed(&self, ip: NodeIp, domain: &str, letter: &RoleLetter) -> bool {
        let key = OperationKey::new(ip, domain, letter);
        let now = Instant::now();
        let mut state = self.guard.lock();

        if state.pending.contains_key(&key) {
            tracing::debug!(ip = %ip, domain, letter = %letter, "DNS operation already in flight");
            return false;
        }
        if let Some(done) = state.completed.get(&key) {
            if now.duration_since(*done) < self.config.cooldown {
                tracing::debug!(ip = %ip, domain, letter = %letter, "DNS key in cool-down");
                return false;
            }
        }

        state.pending.insert(key, now);
        true
    }

    /// Create the record `<letter>.<domain>` pointing at `ip`, unless it already exists.
    ///
    /// The pending entry for the key is released when this call finishes.
    /// The cool-down is stamped only if it succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the TTL or domain is invalid, the zone cannot be
    /// resolved, or the provider call fails.
    pub async fn create(
        &self,
        ip: NodeIp,
        letter: &RoleLetter,
        ttl: u32,
        domain: &str,
    ) -> Result<RecordHandle> {
        let mut release = PendingRelease {
            guard: &self.guard,
            key: OperationKey::new(ip, domain, letter),
            succeeded: false,
        };
        let result = self.create_inner(ip, letter, ttl, domain).await;
        release.succeeded = result.is_ok();
        result
    }

    async fn create_inner(
        &self,
        ip: NodeIp,
        letter: &RoleLetter,
        ttl: u32,
        domain: &str,
    ) -> Result<RecordHandle> {
        if !(MIN_TTL..=MAX_TTL).contains(&ttl) {
            return Err(DnsError::InvalidTtl(ttl));
        }
        let zone_id = self.provider.find_zone(&base_domain(domain)?).await?;
        let name = format!("{letter}.{domain}");

        if let Some(existing) = self.existing_record(&zone_id, ip, &name).await? {
            tracing::debug!(ip = %ip, name = %name, "DNS record already present");
            return Ok(existing);
        }

        match self.provider.create_a_record(&zone_id, &name, &ip, ttl).await {
            Ok(record) => {
                tracing::info!(ip = %ip, name = %name, record_id = %record.id, "Created DNS record");
                Ok(RecordHandle::from_record(&zone_id, ip, record))
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(ip = %ip, name = %name, "Provider reports record already exists");
                match self.existing_record(&zone_id, ip, &name).await? {
                    Some(existing) => Ok(existing),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Check-and-mark followed by create.
    ///
    /// Returns `Ok(None)` when another caller holds the key or it is in
    /// cool-down.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`create`](Self::create).
    pub async fn ensure_record(
        &self,
        ip: NodeIp,
        letter: &RoleLetter,
        ttl: u32,
        domain: &str,
    ) -> Result<Option<RecordHandle>> {
        if !self.should_proceed(ip, domain, letter) {
            return Ok(None);
        }
        self.create(ip, letter, ttl, domain).await.map(Some)
    }

    /// Best-effort lookup of the record pointing at `ip` within the domain's zone.
    ///
    /// Never fails: not-found and provider errors both yield `None`.
    pub async fn find(&self, ip: NodeIp, domain: &str) -> Option<RecordHandle> {
        let result = async {
            let zone_id = self.provider.find_zone(&base_domain(domain)?).await?;
            let records = self.provider.list_a_records(&zone_id, &ip).await?;
            Ok::<_, DnsError>(
                records
                    .into_iter()
                    .next()
                    .map(|r| RecordHandle::from_record(&zone_id, ip, r)),
            )
        }
        .await;

        match result {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(ip = %ip, domain, error = %e, "DNS lookup failed");
                None
            }
        }
    }

    /// The record `<letter>.<domain>` pointing at `ip`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the zone cannot be resolved or the provider call fails.
    pub async fn lookup(
        &self,
        ip: NodeIp,
        letter: &RoleLetter,
        domain: &str,
    ) -> Result<Option<RecordHandle>> {
        let zone_id = self.provider.find_zone(&base_domain(domain)?).await?;
        self.existing_record(&zone_id, ip, &format!("{letter}.{domain}"))
            .await
    }

    /// Clear the cool-down for a key whose record was removed, so the next
    /// [`ensure_record`](Self::ensure_record) goes to the provider.
    pub fn release(&self, ip: NodeIp, domain: &str, letter: &RoleLetter) {
        let key = OperationKey::new(ip, domain, letter);
        if self.guard.lock().completed.remove(&key).is_some() {
            tracing::debug!(ip = %ip, domain, letter = %letter, "DNS cool-down cleared");
        }
    }

    /// Delete a record by id within the domain's zone.
    ///
    /// Returns `Ok(false)` if the provider reports the record already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the zone cannot be resolved or the provider call fails.
    pub async fn delete(&self, record_id: &str, domain: &str) -> Result<bool> {
        let zone_id = self.provider.find_zone(&base_domain(domain)?).await?;
        match self.provider.delete_record(&zone_id, record_id).await {
            Ok(()) => {
                tracing::info!(record_id, domain, "Deleted DNS record");
                Ok(true)
            }
            Err(e) if e.is_record_missing() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop pending and completed entries older than the retention window.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.retention;
        let mut state = self.guard.lock();

        let before = state.pending.len() + state.completed.len();
        state
            .pending
            .retain(|_, at| now.duration_since(*at) < retention);
        state
            .completed
            .retain(|_, at| now.duration_since(*at) < retention);
        before - (state.pending.len() + state.completed.len())
    }

    /// Run [`sweep`](Self::sweep) periodically until `shutdown` flips to true.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "Swept expired DNS operation entries");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("DNS sweeper stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn existing_record(
        &self,
        zone_id: &str,
        ip: NodeIp,
        name: &str,
    ) -> Result<Option<RecordHandle>> {
        let records = self.provider.list_a_records(zone_id, &ip).await?;
        Ok(records
            .into_iter()
            .find(|r| r.name == name)
            .map(|r| RecordHandle::from_record(zone_id, ip, r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDnsProvider;

    fn ip(s: &str) -> NodeIp {
        NodeIp::parse(s).unwrap()
    }

    fn letter(s: &str) -> RoleLetter {
        RoleLetter::new(s).unwrap()
    }

    fn manager(provider: &Arc<MockDnsProvider>) -> DnsRecordManager {
        DnsRecordManager::new(
            Arc::clone(provider) as Arc<dyn DnsProvider>,
            DnsManagerConfig::default(),
        )
    }

    #[test]
    fn base_domain_uses_last_two_labels() {
        assert_eq!(base_domain("example.com").unwrap(), "example.com");
        assert_eq!(base_domain("eu.nodes.example.com.").unwrap(), "example.com");
        assert!(matches!(base_domain("localhost"), Err(DnsError::InvalidDomain(_))));
    }

    #[tokio::test]
    async fn create_makes_record() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        let manager = manager(&provider);

        let handle = manager
            .ensure_record(ip("10.0.0.5"), &letter("a"), 120, "example.com")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(handle.name, "a.example.com");
        assert_eq!(handle.zone_id, "zone-1");
        assert_eq!(handle.ttl, 120);
        assert_eq!(provider.create_calls(), 1);
    }

    #[tokio::test]
    async fn create_is_idempotent_for_existing_record() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        provider.insert_record("zone-1", "rec-9", "a.example.com", &ip("10.0.0.5"));
        let manager = manager(&provider);

        assert!(manager.should_proceed(ip("10.0.0.5"), "example.com", &letter("a")));
        let handle = manager
            .create(ip("10.0.0.5"), &letter("a"), 120, "example.com")
            .await
            .unwrap();

        assert_eq!(handle.record_id, "rec-9");
        assert_eq!(provider.create_calls(), 0);
    }

    #[tokio::test]
    async fn already_exists_from_provider_is_success() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        provider.report_already_exists_on_create();
        let manager = manager(&provider);

        let handle = manager
            .ensure_record(ip("10.0.0.5"), &letter("a"), 120, "example.com")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(handle.name, "a.example.com");
        assert_eq!(provider.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_creates_issue_one_provider_call() {
        let provider = Arc::new(
            MockDnsProvider::new()
                .with_zone("example.com", "zone-1")
                .with_create_delay(Duration::from_secs(2)),
        );
        let manager = manager(&provider);
        let node = ip("10.0.0.5");
        let a = letter("a");

        let (first, second) = tokio::join!(
            manager.ensure_record(node, &a, 120, "example.com"),
            manager.ensure_record(node, &a, 120, "example.com"),
        );

        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_none());
        assert_eq!(provider.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cool_down_applies_after_completion() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        let manager = manager(&provider);
        let node = ip("10.0.0.5");

        manager
            .ensure_record(node, &letter("a"), 120, "example.com")
            .await
            .unwrap();
        assert!(!manager.should_proceed(node, "example.com", &letter("a")));

        // A different key is unaffected.
        assert!(manager.should_proceed(node, "example.com", &letter("b")));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(manager.should_proceed(node, "example.com", &letter("a")));
    }

    #[tokio::test]
    async fn failed_create_releases_key_without_cool_down() {
        let provider = Arc::new(MockDnsProvider::new());
        let manager = manager(&provider);
        let node = ip("10.0.0.5");

        let err = manager
            .ensure_record(node, &letter("a"), 120, "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::ZoneNotFound(_)));

        {
            let state = manager.guard.lock();
            assert!(state.pending.is_empty());
            assert!(state.completed.is_empty());
        }

        // An immediate retry goes back to the provider instead of being skipped.
        let err = manager
            .ensure_record(node, &letter("a"), 120, "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::ZoneNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn release_clears_cool_down_after_delete() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        let manager = manager(&provider);
        let node = ip("10.0.0.5");
        let a = letter("a");

        let handle = manager
            .ensure_record(node, &a, 120, "example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(manager.delete(&handle.record_id, "example.com").await.unwrap());

        // Still cooling down: the record would not come back.
        assert!(!manager.should_proceed(node, "example.com", &a));

        manager.release(node, "example.com", &a);
        let again = manager
            .ensure_record(node, &a, 120, "example.com")
            .await
            .unwrap();
        assert!(again.is_some());
        assert_eq!(provider.create_calls(), 2);
        assert_eq!(provider.record_count(), 1);
    }

    #[tokio::test]
    async fn lookup_matches_record_name() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        provider.insert_record("zone-1", "rec-1", "a.example.com", &ip("10.0.0.5"));
        provider.insert_record("zone-1", "rec-2", "b.example.com", &ip("10.0.0.5"));
        let manager = manager(&provider);

        let b = manager
            .lookup(ip("10.0.0.5"), &letter("b"), "example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.record_id, "rec-2");
        assert!(manager
            .lookup(ip("10.0.0.5"), &letter("c"), "example.com")
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            manager.lookup(ip("10.0.0.5"), &letter("a"), "example.net").await,
            Err(DnsError::ZoneNotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_ttl_is_rejected() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        let manager = manager(&provider);

        let err = manager
            .ensure_record(ip("10.0.0.5"), &letter("a"), 30, "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::InvalidTtl(30)));
        assert_eq!(provider.create_calls(), 0);
    }

    #[tokio::test]
    async fn find_returns_none_on_errors() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        let manager = manager(&provider);

        assert!(manager.find(ip("10.0.0.5"), "example.com").await.is_none());
        // Unknown zone is logged, not raised.
        assert!(manager.find(ip("10.0.0.5"), "example.net").await.is_none());

        provider.insert_record("zone-1", "rec-1", "a.example.com", &ip("10.0.0.5"));
        let found = manager.find(ip("10.0.0.5"), "example.com").await.unwrap();
        assert_eq!(found.record_id, "rec-1");
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        provider.insert_record("zone-1", "rec-1", "a.example.com", &ip("10.0.0.5"));
        let manager = manager(&provider);

        assert!(manager.delete("rec-1", "example.com").await.unwrap());
        assert!(!manager.delete("rec-1", "example.com").await.unwrap());
        assert!(manager.find(ip("10.0.0.5"), "example.com").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_prunes_expired_entries() {
        let provider = Arc::new(MockDnsProvider::new().with_zone("example.com", "zone-1"));
        let manager = manager(&provider);

        manager
            .ensure_record(ip("10.0.0.5"), &letter("a"), 120, "example.com")
            .await
            .unwrap();
        assert!(manager.should_proceed(ip("10.0.0.6"), "example.com", &letter("a")));
        assert_eq!(manager.sweep(), 0);

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert_eq!(manager.sweep(), 2);
    }
}
