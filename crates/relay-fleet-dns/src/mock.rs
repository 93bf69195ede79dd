//! In-memory DNS provider for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_fleet_core::NodeIp;

use crate::error::{DnsError, Result};
use crate::provider::{DnsProvider, DnsRecord};

/// A provider that keeps zones and records in memory and counts create calls.
#[derive(Default)]
pub struct MockDnsProvider {
    zones: HashMap<String, String>,
    records: Mutex<Vec<(String, DnsRecord)>>,
    create_calls: AtomicUsize,
    create_delay: Option<Duration>,
    already_exists_on_create: AtomicBool,
}

impl MockDnsProvider {
    /// Create an empty provider with no zones.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a zone.
    #[must_use]
    pub fn with_zone(mut self, base_domain: &str, zone_id: &str) -> Self {
        self.zones
            .insert(base_domain.to_string(), zone_id.to_string());
        self
    }

    /// Make every create call take `delay` before completing.
    #[must_use]
    pub const fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Make create store the record but answer with an "already exists" error.
    pub fn report_already_exists_on_create(&self) {
        self.already_exists_on_create.store(true, Ordering::SeqCst);
    }

    /// Seed an existing record.
    pub fn insert_record(&self, zone_id: &str, record_id: &str, name: &str, ip: &NodeIp) {
        self.records.lock().push((
            zone_id.to_string(),
            DnsRecord {
                id: record_id.to_string(),
                name: name.to_string(),
                content: ip.to_string(),
                ttl: 120,
            },
        ));
    }

    /// Drop every stored record, as if removed in the provider's dashboard.
    pub fn clear_records(&self) {
        self.records.lock().clear();
    }

    /// Number of create calls received.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of records currently stored.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl DnsProvider for MockDnsProvider {
    async fn find_zone(&self, base_domain: &str) -> Result<String> {
        self.zones
            .get(base_domain)
            .cloned()
            .ok_or_else(|| DnsError::ZoneNotFound(base_domain.to_string()))
    }

    async fn list_a_records(&self, zone_id: &str, ip: &NodeIp) -> Result<Vec<DnsRecord>> {
        let content = ip.to_string();
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|(zone, r)| zone == zone_id && r.content == content)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create_a_record(
        &self,
        zone_id: &str,
        name: &str,
        ip: &NodeIp,
        ttl: u32,
    ) -> Result<DnsRecord> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let record = DnsRecord {
            id: format!("rec-{call}"),
            name: name.to_string(),
            content: ip.to_string(),
            ttl,
        };
        self.records
            .lock()
            .push((zone_id.to_string(), record.clone()));

        if self.already_exists_on_create.load(Ordering::SeqCst) {
            return Err(DnsError::Provider {
                code: 81058,
                message: "An identical record already exists.".to_string(),
            });
        }
        Ok(record)
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|(zone, r)| !(zone == zone_id && r.id == record_id));
        if records.len() == before {
            return Err(DnsError::Provider {
                code: 81044,
                message: "Record does not exist.".to_string(),
            });
        }
        Ok(())
    }
}
