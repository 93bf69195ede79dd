//! `RocksDB` registry implementation.
//!
//! This module provides the `RocksRegistry` implementation of the `Registry` trait.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use relay_fleet_core::{NodeIp, RoleTag};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{Node, RoleProfile, StatusEvent};
use crate::Registry;

/// RocksDB-backed registry.
pub struct RocksRegistry {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl RocksRegistry {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(db_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode every value in a column family.
    fn scan_all<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let cf = self.cf(name)?;
        self.db
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item.map_err(db_err)?;
                Self::deserialize(&value)
            })
            .collect()
    }

    /// Stage deletion of every event belonging to `ip`.
    fn stage_event_cascade(&self, batch: &mut WriteBatch, ip: &NodeIp) -> Result<usize> {
        let cf_events = self.cf(cf::EVENTS)?;
        let cf_by_node = self.cf(cf::EVENTS_BY_NODE)?;
        let prefix = keys::node_event_prefix(ip);

        let mut removed = 0;
        let iter = self
            .db
            .iterator_cf(&cf_by_node, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(event_key) = keys::extract_event_key(&key) {
                batch.delete_cf(&cf_events, event_key);
            }
            batch.delete_cf(&cf_by_node, &key);
            removed += 1;
        }
        Ok(removed)
    }
}

impl Registry for RocksRegistry {
    // =========================================================================
    // Node Operations
    // =========================================================================

    fn add_or_update_node(&self, node: &Node) -> Result<()> {
        let cf = self.cf(cf::NODES)?;
        let value = Self::serialize(node)?;
        self.db
            .put_cf(&cf, keys::node_key(&node.ip), value)
            .map_err(db_err)
    }

    fn get_node(&self, ip: &NodeIp) -> Result<Option<Node>> {
        let cf = self.cf(cf::NODES)?;
        self.db
            .get_cf(&cf, keys::node_key(ip))
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn delete_node(&self, ip: &NodeIp) -> Result<()> {
        let cf_nodes = self.cf(cf::NODES)?;
        if self.get_node(ip)?.is_none() {
            return Err(StoreError::NotFound);
        }

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_nodes, keys::node_key(ip));
        let removed = self.stage_event_cascade(&mut batch, ip)?;

        self.db.write(batch).map_err(db_err)?;
        tracing::debug!(ip = %ip, events_removed = removed, "Deleted node");
        Ok(())
    }

    fn replace_node(&self, old_ip: &NodeIp, node: &Node) -> Result<()> {
        let cf_nodes = self.cf(cf::NODES)?;
        if self.get_node(old_ip)?.is_none() {
            return Err(StoreError::NotFound);
        }

        let mut batch = WriteBatch::default();
        if *old_ip != node.ip {
            if self.get_node(&node.ip)?.is_some() {
                return Err(StoreError::Conflict(format!(
                    "node {} is already registered",
                    node.ip
                )));
            }
            batch.delete_cf(&cf_nodes, keys::node_key(old_ip));
            self.stage_event_cascade(&mut batch, old_ip)?;
        }
        batch.put_cf(&cf_nodes, keys::node_key(&node.ip), Self::serialize(node)?);

        self.db.write(batch).map_err(db_err)
    }

    fn list_nodes(&self) -> Result<Vec<Node>> {
        self.scan_all(cf::NODES)
    }

    // =========================================================================
    // Role Operations
    // =========================================================================

    fn put_role(&self, profile: &RoleProfile) -> Result<()> {
        let cf = self.cf(cf::ROLES)?;
        let value = Self::serialize(profile)?;
        self.db
            .put_cf(&cf, keys::role_key(&profile.role), value)
            .map_err(db_err)
    }

    fn get_role(&self, role: &RoleTag) -> Result<Option<RoleProfile>> {
        let cf = self.cf(cf::ROLES)?;
        self.db
            .get_cf(&cf, keys::role_key(role))
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_roles(&self) -> Result<Vec<RoleProfile>> {
        self.scan_all(cf::ROLES)
    }

    // =========================================================================
    // Event Operations
    // =========================================================================

    fn append_event(&self, event: &StatusEvent) -> Result<()> {
        let cf_events = self.cf(cf::EVENTS)?;
        let cf_by_node = self.cf(cf::EVENTS_BY_NODE)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_events,
            keys::event_key(&event.at, &event.event_id),
            Self::serialize(event)?,
        );
        batch.put_cf(
            &cf_by_node,
            keys::node_event_key(&event.ip, &event.at, &event.event_id),
            [],
        );

        self.db.write(batch).map_err(db_err)
    }

    fn list_events(
        &self,
        window_hours: u32,
        ip: Option<&NodeIp>,
        limit: usize,
    ) -> Result<Vec<StatusEvent>> {
        let since = Utc::now() - chrono::Duration::hours(i64::from(window_hours));
        let cutoff = keys::timestamp_ms(&since);
        let cf_events = self.cf(cf::EVENTS)?;
        let mut events = Vec::new();
        if limit == 0 {
            return Ok(events);
        }

        let Some(ip) = ip else {
            for item in self.db.iterator_cf(&cf_events, IteratorMode::End) {
                let (key, value) = item.map_err(db_err)?;
                if keys::event_key_timestamp(&key).is_some_and(|ts| ts < cutoff) {
                    break;
                }
                events.push(Self::deserialize(&value)?);
                if events.len() >= limit {
                    break;
                }
            }
            return Ok(events);
        };

        let cf_by_node = self.cf(cf::EVENTS_BY_NODE)?;
        let prefix = keys::node_event_prefix(ip);
        let upper = keys::node_event_upper_bound(ip);
        let iter = self
            .db
            .iterator_cf(&cf_by_node, IteratorMode::From(&upper, Direction::Reverse));

        for item in iter {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(event_key) = keys::extract_event_key(&key) else {
                continue;
            };
            if keys::event_key_timestamp(event_key).is_some_and(|ts| ts < cutoff) {
                break;
            }
            if let Some(data) = self.db.get_cf(&cf_events, event_key).map_err(db_err)? {
                events.push(Self::deserialize(&data)?);
            }
            if events.len() >= limit {
                break;
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DnsBinding, EventKind};
    use relay_fleet_core::RoleLetter;
    use tempfile::TempDir;

    fn create_test_registry() -> (RocksRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = RocksRegistry::open(dir.path()).unwrap();
        (registry, dir)
    }

    fn ip(s: &str) -> NodeIp {
        NodeIp::parse(s).unwrap()
    }

    fn role(s: &str) -> RoleTag {
        RoleTag::new(s).unwrap()
    }

    fn event_at(node: &str, kind: EventKind, minutes_ago: i64) -> StatusEvent {
        StatusEvent::new(
            ip(node),
            kind,
            Utc::now() - chrono::Duration::minutes(minutes_ago),
            Some(0),
        )
    }

    #[test]
    fn node_crud() {
        let (registry, _dir) = create_test_registry();
        let node = Node::new(ip("10.0.0.5"), role("eu-1"));

        // Create
        registry.add_or_update_node(&node).unwrap();

        // Read
        let retrieved = registry.get_node(&node.ip).unwrap().unwrap();
        assert_eq!(retrieved, node);

        // Upsert is idempotent
        registry.add_or_update_node(&node).unwrap();
        assert_eq!(registry.list_nodes().unwrap().len(), 1);

        // Delete
        registry.delete_node(&node.ip).unwrap();
        assert!(registry.get_node(&node.ip).unwrap().is_none());
    }

    #[test]
    fn delete_unknown_node_is_not_found() {
        let (registry, _dir) = create_test_registry();
        let result = registry.delete_node(&ip("10.0.0.9"));
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[test]
    fn delete_node_cascades_events() {
        let (registry, _dir) = create_test_registry();
        registry
            .add_or_update_node(&Node::new(ip("10.0.0.1"), role("eu-1")))
            .unwrap();
        registry
            .add_or_update_node(&Node::new(ip("10.0.0.12"), role("eu-1")))
            .unwrap();
        registry
            .append_event(&event_at("10.0.0.1", EventKind::Online, 5))
            .unwrap();
        registry
            .append_event(&event_at("10.0.0.12", EventKind::Online, 4))
            .unwrap();

        registry.delete_node(&ip("10.0.0.1")).unwrap();

        let remaining = registry.list_events(24, None, 100).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].ip, ip("10.0.0.12"));
    }

    #[test]
    fn replace_node_moves_ip() {
        let (registry, _dir) = create_test_registry();
        let old = Node::new(ip("10.0.0.5"), role("eu-1"));
        registry.add_or_update_node(&old).unwrap();
        registry
            .append_event(&event_at("10.0.0.5", EventKind::Online, 1))
            .unwrap();

        let mut moved = old.clone();
        moved.ip = ip("10.0.0.6");
        moved.role = role("us-1");
        registry.replace_node(&old.ip, &moved).unwrap();

        assert!(registry.get_node(&old.ip).unwrap().is_none());
        assert_eq!(registry.get_node(&moved.ip).unwrap().unwrap().role, role("us-1"));
        assert!(registry
            .list_events(24, Some(&old.ip), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn replace_node_rejects_taken_ip() {
        let (registry, _dir) = create_test_registry();
        let a = Node::new(ip("10.0.0.5"), role("eu-1"));
        let b = Node::new(ip("10.0.0.6"), role("eu-1"));
        registry.add_or_update_node(&a).unwrap();
        registry.add_or_update_node(&b).unwrap();

        let mut moved = a.clone();
        moved.ip = b.ip;
        let result = registry.replace_node(&a.ip, &moved);
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(registry.get_node(&a.ip).unwrap().is_some());
    }

    #[test]
    fn replace_missing_node_is_not_found() {
        let (registry, _dir) = create_test_registry();
        let node = Node::new(ip("10.0.0.5"), role("eu-1"));
        let result = registry.replace_node(&ip("10.0.0.4"), &node);
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[test]
    fn role_crud() {
        let (registry, _dir) = create_test_registry();
        let profile = RoleProfile {
            role: role("eu-1"),
            display_name: "EU 1".to_string(),
            routing_key: "vless://id@host:443".to_string(),
            dns: Some(DnsBinding {
                domain: "example.com".to_string(),
                letter: RoleLetter::new("a").unwrap(),
            }),
        };

        registry.put_role(&profile).unwrap();
        assert_eq!(registry.get_role(&profile.role).unwrap(), Some(profile.clone()));
        assert_eq!(registry.list_roles().unwrap(), vec![profile]);
        assert!(registry.get_role(&role("missing")).unwrap().is_none());
    }

    #[test]
    fn list_events_newest_first_with_limit() {
        let (registry, _dir) = create_test_registry();
        registry
            .append_event(&event_at("10.0.0.5", EventKind::Online, 30))
            .unwrap();
        registry
            .append_event(&event_at("10.0.0.5", EventKind::OfflineStart, 20))
            .unwrap();
        registry
            .append_event(&event_at("10.0.0.5", EventKind::OfflineEnd, 10))
            .unwrap();

        let events = registry.list_events(24, None, 2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::OfflineEnd);
        assert_eq!(events[1].kind, EventKind::OfflineStart);
    }

    #[test]
    fn list_events_applies_window_and_node_filter() {
        let (registry, _dir) = create_test_registry();
        registry
            .append_event(&event_at("10.0.0.5", EventKind::Online, 60 * 48))
            .unwrap();
        registry
            .append_event(&event_at("10.0.0.5", EventKind::OfflineStart, 5))
            .unwrap();
        registry
            .append_event(&event_at("10.0.0.6", EventKind::Online, 3))
            .unwrap();

        let node_events = registry
            .list_events(24, Some(&ip("10.0.0.5")), 100)
            .unwrap();
        assert_eq!(node_events.len(), 1);
        assert_eq!(node_events[0].kind, EventKind::OfflineStart);

        let week = registry
            .list_events(24 * 7, Some(&ip("10.0.0.5")), 100)
            .unwrap();
        assert_eq!(week.len(), 2);

        let all = registry.list_events(24, None, 100).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn append_event_is_idempotent() {
        let (registry, _dir) = create_test_registry();
        let event = event_at("10.0.0.5", EventKind::Online, 1);
        registry.append_event(&event).unwrap();
        registry.append_event(&event).unwrap();
        assert_eq!(registry.list_events(24, None, 10).unwrap().len(), 1);
    }
}
