//! Key encoding utilities for `RocksDB`.
//!
//! Event keys lead with a big-endian millisecond timestamp so that iteration
//! order is chronological and a reverse scan yields newest-first.

use chrono::{DateTime, Utc};
use relay_fleet_core::{NodeIp, RoleTag};
use uuid::Uuid;

/// Length of an event key: 8-byte timestamp plus 16-byte UUID.
pub const EVENT_KEY_LEN: usize = 24;

const NODE_EVENT_SEPARATOR: u8 = 0x00;

/// Encode a node key (the textual IP).
#[must_use]
pub fn node_key(ip: &NodeIp) -> Vec<u8> {
    ip.to_string().into_bytes()
}

/// Encode a role key (the tag bytes).
#[must_use]
pub fn role_key(role: &RoleTag) -> Vec<u8> {
    role.as_str().as_bytes().to_vec()
}

/// Milliseconds since the epoch, saturating at zero for pre-epoch times.
#[must_use]
pub fn timestamp_ms(at: &DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_millis()).unwrap_or(0)
}

/// Encode an event key: `timestamp_ms || event_id`.
#[must_use]
pub fn event_key(at: &DateTime<Utc>, event_id: &Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(EVENT_KEY_LEN);
    key.extend_from_slice(&timestamp_ms(at).to_be_bytes());
    key.extend_from_slice(event_id.as_bytes());
    key
}

/// Encode a node-event index key: `ip || 0x00 || timestamp_ms || event_id`.
#[must_use]
pub fn node_event_key(ip: &NodeIp, at: &DateTime<Utc>, event_id: &Uuid) -> Vec<u8> {
    let mut key = node_event_prefix(ip);
    key.extend_from_slice(&event_key(at, event_id));
    key
}

/// Encode a node prefix for scanning all events of a node.
#[must_use]
pub fn node_event_prefix(ip: &NodeIp) -> Vec<u8> {
    let mut key = node_key(ip);
    key.push(NODE_EVENT_SEPARATOR);
    key
}

/// The first key sorting after every key with the node's event prefix.
#[must_use]
pub fn node_event_upper_bound(ip: &NodeIp) -> Vec<u8> {
    let mut key = node_key(ip);
    key.push(NODE_EVENT_SEPARATOR + 1);
    key
}

/// Extract the trailing event key from a node-event index key.
///
/// Returns `None` if the key is too short to contain one.
#[must_use]
pub fn extract_event_key(node_event_key: &[u8]) -> Option<&[u8]> {
    node_event_key
        .len()
        .checked_sub(EVENT_KEY_LEN)
        .map(|start| &node_event_key[start..])
}

/// Read the timestamp from the front of an event key.
#[must_use]
pub fn event_key_timestamp(event_key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = event_key.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn node_event_key_roundtrip() {
        let ip = NodeIp::parse("10.0.0.5").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let id = Uuid::new_v4();

        let key = node_event_key(&ip, &at, &id);
        assert!(key.starts_with(&node_event_prefix(&ip)));

        let extracted = extract_event_key(&key).unwrap();
        assert_eq!(extracted, event_key(&at, &id).as_slice());
        assert_eq!(
            event_key_timestamp(extracted),
            Some(timestamp_ms(&at))
        );
    }

    #[test]
    fn event_keys_sort_chronologically() {
        let id = Uuid::new_v4();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        assert!(event_key(&earlier, &id) < event_key(&later, &id));
    }

    #[test]
    fn prefixes_do_not_overlap_between_nodes() {
        // "10.0.0.1" is a textual prefix of "10.0.0.12"; the separator keeps scans apart.
        let a = NodeIp::parse("10.0.0.1").unwrap();
        let b = NodeIp::parse("10.0.0.12").unwrap();
        let at = Utc::now();
        let key_b = node_event_key(&b, &at, &Uuid::new_v4());

        assert!(!key_b.starts_with(&node_event_prefix(&a)));
        assert!(node_event_key(&a, &at, &Uuid::new_v4()) < node_event_upper_bound(&a));
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(extract_event_key(&[1, 2, 3]).is_none());
        assert!(event_key_timestamp(&[1, 2, 3]).is_none());
    }
}
