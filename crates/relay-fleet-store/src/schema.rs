//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Node records, keyed by the node's IP string.
    pub const NODES: &str = "nodes";

    /// Role profiles, keyed by role tag.
    pub const ROLES: &str = "roles";

    /// Status events, keyed by `timestamp_ms || event_id`.
    pub const EVENTS: &str = "events";

    /// Index: events by node, keyed by `ip || 0x00 || timestamp_ms || event_id`.
    pub const EVENTS_BY_NODE: &str = "events_by_node";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::NODES, cf::ROLES, cf::EVENTS, cf::EVENTS_BY_NODE]
}
