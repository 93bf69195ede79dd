//! Node registry for relay-fleet.
//!
//! This crate provides durable storage for nodes, role profiles, and the
//! status event log using `RocksDB` with column families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `nodes`: Node records, keyed by IP
//! - `roles`: Role profiles, keyed by role tag
//! - `events`: Status events in chronological key order
//! - `events_by_node`: Index for listing one node's events
//!
//! # Example
//!
//! ```no_run
//! use relay_fleet_store::{Registry, RocksRegistry};
//!
//! let registry = RocksRegistry::open("/tmp/relay-fleet-db").unwrap();
//!
//! // Events from the last 24 hours, newest first
//! let events = registry.list_events(24, None, 100).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksRegistry;
pub use types::{
    DnsBinding, EventKind, EventWindow, Node, RoleProfile, StatusEvent, MAX_EVENT_LIMIT,
};

use relay_fleet_core::{NodeIp, RoleTag};

/// The registry trait defining all persistence operations.
///
/// Every write is idempotent on retry: upserts overwrite in place and events
/// are keyed by their own id.
pub trait Registry: Send + Sync {
    // =========================================================================
    // Node Operations
    // =========================================================================

    /// Insert or update a node record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn add_or_update_node(&self, node: &Node) -> Result<()>;

    /// Get a node by IP.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_node(&self, ip: &NodeIp) -> Result<Option<Node>>;

    /// Delete a node and its status events.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the node doesn't exist.
    fn delete_node(&self, ip: &NodeIp) -> Result<()>;

    /// Atomically replace the node at `old_ip` with `node`.
    ///
    /// When the IP changes, the old row and its events are removed in the
    /// same write batch as the insert.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if `old_ip` is not registered, or
    /// `StoreError::Conflict` if the new IP belongs to another node.
    fn replace_node(&self, old_ip: &NodeIp, node: &Node) -> Result<()>;

    /// List all registered nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_nodes(&self) -> Result<Vec<Node>>;

    // =========================================================================
    // Role Operations
    // =========================================================================

    /// Insert or update a role profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_role(&self, profile: &RoleProfile) -> Result<()>;

    /// Get a role profile by tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_role(&self, role: &RoleTag) -> Result<Option<RoleProfile>>;

    /// List all role profiles.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_roles(&self) -> Result<Vec<RoleProfile>>;

    // =========================================================================
    // Event Operations
    // =========================================================================

    /// Append a status event to the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_event(&self, event: &StatusEvent) -> Result<()>;

    /// List events from the last `window_hours`, newest first.
    ///
    /// When `ip` is given only that node's events are returned. At most
    /// `limit` events are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_events(
        &self,
        window_hours: u32,
        ip: Option<&NodeIp>,
        limit: usize,
    ) -> Result<Vec<StatusEvent>>;
}
