//! Domain types stored in the registry.
//!
//! These types represent the persisted state of nodes, role profiles, and the
//! status event log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use relay_fleet_core::{NodeIp, RoleLetter, RoleTag};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on the number of events returned by a single query.
pub const MAX_EVENT_LIMIT: usize = 1000;

/// A managed relay node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// The node's IP address (unique key).
    pub ip: NodeIp,
    /// The role profile assigned to this node.
    pub role: RoleTag,
    /// When the node was first registered.
    pub installed_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a node record stamped with the current time.
    #[must_use]
    pub fn new(ip: NodeIp, role: RoleTag) -> Self {
        let now = Utc::now();
        Self {
            ip,
            role,
            installed_at: now,
            updated_at: now,
        }
    }
}

/// A named configuration profile that nodes are assigned to.
///
/// Profiles are synced from an external source and are read-only to the
/// orchestration workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleProfile {
    /// Role tag (key).
    pub role: RoleTag,
    /// Human-readable name.
    pub display_name: String,
    /// Opaque routing key material used to build the outbound descriptor.
    pub routing_key: String,
    /// DNS binding, if nodes of this role get an A record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsBinding>,
}

/// Where a role's nodes are published in DNS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DnsBinding {
    /// Domain under which the role-letter subdomain is created.
    pub domain: String,
    /// Subdomain discriminator.
    pub letter: RoleLetter,
}

impl DnsBinding {
    /// The fully-qualified record name, `<letter>.<domain>`.
    #[must_use]
    pub fn record_name(&self) -> String {
        format!("{}.{}", self.letter, self.domain)
    }
}

/// Kind of a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventKind {
    /// First observation of a node, seen online.
    Online = 1,
    /// Node went down.
    OfflineStart = 2,
    /// Node came back after being down.
    OfflineEnd = 3,
}

impl EventKind {
    /// Convert the kind to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// The wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::OfflineStart => "offline_start",
            Self::OfflineEnd => "offline_end",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable log record of a status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Unique event identifier. Re-appending the same id overwrites in place.
    pub event_id: Uuid,
    /// The node this event belongs to.
    pub ip: NodeIp,
    /// What happened.
    pub kind: EventKind,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Seconds spent in the prior state, when applicable.
    pub duration_seconds: Option<u64>,
}

impl StatusEvent {
    /// Create a new event with a fresh id.
    #[must_use]
    pub fn new(
        ip: NodeIp,
        kind: EventKind,
        at: DateTime<Utc>,
        duration_seconds: Option<u64>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            ip,
            kind,
            at,
            duration_seconds,
        }
    }
}

/// Standard look-back windows for event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventWindow {
    /// Last 24 hours.
    #[default]
    #[serde(rename = "24h")]
    Day,
    /// Last 7 days.
    #[serde(rename = "7d")]
    Week,
    /// Last 30 days.
    #[serde(rename = "30d")]
    Month,
}

impl EventWindow {
    /// Window length in hours.
    #[must_use]
    pub const fn hours(self) -> u32 {
        match self {
            Self::Day => 24,
            Self::Week => 24 * 7,
            Self::Month => 24 * 30,
        }
    }
}

impl FromStr for EventWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            other => Err(format!("unknown event window: {other}")),
        }
    }
}
