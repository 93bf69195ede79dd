//! Per-node health state machine.
//!
//! [`evaluate`] is a pure function of the previous state, the new sample,
//! and the clock. The monitor owns the state table and applies the returned
//! transition.

use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_fleet_store::EventKind;
use serde::Serialize;

use crate::metrics::NodeStatus;
use crate::notify::AlertKind;

/// In-memory health record for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthState {
    /// Last sampled status.
    pub status: NodeStatus,
    /// When the node last switched between up and down.
    pub changed_at: DateTime<Utc>,
    /// When the last alert for this node was enqueued.
    pub last_alert_at: Option<DateTime<Utc>>,
    /// Next evaluation is forced, as if the node had never been seen.
    pub newly_added: bool,
}

impl HealthState {
    /// State for a node that was just provisioned.
    #[must_use]
    pub const fn newly_added(now: DateTime<Utc>) -> Self {
        Self {
            status: NodeStatus::Unknown,
            changed_at: now,
            last_alert_at: None,
            newly_added: true,
        }
    }
}

/// Result of evaluating one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Event to append to the log, with its duration.
    pub event: Option<(EventKind, u64)>,
    /// Alert to enqueue, with its duration.
    pub alert: Option<(AlertKind, u64)>,
    /// State to store.
    pub next: HealthState,
}

/// Evaluate a sample against the previous state.
///
/// | previous        | sample | event               | alert             |
/// |-----------------|--------|---------------------|-------------------|
/// | none / new      | up     | `online` (0)        | up                |
/// | none / new      | down   | `offline_start` (0) | down              |
/// | down            | up     | `offline_end` (t)   | up (t)            |
/// | up              | down   | `offline_start` (0) | down              |
/// | down            | down   | none                | still down, after cooldown |
/// | up              | up     | none                | none              |
///
/// Offline and unknown both count as down.
#[must_use]
pub fn evaluate(
    prev: Option<&HealthState>,
    sampled: NodeStatus,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Transition {
    let Some(prev) = prev.filter(|p| !p.newly_added) else {
        let (event, alert) = if sampled.is_up() {
            (EventKind::Online, AlertKind::Up)
        } else {
            (EventKind::OfflineStart, AlertKind::Down)
        };
        return Transition {
            event: Some((event, 0)),
            alert: Some((alert, 0)),
            next: HealthState {
                status: sampled,
                changed_at: now,
                last_alert_at: Some(now),
                newly_added: false,
            },
        };
    };

    match (prev.status.is_up(), sampled.is_up()) {
        (false, true) => {
            let downtime = elapsed_secs(prev.changed_at, now);
            Transition {
                event: Some((EventKind::OfflineEnd, downtime)),
                alert: Some((AlertKind::Up, downtime)),
                next: HealthState {
                    status: sampled,
                    changed_at: now,
                    last_alert_at: Some(now),
                    newly_added: false,
                },
            }
        }
        (true, false) => Transition {
            event: Some((EventKind::OfflineStart, 0)),
            alert: Some((AlertKind::Down, 0)),
            next: HealthState {
                status: sampled,
                changed_at: now,
                last_alert_at: Some(now),
                newly_added: false,
            },
        },
        (false, false) => {
            let due = match prev.last_alert_at {
                None => true,
                Some(at) => (now - at).to_std().is_ok_and(|d| d >= cooldown),
            };
            let mut next = prev.clone();
            next.status = sampled;
            let alert = due.then(|| {
                next.last_alert_at = Some(now);
                (AlertKind::StillDown, elapsed_secs(prev.changed_at, now))
            });
            Transition {
                event: None,
                alert,
                next,
            }
        }
        (true, true) => {
            let mut next = prev.clone();
            next.status = sampled;
            Transition {
                event: None,
                alert: None,
                next,
            }
        }
    }
}

fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - since).num_seconds()).unwrap_or(0)
}
