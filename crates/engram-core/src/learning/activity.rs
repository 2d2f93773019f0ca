//! Recent-access activity log
//!
//! Bounded per-principal ring of access events. Sequence and co-access
//! mining need event-level ordering that the persisted per-memory state
//! does not carry; this ring supplies it. The ring is deliberately
//! ephemeral - mined patterns are the durable artifact - and its bound
//! keeps memory flat under load.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Events retained per principal
pub const MAX_EVENTS_PER_PRINCIPAL: usize = 1024;

/// Events older than this are dropped on the next write
pub const EVENT_RETENTION_HOURS: i64 = 24;

/// One recorded access
#[derive(Debug, Clone)]
pub struct AccessEvent {
    pub memory_id: String,
    pub context: Option<String>,
    pub at: DateTime<Utc>,
}

/// Bounded in-process access history
#[derive(Debug, Default)]
pub struct ActivityLog {
    rings: Mutex<HashMap<String, VecDeque<AccessEvent>>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one access for `principal_id`
    pub fn record(&self, principal_id: &str, memory_id: &str, context: Option<&str>) {
        self.record_at(principal_id, memory_id, context, Utc::now());
    }

    /// Record with an explicit timestamp
    pub fn record_at(
        &self,
        principal_id: &str,
        memory_id: &str,
        context: Option<&str>,
        at: DateTime<Utc>,
    ) {
        let mut rings = match self.rings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ring = rings.entry(principal_id.to_string()).or_default();

        let horizon = at - Duration::hours(EVENT_RETENTION_HOURS);
        while ring.front().is_some_and(|e| e.at < horizon) {
            ring.pop_front();
        }
        while ring.len() >= MAX_EVENTS_PER_PRINCIPAL {
            ring.pop_front();
        }

        ring.push_back(AccessEvent {
            memory_id: memory_id.to_string(),
            context: context.map(str::to_string),
            at,
        });
    }

    /// Time-ordered snapshot of a principal's recent events
    pub fn snapshot(&self, principal_id: &str) -> Vec<AccessEvent> {
        let rings = match self.rings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rings
            .get(principal_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a principal's history (e.g. after bulk deletion)
    pub fn clear(&self, principal_id: &str) {
        if let Ok(mut rings) = self.rings.lock() {
            rings.remove(principal_id);
        }
    }
}
