//! Usage analytics projection
//!
//! Pure derivation over a memory's learning state and the current time.
//! Two projections of the same record at different times may disagree;
//! nothing here writes anything back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::MemoryRecord;

/// Usage frequency bucket derived from `usage_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessFrequency {
    Unused,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl AccessFrequency {
    pub fn from_count(usage_count: i64) -> Self {
        match usage_count {
            0 => AccessFrequency::Unused,
            1..=5 => AccessFrequency::Low,
            6..=20 => AccessFrequency::Medium,
            21..=50 => AccessFrequency::High,
            _ => AccessFrequency::VeryHigh,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessFrequency::Unused => "unused",
            AccessFrequency::Low => "low",
            AccessFrequency::Medium => "medium",
            AccessFrequency::High => "high",
            AccessFrequency::VeryHigh => "very_high",
        }
    }
}

impl std::fmt::Display for AccessFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot analytics for one memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAnalytics {
    pub access_frequency: AccessFrequency,
    /// Step function of days since last access: 1.0 / 0.8 / 0.5 / 0.3
    pub recency_score: f64,
    /// Whole days since last access; absent if never accessed
    pub days_since_access: Option<i64>,
}

/// Project analytics for `record` as of `now`
pub fn project(record: &MemoryRecord, now: DateTime<Utc>) -> UsageAnalytics {
    let days_since_access = record.last_accessed.map(|at| (now - at).num_days());

    let recency_score = match days_since_access {
        None => 0.0,
        Some(d) if d <= 7 => 1.0,
        Some(d) if d <= 30 => 0.8,
        Some(d) if d <= 90 => 0.5,
        Some(_) => 0.3,
    };

    UsageAnalytics {
        access_frequency: AccessFrequency::from_count(record.usage_count),
        recency_score,
        days_since_access,
    }
}
