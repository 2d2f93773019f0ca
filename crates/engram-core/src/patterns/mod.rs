//! Temporal and co-access patterns
//!
//! Detected regularities in a principal's access history. A pattern's
//! identity is `(principal, type, canonical key)`; re-observing the same
//! regularity merges into the existing row, bumping occurrences and
//! confidence instead of inserting a twin.

pub mod miner;
pub mod suggest;

pub use miner::{mine, MinerConfig};
pub use suggest::{suggest_from_patterns, RelationshipSuggestion, AUTO_APPLY_CONFIDENCE};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{attr_map, AttrValue};

/// Confidence assigned to a newly observed pattern
pub const INITIAL_CONFIDENCE: f64 = 0.5;

/// Confidence gained per re-observation, up to 1.0
pub const CONFIDENCE_STEP: f64 = 0.05;

/// Minimum distinct memories for an hourly/daily cluster
pub const MIN_CLUSTER_MEMORIES: usize = 3;

/// Minimum observations for a sequence pattern
pub const MIN_SEQUENCE_OCCURRENCES: usize = 2;

/// Minimum joint accesses for a co-access pair
pub const MIN_CO_ACCESS_COUNT: u64 = 5;

// ============================================================================
// PATTERN TYPES
// ============================================================================

/// Pattern families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Hourly,
    Daily,
    Weekly,
    Sequence,
    CoAccess,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Hourly => "hourly",
            PatternType::Daily => "daily",
            PatternType::Weekly => "weekly",
            PatternType::Sequence => "sequence",
            PatternType::CoAccess => "co_access",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "hourly" => Some(PatternType::Hourly),
            "daily" => Some(PatternType::Daily),
            "weekly" => Some(PatternType::Weekly),
            "sequence" => Some(PatternType::Sequence),
            "co_access" => Some(PatternType::CoAccess),
            _ => None,
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CANDIDATES
// ============================================================================

/// A pattern observation produced by one miner run, not yet merged
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePattern {
    pub pattern_type: PatternType,
    pub data: AttrValue,
}

impl CandidatePattern {
    pub fn hourly(hour: u32, mut memories: Vec<String>) -> Self {
        memories.sort();
        Self {
            pattern_type: PatternType::Hourly,
            data: attr_map([
                ("hour", AttrValue::Int(hour as i64)),
                ("memories", id_list(memories)),
            ]),
        }
    }

    pub fn daily(weekday: u32, mut memories: Vec<String>) -> Self {
        memories.sort();
        Self {
            pattern_type: PatternType::Daily,
            data: attr_map([
                ("weekday", AttrValue::Int(weekday as i64)),
                ("memories", id_list(memories)),
            ]),
        }
    }

    pub fn sequence(triple: [String; 3], window_minutes: i64) -> Self {
        Self {
            pattern_type: PatternType::Sequence,
            data: attr_map([
                ("sequence", id_list(triple.to_vec())),
                ("windowMinutes", AttrValue::Int(window_minutes)),
            ]),
        }
    }

    /// Canonical form orders the endpoints by ascending id; `lead_counts`
    /// remembers which endpoint tended to come first.
    pub fn co_access(a: String, b: String, count: u64, a_first: u64, b_first: u64) -> Self {
        let ((first, first_leads), (second, second_leads)) = if a <= b {
            ((a, a_first), (b, b_first))
        } else {
            ((b, b_first), (a, a_first))
        };
        Self {
            pattern_type: PatternType::CoAccess,
            data: attr_map([
                ("memories", id_list(vec![first.clone(), second.clone()])),
                ("count", AttrValue::Int(count as i64)),
                (
                    "leadCounts",
                    AttrValue::Map(
                        [
                            (first, AttrValue::Int(first_leads as i64)),
                            (second, AttrValue::Int(second_leads as i64)),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                ),
            ]),
        }
    }

    /// Identity portion of the pattern data as a stable string
    ///
    /// Only identity-bearing fields participate: volatile statistics such
    /// as co-access counts must not move a pattern to a new identity.
    pub fn canonical_key(&self) -> String {
        canonical_key(self.pattern_type, &self.data)
    }
}

fn id_list(ids: Vec<String>) -> AttrValue {
    AttrValue::List(ids.into_iter().map(AttrValue::Text).collect())
}

/// Canonical identity key for a pattern's data
pub fn canonical_key(pattern_type: PatternType, data: &AttrValue) -> String {
    let ids = |key: &str| -> String {
        data.get(key)
            .and_then(AttrValue::as_list)
            .map(|items| {
                items
                    .iter()
                    .filter_map(AttrValue::as_str)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default()
    };
    match pattern_type {
        PatternType::Hourly => format!(
            "hourly:{}:{}",
            data.get("hour").and_then(AttrValue::as_int).unwrap_or(-1),
            ids("memories")
        ),
        PatternType::Daily => format!(
            "daily:{}:{}",
            data.get("weekday").and_then(AttrValue::as_int).unwrap_or(-1),
            ids("memories")
        ),
        PatternType::Weekly => format!(
            "weekly:{}:{}",
            data.get("week").and_then(AttrValue::as_int).unwrap_or(-1),
            ids("memories")
        ),
        PatternType::Sequence => format!("sequence:{}", ids("sequence")),
        PatternType::CoAccess => format!("co_access:{}", ids("memories")),
    }
}

// ============================================================================
// PERSISTED PATTERN
// ============================================================================

/// A persisted pattern row
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalPattern {
    pub id: String,
    pub principal_id: String,
    pub pattern_type: PatternType,
    pub pattern_data: AttrValue,
    /// Grows by `CONFIDENCE_STEP` per re-observation, capped at 1.0
    pub confidence: f64,
    pub occurrences: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl TemporalPattern {
    /// Memory ids bound to this pattern
    pub fn memories(&self) -> Vec<&str> {
        let key = match self.pattern_type {
            PatternType::Sequence => "sequence",
            _ => "memories",
        };
        self.pattern_data
            .get(key)
            .and_then(AttrValue::as_list)
            .map(|items| items.iter().filter_map(AttrValue::as_str).collect())
            .unwrap_or_default()
    }

    /// Hour of day for hourly patterns
    pub fn hour(&self) -> Option<u32> {
        (self.pattern_type == PatternType::Hourly)
            .then(|| self.pattern_data.get("hour").and_then(AttrValue::as_int))
            .flatten()
            .and_then(|h| u32::try_from(h).ok())
    }

    /// ISO weekday (Monday = 1) for daily patterns
    pub fn weekday(&self) -> Option<u32> {
        (self.pattern_type == PatternType::Daily)
            .then(|| self.pattern_data.get("weekday").and_then(AttrValue::as_int))
            .flatten()
            .and_then(|d| u32::try_from(d).ok())
    }

    /// Canonically ordered endpoint pair for co-access patterns
    pub fn co_access_pair(&self) -> Option<(String, String)> {
        if self.pattern_type != PatternType::CoAccess {
            return None;
        }
        let ids = self.memories();
        if ids.len() == 2 {
            Some((ids[0].to_string(), ids[1].to_string()))
        } else {
            None
        }
    }

    /// Latest observed joint-access count for co-access patterns
    pub fn co_access_count(&self) -> u64 {
        self.pattern_data
            .get("count")
            .and_then(AttrValue::as_int)
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Share of observations where `id` was accessed first
    pub fn lead_share(&self, id: &str) -> f64 {
        let leads = self
            .pattern_data
            .get("leadCounts")
            .and_then(AttrValue::as_map);
        let Some(leads) = leads else { return 0.0 };
        let total: i64 = leads.values().filter_map(AttrValue::as_int).sum();
        if total == 0 {
            return 0.0;
        }
        let own = leads.get(id).and_then(AttrValue::as_int).unwrap_or(0);
        own as f64 / total as f64
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_type_roundtrip() {
        for t in [
            PatternType::Hourly,
            PatternType::Daily,
            PatternType::Weekly,
            PatternType::Sequence,
            PatternType::CoAccess,
        ] {
            assert_eq!(PatternType::parse_name(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_co_access_canonical_order() {
        let forward = CandidatePattern::co_access("m-b".into(), "m-a".into(), 6, 4, 2);
        let reverse = CandidatePattern::co_access("m-a".into(), "m-b".into(), 6, 2, 4);
        assert_eq!(forward.canonical_key(), reverse.canonical_key());
        assert_eq!(forward.canonical_key(), "co_access:m-a,m-b");
    }

    #[test]
    fn test_count_does_not_change_identity() {
        let few = CandidatePattern::co_access("m-a".into(), "m-b".into(), 5, 3, 2);
        let many = CandidatePattern::co_access("m-a".into(), "m-b".into(), 40, 30, 10);
        assert_eq!(few.canonical_key(), many.canonical_key());
    }

    #[test]
    fn test_hourly_key_sorts_memories() {
        let a = CandidatePattern::hourly(9, vec!["m-2".into(), "m-1".into(), "m-3".into()]);
        let b = CandidatePattern::hourly(9, vec!["m-3".into(), "m-1".into(), "m-2".into()]);
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_eq!(a.canonical_key(), "hourly:9:m-1,m-2,m-3");
    }

    #[test]
    fn test_lead_share() {
        let candidate = CandidatePattern::co_access("m-a".into(), "m-b".into(), 10, 9, 1);
        let pattern = TemporalPattern {
            id: "p".into(),
            principal_id: "pr".into(),
            pattern_type: PatternType::CoAccess,
            pattern_data: candidate.data,
            confidence: 0.5,
            occurrences: 1,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
        };
        assert!((pattern.lead_share("m-a") - 0.9).abs() < 1e-9);
        assert!((pattern.lead_share("m-b") - 0.1).abs() < 1e-9);
        assert_eq!(pattern.co_access_count(), 10);
        assert_eq!(
            pattern.co_access_pair(),
            Some(("m-a".to_string(), "m-b".to_string()))
        );
    }
}
