//! Relationship suggestions
//!
//! Proposes typed edges from strong co-access patterns plus tag overlap.
//! Suggestions are returned to the caller; the engine applies them only
//! when auto-apply is enabled and confidence clears the bar, relying on
//! the store's `(from, to)` uniqueness so re-application is a no-op.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::memory::{MemoryRecord, RelationshipType};

use super::{PatternType, TemporalPattern, MIN_CO_ACCESS_COUNT};

/// Confidence required before a suggestion may be auto-applied
pub const AUTO_APPLY_CONFIDENCE: f64 = 0.75;

/// Lead share above which the pair's ordering counts as consistent
const ORDERING_CONSISTENCY: f64 = 0.80;

/// A proposed edge between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSuggestion {
    pub from_id: String,
    pub to_id: String,
    pub rel_type: RelationshipType,
    pub confidence: f64,
    pub explanation: String,
    pub co_access_count: u64,
    pub common_tag_count: usize,
}

impl RelationshipSuggestion {
    pub fn auto_applicable(&self) -> bool {
        self.confidence >= AUTO_APPLY_CONFIDENCE
    }
}

/// Derive suggestions from a principal's persisted co-access patterns
///
/// `memories` maps id to record for tag lookup; pairs with a missing
/// endpoint are skipped (the memory was deleted since mining).
pub fn suggest_from_patterns(
    patterns: &[TemporalPattern],
    memories: &HashMap<String, MemoryRecord>,
) -> Vec<RelationshipSuggestion> {
    let mut suggestions: Vec<RelationshipSuggestion> = patterns
        .iter()
        .filter(|p| p.pattern_type == PatternType::CoAccess)
        .filter_map(|pattern| {
            let (a, b) = pattern.co_access_pair()?;
            let count = pattern.co_access_count();
            if count < MIN_CO_ACCESS_COUNT {
                return None;
            }
            let first = memories.get(&a)?;
            let second = memories.get(&b)?;

            let common_tags = common_tag_count(first, second);
            let confidence = (0.5
                + 0.03 * common_tags as f64
                + 0.02 * (count.saturating_sub(MIN_CO_ACCESS_COUNT)).min(20) as f64)
                .clamp(0.0, 1.0);

            // Consistent ordering promotes the generic edge to `follows`,
            // pointing from the habitual leader to the follower.
            let (from_id, to_id, rel_type) = if pattern.lead_share(&a) >= ORDERING_CONSISTENCY {
                (a.clone(), b.clone(), RelationshipType::Follows)
            } else if pattern.lead_share(&b) >= ORDERING_CONSISTENCY {
                (b.clone(), a.clone(), RelationshipType::Follows)
            } else {
                (a.clone(), b.clone(), RelationshipType::RelatedTo)
            };

            let explanation = format!(
                "accessed together {count} times with {common_tags} shared tags"
            );

            Some(RelationshipSuggestion {
                from_id,
                to_id,
                rel_type,
                confidence,
                explanation,
                co_access_count: count,
                common_tag_count: common_tags,
            })
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.from_id.cmp(&b.from_id))
            .then_with(|| a.to_id.cmp(&b.to_id))
    });
    suggestions
}

fn common_tag_count(a: &MemoryRecord, b: &MemoryRecord) -> usize {
    a.tags.iter().filter(|tag| b.tags.contains(tag)).count()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::CreateMemoryInput;
    use crate::patterns::CandidatePattern;
    use chrono::Utc;

    fn memory(id: &str, tags: &[&str]) -> MemoryRecord {
        let mut input = CreateMemoryInput::from_text("x");
        input.tags = tags.iter().map(|t| t.to_string()).collect();
        let mut record = MemoryRecord::new("p", input);
        record.id = id.to_string();
        record
    }

    fn pattern(a: &str, b: &str, count: u64, a_first: u64, b_first: u64) -> TemporalPattern {
        let candidate =
            CandidatePattern::co_access(a.to_string(), b.to_string(), count, a_first, b_first);
        TemporalPattern {
            id: uuid::Uuid::new_v4().to_string(),
            principal_id: "p".to_string(),
            pattern_type: PatternType::CoAccess,
            pattern_data: candidate.data,
            confidence: 0.5,
            occurrences: 1,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    fn memory_map(records: Vec<MemoryRecord>) -> HashMap<String, MemoryRecord> {
        records.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    #[test]
    fn test_confidence_formula() {
        let memories = memory_map(vec![
            memory("m-a", &["rust", "async"]),
            memory("m-b", &["rust", "db"]),
        ]);
        let patterns = vec![pattern("m-a", "m-b", 15, 8, 7)];
        let suggestions = suggest_from_patterns(&patterns, &memories);

        assert_eq!(suggestions.len(), 1);
        // 0.5 + 0.03 * 1 common tag + 0.02 * (15 - 5)
        assert!((suggestions[0].confidence - 0.73).abs() < 1e-9);
        assert_eq!(suggestions[0].rel_type, RelationshipType::RelatedTo);
        assert!(!suggestions[0].auto_applicable());
    }

    #[test]
    fn test_extra_count_is_capped() {
        let memories = memory_map(vec![memory("m-a", &[]), memory("m-b", &[])]);
        let patterns = vec![pattern("m-a", "m-b", 100, 50, 50)];
        let suggestions = suggest_from_patterns(&patterns, &memories);
        // 0.5 + 0.02 * min(20, 95)
        assert!((suggestions[0].confidence - 0.9).abs() < 1e-9);
        assert!(suggestions[0].auto_applicable());
    }

    #[test]
    fn test_consistent_ordering_becomes_follows() {
        let memories = memory_map(vec![memory("m-a", &[]), memory("m-b", &[])]);
        let patterns = vec![pattern("m-a", "m-b", 10, 9, 1)];
        let suggestions = suggest_from_patterns(&patterns, &memories);
        assert_eq!(suggestions[0].rel_type, RelationshipType::Follows);
        assert_eq!(suggestions[0].from_id, "m-a");
        assert_eq!(suggestions[0].to_id, "m-b");
    }

    #[test]
    fn test_follower_leading_flips_direction() {
        let memories = memory_map(vec![memory("m-a", &[]), memory("m-b", &[])]);
        let patterns = vec![pattern("m-a", "m-b", 10, 1, 9)];
        let suggestions = suggest_from_patterns(&patterns, &memories);
        assert_eq!(suggestions[0].rel_type, RelationshipType::Follows);
        assert_eq!(suggestions[0].from_id, "m-b");
    }

    #[test]
    fn test_missing_endpoint_skipped() {
        let memories = memory_map(vec![memory("m-a", &[])]);
        let patterns = vec![pattern("m-a", "m-gone", 10, 5, 5)];
        assert!(suggest_from_patterns(&patterns, &memories).is_empty());
    }

    #[test]
    fn test_below_threshold_skipped() {
        let memories = memory_map(vec![memory("m-a", &[]), memory("m-b", &[])]);
        let patterns = vec![pattern("m-a", "m-b", 4, 2, 2)];
        assert!(suggest_from_patterns(&patterns, &memories).is_empty());
    }

    #[test]
    fn test_double_run_same_output() {
        let memories = memory_map(vec![
            memory("m-a", &["x"]),
            memory("m-b", &["x"]),
            memory("m-c", &[]),
        ]);
        let patterns = vec![
            pattern("m-a", "m-b", 12, 6, 6),
            pattern("m-b", "m-c", 7, 6, 1),
        ];
        let first = suggest_from_patterns(&patterns, &memories);
        let second = suggest_from_patterns(&patterns, &memories);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.from_id, b.from_id);
            assert_eq!(a.to_id, b.to_id);
            assert_eq!(a.rel_type, b.rel_type);
        }
    }
}
