//! Predictor
//!
//! Anticipates the memories an agent is likely to need next from its
//! recent accesses: co-access patterns, outbound relationships, currently
//! matching temporal patterns, and (when context text is supplied)
//! semantic neighbours. Results are cached under a content-addressed key
//! with a TTL; the cache never crosses principals.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::learning::LearningWeights;
use crate::memory::Relationship;
use crate::patterns::{PatternType, TemporalPattern};

/// Reason tags attached to predictions
pub const REASON_CO_ACCESS: &str = "frequently_accessed_with";
pub const REASON_RELATIONSHIP: &str = "related_to_relationship";
pub const REASON_HOURLY: &str = "temporal_pattern_hourly";
pub const REASON_DAILY: &str = "temporal_pattern_daily";
pub const REASON_SEQUENCE: &str = "temporal_pattern_sequence";
pub const REASON_SEMANTIC: &str = "semantic_context";

// Channel scaling. Each channel alone can clear the default confidence
// floor when its underlying signal is strong.
const CO_ACCESS_SCALE: f64 = 0.6;
const RELATIONSHIP_BASE: f64 = 0.35;
const RELATIONSHIP_WEIGHT_SPAN: f64 = 0.75;
const TEMPORAL_SCALE: f64 = 0.7;
const SEMANTIC_SCALE: f64 = 0.5;

// ============================================================================
// REQUEST / RESULT TYPES
// ============================================================================

/// Input to the predictor
///
/// Uses `deny_unknown_fields` to prevent field injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PredictionRequest {
    /// Memory ids accessed recently, most recent last
    pub recent_ids: Vec<String>,
    /// Optional free-text context to match semantically
    pub context_text: Option<String>,
    /// Maximum predictions to return
    pub k: usize,
}

impl Default for PredictionRequest {
    fn default() -> Self {
        Self {
            recent_ids: Vec::new(),
            context_text: None,
            k: 5,
        }
    }
}

/// One predicted memory with its reasons
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub memory_id: String,
    /// Combined confidence, capped at 1.0
    pub confidence: f64,
    /// One tag per contributing source
    pub reasons: Vec<String>,
}

/// Predictor output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSet {
    pub predictions: Vec<Prediction>,
    /// Whether this response came from the cache
    pub cache_hit: bool,
    /// Set when the semantic channel was skipped because the embedding
    /// circuit was open
    pub degraded: bool,
}

// ============================================================================
// CACHE KEY
// ============================================================================

/// Content-addressed cache key over the full request tuple
///
/// Recent ids are sorted so permutations of the same set share an entry.
pub fn cache_key(
    principal_id: &str,
    context_text: Option<&str>,
    recent_ids: &[String],
    k: usize,
) -> String {
    let mut sorted = recent_ids.to_vec();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(principal_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(context_text.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    for id in &sorted {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(k.to_le_bytes());

    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// CANDIDATE SCORING
// ============================================================================

#[derive(Debug, Default)]
struct Candidate {
    confidence: f64,
    reasons: Vec<String>,
}

impl Candidate {
    fn add(&mut self, contribution: f64, reason: &str) {
        self.confidence = (self.confidence + contribution).min(1.0);
        if !self.reasons.iter().any(|r| r == reason) {
            self.reasons.push(reason.to_string());
        }
    }
}

/// Combine all candidate sources into ranked predictions
///
/// `semantic` pairs memory ids with cosine similarity to the context text
/// and is empty when no context was supplied or the provider was skipped.
pub fn combine(
    recent_ids: &[String],
    patterns: &[TemporalPattern],
    relationships: &[Relationship],
    semantic: &[(String, f64)],
    weights: &LearningWeights,
    min_confidence: f64,
    k: usize,
    now: DateTime<Utc>,
) -> Vec<Prediction> {
    let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
    let recent: Vec<&str> = recent_ids.iter().map(String::as_str).collect();
    let mut add = |id: &str, contribution: f64, reason: &str| {
        if recent.contains(&id) {
            return;
        }
        candidates
            .entry(id.to_string())
            .or_default()
            .add(contribution, reason);
    };

    for pattern in patterns {
        match pattern.pattern_type {
            PatternType::CoAccess => {
                let Some((a, b)) = pattern.co_access_pair() else {
                    continue;
                };
                let count = pattern.co_access_count();
                let contribution = CO_ACCESS_SCALE * (count as f64 / (count as f64 + 5.0));
                if recent.contains(&a.as_str()) {
                    add(&b, contribution, REASON_CO_ACCESS);
                }
                if recent.contains(&b.as_str()) {
                    add(&a, contribution, REASON_CO_ACCESS);
                }
            }
            PatternType::Hourly => {
                if pattern.hour() == Some(now.hour()) {
                    let contribution = TEMPORAL_SCALE * pattern.confidence;
                    for id in pattern.memories() {
                        add(id, contribution, REASON_HOURLY);
                    }
                }
            }
            PatternType::Daily => {
                if pattern.weekday() == Some(now.weekday().number_from_monday()) {
                    let contribution = TEMPORAL_SCALE * pattern.confidence;
                    for id in pattern.memories() {
                        add(id, contribution, REASON_DAILY);
                    }
                }
            }
            PatternType::Sequence => {
                // A recent id anywhere but the end of the triple predicts
                // its successor.
                let steps = pattern.memories();
                let contribution = TEMPORAL_SCALE * pattern.confidence;
                for window in steps.windows(2) {
                    if recent.contains(&window[0]) {
                        add(window[1], contribution, REASON_SEQUENCE);
                    }
                }
            }
            PatternType::Weekly => {}
        }
    }

    let relationship_factor =
        RELATIONSHIP_BASE + RELATIONSHIP_WEIGHT_SPAN * weights.relationship_weight;
    for relationship in relationships {
        if recent.contains(&relationship.from_id.as_str()) {
            add(
                &relationship.to_id,
                relationship.strength * relationship_factor,
                REASON_RELATIONSHIP,
            );
        }
    }

    for (id, similarity) in semantic {
        add(id, similarity.max(0.0) * SEMANTIC_SCALE, REASON_SEMANTIC);
    }

    let mut predictions: Vec<Prediction> = candidates
        .into_iter()
        .filter(|(_, c)| c.confidence >= min_confidence)
        .map(|(memory_id, c)| Prediction {
            memory_id,
            confidence: c.confidence,
            reasons: c.reasons,
        })
        .collect();

    predictions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
    predictions.truncate(k);
    predictions
}

// ============================================================================
// TESTS
// ============================================================================
