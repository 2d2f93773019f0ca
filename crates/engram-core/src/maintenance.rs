//! Maintenance analyzer
//!
//! Surfaces duplicates, stale candidates, and broken references for a
//! principal. Every memory lands in at most one bucket; duplicates claim
//! first, then outdated, then archive candidates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use crate::config::MaintenanceConfig;
use crate::memory::{MemoryRecord, Relationship};

/// Pairwise duplicate scanning is quadratic; corpora beyond this are
/// truncated and flagged rather than scanned partially forever
pub const MAX_DUPLICATE_SCAN: usize = 2000;

// ============================================================================
// REPORT TYPES
// ============================================================================

/// A detected near-duplicate pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatePair {
    pub first_id: String,
    pub second_id: String,
    /// Token Jaccard similarity in [0, 1]
    pub similarity: f64,
}

/// Compact memory reference for report buckets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySummary {
    pub id: String,
    pub text_preview: String,
    pub helpfulness_score: f64,
    pub usage_count: i64,
    pub age_days: i64,
    pub days_since_access: Option<i64>,
}

impl MemorySummary {
    fn of(record: &MemoryRecord, now: DateTime<Utc>) -> Self {
        let preview: String = record.text.chars().take(120).collect();
        Self {
            id: record.id.clone(),
            text_preview: preview,
            helpfulness_score: record.helpfulness_score,
            usage_count: record.usage_count,
            age_days: record.age_days(now),
            days_since_access: record.last_accessed.map(|at| (now - at).num_days()),
        }
    }
}

/// The four disjoint maintenance buckets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub duplicates: Vec<DuplicatePair>,
    pub outdated: Vec<MemorySummary>,
    pub archive_candidates: Vec<MemorySummary>,
    pub broken_reference_count: usize,
    pub scanned: usize,
    /// Set when the duplicate scan was truncated to `MAX_DUPLICATE_SCAN`
    pub truncated: bool,
}

impl MaintenanceReport {
    pub fn stale_count(&self) -> usize {
        self.outdated.len()
    }
}

// ============================================================================
// TOKENIZATION
// ============================================================================

/// Lowercase, split on non-word characters, drop empties
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two token sets
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

// ============================================================================
// ANALYSIS
// ============================================================================

/// Produce the maintenance report for one principal's memories
pub fn analyze(
    memories: &[MemoryRecord],
    relationships: &[Relationship],
    config: &MaintenanceConfig,
    now: DateTime<Utc>,
) -> MaintenanceReport {
    let truncated = memories.len() > MAX_DUPLICATE_SCAN;
    if truncated {
        warn!(
            total = memories.len(),
            cap = MAX_DUPLICATE_SCAN,
            "duplicate scan truncated; oldest memories beyond the cap were skipped"
        );
    }
    let scan: &[MemoryRecord] = &memories[..memories.len().min(MAX_DUPLICATE_SCAN)];

    // Duplicates claim their members first.
    let mut duplicates = Vec::new();
    let mut claimed: HashSet<&str> = HashSet::new();
    let token_sets: Vec<HashSet<String>> = scan.iter().map(|m| tokenize(&m.text)).collect();
    for i in 0..scan.len() {
        for j in (i + 1)..scan.len() {
            let similarity = jaccard(&token_sets[i], &token_sets[j]);
            if similarity >= config.duplicate_threshold {
                duplicates.push(DuplicatePair {
                    first_id: scan[i].id.clone(),
                    second_id: scan[j].id.clone(),
                    similarity,
                });
                claimed.insert(&scan[i].id);
                claimed.insert(&scan[j].id);
            }
        }
    }

    // Outdated: unhelpful and untouched.
    let mut outdated = Vec::new();
    for memory in memories {
        if claimed.contains(memory.id.as_str()) {
            continue;
        }
        let stale = memory
            .last_accessed
            .map(|at| (now - at).num_days() >= config.outdated_days)
            .unwrap_or(false);
        if memory.helpfulness_score < 0.30 && stale {
            outdated.push(MemorySummary::of(memory, now));
            claimed.insert(&memory.id);
        }
    }

    // Archive: never used and old.
    let mut archive_candidates = Vec::new();
    for memory in memories {
        if claimed.contains(memory.id.as_str()) {
            continue;
        }
        if memory.usage_count == 0 && memory.age_days(now) >= config.archive_days {
            archive_candidates.push(MemorySummary::of(memory, now));
        }
    }

    // Relationships whose endpoints no longer resolve.
    let ids: HashSet<&str> = memories.iter().map(|m| m.id.as_str()).collect();
    let broken_reference_count = relationships
        .iter()
        .filter(|r| !ids.contains(r.from_id.as_str()) || !ids.contains(r.to_id.as_str()))
        .count();

    MaintenanceReport {
        duplicates,
        outdated,
        archive_candidates,
        broken_reference_count,
        scanned: memories.len(),
        truncated,
    }
}

// ============================================================================
// TESTS
// ============================================================================
