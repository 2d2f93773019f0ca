//! Pattern miner
//!
//! Scans a principal's memories and recent access events for hourly and
//! daily clusters, repeated sequences, and co-accessed pairs. The miner
//! only produces candidates; merging into persisted patterns is the
//! store's job so two runs over the same history converge instead of
//! duplicating.

use chrono::{Datelike, Duration, Timelike};
use std::collections::{BTreeMap, BTreeSet};

use crate::learning::AccessEvent;
use crate::memory::MemoryRecord;

use super::{
    CandidatePattern, MIN_CLUSTER_MEMORIES, MIN_CO_ACCESS_COUNT, MIN_SEQUENCE_OCCURRENCES,
};

/// Miner tunables
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Window for sequence adjacency and co-access pairing
    pub window: Duration,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            window: Duration::minutes(30),
        }
    }
}

/// Mine candidate patterns from persisted access state and recent events
pub fn mine(
    memories: &[MemoryRecord],
    events: &[AccessEvent],
    config: &MinerConfig,
) -> Vec<CandidatePattern> {
    let mut candidates = Vec::new();
    candidates.extend(mine_hourly(memories));
    candidates.extend(mine_daily(memories));
    candidates.extend(mine_sequences(events, config.window));
    candidates.extend(mine_co_access(events, config.window));
    candidates
}

/// Hour-of-day clusters: hours in which at least three distinct memories
/// were last accessed
fn mine_hourly(memories: &[MemoryRecord]) -> Vec<CandidatePattern> {
    let mut by_hour: BTreeMap<u32, BTreeSet<&str>> = BTreeMap::new();
    for memory in memories {
        if let Some(accessed) = memory.last_accessed {
            by_hour
                .entry(accessed.hour())
                .or_default()
                .insert(&memory.id);
        }
    }
    by_hour
        .into_iter()
        .filter(|(_, ids)| ids.len() >= MIN_CLUSTER_MEMORIES)
        .map(|(hour, ids)| {
            CandidatePattern::hourly(hour, ids.into_iter().map(str::to_string).collect())
        })
        .collect()
}

/// Day-of-week clusters (ISO weekday, Monday = 1)
fn mine_daily(memories: &[MemoryRecord]) -> Vec<CandidatePattern> {
    let mut by_day: BTreeMap<u32, BTreeSet<&str>> = BTreeMap::new();
    for memory in memories {
        if let Some(accessed) = memory.last_accessed {
            by_day
                .entry(accessed.weekday().number_from_monday())
                .or_default()
                .insert(&memory.id);
        }
    }
    by_day
        .into_iter()
        .filter(|(_, ids)| ids.len() >= MIN_CLUSTER_MEMORIES)
        .map(|(weekday, ids)| {
            CandidatePattern::daily(weekday, ids.into_iter().map(str::to_string).collect())
        })
        .collect()
}

/// Ordered triples observed at least twice, with each step inside the
/// window
fn mine_sequences(events: &[AccessEvent], window: Duration) -> Vec<CandidatePattern> {
    let events = sorted(events);
    let mut counts: BTreeMap<[String; 3], usize> = BTreeMap::new();

    for trio in events.windows(3) {
        let [a, b, c] = trio else { continue };
        if a.memory_id == b.memory_id || b.memory_id == c.memory_id || a.memory_id == c.memory_id {
            continue;
        }
        if b.at - a.at > window || c.at - b.at > window {
            continue;
        }
        *counts
            .entry([
                a.memory_id.clone(),
                b.memory_id.clone(),
                c.memory_id.clone(),
            ])
            .or_insert(0) += 1;
    }

    let window_minutes = window.num_minutes();
    counts
        .into_iter()
        .filter(|(_, count)| *count >= MIN_SEQUENCE_OCCURRENCES)
        .map(|(triple, _)| CandidatePattern::sequence(triple, window_minutes))
        .collect()
}

/// Pairs jointly accessed at least five times within the window, with
/// lead tallies for ordering
fn mine_co_access(events: &[AccessEvent], window: Duration) -> Vec<CandidatePattern> {
    let events = sorted(events);
    // pair (sorted) -> (count, leads of pair.0, leads of pair.1)
    let mut pairs: BTreeMap<(String, String), (u64, u64, u64)> = BTreeMap::new();

    for (i, first) in events.iter().enumerate() {
        for second in events.iter().skip(i + 1) {
            if second.at - first.at > window {
                break;
            }
            if first.memory_id == second.memory_id {
                continue;
            }
            let (key, first_leads) = if first.memory_id <= second.memory_id {
                (
                    (first.memory_id.clone(), second.memory_id.clone()),
                    true,
                )
            } else {
                (
                    (second.memory_id.clone(), first.memory_id.clone()),
                    false,
                )
            };
            let entry = pairs.entry(key).or_insert((0, 0, 0));
            entry.0 += 1;
            if first_leads {
                entry.1 += 1;
            } else {
                entry.2 += 1;
            }
        }
    }

    pairs
        .into_iter()
        .filter(|(_, (count, _, _))| *count >= MIN_CO_ACCESS_COUNT)
        .map(|((a, b), (count, a_first, b_first))| {
            CandidatePattern::co_access(a, b, count, a_first, b_first)
        })
        .collect()
}

fn sorted(events: &[AccessEvent]) -> Vec<AccessEvent> {
    let mut events = events.to_vec();
    events.sort_by(|a, b| a.at.cmp(&b.at));
    events
}

// ============================================================================
// TESTS
// ============================================================================
