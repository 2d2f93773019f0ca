//! Engine configuration
//!
//! Typed configuration for every tunable the engine recognizes. Each
//! section ships working defaults so `EngineConfig::default()` needs no
//! further setup; the server layers file and environment values on top
//! before handing the struct to the engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub ranker: RankerConfig,
    pub predictor: PredictorConfig,
    pub maintenance: MaintenanceConfig,
    pub circuit_breaker: BreakerConfig,
    pub patterns: PatternConfig,
    pub dispatcher: DispatcherConfig,
    pub upstream: UpstreamConfig,
}

/// Background learning-cycle scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SchedulerConfig {
    /// Master switch for the background scheduler
    pub enabled: bool,
    /// Cadence between learning cycles
    pub interval_hours: u64,
    /// Apply high-confidence relationship suggestions automatically
    pub auto_apply_relationships: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 1,
            auto_apply_relationships: false,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.max(1) * 3600)
    }
}

/// Weighted ranker candidate-pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct RankerConfig {
    /// Candidate pool is `top_candidate_multiplier * k`, capped at `max_candidates`
    pub top_candidate_multiplier: usize,
    pub min_candidates: usize,
    pub max_candidates: usize,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            top_candidate_multiplier: 3,
            min_candidates: 1,
            max_candidates: 100,
        }
    }
}

/// Predictor cache and confidence floor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PredictorConfig {
    pub cache_ttl_seconds: u64,
    pub min_confidence: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 3600,
            min_confidence: 0.30,
        }
    }
}

/// Maintenance analyzer thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct MaintenanceConfig {
    /// Minimum token Jaccard similarity for a duplicate pair
    pub duplicate_threshold: f64,
    /// Days without access before a low-helpfulness memory is outdated
    pub outdated_days: i64,
    /// Age in days before a never-accessed memory is an archive candidate
    pub archive_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.85,
            outdated_days: 90,
            archive_days: 180,
        }
    }
}

/// Per-upstream circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub threshold: u32,
    /// Seconds the circuit stays open before half-opening
    pub timeout_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout_seconds: 60,
        }
    }
}

/// Pattern mining windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PatternConfig {
    /// Window for sequence and co-access detection
    pub sequence_window_minutes: i64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            sequence_window_minutes: 30,
        }
    }
}

/// Fire-and-forget tracking dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct DispatcherConfig {
    /// Bounded queue capacity; producers drop (and count) beyond this
    pub queue_capacity: usize,
    /// Worker tasks draining the queue
    pub workers: usize,
    /// Queue depth above which the scheduler sheds non-critical work
    pub high_water: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 2,
            high_water: 768,
        }
    }
}

/// Upstream call budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct UpstreamConfig {
    /// Per-call timeout for embedding and classifier providers
    pub request_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
        }
    }
}
