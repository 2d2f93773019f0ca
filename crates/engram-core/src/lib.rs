//! # Engram Core
//!
//! Adaptive retrieval engine for agent memories. Every memory carries its
//! own learning state - usage counters, helpfulness, per-context access
//! tallies - and every read feeds the state that shapes future reads:
//!
//! - **Usage tracking**: atomic per-record counters, fire-and-forget from
//!   read paths through a bounded dispatcher
//! - **Weighted ranking**: cosine similarity fused with usage, recency,
//!   and helpfulness under a per-principal weight vector
//! - **Weight adaptation**: the vector evolves from feedback ratios, one
//!   re-evaluation per ten-search window
//! - **Pattern mining**: hourly/daily clusters, repeated sequences, and
//!   co-access pairs with idempotent merge semantics
//! - **Prediction**: likely-next memories with per-source reasons and a
//!   content-addressed TTL cache
//! - **Maintenance**: duplicate, outdated, and archive buckets plus
//!   broken-reference counts
//!
//! The engine consumes embeddings, classification, and identity
//! validation from external providers behind retry and circuit-breaker
//! protection; it generates none of them itself.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{CreateMemoryInput, EngineConfig, MemoryEngine, SearchOptions, Store};
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::open(None)?);
//! let engine = MemoryEngine::new(store, embedder, EngineConfig::default());
//!
//! let memory = engine
//!     .create_memory("agent-7", CreateMemoryInput::from_text("prefers dark mode"))
//!     .await?;
//!
//! let results = engine
//!     .search("agent-7", "ui preferences", SearchOptions::default())
//!     .await?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod dispatcher;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod learning;
pub mod maintenance;
pub mod memory;
pub mod patterns;
pub mod predict;
pub mod ranking;
pub mod scheduler;
pub mod storage;
pub mod upstream;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{Error, Result};

// Configuration
pub use config::{
    BreakerConfig, DispatcherConfig, EngineConfig, MaintenanceConfig, PatternConfig,
    PredictorConfig, RankerConfig, SchedulerConfig, UpstreamConfig,
};

// Memory data model
pub use memory::{
    attr_map, project, AccessFrequency, AccessPatternData, AttrValue, CreateMemoryInput,
    MemoryPatch, MemoryRecord, Relationship, RelationshipType, UsageAnalytics,
};

// Learning state
pub use learning::{
    ActivityLog, FeedbackInput, LearningMetric, LearningWeights, MetricsReport, MetricType,
    TrendDirection,
};

// Ranking
pub use ranking::{RankedMemory, SearchOptions, SearchResponse};

// Patterns and suggestions
pub use patterns::{
    CandidatePattern, PatternType, RelationshipSuggestion, TemporalPattern,
};

// Prediction
pub use predict::{Prediction, PredictionRequest, PredictionSet};

// Maintenance
pub use maintenance::{DuplicatePair, MaintenanceReport, MemorySummary};

// Storage layer
pub use storage::{EmbeddingUpdate, Store, StoreStats};

// Engine facade
pub use engine::{
    AnalyzeReport, EngineStats, MemoryEngine, MemoryWithAnalytics, SmartCreateResult,
};

// Scheduler
pub use scheduler::{JobState, LearningScheduler, SchedulerHandle};

// Upstream contracts
pub use embedding::{cosine_similarity, Embedding, EmbeddingProvider};
pub use upstream::{
    BreakerSnapshot, CircuitBreaker, Classification, IdentityValidator, IdentityViolation,
    SaveCategory, SaveClassifier, ValidationReport,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        CreateMemoryInput, EngineConfig, Error, FeedbackInput, MemoryEngine, MemoryPatch,
        MemoryRecord, PredictionRequest, Result, SearchOptions, Store,
    };

    pub use crate::{Embedding, EmbeddingProvider};

    pub use crate::{LearningScheduler, SchedulerHandle};
}
