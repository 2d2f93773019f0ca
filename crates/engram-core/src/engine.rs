//! Memory engine
//!
//! The transport-agnostic facade over the store, the upstream providers,
//! and the learning machinery. Every operation is scoped to a principal;
//! the thin HTTP layer maps routes onto these methods 1:1.

use chrono::{Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dispatcher::{Dispatcher, TrackTask};
use crate::embedding::{Embedding, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::learning::{
    next_score, summarize, ActivityLog, FeedbackInput, LearningMetric, LearningWeights,
    MetricsReport, MetricType,
};
use crate::maintenance::{self, MaintenanceReport};
use crate::memory::{
    attr_map, project, AttrValue, CreateMemoryInput, MemoryPatch, MemoryRecord, Relationship,
    UsageAnalytics,
};
use crate::patterns::{
    mine, suggest_from_patterns, MinerConfig, RelationshipSuggestion, TemporalPattern,
};
use crate::predict::{cache_key, combine, PredictionRequest, PredictionSet};
use crate::ranking::{
    candidate_pool_size, clamp_k, rank, SearchOptions, SearchResponse,
};
use crate::storage::{EmbeddingUpdate, Store, StoreStats};
use crate::upstream::{
    retry::with_retry_timeout, BreakerSnapshot, CircuitBreaker, Classification,
    IdentityValidator, RetryPolicy, SaveClassifier, ValidationReport,
};

/// Query embeddings cached per process
const QUERY_CACHE_CAPACITY: usize = 100;

/// Memories loaded per learning cycle or maintenance pass
const CYCLE_SCAN_LIMIT: i64 = 10_000;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// A memory with its projected analytics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryWithAnalytics {
    pub memory: MemoryRecord,
    pub analytics: UsageAnalytics,
}

/// Outcome of the auto-save path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartCreateResult {
    pub saved: bool,
    pub category: Option<String>,
    pub confidence: Option<f64>,
    pub reasoning: String,
    pub memory: Option<MemoryRecord>,
}

/// Combined output of the `analyze` operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeReport {
    pub patterns: Vec<TemporalPattern>,
    pub suggestions: Vec<RelationshipSuggestion>,
    /// Suggestions newly applied as relationships this run
    pub applied: usize,
    pub stale_count: usize,
}

/// Aggregate engine health for one principal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub tracking_queue_depth: usize,
    pub tracking_dropped: u64,
    pub breakers: Vec<BreakerSnapshot>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The adaptive retrieval engine
pub struct MemoryEngine {
    store: Arc<Store>,
    activity: Arc<ActivityLog>,
    dispatcher: Dispatcher,
    embedder: Arc<dyn EmbeddingProvider>,
    classifier: Option<Arc<dyn SaveClassifier>>,
    validator: Option<Arc<dyn IdentityValidator>>,
    embedding_breaker: CircuitBreaker,
    classifier_breaker: CircuitBreaker,
    retry: RetryPolicy,
    query_cache: Mutex<LruCache<String, Embedding>>,
    /// Principals with a learning cycle in flight
    cycle_guard: Mutex<HashSet<String>>,
    config: EngineConfig,
}

impl MemoryEngine {
    /// Build an engine over an open store and embedding provider
    ///
    /// Spawns the tracking worker pool, so a Tokio runtime must be
    /// running.
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> Self {
        let activity = Arc::new(ActivityLog::new());
        let dispatcher = Dispatcher::spawn(
            Arc::clone(&store),
            Arc::clone(&activity),
            config.dispatcher.queue_capacity,
            config.dispatcher.workers,
        );
        Self {
            embedding_breaker: CircuitBreaker::new("embedding", &config.circuit_breaker),
            classifier_breaker: CircuitBreaker::new("classifier", &config.circuit_breaker),
            retry: RetryPolicy::default(),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
            cycle_guard: Mutex::new(HashSet::new()),
            store,
            activity,
            dispatcher,
            embedder,
            classifier: None,
            validator: None,
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SaveClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn IdentityValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Tracking queue depth, consulted by the scheduler for load shedding
    pub fn tracking_depth(&self) -> usize {
        self.dispatcher.depth()
    }

    // ========================================================================
    // MEMORY CRUD
    // ========================================================================

    /// Create a memory; embedding failures degrade to an unembedded
    /// record rather than failing the write
    pub async fn create_memory(
        &self,
        principal_id: &str,
        input: CreateMemoryInput,
    ) -> Result<MemoryRecord> {
        check_principal(principal_id)?;
        input.validate()?;

        let mut record = MemoryRecord::new(principal_id, input);
        let embedding = match self.embed_guarded(&record.text).await {
            Ok(embedding) => {
                record.has_embedding = true;
                Some(embedding)
            }
            Err(e) => {
                warn!(memory_id = %record.id, error = %e, "embedding unavailable at create");
                None
            }
        };
        self.store.insert_memory(&record, embedding.as_ref())?;
        debug!(memory_id = %record.id, principal_id, "memory created");
        Ok(record)
    }

    /// Auto-save: classify first, persist unless the classifier says the
    /// text is brainstorming. Falls back to a plain create when the
    /// classifier is unavailable.
    pub async fn smart_create(
        &self,
        principal_id: &str,
        input: CreateMemoryInput,
        context: Option<&str>,
    ) -> Result<SmartCreateResult> {
        check_principal(principal_id)?;
        input.validate()?;

        let classification = match self.classify_guarded(&input.text, context).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "classifier unavailable, saving without classification");
                let memory = self.create_memory(principal_id, input).await?;
                return Ok(SmartCreateResult {
                    saved: true,
                    category: None,
                    confidence: None,
                    reasoning: "classifier unavailable, saved without classification".to_string(),
                    memory: Some(memory),
                });
            }
        };

        if !classification.should_save {
            return Ok(SmartCreateResult {
                saved: false,
                category: Some(classification.category.as_str().to_string()),
                confidence: Some(classification.confidence),
                reasoning: classification.reasoning,
                memory: None,
            });
        }

        let mut input = input;
        let category_tag = classification.category.as_str().to_string();
        if !input.tags.contains(&category_tag) {
            input.tags.push(category_tag);
        }
        let memory = self.create_memory(principal_id, input).await?;
        Ok(SmartCreateResult {
            saved: true,
            category: Some(classification.category.as_str().to_string()),
            confidence: Some(classification.confidence),
            reasoning: classification.reasoning,
            memory: Some(memory),
        })
    }

    /// Point read with projected analytics; fires access tracking
    /// asynchronously and never blocks on it
    pub async fn get_memory(
        &self,
        principal_id: &str,
        id: &str,
        context: Option<&str>,
    ) -> Result<MemoryWithAnalytics> {
        check_principal(principal_id)?;
        let record = self
            .store
            .get_memory(principal_id, id)?
            .ok_or_else(|| Error::NotFound(format!("memory {id}")))?;

        self.dispatcher.enqueue(TrackTask::Access {
            principal_id: principal_id.to_string(),
            memory_id: id.to_string(),
            context: context.map(str::to_string),
        });

        let analytics = project(&record, Utc::now());
        Ok(MemoryWithAnalytics {
            memory: record,
            analytics,
        })
    }

    /// Patch content fields; a text change re-embeds (or drops the stale
    /// vector when the provider is down) and invalidates predictions
    pub async fn update_memory(
        &self,
        principal_id: &str,
        id: &str,
        patch: MemoryPatch,
    ) -> Result<MemoryRecord> {
        check_principal(principal_id)?;
        patch.validate()?;

        let mut record = self
            .store
            .get_memory(principal_id, id)?
            .ok_or_else(|| Error::NotFound(format!("memory {id}")))?;

        let text_changed = patch.apply(&mut record, Utc::now());
        let embedding = if text_changed {
            match self.embed_guarded(&record.text).await {
                Ok(embedding) => {
                    record.has_embedding = true;
                    EmbeddingUpdate::Replace(embedding)
                }
                Err(e) => {
                    warn!(memory_id = id, error = %e, "re-embedding unavailable, dropping stale vector");
                    record.has_embedding = false;
                    EmbeddingUpdate::Remove
                }
            }
        } else {
            EmbeddingUpdate::Keep
        };

        self.store.update_memory(&record, embedding)?;
        self.store.cache_evict(principal_id)?;
        Ok(record)
    }

    /// Delete a memory with its relationships and cached predictions
    pub async fn delete_memory(&self, principal_id: &str, id: &str) -> Result<()> {
        check_principal(principal_id)?;
        if !self.store.delete_memory(principal_id, id)? {
            return Err(Error::NotFound(format!("memory {id}")));
        }
        Ok(())
    }

    /// Fire-and-forget access tracking (the read path's C2 entry point)
    pub fn track_access(&self, principal_id: &str, memory_id: &str, context: Option<&str>) {
        self.dispatcher.enqueue(TrackTask::Access {
            principal_id: principal_id.to_string(),
            memory_id: memory_id.to_string(),
            context: context.map(str::to_string),
        });
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// Weighted semantic search
    ///
    /// An open embedding circuit returns an empty, degradation-marked
    /// response instead of an error; critical ingest and feedback paths
    /// stay unaffected.
    pub async fn search(
        &self,
        principal_id: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<SearchResponse> {
        check_principal(principal_id)?;
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }

        let k = clamp_k(options.k, &self.config.ranker);
        let query_embedding = match self.embed_guarded(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "search degraded: embedding unavailable");
                return Ok(SearchResponse::degraded());
            }
        };

        let pool = candidate_pool_size(k, &self.config.ranker);
        let candidates = self.store.nearest_memories(
            principal_id,
            &query_embedding,
            pool,
            &options.tags,
            options.project_id.as_deref(),
        )?;
        let total_candidates = candidates.len();

        let now = Utc::now();
        let weights = if options.adaptive_weights {
            self.store.get_weights(principal_id)?
        } else {
            LearningWeights::defaults(principal_id)
        };

        let results = rank(candidates, &weights, &options, k, now);

        if options.learning_mode {
            for result in &results {
                self.track_access(principal_id, &result.memory.id, None);
            }
        }

        // Count the search against the principal; every tenth search
        // re-evaluates the weight vector from the feedback ratios.
        let (updated, adapted) = self
            .store
            .with_weights(principal_id, |w| w.record_search(now))?;
        if adapted {
            info!(
                principal_id,
                helpfulness_weight = updated.helpfulness_weight,
                usage_weight = updated.usage_weight,
                "learning weights adapted"
            );
            self.emit_metric(
                principal_id,
                MetricType::SearchAccuracy,
                updated.positive_ratio(),
                attr_map([("totalSearches", AttrValue::Int(updated.total_searches))]),
            );
        }

        Ok(SearchResponse {
            results,
            degraded: false,
            total_candidates,
        })
    }

    // ========================================================================
    // FEEDBACK
    // ========================================================================

    /// Apply explicit feedback to a memory, returning the new score
    pub async fn apply_feedback(
        &self,
        principal_id: &str,
        memory_id: &str,
        feedback: FeedbackInput,
    ) -> Result<f64> {
        check_principal(principal_id)?;
        feedback.validate()?;

        // Ownership check before the unscoped score update.
        self.store
            .get_memory(principal_id, memory_id)?
            .ok_or_else(|| Error::NotFound(format!("memory {memory_id}")))?;

        let new_score = self
            .store
            .with_memory_score(memory_id, |current| next_score(current, &feedback))?;

        self.store.with_weights(principal_id, |w| {
            w.record_feedback(feedback.helpful, feedback.satisfaction);
        })?;

        let mut metric_context = vec![("memoryId", AttrValue::Text(memory_id.to_string()))];
        if let Some(context) = &feedback.context {
            metric_context.push(("context", AttrValue::Text(context.clone())));
        }
        let metric_context = attr_map(metric_context);

        self.emit_metric(
            principal_id,
            MetricType::AvgHelpfulness,
            new_score,
            metric_context.clone(),
        );
        if let Some(satisfaction) = feedback.satisfaction {
            self.emit_metric(
                principal_id,
                MetricType::UserSatisfaction,
                satisfaction,
                metric_context,
            );
        }

        Ok(new_score)
    }

    // ========================================================================
    // PREDICTION
    // ========================================================================

    /// Predict likely-next memories from recent-access context
    pub async fn predict(
        &self,
        principal_id: &str,
        request: PredictionRequest,
    ) -> Result<PredictionSet> {
        check_principal(principal_id)?;
        let k = clamp_k(request.k, &self.config.ranker);
        let now = Utc::now();

        let key = cache_key(
            principal_id,
            request.context_text.as_deref(),
            &request.recent_ids,
            k,
        );
        if let Some(predictions) = self.store.cache_get(principal_id, &key, now)? {
            return Ok(PredictionSet {
                predictions,
                cache_hit: true,
                degraded: false,
            });
        }

        // The semantic channel is the only upstream-dependent one; with
        // context text and an unavailable provider the whole prediction
        // degrades to empty.
        let mut semantic: Vec<(String, f64)> = Vec::new();
        if let Some(context_text) = request.context_text.as_deref() {
            match self.embed_guarded(context_text).await {
                Ok(embedding) => {
                    semantic = self
                        .store
                        .nearest_memories(principal_id, &embedding, 10, &[], None)?
                        .into_iter()
                        .map(|(record, similarity)| (record.id, similarity))
                        .collect();
                }
                Err(e) => {
                    warn!(error = %e, "prediction degraded: embedding unavailable");
                    return Ok(PredictionSet {
                        predictions: Vec::new(),
                        cache_hit: false,
                        degraded: true,
                    });
                }
            }
        }

        let patterns = self.store.patterns_for(principal_id, None)?;
        let relationships = self
            .store
            .outbound_relationships(principal_id, &request.recent_ids)?;
        let weights = self.store.get_weights(principal_id)?;

        let predictions = combine(
            &request.recent_ids,
            &patterns,
            &relationships,
            &semantic,
            &weights,
            self.config.predictor.min_confidence,
            k,
            now,
        );

        let ttl = Duration::seconds(self.config.predictor.cache_ttl_seconds.max(1) as i64);
        let context_hash = cache_key(principal_id, request.context_text.as_deref(), &[], 0);
        self.store
            .cache_put(principal_id, &key, &context_hash, &predictions, now + ttl)?;

        Ok(PredictionSet {
            predictions,
            cache_hit: false,
            degraded: false,
        })
    }

    // ========================================================================
    // ANALYSIS AND MAINTENANCE
    // ========================================================================

    /// Run one learning cycle: mine patterns, derive suggestions
    /// (optionally applying them), and count stale memories
    ///
    /// Guarded per principal; a concurrent cycle for the same principal
    /// is a `Conflict`, which the scheduler treats as "skip this tick".
    pub async fn analyze(
        &self,
        principal_id: &str,
        auto_apply: Option<bool>,
    ) -> Result<AnalyzeReport> {
        check_principal(principal_id)?;
        let _guard = CycleGuard::acquire(&self.cycle_guard, principal_id)?;

        let now = Utc::now();
        let memories = self.store.list_memories(principal_id, CYCLE_SCAN_LIMIT, 0)?;
        let events = self.activity.snapshot(principal_id);

        let miner_config = MinerConfig {
            window: Duration::minutes(self.config.patterns.sequence_window_minutes.max(1)),
        };
        let candidates = mine(&memories, &events, &miner_config);
        for candidate in &candidates {
            self.store.upsert_pattern(principal_id, candidate, now)?;
        }

        let patterns = self.store.patterns_for(principal_id, None)?;
        let memory_map: HashMap<String, MemoryRecord> = memories
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect();
        let suggestions = suggest_from_patterns(&patterns, &memory_map);

        let auto_apply =
            auto_apply.unwrap_or(self.config.scheduler.auto_apply_relationships);
        let mut applied = 0;
        if auto_apply {
            for suggestion in suggestions.iter().filter(|s| s.auto_applicable()) {
                let relationship = Relationship::new(
                    principal_id,
                    &suggestion.from_id,
                    &suggestion.to_id,
                    suggestion.rel_type,
                    suggestion.confidence,
                    suggestion.explanation.clone(),
                )?;
                match self.store.insert_relationship(&relationship) {
                    Ok(()) => applied += 1,
                    // Already present; application is idempotent.
                    Err(Error::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let relationships = self.store.relationships_for(principal_id)?;
        let report = maintenance::analyze(
            &memories,
            &relationships,
            &self.config.maintenance,
            now,
        );

        if !suggestions.is_empty() {
            let avg_confidence = suggestions.iter().map(|s| s.confidence).sum::<f64>()
                / suggestions.len() as f64;
            self.emit_metric(
                principal_id,
                MetricType::RelationshipQuality,
                avg_confidence,
                attr_map([("suggestions", AttrValue::Int(suggestions.len() as i64))]),
            );
        }

        Ok(AnalyzeReport {
            patterns,
            suggestions,
            applied,
            stale_count: report.stale_count(),
        })
    }

    /// Duplicate/outdated/archive/broken-reference buckets
    pub async fn maintenance_report(&self, principal_id: &str) -> Result<MaintenanceReport> {
        check_principal(principal_id)?;
        let memories = self.store.list_memories(principal_id, CYCLE_SCAN_LIMIT, 0)?;
        let relationships = self.store.relationships_for(principal_id)?;
        Ok(maintenance::analyze(
            &memories,
            &relationships,
            &self.config.maintenance,
            Utc::now(),
        ))
    }

    /// Metric time series with trends over the last `days`
    pub async fn learning_metrics(&self, principal_id: &str, days: i64) -> Result<MetricsReport> {
        check_principal(principal_id)?;
        let days = days.clamp(1, 365);
        let since = Utc::now() - Duration::days(days);
        let samples = self.store.metrics_since(principal_id, since)?;
        Ok(summarize(principal_id, days, samples))
    }

    /// Relay a response through the identity validator contract
    pub async fn validate_response(
        &self,
        agent_identity: &str,
        response_text: &str,
    ) -> Result<ValidationReport> {
        let Some(validator) = self.validator.clone() else {
            return Err(Error::ServiceDegraded(
                "identity validator not configured".to_string(),
            ));
        };
        let timeout = std::time::Duration::from_secs(
            self.config.upstream.request_timeout_seconds.max(1),
        );
        with_retry_timeout(&self.retry, timeout, "identity_validator", || {
            let validator = Arc::clone(&validator);
            let identity = agent_identity.to_string();
            let text = response_text.to_string();
            async move { validator.validate(&identity, &text).await }
        })
        .await
    }

    /// Aggregate health for one principal
    pub async fn stats(&self, principal_id: &str) -> Result<EngineStats> {
        check_principal(principal_id)?;
        Ok(EngineStats {
            store: self.store.stats(principal_id)?,
            tracking_queue_depth: self.dispatcher.depth(),
            tracking_dropped: self.dispatcher.dropped_count(),
            breakers: vec![
                self.embedding_breaker.snapshot(),
                self.classifier_breaker.snapshot(),
            ],
        })
    }

    /// Principals the background scheduler should cycle over
    pub fn principals(&self) -> Result<Vec<String>> {
        self.store.list_principals()
    }

    // ========================================================================
    // UPSTREAM HELPERS
    // ========================================================================

    async fn embed_guarded(&self, text: &str) -> Result<Embedding> {
        if let Some(cached) = self
            .query_cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(text).cloned())
        {
            return Ok(cached);
        }

        self.embedding_breaker.check()?;
        let timeout = std::time::Duration::from_secs(
            self.config.upstream.request_timeout_seconds.max(1),
        );
        let embedder = Arc::clone(&self.embedder);
        let owned = text.to_string();
        let result = with_retry_timeout(&self.retry, timeout, "embedding", move || {
            let embedder = Arc::clone(&embedder);
            let text = owned.clone();
            async move { embedder.embed(&text).await }
        })
        .await;

        match result {
            Ok(embedding) => {
                self.embedding_breaker.record_success();
                if let Ok(mut cache) = self.query_cache.lock() {
                    cache.put(text.to_string(), embedding.clone());
                }
                Ok(embedding)
            }
            Err(e) => {
                self.embedding_breaker.record_failure();
                Err(e)
            }
        }
    }

    async fn classify_guarded(
        &self,
        text: &str,
        context: Option<&str>,
    ) -> Result<Classification> {
        let Some(classifier) = self.classifier.clone() else {
            return Err(Error::ServiceDegraded("classifier not configured".to_string()));
        };
        self.classifier_breaker.check()?;
        let timeout = std::time::Duration::from_secs(
            self.config.upstream.request_timeout_seconds.max(1),
        );
        let owned_text = text.to_string();
        let owned_context = context.map(str::to_string);
        let result = with_retry_timeout(&self.retry, timeout, "classifier", move || {
            let classifier = Arc::clone(&classifier);
            let text = owned_text.clone();
            let context = owned_context.clone();
            async move { classifier.classify(&text, context.as_deref()).await }
        })
        .await;

        match result {
            Ok(classification) => {
                self.classifier_breaker.record_success();
                Ok(classification)
            }
            Err(e) => {
                self.classifier_breaker.record_failure();
                Err(e)
            }
        }
    }

    fn emit_metric(
        &self,
        principal_id: &str,
        metric_type: MetricType,
        value: f64,
        context: AttrValue,
    ) {
        let metric = LearningMetric::new(principal_id, metric_type, value, context);
        if let Err(e) = self.store.insert_metric(&metric) {
            warn!(metric = %metric_type, error = %e, "failed to record learning metric");
        }
    }
}

fn check_principal(principal_id: &str) -> Result<()> {
    if principal_id.trim().is_empty() {
        return Err(Error::Unauthorized);
    }
    Ok(())
}

/// Per-principal non-reentrant guard for learning cycles
struct CycleGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    principal_id: String,
}

impl<'a> CycleGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, principal_id: &str) -> Result<Self> {
        let mut guard = set
            .lock()
            .map_err(|_| Error::Internal("cycle guard poisoned".to_string()))?;
        if !guard.insert(principal_id.to_string()) {
            return Err(Error::Conflict(format!(
                "learning cycle already running for {principal_id}"
            )));
        }
        Ok(Self {
            set,
            principal_id: principal_id.to_string(),
        })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.set.lock() {
            guard.remove(&self.principal_id);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
