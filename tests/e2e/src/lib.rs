//! End-to-end test harness
//!
//! Builds an engine over a throwaway database with a deterministic
//! embedder whose vectors can be pinned per text, so scenarios can dial
//! in exact base similarities. Also provides direct-SQL helpers for
//! backdating timestamps, which the public API deliberately does not
//! allow.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use engram_core::{
    CreateMemoryInput, Embedding, EmbeddingProvider, EngineConfig, Error, MemoryEngine,
    MemoryRecord, Result, Store,
};

/// Embedding dimension used by the harness
pub const TEST_DIMENSIONS: usize = 4;

// ============================================================================
// FIXTURE EMBEDDER
// ============================================================================

/// Deterministic embedder with per-text overrides
///
/// Unpinned texts fall back to a token-hash vector, which keeps distinct
/// texts distinguishable without any model.
pub struct FixtureEmbedder {
    presets: Mutex<HashMap<String, Vec<f32>>>,
    failing: Mutex<bool>,
}

impl FixtureEmbedder {
    pub fn new() -> Self {
        Self {
            presets: Mutex::new(HashMap::new()),
            failing: Mutex::new(false),
        }
    }

    /// Pin the vector returned for `text`
    pub fn set(&self, text: &str, vector: Vec<f32>) {
        assert_eq!(vector.len(), TEST_DIMENSIONS, "fixture vectors are 4-dimensional");
        self.presets.lock().unwrap().insert(text.to_string(), vector);
    }

    /// Pin a unit vector whose cosine against `[1, 0, 0, 0]` is `similarity`
    pub fn set_similarity(&self, text: &str, similarity: f32) {
        let orthogonal = (1.0 - similarity * similarity).max(0.0).sqrt();
        self.set(text, vec![similarity, orthogonal, 0.0, 0.0]);
    }

    /// Make every subsequent call fail with `ServiceDegraded`
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    fn fallback(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; TEST_DIMENSIONS];
        for token in text.split_whitespace() {
            let mut h: u32 = 2166136261;
            for b in token.bytes() {
                h ^= b as u32;
                h = h.wrapping_mul(16777619);
            }
            vector[(h as usize) % TEST_DIMENSIONS] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

impl Default for FixtureEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for FixtureEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        if *self.failing.lock().unwrap() {
            return Err(Error::ServiceDegraded("fixture embedder offline".to_string()));
        }
        let preset = self.presets.lock().unwrap().get(text).cloned();
        Ok(Embedding::new(preset.unwrap_or_else(|| Self::fallback(text))))
    }

    fn dimensions(&self) -> usize {
        TEST_DIMENSIONS
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// One isolated engine with its database and embedder
pub struct TestHarness {
    pub engine: Arc<MemoryEngine>,
    pub store: Arc<Store>,
    pub embedder: Arc<FixtureEmbedder>,
    db_path: PathBuf,
    _dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let dir = TempDir::new().expect("failed to create temp directory");
        let db_path = dir.path().join("engram-test.db");
        let store = Arc::new(Store::open(Some(db_path.clone())).expect("failed to open store"));
        let embedder = Arc::new(FixtureEmbedder::new());
        let engine = Arc::new(MemoryEngine::new(
            Arc::clone(&store),
            Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
            config,
        ));
        Self {
            engine,
            store,
            embedder,
            db_path,
            _dir: dir,
        }
    }

    /// Create a memory through the engine
    pub async fn create(&self, principal: &str, text: &str) -> MemoryRecord {
        self.engine
            .create_memory(principal, CreateMemoryInput::from_text(text))
            .await
            .expect("create_memory failed")
    }

    /// Create with tags
    pub async fn create_tagged(&self, principal: &str, text: &str, tags: &[&str]) -> MemoryRecord {
        let mut input = CreateMemoryInput::from_text(text);
        input.tags = tags.iter().map(|t| t.to_string()).collect();
        self.engine
            .create_memory(principal, input)
            .await
            .expect("create_memory failed")
    }

    /// Record `n` accesses synchronously against the store
    pub fn record_accesses(&self, memory_id: &str, n: usize) {
        for _ in 0..n {
            self.store
                .record_access(memory_id, None)
                .expect("record_access failed");
        }
    }

    /// Pin the helpfulness score directly
    pub fn set_helpfulness(&self, memory_id: &str, score: f64) {
        self.store
            .with_memory_score(memory_id, |_| score)
            .expect("score update failed");
    }

    /// Rewrite timestamps under the engine's feet (test-only power)
    pub fn backdate(
        &self,
        memory_id: &str,
        created_days_ago: Option<i64>,
        accessed_days_ago: Option<i64>,
    ) {
        let conn = rusqlite::Connection::open(&self.db_path).expect("failed to open test db");
        conn.busy_timeout(std::time::Duration::from_secs(5)).unwrap();
        if let Some(days) = created_days_ago {
            let ts = (Utc::now() - Duration::days(days)).to_rfc3339();
            conn.execute(
                "UPDATE memory SET created_at = ?1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![ts, memory_id],
            )
            .expect("backdate created_at failed");
        }
        if let Some(days) = accessed_days_ago {
            let ts = (Utc::now() - Duration::days(days)).to_rfc3339();
            conn.execute(
                "UPDATE memory SET last_accessed = ?1 WHERE id = ?2",
                rusqlite::params![ts, memory_id],
            )
            .expect("backdate last_accessed failed");
        }
    }

    /// Drive an access through the engine's fire-and-forget path and
    /// wait until it lands
    pub async fn tracked_access(&self, principal: &str, memory_id: &str) {
        let before = self
            .store
            .get_memory(principal, memory_id)
            .expect("get failed")
            .expect("memory missing")
            .usage_count;
        self.engine.track_access(principal, memory_id, None);
        self.wait_for_usage(principal, memory_id, before + 1).await;
    }

    /// Poll until `usage_count` reaches `at_least`
    pub async fn wait_for_usage(&self, principal: &str, memory_id: &str, at_least: i64) {
        for _ in 0..200 {
            let current = self
                .store
                .get_memory(principal, memory_id)
                .expect("get failed")
                .expect("memory missing")
                .usage_count;
            if current >= at_least {
                // The activity ring is written just after the counter;
                // give the worker a beat to finish.
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("usage_count never reached {at_least} for {memory_id}");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
