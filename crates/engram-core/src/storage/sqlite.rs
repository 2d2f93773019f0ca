//! SQLite Storage Implementation
//!
//! Relational store with JSON columns for the attribute bags and a blob
//! table for embedding vectors. Split reader/writer connections in WAL
//! mode: writes serialize on the writer connection (which is what makes
//! counter increments atomic) while readers proceed concurrently.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::error;

use crate::embedding::Embedding;
use crate::error::{Error, Result};
use crate::learning::{LearningMetric, LearningWeights, MetricType};
use crate::memory::{
    AccessPatternData, AttrValue, MemoryRecord, Relationship, RelationshipType,
};
use crate::patterns::{
    CandidatePattern, PatternType, TemporalPattern, CONFIDENCE_STEP, INITIAL_CONFIDENCE,
};
use crate::predict::Prediction;

const MEMORY_SELECT: &str = "SELECT m.id, m.principal_id, m.text, m.tags, m.metadata, \
     m.source, m.project_id, m.created_at, m.updated_at, m.usage_count, m.last_accessed, \
     m.helpfulness_score, m.access_pattern, (e.memory_id IS NOT NULL) \
     FROM memory m LEFT JOIN memory_embedding e ON e.memory_id = m.id";

/// How the embedding changes alongside a content update
#[derive(Debug, Clone)]
pub enum EmbeddingUpdate {
    /// Leave the stored vector untouched
    Keep,
    /// Replace (or add) the vector
    Replace(Embedding),
    /// Drop the vector; the record becomes invisible to semantic search
    Remove,
}

/// Aggregate counts for health reporting
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub memory_count: i64,
    pub relationship_count: i64,
    pub pattern_count: i64,
    pub average_helpfulness: f64,
    pub invariant_violations: u64,
}

// ============================================================================
// STORE
// ============================================================================

/// SQLite-backed store
///
/// All methods take `&self`; interior mutability via per-connection
/// mutexes makes the store `Send + Sync` so callers share it as
/// `Arc<Store>`.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    /// Invariant violations observed at read time since startup
    invariant_violations: AtomicU64,
}

impl Store {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store
    ///
    /// `None` uses the platform data directory.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("io", "engram", "core").ok_or_else(|| {
                    Error::Internal("could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("engram.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            invariant_violations: AtomicU64::new(0),
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| Error::Internal("writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| Error::Internal("reader lock poisoned".to_string()))
    }

    // ========================================================================
    // MEMORIES
    // ========================================================================

    /// Insert a memory, optionally with its embedding
    pub fn insert_memory(
        &self,
        record: &MemoryRecord,
        embedding: Option<&Embedding>,
    ) -> Result<()> {
        let mut writer = self.writer()?;
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO memory (
                id, principal_id, text, tags, metadata, source, project_id,
                created_at, updated_at, usage_count, last_accessed,
                helpfulness_score, access_pattern
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                record.principal_id,
                record.text,
                serde_json::to_string(&record.tags)?,
                record.metadata.to_json(),
                record.source,
                record.project_id,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.usage_count,
                record.last_accessed.map(|dt| dt.to_rfc3339()),
                record.helpfulness_score,
                record.access_pattern.to_json(),
            ],
        )?;

        if let Some(embedding) = embedding {
            Self::insert_embedding_tx(&tx, &record.id, embedding)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn insert_embedding_tx(
        tx: &rusqlite::Transaction<'_>,
        memory_id: &str,
        embedding: &Embedding,
    ) -> Result<()> {
        // The embedding dimension is constant across the deployment.
        let existing: Option<i64> = tx
            .query_row(
                "SELECT dimensions FROM memory_embedding LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(dims) = existing {
            if dims as usize != embedding.dimensions {
                return Err(Error::Internal(format!(
                    "embedding dimension {} does not match deployment dimension {dims}",
                    embedding.dimensions
                )));
            }
        }
        tx.execute(
            "INSERT INTO memory_embedding (memory_id, embedding, dimensions, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (memory_id) DO UPDATE SET
                embedding = excluded.embedding,
                dimensions = excluded.dimensions,
                created_at = excluded.created_at",
            params![
                memory_id,
                embedding.to_bytes(),
                embedding.dimensions as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Point lookup scoped to the owning principal
    pub fn get_memory(&self, principal_id: &str, id: &str) -> Result<Option<MemoryRecord>> {
        let reader = self.reader()?;
        let sql = format!("{MEMORY_SELECT} WHERE m.id = ?1 AND m.principal_id = ?2");
        let record = reader
            .query_row(&sql, params![id, principal_id], row_to_memory)
            .optional()?;
        drop(reader);

        match record {
            Some(record) => {
                if let Err(e) = record.check_invariants() {
                    self.invariant_violations.fetch_add(1, Ordering::Relaxed);
                    error!(memory_id = id, error = %e, "invariant violation at read");
                    return Err(e);
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Overwrite content fields; learning state is not touched
    pub fn update_memory(&self, record: &MemoryRecord, embedding: EmbeddingUpdate) -> Result<()> {
        let mut writer = self.writer()?;
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE memory SET
                text = ?1, tags = ?2, metadata = ?3, source = ?4,
                project_id = ?5, updated_at = ?6
             WHERE id = ?7 AND principal_id = ?8",
            params![
                record.text,
                serde_json::to_string(&record.tags)?,
                record.metadata.to_json(),
                record.source,
                record.project_id,
                record.updated_at.to_rfc3339(),
                record.id,
                record.principal_id,
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("memory {}", record.id)));
        }

        match embedding {
            EmbeddingUpdate::Keep => {}
            EmbeddingUpdate::Replace(vector) => {
                Self::insert_embedding_tx(&tx, &record.id, &vector)?;
            }
            EmbeddingUpdate::Remove => {
                tx.execute(
                    "DELETE FROM memory_embedding WHERE memory_id = ?1",
                    params![record.id],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete a memory; relationships and embeddings cascade, and the
    /// principal's prediction cache is evicted
    pub fn delete_memory(&self, principal_id: &str, id: &str) -> Result<bool> {
        let mut writer = self.writer()?;
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute(
            "DELETE FROM memory WHERE id = ?1 AND principal_id = ?2",
            params![id, principal_id],
        )?;
        if deleted > 0 {
            tx.execute(
                "DELETE FROM prediction_cache WHERE principal_id = ?1",
                params![principal_id],
            )?;
        }
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Filtered scan of a principal's memories
    pub fn list_memories(
        &self,
        principal_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MemoryRecord>> {
        let reader = self.reader()?;
        let sql = format!(
            "{MEMORY_SELECT} WHERE m.principal_id = ?1 \
             ORDER BY m.created_at DESC, m.id LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params![principal_id, limit, offset], row_to_memory)?;
        self.collect_records(rows)
    }

    pub fn count_memories(&self, principal_id: &str) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row(
            "SELECT COUNT(*) FROM memory WHERE principal_id = ?1",
            params![principal_id],
            |row| row.get(0),
        )?)
    }

    /// Principals with at least one memory
    pub fn list_principals(&self) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare("SELECT DISTINCT principal_id FROM memory ORDER BY 1")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Nearest neighbours by cosine similarity over a principal's
    /// embedded memories
    ///
    /// Memories without embeddings never appear. Tag filters require all
    /// requested tags; the project filter is exact.
    pub fn nearest_memories(
        &self,
        principal_id: &str,
        query: &Embedding,
        limit: usize,
        tags: &[String],
        project_id: Option<&str>,
    ) -> Result<Vec<(MemoryRecord, f64)>> {
        let reader = self.reader()?;
        let sql = format!(
            "SELECT m.id, m.principal_id, m.text, m.tags, m.metadata, m.source, \
             m.project_id, m.created_at, m.updated_at, m.usage_count, m.last_accessed, \
             m.helpfulness_score, m.access_pattern, 1, e.embedding \
             FROM memory m JOIN memory_embedding e ON e.memory_id = m.id \
             WHERE m.principal_id = ?1 AND (?2 IS NULL OR m.project_id = ?2)"
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params![principal_id, project_id], |row| {
            let record = row_to_memory(row)?;
            let bytes: Vec<u8> = row.get(14)?;
            Ok((record, bytes))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (record, bytes) = row?;
            if record.check_invariants().is_err() {
                self.invariant_violations.fetch_add(1, Ordering::Relaxed);
                error!(memory_id = %record.id, "skipping record failing invariants in scan");
                continue;
            }
            if !tags.is_empty() && !tags.iter().all(|t| record.tags.contains(t)) {
                continue;
            }
            let Some(stored) = Embedding::from_bytes(&bytes) else {
                continue;
            };
            let similarity = query.cosine_similarity(&stored) as f64;
            scored.push((record, similarity));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    // ========================================================================
    // USAGE TRACKING
    // ========================================================================

    /// Atomically record one access: increment `usage_count`, stamp
    /// `last_accessed`, and bump the context tally when a label is given
    ///
    /// Concurrent calls serialize on the writer connection, so the final
    /// count always equals the number of successful calls.
    pub fn record_access(&self, memory_id: &str, context: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut writer = self.writer()?;
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match context {
            None => {
                let changed = tx.execute(
                    "UPDATE memory SET usage_count = usage_count + 1, last_accessed = ?1
                     WHERE id = ?2",
                    params![now, memory_id],
                )?;
                if changed == 0 {
                    return Err(Error::NotFound(format!("memory {memory_id}")));
                }
            }
            Some(label) => {
                let raw: Option<String> = tx
                    .query_row(
                        "SELECT access_pattern FROM memory WHERE id = ?1",
                        params![memory_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(raw) = raw else {
                    return Err(Error::NotFound(format!("memory {memory_id}")));
                };
                let mut pattern = AccessPatternData::from_json(&raw)?;
                pattern.bump(label);
                tx.execute(
                    "UPDATE memory SET usage_count = usage_count + 1, last_accessed = ?1,
                        access_pattern = ?2
                     WHERE id = ?3",
                    params![now, pattern.to_json(), memory_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Read-modify-write the helpfulness score under the record's write
    /// serialization; the result is clamped to [0, 1]
    pub fn with_memory_score<F>(&self, memory_id: &str, f: F) -> Result<f64>
    where
        F: FnOnce(f64) -> f64,
    {
        let mut writer = self.writer()?;
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<f64> = tx
            .query_row(
                "SELECT helpfulness_score FROM memory WHERE id = ?1",
                params![memory_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(Error::NotFound(format!("memory {memory_id}")));
        };
        let next = f(current).clamp(0.0, 1.0);
        tx.execute(
            "UPDATE memory SET helpfulness_score = ?1 WHERE id = ?2",
            params![next, memory_id],
        )?;
        tx.commit()?;
        Ok(next)
    }

    // ========================================================================
    // RELATIONSHIPS
    // ========================================================================

    /// Insert an edge; a duplicate `(from, to)` pair is a `Conflict`
    pub fn insert_relationship(&self, relationship: &Relationship) -> Result<()> {
        let writer = self.writer()?;
        let result = writer.execute(
            "INSERT INTO relationship (
                id, principal_id, from_id, to_id, rel_type, strength,
                explanation, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                relationship.id,
                relationship.principal_id,
                relationship.from_id,
                relationship.to_id,
                relationship.rel_type.as_str(),
                relationship.strength,
                relationship.explanation,
                relationship.created_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::Conflict(format!(
                "relationship {} -> {} already exists",
                relationship.from_id, relationship.to_id
            ))),
            Err(e) if is_foreign_key_violation(&e) => Err(Error::NotFound(format!(
                "relationship endpoint {} or {}",
                relationship.from_id, relationship.to_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn relationships_for(&self, principal_id: &str) -> Result<Vec<Relationship>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, principal_id, from_id, to_id, rel_type, strength, explanation, created_at
             FROM relationship WHERE principal_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![principal_id], row_to_relationship)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .collect::<Result<Vec<_>>>()
    }

    /// Outbound edges from any of `from_ids`
    pub fn outbound_relationships(
        &self,
        principal_id: &str,
        from_ids: &[String],
    ) -> Result<Vec<Relationship>> {
        Ok(self
            .relationships_for(principal_id)?
            .into_iter()
            .filter(|r| from_ids.contains(&r.from_id))
            .collect())
    }

    // ========================================================================
    // PATTERNS
    // ========================================================================

    /// Idempotent pattern merge
    ///
    /// A candidate matching an existing identity bumps occurrences,
    /// refreshes `last_seen` and the observed statistics, and steps
    /// confidence toward 1.0. A new identity starts at one occurrence.
    pub fn upsert_pattern(
        &self,
        principal_id: &str,
        candidate: &CandidatePattern,
        now: DateTime<Utc>,
    ) -> Result<TemporalPattern> {
        let key = candidate.canonical_key();
        let mut writer = self.writer()?;
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(String, f64, i64, String)> = tx
            .query_row(
                "SELECT id, confidence, occurrences, first_seen FROM temporal_pattern
                 WHERE principal_id = ?1 AND pattern_type = ?2 AND canonical_key = ?3",
                params![principal_id, candidate.pattern_type.as_str(), key],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .optional()?;

        let pattern = match existing {
            Some((id, confidence, occurrences, first_seen)) => {
                let confidence = (confidence + CONFIDENCE_STEP).min(1.0);
                let occurrences = occurrences + 1;
                tx.execute(
                    "UPDATE temporal_pattern SET
                        pattern_data = ?1, confidence = ?2, occurrences = ?3, last_seen = ?4
                     WHERE id = ?5",
                    params![
                        candidate.data.to_json(),
                        confidence,
                        occurrences,
                        now.to_rfc3339(),
                        id,
                    ],
                )?;
                TemporalPattern {
                    id,
                    principal_id: principal_id.to_string(),
                    pattern_type: candidate.pattern_type,
                    pattern_data: candidate.data.clone(),
                    confidence,
                    occurrences,
                    first_seen: parse_ts(&first_seen)?,
                    last_seen: now,
                }
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO temporal_pattern (
                        id, principal_id, pattern_type, canonical_key, pattern_data,
                        confidence, occurrences, first_seen, last_seen
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
                    params![
                        id,
                        principal_id,
                        candidate.pattern_type.as_str(),
                        key,
                        candidate.data.to_json(),
                        INITIAL_CONFIDENCE,
                        now.to_rfc3339(),
                    ],
                )?;
                TemporalPattern {
                    id,
                    principal_id: principal_id.to_string(),
                    pattern_type: candidate.pattern_type,
                    pattern_data: candidate.data.clone(),
                    confidence: INITIAL_CONFIDENCE,
                    occurrences: 1,
                    first_seen: now,
                    last_seen: now,
                }
            }
        };

        tx.commit()?;
        Ok(pattern)
    }

    pub fn patterns_for(
        &self,
        principal_id: &str,
        pattern_type: Option<PatternType>,
    ) -> Result<Vec<TemporalPattern>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, principal_id, pattern_type, pattern_data, confidence, occurrences,
                    first_seen, last_seen
             FROM temporal_pattern
             WHERE principal_id = ?1 AND (?2 IS NULL OR pattern_type = ?2)
             ORDER BY confidence DESC, id",
        )?;
        let rows = stmt.query_map(
            params![principal_id, pattern_type.map(|t| t.as_str())],
            row_to_pattern,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .collect::<Result<Vec<_>>>()
    }

    // ========================================================================
    // LEARNING WEIGHTS
    // ========================================================================

    /// Current weights, or defaults when the principal has none yet
    pub fn get_weights(&self, principal_id: &str) -> Result<LearningWeights> {
        let reader = self.reader()?;
        let row = reader
            .query_row(
                "SELECT usage_weight, recency_weight, helpfulness_weight, relationship_weight,
                        total_searches, positive_feedback_count, negative_feedback_count,
                        avg_search_satisfaction, last_weight_update
                 FROM learning_weights WHERE principal_id = ?1",
                params![principal_id],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(LearningWeights::defaults(principal_id)),
            Some((
                usage,
                recency,
                helpfulness,
                relationship,
                total_searches,
                positive,
                negative,
                satisfaction,
                updated,
            )) => Ok(LearningWeights {
                principal_id: principal_id.to_string(),
                usage_weight: usage,
                recency_weight: recency,
                helpfulness_weight: helpfulness,
                relationship_weight: relationship,
                total_searches,
                positive_feedback_count: positive,
                negative_feedback_count: negative,
                avg_search_satisfaction: satisfaction,
                last_weight_update: parse_ts(&updated)?,
            }),
        }
    }

    /// Read-modify-write the principal's weights under per-principal
    /// serialization, creating the row lazily
    pub fn with_weights<F, T>(&self, principal_id: &str, f: F) -> Result<(LearningWeights, T)>
    where
        F: FnOnce(&mut LearningWeights) -> T,
    {
        let mut writer = self.writer()?;
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                "SELECT usage_weight, recency_weight, helpfulness_weight, relationship_weight,
                        total_searches, positive_feedback_count, negative_feedback_count,
                        avg_search_satisfaction, last_weight_update
                 FROM learning_weights WHERE principal_id = ?1",
                params![principal_id],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let mut weights = match row {
            None => LearningWeights::defaults(principal_id),
            Some((
                usage,
                recency,
                helpfulness,
                relationship,
                total_searches,
                positive,
                negative,
                satisfaction,
                updated,
            )) => LearningWeights {
                principal_id: principal_id.to_string(),
                usage_weight: usage,
                recency_weight: recency,
                helpfulness_weight: helpfulness,
                relationship_weight: relationship,
                total_searches,
                positive_feedback_count: positive,
                negative_feedback_count: negative,
                avg_search_satisfaction: satisfaction,
                last_weight_update: parse_ts(&updated)?,
            },
        };

        let value = f(&mut weights);

        tx.execute(
            "INSERT INTO learning_weights (
                principal_id, usage_weight, recency_weight, helpfulness_weight,
                relationship_weight, total_searches, positive_feedback_count,
                negative_feedback_count, avg_search_satisfaction, last_weight_update
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (principal_id) DO UPDATE SET
                usage_weight = excluded.usage_weight,
                recency_weight = excluded.recency_weight,
                helpfulness_weight = excluded.helpfulness_weight,
                relationship_weight = excluded.relationship_weight,
                total_searches = excluded.total_searches,
                positive_feedback_count = excluded.positive_feedback_count,
                negative_feedback_count = excluded.negative_feedback_count,
                avg_search_satisfaction = excluded.avg_search_satisfaction,
                last_weight_update = excluded.last_weight_update",
            params![
                weights.principal_id,
                weights.usage_weight,
                weights.recency_weight,
                weights.helpfulness_weight,
                weights.relationship_weight,
                weights.total_searches,
                weights.positive_feedback_count,
                weights.negative_feedback_count,
                weights.avg_search_satisfaction,
                weights.last_weight_update.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok((weights, value))
    }

    // ========================================================================
    // PREDICTION CACHE
    // ========================================================================

    /// Fetch a live cache entry, bumping its hit count; expired entries
    /// are evicted on the way out
    pub fn cache_get(
        &self,
        principal_id: &str,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Prediction>>> {
        let mut writer = self.writer()?;
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row: Option<(String, String)> = tx
            .query_row(
                "SELECT predictions, expires_at FROM prediction_cache
                 WHERE principal_id = ?1 AND cache_key = ?2",
                params![principal_id, cache_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let result = match row {
            None => None,
            Some((predictions, expires_at)) => {
                if parse_ts(&expires_at)? <= now {
                    tx.execute(
                        "DELETE FROM prediction_cache WHERE principal_id = ?1 AND cache_key = ?2",
                        params![principal_id, cache_key],
                    )?;
                    None
                } else {
                    tx.execute(
                        "UPDATE prediction_cache SET hit_count = hit_count + 1
                         WHERE principal_id = ?1 AND cache_key = ?2",
                        params![principal_id, cache_key],
                    )?;
                    Some(serde_json::from_str(&predictions)?)
                }
            }
        };
        tx.commit()?;
        Ok(result)
    }

    /// Store predictions under a key with an absolute expiry
    pub fn cache_put(
        &self,
        principal_id: &str,
        cache_key: &str,
        context_hash: &str,
        predictions: &[Prediction],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO prediction_cache (
                principal_id, cache_key, predictions, context_hash, expires_at, hit_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0)
            ON CONFLICT (principal_id, cache_key) DO UPDATE SET
                predictions = excluded.predictions,
                context_hash = excluded.context_hash,
                expires_at = excluded.expires_at,
                hit_count = 0",
            params![
                principal_id,
                cache_key,
                serde_json::to_string(predictions)?,
                context_hash,
                expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Drop every cached prediction for a principal
    pub fn cache_evict(&self, principal_id: &str) -> Result<usize> {
        let writer = self.writer()?;
        Ok(writer.execute(
            "DELETE FROM prediction_cache WHERE principal_id = ?1",
            params![principal_id],
        )?)
    }

    /// Drop entries past their expiry
    pub fn cache_purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let writer = self.writer()?;
        Ok(writer.execute(
            "DELETE FROM prediction_cache WHERE expires_at <= ?1",
            params![now.to_rfc3339()],
        )?)
    }

    // ========================================================================
    // LEARNING METRICS
    // ========================================================================

    pub fn insert_metric(&self, metric: &LearningMetric) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO learning_metric (id, principal_id, metric_type, value, recorded_at, context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                metric.id,
                metric.principal_id,
                metric.metric_type.as_str(),
                metric.value,
                metric.recorded_at.to_rfc3339(),
                metric.context.to_json(),
            ],
        )?;
        Ok(())
    }

    pub fn metrics_since(
        &self,
        principal_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LearningMetric>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, principal_id, metric_type, value, recorded_at, context
             FROM learning_metric
             WHERE principal_id = ?1 AND recorded_at >= ?2
             ORDER BY recorded_at, id",
        )?;
        let rows = stmt.query_map(params![principal_id, since.to_rfc3339()], row_to_metric)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .collect::<Result<Vec<_>>>()
    }

    // ========================================================================
    // STATS
    // ========================================================================

    pub fn stats(&self, principal_id: &str) -> Result<StoreStats> {
        let reader = self.reader()?;
        let (memory_count, average_helpfulness): (i64, f64) = reader.query_row(
            "SELECT COUNT(*), COALESCE(AVG(helpfulness_score), 0.0)
             FROM memory WHERE principal_id = ?1",
            params![principal_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let relationship_count: i64 = reader.query_row(
            "SELECT COUNT(*) FROM relationship WHERE principal_id = ?1",
            params![principal_id],
            |row| row.get(0),
        )?;
        let pattern_count: i64 = reader.query_row(
            "SELECT COUNT(*) FROM temporal_pattern WHERE principal_id = ?1",
            params![principal_id],
            |row| row.get(0),
        )?;
        Ok(StoreStats {
            memory_count,
            relationship_count,
            pattern_count,
            average_helpfulness,
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
        })
    }

    fn collect_records(
        &self,
        rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord>>,
    ) -> Result<Vec<MemoryRecord>> {
        let mut records = Vec::new();
        for row in rows {
            let record = row?;
            if record.check_invariants().is_err() {
                self.invariant_violations.fetch_add(1, Ordering::Relaxed);
                error!(memory_id = %record.id, "skipping record failing invariants in scan");
                continue;
            }
            records.push(record);
        }
        Ok(records)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let tags_json: String = row.get(3)?;
    let metadata_json: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    let last_accessed: Option<String> = row.get(10)?;
    let access_pattern_json: String = row.get(12)?;
    let has_embedding: i64 = row.get(13)?;

    let mut record = MemoryRecord::new(
        row.get::<_, String>(1)?,
        crate::memory::CreateMemoryInput::from_text(row.get::<_, String>(2)?),
    );
    record.id = row.get(0)?;
    record.tags = serde_json::from_str(&tags_json)
        .map_err(|e| Error::Internal(format!("invalid stored tags {tags_json:?}: {e}")))
        .map_err(to_sql_err)?;
    record.metadata = AttrValue::map_from_json(&metadata_json)
        .unwrap_or_else(|_| AttrValue::empty_map());
    record.source = row.get(5)?;
    record.project_id = row.get(6)?;
    record.created_at = parse_ts(&created_at).map_err(to_sql_err)?;
    record.updated_at = parse_ts(&updated_at).map_err(to_sql_err)?;
    record.usage_count = row.get(9)?;
    record.last_accessed = match last_accessed {
        Some(raw) => Some(parse_ts(&raw).map_err(to_sql_err)?),
        None => None,
    };
    record.helpfulness_score = row.get(11)?;
    record.access_pattern = AccessPatternData::from_json(&access_pattern_json)
        .map_err(to_sql_err)?;
    record.has_embedding = has_embedding != 0;
    Ok(record)
}

fn row_to_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Relationship>> {
    let rel_type_raw: String = row.get(4)?;
    let created_at_raw: String = row.get(7)?;

    let build = || -> Result<Relationship> {
        let rel_type = RelationshipType::parse_name(&rel_type_raw).ok_or_else(|| {
            Error::Internal(format!("unknown relationship type {rel_type_raw:?}"))
        })?;
        let mut relationship = Relationship::new(
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            rel_type,
            row.get::<_, f64>(5)?,
            row.get::<_, String>(6)?,
        )?;
        relationship.id = row.get(0)?;
        relationship.created_at = parse_ts(&created_at_raw)?;
        Ok(relationship)
    };
    Ok(build())
}

fn row_to_pattern(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<TemporalPattern>> {
    let pattern_type_raw: String = row.get(2)?;
    let data_raw: String = row.get(3)?;
    let first_seen_raw: String = row.get(6)?;
    let last_seen_raw: String = row.get(7)?;

    let build = || -> Result<TemporalPattern> {
        let pattern_type = PatternType::parse_name(&pattern_type_raw).ok_or_else(|| {
            Error::Internal(format!("unknown pattern type {pattern_type_raw:?}"))
        })?;
        Ok(TemporalPattern {
            id: row.get(0)?,
            principal_id: row.get(1)?,
            pattern_type,
            pattern_data: serde_json::from_str(&data_raw)?,
            confidence: row.get(4)?,
            occurrences: row.get(5)?,
            first_seen: parse_ts(&first_seen_raw)?,
            last_seen: parse_ts(&last_seen_raw)?,
        })
    };
    Ok(build())
}

fn row_to_metric(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<LearningMetric>> {
    let metric_type_raw: String = row.get(2)?;
    let recorded_at_raw: String = row.get(4)?;
    let context_raw: String = row.get(5)?;

    let build = || -> Result<LearningMetric> {
        let metric_type = MetricType::parse_name(&metric_type_raw).ok_or_else(|| {
            Error::Internal(format!("unknown metric type {metric_type_raw:?}"))
        })?;
        Ok(LearningMetric {
            id: row.get(0)?,
            principal_id: row.get(1)?,
            metric_type,
            value: row.get(3)?,
            recorded_at: parse_ts(&recorded_at_raw)?,
            context: serde_json::from_str(&context_raw).unwrap_or(AttrValue::Null),
        })
    };
    Ok(build())
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("invalid stored timestamp {raw:?}: {e}")))
}

fn to_sql_err(e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

// SQLite extended result codes for constraint violations
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;
const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if info.extended_code == SQLITE_CONSTRAINT_UNIQUE
                || info.extended_code == SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn is_foreign_key_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if info.extended_code == SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

// ============================================================================
// TESTS
// ============================================================================
