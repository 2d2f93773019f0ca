//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, relationships, learning state",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Prediction cache and learning metric series",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memory (
    id TEXT PRIMARY KEY,
    principal_id TEXT NOT NULL,
    text TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    source TEXT,
    project_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    -- Learning state, mutated only through tracking and feedback
    usage_count INTEGER NOT NULL DEFAULT 0 CHECK (usage_count >= 0),
    last_accessed TEXT,
    helpfulness_score REAL NOT NULL DEFAULT 0.5
        CHECK (helpfulness_score >= 0.0 AND helpfulness_score <= 1.0),
    access_pattern TEXT NOT NULL DEFAULT '{"contexts":{}}'
);

CREATE INDEX IF NOT EXISTS idx_memory_principal ON memory(principal_id);
CREATE INDEX IF NOT EXISTS idx_memory_principal_project ON memory(principal_id, project_id);
CREATE INDEX IF NOT EXISTS idx_memory_last_accessed ON memory(last_accessed);

-- Embedding vectors (binary blob, little-endian f32)
CREATE TABLE IF NOT EXISTS memory_embedding (
    memory_id TEXT PRIMARY KEY REFERENCES memory(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relationship (
    id TEXT PRIMARY KEY,
    principal_id TEXT NOT NULL,
    from_id TEXT NOT NULL REFERENCES memory(id) ON DELETE CASCADE,
    to_id TEXT NOT NULL REFERENCES memory(id) ON DELETE CASCADE,
    rel_type TEXT NOT NULL,
    strength REAL NOT NULL CHECK (strength >= 0.0 AND strength <= 1.0),
    explanation TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    UNIQUE (from_id, to_id)
);

CREATE INDEX IF NOT EXISTS idx_relationship_principal ON relationship(principal_id);
CREATE INDEX IF NOT EXISTS idx_relationship_from ON relationship(from_id);

CREATE TABLE IF NOT EXISTS temporal_pattern (
    id TEXT PRIMARY KEY,
    principal_id TEXT NOT NULL,
    pattern_type TEXT NOT NULL,
    canonical_key TEXT NOT NULL,
    pattern_data TEXT NOT NULL,
    confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
    occurrences INTEGER NOT NULL CHECK (occurrences >= 1),
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    UNIQUE (principal_id, pattern_type, canonical_key)
);

CREATE TABLE IF NOT EXISTS learning_weights (
    principal_id TEXT PRIMARY KEY,
    usage_weight REAL NOT NULL CHECK (usage_weight >= 0.0 AND usage_weight <= 1.0),
    recency_weight REAL NOT NULL CHECK (recency_weight >= 0.0 AND recency_weight <= 1.0),
    helpfulness_weight REAL NOT NULL CHECK (helpfulness_weight >= 0.0 AND helpfulness_weight <= 1.0),
    relationship_weight REAL NOT NULL CHECK (relationship_weight >= 0.0 AND relationship_weight <= 1.0),
    total_searches INTEGER NOT NULL DEFAULT 0,
    positive_feedback_count INTEGER NOT NULL DEFAULT 0,
    negative_feedback_count INTEGER NOT NULL DEFAULT 0,
    avg_search_satisfaction REAL NOT NULL DEFAULT 0.5,
    last_weight_update TEXT NOT NULL
);

INSERT INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Prediction cache and metric series
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS prediction_cache (
    principal_id TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    predictions TEXT NOT NULL,
    context_hash TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    hit_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (principal_id, cache_key)
);

CREATE INDEX IF NOT EXISTS idx_prediction_cache_expiry ON prediction_cache(expires_at);

CREATE TABLE IF NOT EXISTS learning_metric (
    id TEXT PRIMARY KEY,
    principal_id TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    value REAL NOT NULL,
    recorded_at TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT 'null'
);

CREATE INDEX IF NOT EXISTS idx_metric_principal_type
    ON learning_metric(principal_id, metric_type, recorded_at);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
