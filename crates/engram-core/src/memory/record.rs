//! Memory record - the fundamental unit of storage
//!
//! One record carries both the content a principal stored and the learning
//! state the engine maintains about it (usage counters, helpfulness,
//! per-context access tallies). The engine mutates only the learning
//! fields; text, tags, and metadata change exclusively through the
//! owner-facing create/update path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::attrs::AttrValue;
use crate::error::{Error, Result};

/// Maximum memory text length in Unicode codepoints
pub const MAX_TEXT_CODEPOINTS: usize = 10_000;

/// Maximum number of tags on a single memory
pub const MAX_TAGS: usize = 64;

/// Maximum length of a single tag in codepoints
pub const MAX_TAG_CODEPOINTS: usize = 100;

/// Initial helpfulness score for new memories
pub const INITIAL_HELPFULNESS: f64 = 0.5;

// ============================================================================
// ACCESS PATTERN
// ============================================================================

/// Per-memory access pattern state
///
/// `contexts` maps a caller-supplied context label to the number of
/// accesses recorded under it. Any other keys a future writer adds are
/// carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPatternData {
    #[serde(default)]
    pub contexts: BTreeMap<String, u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, AttrValue>,
}

impl AccessPatternData {
    /// Total accesses attributed to any context label
    pub fn labeled_accesses(&self) -> u64 {
        self.contexts.values().sum()
    }

    /// Record one access under `label`
    pub fn bump(&mut self, label: &str) {
        *self.contexts.entry(label.to_string()).or_insert(0) += 1;
    }

    /// Parse from the stored JSON column, validating the contexts shape
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            Error::Internal(format!("malformed access_pattern column: {e}"))
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"contexts":{}}"#.to_string())
    }
}

// ============================================================================
// MEMORY RECORD
// ============================================================================

/// A memory owned by a single principal
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Owning principal; immutable after create
    pub principal_id: String,
    /// The stored text
    pub text: String,
    /// Tags for filtering; insertion order is not significant
    pub tags: Vec<String>,
    /// Opaque nested attribute bag
    pub metadata: AttrValue,
    /// Free-form origin label
    pub source: Option<String>,
    /// Grouping label
    pub project_id: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When content fields last changed
    pub updated_at: DateTime<Utc>,

    // ========== Learning state ==========
    /// Number of recorded accesses
    pub usage_count: i64,
    /// Most recent recorded access
    pub last_accessed: Option<DateTime<Utc>>,
    /// Helpfulness in [0, 1], moved by explicit feedback
    pub helpfulness_score: f64,
    /// Per-context access tallies
    pub access_pattern: AccessPatternData,

    // ========== Embedding metadata ==========
    /// Whether an embedding vector is stored for this record
    pub has_embedding: bool,
}

impl MemoryRecord {
    /// Construct a fresh record from validated input
    pub fn new(principal_id: impl Into<String>, input: CreateMemoryInput) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            principal_id: principal_id.into(),
            text: input.text,
            tags: input.tags,
            metadata: input.metadata,
            source: input.source,
            project_id: input.project_id,
            created_at: now,
            updated_at: now,
            usage_count: 0,
            last_accessed: None,
            helpfulness_score: INITIAL_HELPFULNESS,
            access_pattern: AccessPatternData::default(),
            has_embedding: false,
        }
    }

    /// Age in whole days at `now`
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    /// Check the stored learning state against schema invariants
    ///
    /// A violation here means the store let bad data through; callers
    /// surface it as an internal error rather than repairing silently.
    pub fn check_invariants(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.helpfulness_score) {
            return Err(Error::Internal(format!(
                "memory {} has helpfulness_score {} outside [0,1]",
                self.id, self.helpfulness_score
            )));
        }
        if self.usage_count < 0 {
            return Err(Error::Internal(format!(
                "memory {} has negative usage_count {}",
                self.id, self.usage_count
            )));
        }
        if let Some(accessed) = self.last_accessed {
            if accessed < self.created_at {
                return Err(Error::Internal(format!(
                    "memory {} was accessed before it was created",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for creating a memory
///
/// Uses `deny_unknown_fields` to prevent field injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateMemoryInput {
    /// The text to store
    pub text: String,
    /// Origin label (conversation, file, agent name, ...)
    pub source: Option<String>,
    /// Grouping label
    pub project_id: Option<String>,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque nested metadata
    #[serde(default = "AttrValue::empty_map")]
    pub metadata: AttrValue,
}

impl CreateMemoryInput {
    /// Minimal input with just text
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
            project_id: None,
            tags: Vec::new(),
            metadata: AttrValue::empty_map(),
        }
    }

    /// Validate before anything touches the store
    pub fn validate(&self) -> Result<()> {
        let codepoints = self.text.chars().count();
        if codepoints == 0 {
            return Err(Error::InvalidInput("text must not be empty".to_string()));
        }
        if codepoints > MAX_TEXT_CODEPOINTS {
            return Err(Error::InvalidInput(format!(
                "text is {codepoints} codepoints, maximum is {MAX_TEXT_CODEPOINTS}"
            )));
        }
        validate_tags(&self.tags)?;
        if !self.metadata.is_map() {
            return Err(Error::InvalidInput(
                "metadata must be an object".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update to a memory's content fields
///
/// Absent fields are left unchanged. The learning state cannot be patched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoryPatch {
    pub text: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<AttrValue>,
    pub source: Option<String>,
    pub project_id: Option<String>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
            && self.source.is_none()
            && self.project_id.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(text) = &self.text {
            let codepoints = text.chars().count();
            if codepoints == 0 {
                return Err(Error::InvalidInput("text must not be empty".to_string()));
            }
            if codepoints > MAX_TEXT_CODEPOINTS {
                return Err(Error::InvalidInput(format!(
                    "text is {codepoints} codepoints, maximum is {MAX_TEXT_CODEPOINTS}"
                )));
            }
        }
        if let Some(tags) = &self.tags {
            validate_tags(tags)?;
        }
        if let Some(metadata) = &self.metadata {
            if !metadata.is_map() {
                return Err(Error::InvalidInput(
                    "metadata must be an object".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Apply onto a record, returning whether the text changed
    pub fn apply(self, record: &mut MemoryRecord, now: DateTime<Utc>) -> bool {
        let mut text_changed = false;
        if let Some(text) = self.text {
            if text != record.text {
                record.text = text;
                text_changed = true;
            }
        }
        if let Some(tags) = self.tags {
            record.tags = tags;
        }
        if let Some(metadata) = self.metadata {
            record.metadata = metadata;
        }
        if let Some(source) = self.source {
            record.source = Some(source);
        }
        if let Some(project_id) = self.project_id {
            record.project_id = Some(project_id);
        }
        record.updated_at = now;
        text_changed
    }
}

fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS {
        return Err(Error::InvalidInput(format!(
            "{} tags supplied, maximum is {MAX_TAGS}",
            tags.len()
        )));
    }
    for tag in tags {
        let codepoints = tag.chars().count();
        if codepoints == 0 || codepoints > MAX_TAG_CODEPOINTS {
            return Err(Error::InvalidInput(format!(
                "tag {tag:?} must be 1..={MAX_TAG_CODEPOINTS} codepoints"
            )));
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
