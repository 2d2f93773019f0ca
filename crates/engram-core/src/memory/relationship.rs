//! Typed edges between memories
//!
//! A relationship is a directed edge between two distinct memories of the
//! same principal. Uniqueness on `(from, to)` is enforced by the store;
//! deleting either endpoint deletes the edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Relationship edge types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    RelatedTo,
    CausedBy,
    SimilarTo,
    Follows,
    Contradicts,
    SynthesizedFrom,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::RelatedTo => "related_to",
            RelationshipType::CausedBy => "caused_by",
            RelationshipType::SimilarTo => "similar_to",
            RelationshipType::Follows => "follows",
            RelationshipType::Contradicts => "contradicts",
            RelationshipType::SynthesizedFrom => "synthesized_from",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "related_to" => Some(RelationshipType::RelatedTo),
            "caused_by" => Some(RelationshipType::CausedBy),
            "similar_to" => Some(RelationshipType::SimilarTo),
            "follows" => Some(RelationshipType::Follows),
            "contradicts" => Some(RelationshipType::Contradicts),
            "synthesized_from" => Some(RelationshipType::SynthesizedFrom),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed, typed edge between two memories
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: String,
    pub principal_id: String,
    pub from_id: String,
    pub to_id: String,
    pub rel_type: RelationshipType,
    /// Edge strength in [0, 1]
    pub strength: f64,
    /// Short human-readable justification
    pub explanation: String,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Build a validated edge
    pub fn new(
        principal_id: impl Into<String>,
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        rel_type: RelationshipType,
        strength: f64,
        explanation: impl Into<String>,
    ) -> Result<Self> {
        let from_id = from_id.into();
        let to_id = to_id.into();
        if from_id == to_id {
            return Err(Error::InvalidInput(
                "relationship endpoints must be distinct".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&strength) {
            return Err(Error::InvalidInput(format!(
                "relationship strength {strength} outside [0,1]"
            )));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            principal_id: principal_id.into(),
            from_id,
            to_id,
            rel_type,
            strength,
            explanation: explanation.into(),
            created_at: Utc::now(),
        })
    }
}
