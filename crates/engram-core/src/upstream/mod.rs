//! Upstream provider contracts and protection
//!
//! The classifier and identity-validator contracts the engine consumes,
//! plus the retry and circuit-breaker machinery every upstream call goes
//! through. The embedding contract lives in [`crate::embedding`].

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerSnapshot, CircuitBreaker};
pub use retry::{with_retry, RetryPolicy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// SAVE CLASSIFIER
// ============================================================================

/// Categories the auto-save classifier emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveCategory {
    Decision,
    Fact,
    Preference,
    Outcome,
    Brainstorming,
}

impl SaveCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveCategory::Decision => "decision",
            SaveCategory::Fact => "fact",
            SaveCategory::Preference => "preference",
            SaveCategory::Outcome => "outcome",
            SaveCategory::Brainstorming => "brainstorming",
        }
    }
}

/// Classifier verdict for a candidate auto-save
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub category: SaveCategory,
    pub should_save: bool,
    /// Classifier confidence in [0, 1]
    pub confidence: f64,
    pub reasoning: String,
}

/// External LLM classifier used by the auto-save path
#[async_trait]
pub trait SaveClassifier: Send + Sync {
    async fn classify(&self, text: &str, context: Option<&str>) -> Result<Classification>;
}

// ============================================================================
// IDENTITY VALIDATOR
// ============================================================================

/// One detected identity violation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityViolation {
    /// Violation category label, provider-defined
    pub kind: String,
    /// Byte span of the offending substring in the checked text
    pub span: (usize, usize),
}

/// Identity validation outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub violations: Vec<IdentityViolation>,
    pub corrected_text: Option<String>,
}

/// External identity validator
///
/// The substring match tables it consults are provisioned out of band;
/// the engine passes text through and relays the result.
#[async_trait]
pub trait IdentityValidator: Send + Sync {
    async fn validate(&self, agent_identity: &str, response_text: &str)
        -> Result<ValidationReport>;
}
