//! Feedback integration
//!
//! Explicit helpful/unhelpful signals and graded satisfaction move a
//! memory's helpfulness score. Graded satisfaction takes an exponential
//! moving average; boolean signals take bounded steps. The score never
//! leaves [0, 1].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// EMA smoothing factor for graded satisfaction
pub const SATISFACTION_ALPHA: f64 = 0.3;

/// Score step for a bare `helpful` signal
pub const HELPFUL_DELTA: f64 = 0.10;

/// Score step for a bare unhelpful signal
pub const UNHELPFUL_DELTA: f64 = 0.05;

/// One feedback event against a memory
///
/// Uses `deny_unknown_fields` to prevent field injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FeedbackInput {
    /// Whether the memory helped
    pub helpful: bool,
    /// Optional graded satisfaction in [0, 1]; takes precedence over `helpful`
    pub satisfaction: Option<f64>,
    /// Optional context label, recorded with the metrics the event emits
    pub context: Option<String>,
}

impl FeedbackInput {
    pub fn helpful() -> Self {
        Self {
            helpful: true,
            satisfaction: None,
            context: None,
        }
    }

    pub fn unhelpful() -> Self {
        Self {
            helpful: false,
            satisfaction: None,
            context: None,
        }
    }

    pub fn satisfaction(value: f64) -> Self {
        Self {
            helpful: value >= 0.5,
            satisfaction: Some(value),
            context: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(s) = self.satisfaction {
            if !(0.0..=1.0).contains(&s) {
                return Err(Error::InvalidInput(format!(
                    "satisfaction {s} outside [0,1]"
                )));
            }
        }
        Ok(())
    }
}

/// Compute the next helpfulness score from the current one
pub fn next_score(current: f64, input: &FeedbackInput) -> f64 {
    match input.satisfaction {
        Some(satisfaction) => {
            SATISFACTION_ALPHA * satisfaction + (1.0 - SATISFACTION_ALPHA) * current
        }
        None if input.helpful => (current + HELPFUL_DELTA).min(1.0),
        None => (current - UNHELPFUL_DELTA).max(0.0),
    }
}
