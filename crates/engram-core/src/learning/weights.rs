//! Per-principal learning weights
//!
//! One row per principal, created lazily with defaults on first access.
//! The weights are independent multipliers, not a probability simplex -
//! no renormalization happens anywhere. Adaptation runs once per
//! ten-search window, reading whatever feedback counters have accumulated
//! by then.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default weight vector (usage, recency, helpfulness, relationship)
pub const DEFAULT_WEIGHTS: (f64, f64, f64, f64) = (0.3, 0.2, 0.5, 0.2);

/// Adaptation runs when `total_searches` lands on a multiple of this
pub const ADAPT_EVERY_N_SEARCHES: i64 = 10;

/// Negative feedback ratio that raises the helpfulness weight
pub const NEG_RATIO_TRIGGER: f64 = 0.30;

/// Positive feedback ratio that lowers the usage weight
pub const POS_RATIO_TRIGGER: f64 = 0.70;

/// Ceiling for the adapted helpfulness weight
pub const HELPFULNESS_WEIGHT_CEIL: f64 = 0.80;

/// Floor for the adapted usage weight
pub const USAGE_WEIGHT_FLOOR: f64 = 0.20;

/// Step size per adaptation
pub const WEIGHT_STEP: f64 = 0.05;

/// Smoothing factor for the satisfaction moving average
pub const SATISFACTION_ALPHA: f64 = 0.3;

/// Per-principal ranking weights and feedback statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningWeights {
    pub principal_id: String,
    pub usage_weight: f64,
    pub recency_weight: f64,
    pub helpfulness_weight: f64,
    pub relationship_weight: f64,
    pub total_searches: i64,
    pub positive_feedback_count: i64,
    pub negative_feedback_count: i64,
    /// Exponentially smoothed satisfaction in [0, 1]
    pub avg_search_satisfaction: f64,
    pub last_weight_update: DateTime<Utc>,
}

impl LearningWeights {
    /// Fresh row with default weights
    pub fn defaults(principal_id: impl Into<String>) -> Self {
        let (usage, recency, helpfulness, relationship) = DEFAULT_WEIGHTS;
        Self {
            principal_id: principal_id.into(),
            usage_weight: usage,
            recency_weight: recency,
            helpfulness_weight: helpfulness,
            relationship_weight: relationship,
            total_searches: 0,
            positive_feedback_count: 0,
            negative_feedback_count: 0,
            avg_search_satisfaction: 0.5,
            last_weight_update: Utc::now(),
        }
    }

    /// The four multipliers as `(usage, recency, helpfulness, relationship)`
    pub fn vector(&self) -> (f64, f64, f64, f64) {
        (
            self.usage_weight,
            self.recency_weight,
            self.helpfulness_weight,
            self.relationship_weight,
        )
    }

    /// Record one ranked search; runs the adapter when the incremented
    /// count lands on an adaptation boundary. Returns whether any weight
    /// moved.
    pub fn record_search(&mut self, now: DateTime<Utc>) -> bool {
        self.total_searches += 1;
        if self.total_searches % ADAPT_EVERY_N_SEARCHES == 0 {
            self.adapt(now)
        } else {
            false
        }
    }

    /// Record one feedback event on the counters
    pub fn record_feedback(&mut self, helpful: bool, satisfaction: Option<f64>) {
        if helpful {
            self.positive_feedback_count += 1;
        } else {
            self.negative_feedback_count += 1;
        }
        if let Some(sample) = satisfaction {
            self.avg_search_satisfaction = SATISFACTION_ALPHA * sample
                + (1.0 - SATISFACTION_ALPHA) * self.avg_search_satisfaction;
        }
    }

    /// Re-evaluate weights from the feedback ratios
    ///
    /// Heavy negative feedback means raw similarity and usage are leading
    /// the principal astray, so helpfulness gains influence. Dominantly
    /// positive feedback means results are already good and usage boosting
    /// can relax.
    fn adapt(&mut self, now: DateTime<Utc>) -> bool {
        let denom = self.total_searches.max(1) as f64;
        let neg_ratio = self.negative_feedback_count as f64 / denom;
        let pos_ratio = self.positive_feedback_count as f64 / denom;

        let before = self.vector();

        if neg_ratio > NEG_RATIO_TRIGGER {
            self.helpfulness_weight =
                (self.helpfulness_weight + WEIGHT_STEP).min(HELPFULNESS_WEIGHT_CEIL);
        }
        if pos_ratio > POS_RATIO_TRIGGER {
            self.usage_weight = (self.usage_weight - WEIGHT_STEP).max(USAGE_WEIGHT_FLOOR);
        }
        self.clamp();
        self.last_weight_update = now;

        self.vector() != before
    }

    /// Positive feedback ratio over recorded searches
    pub fn positive_ratio(&self) -> f64 {
        self.positive_feedback_count as f64 / self.total_searches.max(1) as f64
    }

    fn clamp(&mut self) {
        self.usage_weight = self.usage_weight.clamp(0.0, 1.0);
        self.recency_weight = self.recency_weight.clamp(0.0, 1.0);
        self.helpfulness_weight = self.helpfulness_weight.clamp(0.0, 1.0);
        self.relationship_weight = self.relationship_weight.clamp(0.0, 1.0);
    }
}
