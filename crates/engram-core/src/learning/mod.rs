//! Learning state and signal integration
//!
//! Per-principal weights with adaptation, feedback score updates, the
//! recent-access activity ring, and the learning metric time series.

pub mod activity;
pub mod feedback;
pub mod metrics;
pub mod weights;

pub use activity::{AccessEvent, ActivityLog};
pub use feedback::{next_score, FeedbackInput, HELPFUL_DELTA, UNHELPFUL_DELTA};
pub use metrics::{
    summarize, LearningMetric, MetricPoint, MetricSeries, MetricsReport, MetricType,
    TrendDirection,
};
pub use weights::{LearningWeights, ADAPT_EVERY_N_SEARCHES, DEFAULT_WEIGHTS};
