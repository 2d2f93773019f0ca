//! Learning metric time series
//!
//! Append-only records the engine emits as it learns, plus the windowed
//! trend summary the `learning_metrics` operation returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::memory::AttrValue;

/// Minimum mean delta between window halves to call a trend
const TREND_EPSILON: f64 = 0.02;

/// Metric families
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    SearchAccuracy,
    PredictionAccuracy,
    AvgHelpfulness,
    UserSatisfaction,
    RelationshipQuality,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::SearchAccuracy => "search_accuracy",
            MetricType::PredictionAccuracy => "prediction_accuracy",
            MetricType::AvgHelpfulness => "avg_helpfulness",
            MetricType::UserSatisfaction => "user_satisfaction",
            MetricType::RelationshipQuality => "relationship_quality",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "search_accuracy" => Some(MetricType::SearchAccuracy),
            "prediction_accuracy" => Some(MetricType::PredictionAccuracy),
            "avg_helpfulness" => Some(MetricType::AvgHelpfulness),
            "user_satisfaction" => Some(MetricType::UserSatisfaction),
            "relationship_quality" => Some(MetricType::RelationshipQuality),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One appended metric sample
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningMetric {
    pub id: String,
    pub principal_id: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
    /// Free-form context bag (query, memory id, cycle number, ...)
    pub context: AttrValue,
}

impl LearningMetric {
    pub fn new(
        principal_id: impl Into<String>,
        metric_type: MetricType,
        value: f64,
        context: AttrValue,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            principal_id: principal_id.into(),
            metric_type,
            value,
            recorded_at: Utc::now(),
            context,
        }
    }
}

// ============================================================================
// TRENDS
// ============================================================================

/// Direction of a metric over the requested window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Flat,
}

/// Summary for one metric family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    pub metric_type: MetricType,
    pub samples: usize,
    pub latest: f64,
    pub mean: f64,
    pub trend: TrendDirection,
    pub points: Vec<MetricPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub recorded_at: DateTime<Utc>,
    pub value: f64,
}

/// Result of the `learning_metrics` operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub principal_id: String,
    pub window_days: i64,
    pub series: Vec<MetricSeries>,
}

/// Fold raw samples into per-type series with trends
///
/// Trend compares the mean of the older half of the window against the
/// newer half; deltas under `TREND_EPSILON` read as flat.
pub fn summarize(
    principal_id: &str,
    window_days: i64,
    mut samples: Vec<LearningMetric>,
) -> MetricsReport {
    samples.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));

    let mut grouped: BTreeMap<MetricType, Vec<&LearningMetric>> = BTreeMap::new();
    for sample in &samples {
        grouped.entry(sample.metric_type).or_default().push(sample);
    }

    let series = grouped
        .into_iter()
        .map(|(metric_type, points)| {
            let values: Vec<f64> = points.iter().map(|p| p.value).collect();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let trend = trend_of(&values);
            MetricSeries {
                metric_type,
                samples: values.len(),
                latest: *values.last().unwrap_or(&0.0),
                mean,
                trend,
                points: points
                    .iter()
                    .map(|p| MetricPoint {
                        recorded_at: p.recorded_at,
                        value: p.value,
                    })
                    .collect(),
            }
        })
        .collect();

    MetricsReport {
        principal_id: principal_id.to_string(),
        window_days,
        series,
    }
}

fn trend_of(values: &[f64]) -> TrendDirection {
    if values.len() < 4 {
        return TrendDirection::Flat;
    }
    let mid = values.len() / 2;
    let older = values[..mid].iter().sum::<f64>() / mid as f64;
    let newer = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;
    let delta = newer - older;
    if delta > TREND_EPSILON {
        TrendDirection::Improving
    } else if delta < -TREND_EPSILON {
        TrendDirection::Declining
    } else {
        TrendDirection::Flat
    }
}
