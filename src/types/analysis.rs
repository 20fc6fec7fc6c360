//! Analysis artifacts: patterns, anomalies, predictions, and the combined
//! [`AnalysisResult`] handed from the analyze stage to the feedback stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::reading::RawValue;

// ============================================================================
// Patterns
// ============================================================================

/// Kinds of detected patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Periodic,
    Trend,
    AnomalyCluster,
    Correlation,
    Sequence,
    Cluster,
}

/// Direction of a detected trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
}

impl TrendDirection {
    pub fn from_slope(slope: f64) -> Self {
        if slope > 0.0 {
            Self::Increasing
        } else {
            Self::Decreasing
        }
    }
}

/// Kind-specific pattern payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternPayload {
    Periodic {
        /// Dominant period in seconds.
        period_secs: f64,
        frequency_hz: f64,
        amplitude: f64,
        phase: f64,
    },
    LinearTrend {
        /// Slope in scaled units per second.
        slope: f64,
        direction: TrendDirection,
        r_squared: f64,
        /// Slope expressed per hour for operator-facing output.
        rate_per_hour: f64,
    },
    QuadraticTrend {
        /// Coefficients `[a, b, c]` of `a*t^2 + b*t + c`.
        coefficients: [f64; 3],
        r_squared: f64,
        acceleration: f64,
    },
    Cluster {
        label: usize,
        size: usize,
        average_feedback: f64,
    },
}

/// A pattern detected over a closed time interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub kind: PatternKind,
    /// Sensors (or experience ids, for learned clusters) the pattern covers.
    pub sensor_ids: Vec<String>,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Interval start, seconds since epoch.
    pub start_time: f64,
    /// Interval end, seconds since epoch.
    pub end_time: f64,
    pub payload: PatternPayload,
}

// ============================================================================
// Anomalies
// ============================================================================

/// Kinds of detected anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Statistical,
    Contextual,
    Collective,
    RuleBased,
}

/// A single anomalous observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub sensor_id: String,
    pub timestamp: f64,
    /// Severity in `[0, 1]`.
    pub severity: f64,
    /// The raw observed value.
    pub value: RawValue,
    /// Closed interval the value was expected in (scaled units).
    pub expected_range: (f64, f64),
    pub description: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

// ============================================================================
// Predictions
// ============================================================================

/// A model's forecast for a sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub model_name: String,
    /// Prediction kind tag, e.g. `"next_value"`.
    pub prediction_type: String,
    /// When the prediction was produced, seconds since epoch.
    pub timestamp: f64,
    pub sensor_id: String,
    /// Predicted scaled value, clamped to `[0, 1]`.
    pub predicted_value: f64,
    /// Per-sample trend the extrapolation was based on.
    pub trend: f64,
    pub confidence: f64,
}

// ============================================================================
// Analysis Result
// ============================================================================

/// Combined output of one analyze pass over a reading snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub patterns: Vec<Pattern>,
    pub anomalies: Vec<Anomaly>,
    pub predictions: Vec<Prediction>,
    /// Aggregate confidence in `[0, 1]`; 0.3 when no artifacts were produced.
    pub confidence: f64,
    /// Wall time the analysis took, in seconds.
    pub processing_secs: f64,
}

impl AnalysisResult {
    /// The result of analyzing nothing: no artifacts, floor confidence.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            anomalies: Vec::new(),
            predictions: Vec::new(),
            confidence: 0.3,
            processing_secs: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.anomalies.is_empty() && self.predictions.is_empty()
    }
}
