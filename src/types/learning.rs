//! Learn-stage output types: model updates, parameter adjustments, and
//! aggregate performance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::analysis::Pattern;

// ============================================================================
// Tunable Parameters
// ============================================================================

/// The fixed parameter space the adaptive optimizer explores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunableParameter {
    SenseBufferSize,
    AnalysisCacheSize,
    TickInterval,
    SafetyThreshold,
    ConfidenceThreshold,
}

impl TunableParameter {
    pub const ALL: [Self; 5] = [
        Self::SenseBufferSize,
        Self::AnalysisCacheSize,
        Self::TickInterval,
        Self::SafetyThreshold,
        Self::ConfidenceThreshold,
    ];

    /// Inclusive bounds the optimizer must stay within.
    pub fn bounds(self) -> (f64, f64) {
        match self {
            Self::SenseBufferSize => (1_000.0, 20_000.0),
            Self::AnalysisCacheSize => (500.0, 2_000.0),
            Self::TickInterval => (0.05, 0.5),
            Self::SafetyThreshold => (0.1, 0.9),
            Self::ConfidenceThreshold => (0.5, 0.95),
        }
    }
}

impl std::fmt::Display for TunableParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SenseBufferSize => write!(f, "sense_buffer_size"),
            Self::AnalysisCacheSize => write!(f, "analysis_cache_size"),
            Self::TickInterval => write!(f, "tick_interval"),
            Self::SafetyThreshold => write!(f, "safety_threshold"),
            Self::ConfidenceThreshold => write!(f, "confidence_threshold"),
        }
    }
}

// ============================================================================
// Learn Outputs
// ============================================================================

/// A recorded incremental model update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUpdate {
    pub model_name: String,
    pub update_type: String,
    pub at: DateTime<Utc>,
    /// Accuracy observed before the update was issued.
    pub accuracy_before: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// One proposed parameter change from the optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterAdjustment {
    pub parameter: TunableParameter,
    pub old_value: f64,
    pub new_value: f64,
    pub expected_improvement: f64,
    pub at: DateTime<Utc>,
}

/// Aggregate performance across a batch of experiences.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// Mean processing time in seconds.
    pub processing_secs: f64,
    /// Inverse of processing time, per second.
    pub throughput: f64,
    pub error_rate: f64,
}

impl PerformanceReport {
    /// Neutral baseline used when no experiences were available.
    pub fn neutral() -> Self {
        Self {
            accuracy: 0.5,
            precision: 0.5,
            recall: 0.5,
            f1_score: 0.5,
            processing_secs: 0.1,
            throughput: 10.0,
            error_rate: 0.5,
        }
    }
}

/// Output of one learn pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningResult {
    pub model_updates: Vec<ModelUpdate>,
    pub parameter_adjustments: Vec<ParameterAdjustment>,
    pub new_patterns: Vec<Pattern>,
    pub performance: PerformanceReport,
}
