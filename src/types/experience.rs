//! Learning experiences: tagged records of one learning opportunity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of experiences the learn stage can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceKind {
    SensorData,
    ActionOutcome,
    PatternDiscovery,
    AnomalyDetection,
    SafetyViolation,
    UserFeedback,
}

impl ExperienceKind {
    pub const COUNT: usize = 6;

    /// Stable ordinal used as a clustering feature component.
    pub fn ordinal(self) -> usize {
        match self {
            Self::SensorData => 0,
            Self::ActionOutcome => 1,
            Self::PatternDiscovery => 2,
            Self::AnomalyDetection => 3,
            Self::SafetyViolation => 4,
            Self::UserFeedback => 5,
        }
    }

    /// Base importance assigned to experiences of this kind.
    fn base_importance(self) -> f64 {
        match self {
            Self::SafetyViolation => 1.0,
            Self::AnomalyDetection => 0.8,
            Self::UserFeedback => 0.7,
            _ => 0.5,
        }
    }
}

/// A single learning experience. Importance is derived once at construction
/// and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub id: String,
    pub kind: ExperienceKind,
    pub timestamp: DateTime<Utc>,
    pub input: serde_json::Value,
    pub expected_output: Option<serde_json::Value>,
    pub actual_output: Option<serde_json::Value>,
    /// Outcome score in `[0, 1]`, when one is known.
    pub feedback_score: Option<f64>,
    /// Importance in `[0, 1]`, fixed at creation.
    pub importance: f64,
    pub times_used: u32,
    pub last_used: DateTime<Utc>,
}

impl Experience {
    pub fn new(
        kind: ExperienceKind,
        timestamp: DateTime<Utc>,
        input: serde_json::Value,
        actual_output: Option<serde_json::Value>,
        feedback_score: Option<f64>,
    ) -> Self {
        let prefix = match kind {
            ExperienceKind::SensorData => "sensor",
            ExperienceKind::ActionOutcome => "action",
            ExperienceKind::PatternDiscovery => "scenario",
            ExperienceKind::AnomalyDetection => "anomaly",
            ExperienceKind::SafetyViolation => "safety",
            ExperienceKind::UserFeedback => "feedback",
        };
        Self {
            id: format!("{prefix}_{}", &Uuid::new_v4().simple().to_string()[..8]),
            kind,
            timestamp,
            input,
            expected_output: None,
            actual_output,
            feedback_score,
            importance: derive_importance(kind, feedback_score),
            times_used: 0,
            last_used: timestamp,
        }
    }
}

/// Importance = kind base, plus a bonus for extreme feedback (very good or
/// very bad outcomes teach more than neutral ones), clamped to 1.
fn derive_importance(kind: ExperienceKind, feedback_score: Option<f64>) -> f64 {
    let mut importance = kind.base_importance();
    if let Some(score) = feedback_score {
        let extremity = (score - 0.5).abs() * 2.0;
        importance = (importance + extremity * 0.3).min(1.0);
    }
    importance
}
