//! Control actions and their validation / execution records.
//!
//! An action is born `Pending` in the synthesizer and moves strictly forward
//! through `Validating -> TwinTesting -> Executing` into one of the terminal
//! states. `Cancelled` is reachable from any non-terminal state and is
//! terminal itself; there are no other back-edges.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Action Kinds & Priorities
// ============================================================================

/// Kinds of control actions the executor can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Lighting,
    Climate,
    Security,
    EnergyOptimization,
    ComfortAdjustment,
    EmergencyResponse,
    Maintenance,
}

/// Action priority. Declared lowest-first so the derived `Ord` ranks
/// `Critical` above everything else.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Lowest,
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Numeric level, critical = 5 down to lowest = 1.
    pub fn level(self) -> u8 {
        match self {
            Self::Lowest => 1,
            Self::Low => 2,
            Self::Medium => 3,
            Self::High => 4,
            Self::Critical => 5,
        }
    }
}

/// Lifecycle status of a control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Validating,
    TwinTesting,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl ActionStatus {
    /// Position in the forward progression; terminal states share the top rank.
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Validating => 1,
            Self::TwinTesting => 2,
            Self::Executing => 3,
            Self::Completed | Self::Failed | Self::Cancelled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ============================================================================
// Parameter Bag
// ============================================================================

/// Typed parameter bag carried by actions and device-state patches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(pub BTreeMap<String, serde_json::Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(serde_json::Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(serde_json::Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

// ============================================================================
// Action Context
// ============================================================================

/// Situational context an action carries into validation and execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionContext {
    /// House the target device belongs to. Actions without one skip twin
    /// simulation (and fail it, if requested).
    pub house_id: Option<String>,
    /// Whole-house power draw in watts at synthesis time.
    #[serde(default)]
    pub current_power_consumption: f64,
    /// Id of the artifact (anomaly, prediction, pattern) that produced this
    /// action.
    pub source_artifact: Option<String>,
    /// Anything else collaborators want to attach.
    #[serde(default)]
    pub extra: Params,
}

// ============================================================================
// Safety & Twin Reports
// ============================================================================

/// Severity tag carried by safety constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl ConstraintSeverity {
    /// Risk-score weight contributed by one violation of this severity.
    pub fn weight(self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.7,
            Self::Medium => 0.4,
            Self::Low => 0.2,
        }
    }
}

/// One recorded constraint violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyViolation {
    pub constraint: String,
    pub severity: ConstraintSeverity,
    pub description: String,
    pub mitigation: String,
    pub at: DateTime<Utc>,
}

/// Result of running an action through the safety validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyReport {
    pub safe: bool,
    pub violations: Vec<SafetyViolation>,
    /// Sum of severity weights over violations, capped at 1.
    pub risk_score: f64,
    pub at: DateTime<Utc>,
}

/// A risk the twin simulator predicted in an action's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub kind: String,
    pub severity: f64,
    pub description: String,
}

/// Result of speculatively executing an action on the twin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinReport {
    pub safe: bool,
    pub confidence: f64,
    /// Predicted post-state of the target device.
    pub predicted_outcome: serde_json::Value,
    pub risk_factors: Vec<RiskFactor>,
    /// Present when simulation could not run (missing house or twin).
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl TwinReport {
    /// Report for an action that could not be simulated.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            confidence: 0.0,
            predicted_outcome: serde_json::Value::Null,
            risk_factors: Vec::new(),
            reason: Some(reason.into()),
            at: Utc::now(),
        }
    }
}

// ============================================================================
// Control Action
// ============================================================================

/// A control action with its full validation and execution trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlAction {
    /// Globally unique opaque id.
    pub id: String,
    pub kind: ActionKind,
    /// Opaque target device id.
    pub target: String,
    pub params: Params,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Tag describing which artifact produced this action.
    pub generated_from: Option<String>,
    pub context: ActionContext,
    pub status: ActionStatus,
    pub error: Option<String>,
    #[serde(default)]
    pub safety_reports: Vec<SafetyReport>,
    pub twin_report: Option<TwinReport>,
    /// Rollback handle, set once a checkpoint is captured.
    pub checkpoint_id: Option<String>,
}

/// Default action deadline relative to creation.
const DEFAULT_DEADLINE_MINS: i64 = 5;

impl ControlAction {
    pub fn new(
        kind: ActionKind,
        target: impl Into<String>,
        params: Params,
        priority: Priority,
        context: ActionContext,
        generated_from: Option<String>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: format!("action_{}", &Uuid::new_v4().simple().to_string()[..8]),
            kind,
            target: target.into(),
            params,
            priority,
            created_at,
            deadline: created_at + Duration::minutes(DEFAULT_DEADLINE_MINS),
            generated_from,
            context,
            status: ActionStatus::Pending,
            error: None,
            safety_reports: Vec::new(),
            twin_report: None,
            checkpoint_id: None,
        }
    }

    /// Advance the lifecycle status. Transitions are monotonic: a move to an
    /// earlier stage, or out of a terminal state, is rejected.
    pub fn transition(&mut self, next: ActionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if next == ActionStatus::Cancelled || next.rank() > self.status.rank() {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.transition(ActionStatus::Failed);
    }
}

// ============================================================================
// Execution Result
// ============================================================================

/// Outcome of executing one action against the twin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub action_id: String,
    pub success: bool,
    pub completed_at: DateTime<Utc>,
    /// Execution wall time in seconds.
    pub duration_secs: f64,
    /// Applier-specific result payload (state patches applied, devices touched).
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action() -> ControlAction {
        ControlAction::new(
            ActionKind::Climate,
            "thermostat_room1",
            Params::new().set("target_temperature", 22.0),
            Priority::High,
            ActionContext::default(),
            None,
        )
    }

    #[test]
    fn priority_ordering_ranks_critical_highest() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Low > Priority::Lowest);
        assert_eq!(Priority::Critical.level(), 5);
        assert_eq!(Priority::Lowest.level(), 1);
    }

    #[test]
    fn status_progression_is_monotonic() {
        let mut a = action();
        assert!(a.transition(ActionStatus::Validating));
        assert!(a.transition(ActionStatus::TwinTesting));
        // Back-edge rejected
        assert!(!a.transition(ActionStatus::Validating));
        assert!(a.transition(ActionStatus::Executing));
        assert!(a.transition(ActionStatus::Completed));
        // Terminal is final
        assert!(!a.transition(ActionStatus::Executing));
        assert!(!a.transition(ActionStatus::Cancelled));
    }

    #[test]
    fn cancel_is_allowed_from_any_live_state() {
        let mut a = action();
        assert!(a.transition(ActionStatus::Validating));
        assert!(a.transition(ActionStatus::Cancelled));
        assert_eq!(a.status, ActionStatus::Cancelled);
    }

    #[test]
    fn deadline_defaults_to_five_minutes_after_creation() {
        let a = action();
        let delta = a.deadline - a.created_at;
        assert_eq!(delta.num_minutes(), 5);
    }

    #[test]
    fn action_ids_are_unique() {
        assert_ne!(action().id, action().id);
    }
}
