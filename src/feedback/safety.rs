//! Safety constraint validation.
//!
//! The validator holds an ordered list of [`Constraint`] evaluators. A
//! constraint that errors internally is logged and treated as satisfied for
//! that evaluation — the validator fails open per constraint, and hard
//! failures surface through the twin simulator and executor instead.
//!
//! Note that `evaluate` takes `&mut self`: the rate-limit constraint records
//! its sample during evaluation, so evaluating an action counts it against
//! the window whether or not it is ultimately admitted.

use chrono::Utc;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

use crate::config::FeedbackConfig;
use crate::types::{
    ActionKind, ConstraintSeverity, ControlAction, SafetyReport, SafetyViolation,
};

#[derive(Debug, Error)]
#[error("constraint evaluation failed: {0}")]
pub struct ConstraintError(pub String);

// ============================================================================
// Constraint Interface
// ============================================================================

/// One safety rule over a candidate action.
pub trait Constraint: Send + Sync {
    fn name(&self) -> &'static str;
    fn severity(&self) -> ConstraintSeverity;
    fn description(&self) -> &'static str;

    /// True if the action satisfies the constraint.
    fn evaluate(&mut self, action: &ControlAction) -> Result<bool, ConstraintError>;

    fn mitigation(&self) -> String {
        format!("Review and modify {} parameters", self.name())
    }
}

// ============================================================================
// Built-in Constraints
// ============================================================================

/// Climate actions must target temperatures within the configured band.
pub struct TemperatureLimitConstraint {
    min_c: f64,
    max_c: f64,
}

impl TemperatureLimitConstraint {
    pub fn new(min_c: f64, max_c: f64) -> Self {
        Self { min_c, max_c }
    }
}

impl Constraint for TemperatureLimitConstraint {
    fn name(&self) -> &'static str {
        "temperature_limit"
    }

    fn severity(&self) -> ConstraintSeverity {
        ConstraintSeverity::Critical
    }

    fn description(&self) -> &'static str {
        "Maintains safe temperature range"
    }

    fn evaluate(&mut self, action: &ControlAction) -> Result<bool, ConstraintError> {
        if action.kind != ActionKind::Climate && action.kind != ActionKind::ComfortAdjustment {
            return Ok(true);
        }
        match action.params.get_f64("target_temperature") {
            Some(target) => Ok(target >= self.min_c && target <= self.max_c),
            None => Ok(true),
        }
    }
}

/// Caps how often the same target may be acted on within a trailing window.
pub struct RateLimitConstraint {
    max_rate: usize,
    window: Duration,
    history: VecDeque<(Instant, String)>,
}

impl RateLimitConstraint {
    pub fn new(max_rate: usize, window: Duration) -> Self {
        Self {
            max_rate,
            window,
            history: VecDeque::with_capacity(100),
        }
    }
}

impl Constraint for RateLimitConstraint {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn severity(&self) -> ConstraintSeverity {
        ConstraintSeverity::High
    }

    fn description(&self) -> &'static str {
        "Prevents excessive action frequency"
    }

    fn evaluate(&mut self, action: &ControlAction) -> Result<bool, ConstraintError> {
        let now = Instant::now();
        while let Some((at, _)) = self.history.front() {
            if now.duration_since(*at) > self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let recent = self
            .history
            .iter()
            .filter(|(_, target)| *target == action.target)
            .count();

        // The sample is recorded at evaluation time, before the verdict.
        self.history.push_back((now, action.target.clone()));
        if self.history.len() > 100 {
            self.history.pop_front();
        }

        Ok(recent < self.max_rate)
    }
}

/// Admits an action only if the house stays under its power budget.
pub struct PowerLimitConstraint {
    max_watts: f64,
}

impl PowerLimitConstraint {
    pub fn new(max_watts: f64) -> Self {
        Self { max_watts }
    }
}

impl Constraint for PowerLimitConstraint {
    fn name(&self) -> &'static str {
        "power_limit"
    }

    fn severity(&self) -> ConstraintSeverity {
        ConstraintSeverity::High
    }

    fn description(&self) -> &'static str {
        "Prevents excessive power consumption"
    }

    fn evaluate(&mut self, action: &ControlAction) -> Result<bool, ConstraintError> {
        let increase = action.params.get_f64("power_increase").unwrap_or(0.0);
        let current = action.context.current_power_consumption;
        Ok(current + increase <= self.max_watts)
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Evaluates every constraint against a candidate action and scores the risk.
pub struct SafetyValidator {
    constraints: Vec<Box<dyn Constraint>>,
    violation_history: VecDeque<SafetyViolation>,
}

/// Bound on the retained violation history.
const VIOLATION_HISTORY: usize = 1_000;

impl SafetyValidator {
    /// Standard constraint set from config.
    pub fn new(config: &FeedbackConfig) -> Self {
        Self::with_constraints(vec![
            Box::new(TemperatureLimitConstraint::new(
                config.temp_limits_c.0,
                config.temp_limits_c.1,
            )),
            Box::new(RateLimitConstraint::new(
                config.max_rate,
                Duration::from_secs_f64(config.rate_window_secs),
            )),
            Box::new(PowerLimitConstraint::new(config.power_limit_w)),
        ])
    }

    pub fn with_constraints(constraints: Vec<Box<dyn Constraint>>) -> Self {
        Self {
            constraints,
            violation_history: VecDeque::with_capacity(VIOLATION_HISTORY),
        }
    }

    pub fn validate(&mut self, action: &ControlAction) -> SafetyReport {
        let mut violations = Vec::new();
        let mut risk = 0.0;

        for constraint in &mut self.constraints {
            match constraint.evaluate(action) {
                Ok(true) => {}
                Ok(false) => {
                    let violation = SafetyViolation {
                        constraint: constraint.name().to_string(),
                        severity: constraint.severity(),
                        description: constraint.description().to_string(),
                        mitigation: constraint.mitigation(),
                        at: Utc::now(),
                    };
                    risk += violation.severity.weight();
                    if self.violation_history.len() >= VIOLATION_HISTORY {
                        self.violation_history.pop_front();
                    }
                    self.violation_history.push_back(violation.clone());
                    violations.push(violation);
                }
                Err(e) => {
                    // Fail open for this constraint; the error is visible in
                    // logs and the action still faces twin simulation.
                    warn!(constraint = constraint.name(), error = %e, "Constraint errored; treating as satisfied");
                }
            }
        }

        SafetyReport {
            safe: violations.is_empty(),
            violations,
            risk_score: risk.min(1.0),
            at: Utc::now(),
        }
    }

    pub fn violation_count(&self) -> usize {
        self.violation_history.len()
    }
}
