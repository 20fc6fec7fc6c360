//! Speculative execution on the twin.
//!
//! Before an action touches anything real, it is executed against the twin,
//! the predicted post-state is examined for risks, and the twin is restored
//! to its pre-state. The twin report carries the prediction and a confidence
//! derived from the worst risk found.

use chrono::{Local, Timelike, Utc};
use std::sync::Arc;
use tracing::warn;

use super::executor::ActionExecutor;
use crate::twin::Twin;
use crate::types::{ActionKind, ControlAction, Params, RiskFactor, TwinReport};

/// Risks at or below this severity still count as safe.
const SAFE_RISK_CEILING: f64 = 0.5;
/// Nighttime window for security risk checks (22:00 .. 06:00 local).
const NIGHT_START_HOUR: u32 = 22;
const NIGHT_END_HOUR: u32 = 6;

pub struct TwinSimulator {
    twin: Arc<dyn Twin>,
    executor: ActionExecutor,
    temp_limits_c: (f64, f64),
    power_limit_w: f64,
}

impl TwinSimulator {
    pub fn new(twin: Arc<dyn Twin>, temp_limits_c: (f64, f64), power_limit_w: f64) -> Self {
        let executor = ActionExecutor::new(Arc::clone(&twin));
        Self {
            twin,
            executor,
            temp_limits_c,
            power_limit_w,
        }
    }

    /// Speculatively run the action and grade the predicted outcome.
    pub async fn validate_action(&self, action: &ControlAction) -> TwinReport {
        let Some(house_id) = action.context.house_id.clone() else {
            return TwinReport::unavailable("no house context for twin simulation");
        };

        // Pre-states of everything the action can touch. Single-target
        // actions against unknown devices cannot be simulated; batch and
        // emergency actions resolve their own device sets.
        let affected = self.affected_devices(action, &house_id).await;
        let single_target = !matches!(
            action.kind,
            ActionKind::EnergyOptimization | ActionKind::EmergencyResponse
        );
        let mut pre_states = Vec::with_capacity(affected.len());
        for device_id in &affected {
            if let Some(snapshot) = self.twin.device(&house_id, device_id).await {
                pre_states.push((device_id.clone(), snapshot.state));
            }
        }
        if single_target && pre_states.is_empty() {
            return TwinReport::unavailable(format!(
                "no twin device {} in house {house_id}",
                action.target
            ));
        }

        // Run the action on the twin with a scratch copy of the action so the
        // real one's status trail is untouched by speculation.
        let mut speculative = action.clone();
        let execution = self.executor.execute(&mut speculative).await;

        let post = self.twin.device(&house_id, &action.target).await;
        let post_state = post.as_ref().map(|d| d.state.clone()).unwrap_or_default();

        // Restore every captured pre-state before reporting anything.
        for (device_id, pre_state) in &pre_states {
            if let Err(e) = self
                .twin
                .update_device(&house_id, device_id, pre_state)
                .await
            {
                warn!(device = %device_id, error = %e, "Failed to restore twin after speculation");
            }
        }

        if !execution.success {
            return TwinReport {
                safe: false,
                confidence: 0.0,
                predicted_outcome: serde_json::Value::Null,
                risk_factors: Vec::new(),
                reason: execution.error,
                at: Utc::now(),
            };
        }

        let hour = Local::now().hour();
        let risks = assess_risks(
            action,
            &post_state,
            self.temp_limits_c,
            self.power_limit_w,
            hour,
        );
        let max_severity = risks.iter().map(|r| r.severity).fold(0.0, f64::max);

        TwinReport {
            safe: max_severity <= SAFE_RISK_CEILING,
            confidence: 1.0 - max_severity,
            predicted_outcome: serde_json::to_value(&post_state)
                .unwrap_or(serde_json::Value::Null),
            risk_factors: risks,
            reason: None,
            at: Utc::now(),
        }
    }

    /// Devices the action can mutate, mirroring the executor's dispatch.
    async fn affected_devices(&self, action: &ControlAction, house_id: &str) -> Vec<String> {
        match action.kind {
            ActionKind::EnergyOptimization => action
                .params
                .get("devices_to_optimize")
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|e| e.get("device_id").and_then(|v| v.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            ActionKind::EmergencyResponse => {
                let mut ids = Vec::new();
                for class in ["light", "lock", "camera"] {
                    ids.extend(
                        self.twin
                            .devices_of_class(house_id, class)
                            .await
                            .into_iter()
                            .map(|d| d.id),
                    );
                }
                ids
            }
            _ => vec![action.target.clone()],
        }
    }
}

/// Grade a predicted post-state. Pure so the night-hour rule is testable.
fn assess_risks(
    action: &ControlAction,
    post_state: &Params,
    temp_limits_c: (f64, f64),
    power_limit_w: f64,
    hour: u32,
) -> Vec<RiskFactor> {
    let mut risks = Vec::new();

    if matches!(action.kind, ActionKind::Climate | ActionKind::ComfortAdjustment) {
        if let Some(temp) = post_state.get_f64("temperature") {
            if temp < temp_limits_c.0 || temp > temp_limits_c.1 {
                risks.push(RiskFactor {
                    kind: "temperature_extreme".to_string(),
                    severity: 0.9,
                    description: format!("Predicted temperature {temp:.1}C is outside the safe range"),
                });
            }
        }
    }

    if let Some(power) = post_state.get_f64("power_consumption") {
        if power > power_limit_w {
            risks.push(RiskFactor {
                kind: "power_excessive".to_string(),
                severity: 0.7,
                description: format!("Predicted power draw {power:.0}W exceeds the budget"),
            });
        }
    }

    if action.kind == ActionKind::Security
        && post_state.get_bool("locked") == Some(false)
        && (hour >= NIGHT_START_HOUR || hour < NIGHT_END_HOUR)
    {
        risks.push(RiskFactor {
            kind: "nighttime_unlock".to_string(),
            severity: 0.6,
            description: "Unlocking doors during nighttime hours".to_string(),
        });
    }

    risks
}
