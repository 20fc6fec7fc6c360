//! Action synthesis: maps analysis artifacts to prioritized control actions.
//!
//! Severity and confidence gates keep the loop quiet on ordinary data;
//! everything below the thresholds is simply not acted upon. Targets follow
//! the `{device}_{kind}` sensor naming convention, so `room1_temp` readings
//! produce actions against `thermostat_room1`.

use tracing::debug;

use crate::types::{
    ActionContext, ActionKind, AnalysisResult, Anomaly, ControlAction, Params, Pattern,
    PatternPayload, Prediction, Priority,
};

/// Anomalies above this severity warrant mitigation.
const MITIGATION_SEVERITY: f64 = 0.8;
/// Power anomalies above this severity escalate to critical.
const CRITICAL_POWER_SEVERITY: f64 = 0.9;
/// Predictions need this much confidence to act on.
const PREVENTIVE_CONFIDENCE: f64 = 0.7;
/// And at least this much trend to be worth preventing.
const PREVENTIVE_TREND: f64 = 0.1;
/// Patterns above this confidence feed optimizations.
const OPTIMIZATION_CONFIDENCE: f64 = 0.6;
/// Comfort band edges in scaled units.
const COMFORT_HOT: f64 = 0.8;
const COMFORT_COLD: f64 = 0.3;
/// Daily-scheduling band for periodic patterns, seconds.
const SCHEDULE_MIN_PERIOD: f64 = 3_600.0;
const SCHEDULE_MAX_PERIOD: f64 = 86_400.0;
/// Linear trends steeper than this get a comfort adjustment.
const TREND_SLOPE_FLOOR: f64 = 0.05;

pub struct ActionSynthesizer {
    house_id: String,
}

impl ActionSynthesizer {
    pub fn new(house_id: impl Into<String>) -> Self {
        Self {
            house_id: house_id.into(),
        }
    }

    /// Derive zero or more actions from one analysis result.
    pub fn synthesize(&self, analysis: &AnalysisResult) -> Vec<ControlAction> {
        let mut actions = Vec::new();

        for anomaly in &analysis.anomalies {
            if anomaly.severity > MITIGATION_SEVERITY {
                if let Some(action) = self.mitigation(anomaly) {
                    actions.push(action);
                }
            }
        }
        for prediction in &analysis.predictions {
            if prediction.confidence > PREVENTIVE_CONFIDENCE {
                if let Some(action) = self.preventive(prediction) {
                    actions.push(action);
                }
            }
        }
        for pattern in &analysis.patterns {
            if pattern.confidence > OPTIMIZATION_CONFIDENCE {
                if let Some(action) = self.optimization(pattern) {
                    actions.push(action);
                }
            }
        }

        debug!(actions = actions.len(), "Action synthesis complete");
        actions
    }

    fn context(&self, source_artifact: &str) -> ActionContext {
        ActionContext {
            house_id: Some(self.house_id.clone()),
            source_artifact: Some(source_artifact.to_string()),
            ..ActionContext::default()
        }
    }

    /// Mitigate a severe anomaly.
    fn mitigation(&self, anomaly: &Anomaly) -> Option<ControlAction> {
        let sensor = anomaly.sensor_id.to_lowercase();
        let generated = Some(format!("anomaly_mitigation_{}", anomaly_tag(anomaly)));

        if sensor.contains("temp") {
            let scaled = anomaly
                .metadata
                .get("scaled_value")
                .and_then(serde_json::Value::as_f64)?;
            let celsius = anomaly.value.as_f64()?;
            let (lo, hi) = anomaly.expected_range;
            let prefix = anomaly.sensor_id.split('_').next().unwrap_or("room");

            if scaled > hi {
                // Room running hot: pull it back a couple of degrees.
                return Some(ControlAction::new(
                    ActionKind::Climate,
                    format!("thermostat_{prefix}"),
                    Params::new()
                        .set("hvac_mode", "cool")
                        .set("target_temperature", celsius - 2.0),
                    Priority::High,
                    self.context(&anomaly.sensor_id),
                    generated,
                ));
            } else if scaled < lo {
                return Some(ControlAction::new(
                    ActionKind::Climate,
                    format!("thermostat_{prefix}"),
                    Params::new()
                        .set("hvac_mode", "heat")
                        .set("target_temperature", celsius + 2.0),
                    Priority::High,
                    self.context(&anomaly.sensor_id),
                    generated,
                ));
            }
        } else if sensor.contains("power") && anomaly.severity > CRITICAL_POWER_SEVERITY {
            let prefix = anomaly.sensor_id.split('_').next().unwrap_or("house");
            return Some(ControlAction::new(
                ActionKind::EnergyOptimization,
                prefix,
                Params::new()
                    .set("action", "reduce_consumption")
                    .set("target_reduction", 0.2),
                Priority::Critical,
                self.context(&anomaly.sensor_id),
                generated,
            ));
        }

        None
    }

    /// Act ahead of a predicted comfort-band crossing.
    fn preventive(&self, prediction: &Prediction) -> Option<ControlAction> {
        if prediction.prediction_type != "next_value"
            || prediction.trend.abs() <= PREVENTIVE_TREND
        {
            return None;
        }

        let sensor = prediction.sensor_id.to_lowercase();
        if !sensor.contains("temp") {
            return None;
        }
        let prefix = prediction.sensor_id.split('_').next().unwrap_or("room");
        let generated = Some(format!("prediction_{}", prediction.model_name));

        if prediction.trend > 0.0 && prediction.predicted_value > COMFORT_HOT {
            Some(ControlAction::new(
                ActionKind::Climate,
                format!("thermostat_{prefix}"),
                Params::new()
                    .set("hvac_mode", "cool")
                    .set("target_temperature", 22.0),
                Priority::Medium,
                self.context(&prediction.sensor_id),
                generated,
            ))
        } else if prediction.trend < 0.0 && prediction.predicted_value < COMFORT_COLD {
            Some(ControlAction::new(
                ActionKind::Climate,
                format!("thermostat_{prefix}"),
                Params::new()
                    .set("hvac_mode", "heat")
                    .set("target_temperature", 20.0),
                Priority::Medium,
                self.context(&prediction.sensor_id),
                generated,
            ))
        } else {
            None
        }
    }

    /// Exploit a confident pattern for low-priority optimization.
    fn optimization(&self, pattern: &Pattern) -> Option<ControlAction> {
        match &pattern.payload {
            PatternPayload::Periodic { period_secs, .. } => {
                if (SCHEDULE_MIN_PERIOD..=SCHEDULE_MAX_PERIOD).contains(period_secs) {
                    Some(ControlAction::new(
                        ActionKind::EnergyOptimization,
                        "house_schedule",
                        Params::new()
                            .set("action", "schedule_optimization")
                            .set("period_secs", *period_secs)
                            .set("pattern_confidence", pattern.confidence),
                        Priority::Low,
                        self.context(pattern.sensor_ids.first().map_or("unknown", String::as_str)),
                        Some("pattern_periodic".to_string()),
                    ))
                } else {
                    None
                }
            }
            PatternPayload::LinearTrend {
                slope, direction, ..
            } => {
                if slope.abs() > TREND_SLOPE_FLOOR {
                    let target = pattern.sensor_ids.first().cloned().unwrap_or_default();
                    Some(ControlAction::new(
                        ActionKind::ComfortAdjustment,
                        target,
                        Params::new()
                            .set("action", "trend_adjustment")
                            .set("slope", *slope)
                            .set(
                                "direction",
                                serde_json::to_value(direction).unwrap_or_default(),
                            ),
                        Priority::Low,
                        self.context(pattern.sensor_ids.first().map_or("unknown", String::as_str)),
                        Some("pattern_trend".to_string()),
                    ))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

fn anomaly_tag(anomaly: &Anomaly) -> &'static str {
    match anomaly.kind {
        crate::types::AnomalyKind::Statistical => "statistical",
        crate::types::AnomalyKind::Contextual => "contextual",
        crate::types::AnomalyKind::Collective => "collective",
        crate::types::AnomalyKind::RuleBased => "rule_based",
    }
}
