//! Simple next-value forecasting by trend extrapolation.

use chrono::Utc;

use super::periodic::group_by_sensor;
use crate::types::{NormalizedReading, Prediction};

/// Minimum readings per sensor before extrapolating.
const MIN_SAMPLES: usize = 5;
/// Extrapolation looks at the trailing window only.
const WINDOW: usize = 10;
/// Fixed confidence for this intentionally naive model.
const CONFIDENCE: f64 = 0.6;

pub struct ForecastAnalyzer;

impl ForecastAnalyzer {
    pub fn predict(&self, data: &[NormalizedReading]) -> Vec<Prediction> {
        let now = Utc::now().timestamp() as f64;
        let mut predictions = Vec::new();

        for (sensor_id, (_, values)) in group_by_sensor(data) {
            if values.len() < MIN_SAMPLES {
                continue;
            }
            let tail: Vec<f64> = values.iter().rev().take(WINDOW).rev().copied().collect();
            let first = tail[0];
            let last = tail[tail.len() - 1];
            let trend = (last - first) / tail.len() as f64;

            predictions.push(Prediction {
                model_name: "simple_trend".to_string(),
                prediction_type: "next_value".to_string(),
                timestamp: now,
                sensor_id,
                predicted_value: (last + trend).clamp(0.0, 1.0),
                trend,
                confidence: CONFIDENCE,
            });
        }
        predictions
    }
}
