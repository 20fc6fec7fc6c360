//! Performance evaluation over experiences.
//!
//! Each experience kind reduces to the shared metric set differently: action
//! outcomes are binary, anomaly detections are judged by their feedback
//! score, pattern discoveries by their confidence.

use crate::types::{Experience, ExperienceKind, PerformanceReport};

/// Default per-experience processing time when none was recorded.
const DEFAULT_PROCESSING_SECS: f64 = 0.1;

pub struct PerformanceEvaluator;

impl PerformanceEvaluator {
    /// Metrics for one experience.
    pub fn evaluate(&self, experience: &Experience) -> PerformanceReport {
        match experience.kind {
            ExperienceKind::ActionOutcome => Self::from_action(experience),
            ExperienceKind::AnomalyDetection => Self::from_score(
                experience.feedback_score.unwrap_or(0.5),
                DEFAULT_PROCESSING_SECS,
            ),
            ExperienceKind::PatternDiscovery => {
                let confidence = experience
                    .actual_output
                    .as_ref()
                    .and_then(|v| v.get("confidence"))
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.5);
                Self::from_score(confidence, DEFAULT_PROCESSING_SECS)
            }
            _ => PerformanceReport::neutral(),
        }
    }

    /// Mean metrics over a batch; neutral when the batch is empty.
    pub fn aggregate(&self, experiences: &[Experience]) -> PerformanceReport {
        if experiences.is_empty() {
            return PerformanceReport::neutral();
        }

        let reports: Vec<PerformanceReport> =
            experiences.iter().map(|e| self.evaluate(e)).collect();
        let n = reports.len() as f64;
        PerformanceReport {
            accuracy: reports.iter().map(|r| r.accuracy).sum::<f64>() / n,
            precision: reports.iter().map(|r| r.precision).sum::<f64>() / n,
            recall: reports.iter().map(|r| r.recall).sum::<f64>() / n,
            f1_score: reports.iter().map(|r| r.f1_score).sum::<f64>() / n,
            processing_secs: reports.iter().map(|r| r.processing_secs).sum::<f64>() / n,
            throughput: reports.iter().map(|r| r.throughput).sum::<f64>() / n,
            error_rate: reports.iter().map(|r| r.error_rate).sum::<f64>() / n,
        }
    }

    /// Binary success/failure reduction.
    fn from_action(experience: &Experience) -> PerformanceReport {
        let output = experience.actual_output.as_ref();
        let success = output
            .and_then(|v| v.get("success"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let secs = output
            .and_then(|v| v.get("execution_secs"))
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);

        let hit = if success { 1.0 } else { 0.0 };
        PerformanceReport {
            accuracy: hit,
            precision: hit,
            recall: hit,
            f1_score: hit,
            processing_secs: secs,
            throughput: 1.0 / secs.max(0.001),
            error_rate: 1.0 - hit,
        }
    }

    /// Score-proxy reduction used by anomaly and pattern experiences.
    fn from_score(score: f64, secs: f64) -> PerformanceReport {
        PerformanceReport {
            accuracy: score,
            precision: score,
            recall: score,
            f1_score: score,
            processing_secs: secs,
            throughput: 1.0 / secs.max(0.001),
            error_rate: 1.0 - score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn action_experience(success: bool) -> Experience {
        Experience::new(
            ExperienceKind::ActionOutcome,
            Utc::now(),
            serde_json::Value::Null,
            Some(json!({ "success": success, "execution_secs": 0.02 })),
            Some(if success { 1.0 } else { 0.0 }),
        )
    }

    #[test]
    fn action_outcomes_reduce_to_binary_metrics() {
        let evaluator = PerformanceEvaluator;
        let ok = evaluator.evaluate(&action_experience(true));
        assert_eq!(ok.accuracy, 1.0);
        assert_eq!(ok.error_rate, 0.0);
        assert_eq!(ok.throughput, 1.0 / 0.02);

        let bad = evaluator.evaluate(&action_experience(false));
        assert_eq!(bad.accuracy, 0.0);
        assert_eq!(bad.error_rate, 1.0);
    }

    #[test]
    fn anomaly_experiences_use_feedback_score() {
        let evaluator = PerformanceEvaluator;
        let exp = Experience::new(
            ExperienceKind::AnomalyDetection,
            Utc::now(),
            serde_json::Value::Null,
            None,
            Some(0.3),
        );
        let report = evaluator.evaluate(&exp);
        assert_eq!(report.accuracy, 0.3);
        assert!((report.error_rate - 0.7).abs() < 1e-12);
    }

    #[test]
    fn aggregate_means_the_batch() {
        let evaluator = PerformanceEvaluator;
        let batch = vec![action_experience(true), action_experience(false)];
        let report = evaluator.aggregate(&batch);
        assert!((report.accuracy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn empty_batch_is_neutral() {
        let report = PerformanceEvaluator.aggregate(&[]);
        assert_eq!(report.accuracy, 0.5);
        assert_eq!(report.error_rate, 0.5);
    }
}
