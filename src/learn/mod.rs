//! Learn stage: experience accumulation, performance evaluation, incremental
//! model updates, drift detection, parameter optimization and scenario
//! rehearsal.
//!
//! Runs on a coarser cadence than the main tick (the orchestrator gates it on
//! the learn interval). A learn pass never fails the cycle it runs in.

mod discovery;
mod evaluator;
mod experience;
mod optimizer;
mod scenarios;

pub use discovery::discover_patterns;
pub use evaluator::PerformanceEvaluator;
pub use experience::ExperienceBuffer;
pub use optimizer::AdaptiveOptimizer;
pub use scenarios::{LearnHook, Scenario, ScenarioEngine, ScenarioKind, ScenarioResult};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LearnConfig;
use crate::twin::Twin;
use crate::types::{
    AnalysisResult, Experience, ExperienceKind, ExecutionResult, LearningResult, ModelUpdate,
    NormalizedReading, PerformanceReport, TunableParameter,
};

/// Experiences needed before an incremental update batch is meaningful.
const MIN_BATCH: usize = 5;
/// Drift windows compare this many recent vs preceding experiences.
const DRIFT_WINDOW: usize = 100;
/// Minimum scored samples per drift window.
const DRIFT_MIN_SAMPLES: usize = 10;
/// Scenarios played per rehearsal session.
const SCENARIOS_PER_SESSION: usize = 3;

// ============================================================================
// Metrics & Insights
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct LearnMetrics {
    pub experiences_processed: u64,
    pub model_updates: u64,
    pub parameter_adjustments: u64,
    pub scenarios_run: u64,
    pub learning_sessions: u64,
    pub average_performance: f64,
}

/// Summary of what the learner has picked up so far.
#[derive(Debug, Clone, Serialize)]
pub struct LearningInsights {
    pub total_experiences: usize,
    pub type_distribution: BTreeMap<String, usize>,
    /// "improving", "declining" or "stable" over the recent window.
    pub performance_trend: String,
    pub recent_average_feedback: f64,
    pub drift_detected: bool,
    pub scenarios_completed: u64,
    pub learning_effectiveness: f64,
}

// ============================================================================
// Learn Module
// ============================================================================

pub struct LearnModule {
    config: LearnConfig,
    buffer: ExperienceBuffer,
    evaluator: PerformanceEvaluator,
    optimizer: AdaptiveOptimizer,
    twin: Arc<dyn Twin>,
    hook: Option<Arc<dyn LearnHook>>,
    rng: StdRng,
    metrics: LearnMetrics,
}

impl LearnModule {
    pub fn new(config: &LearnConfig, twin: Arc<dyn Twin>, hook: Option<Arc<dyn LearnHook>>) -> Self {
        Self {
            buffer: ExperienceBuffer::new(config.buffer_size),
            evaluator: PerformanceEvaluator,
            optimizer: AdaptiveOptimizer::new(config.exploration_rate, config.learning_rate),
            twin,
            hook,
            rng: StdRng::from_entropy(),
            metrics: LearnMetrics {
                average_performance: 0.5,
                ..LearnMetrics::default()
            },
            config: config.clone(),
        }
    }

    /// Install (or replace) the scenario hook.
    pub fn set_hook(&mut self, hook: Arc<dyn LearnHook>) {
        self.hook = Some(hook);
    }

    /// One learning pass over a cycle's inputs and outputs.
    pub async fn learn(
        &mut self,
        readings: &[NormalizedReading],
        analysis: Option<&AnalysisResult>,
        execution_results: &[ExecutionResult],
        current_params: &HashMap<TunableParameter, f64>,
    ) -> LearningResult {
        // 1. Materialize and store experiences
        let experiences = self.create_experiences(readings, analysis, execution_results);
        self.metrics.experiences_processed += experiences.len() as u64;
        for experience in &experiences {
            self.buffer.add(experience.clone());
        }

        // 2. Aggregate performance
        let performance = self.evaluator.aggregate(&experiences);

        // 3. Model updates under the accuracy threshold
        let mut model_updates = Vec::new();
        if performance.accuracy < self.config.accuracy_threshold {
            model_updates.extend(self.incremental_updates());
        }

        // 4. Concept drift
        if self.drift_detected() {
            info!("Concept drift detected; recording adaptation update");
            model_updates.push(ModelUpdate {
                model_name: "adaptive_models".to_string(),
                update_type: "concept_drift_adaptation".to_string(),
                at: Utc::now(),
                accuracy_before: self.metrics.average_performance,
                metadata: BTreeMap::from([(
                    "drift_detected".to_string(),
                    serde_json::Value::from(true),
                )]),
            });
        }
        self.metrics.model_updates += model_updates.len() as u64;

        // 5. One parameter proposal per pass
        let adjustment = self.optimizer.propose(current_params);
        self.optimizer.record_outcome(
            adjustment.parameter,
            adjustment.new_value,
            performance.accuracy,
        );
        self.metrics.parameter_adjustments += 1;

        // 6. Pattern discovery over the whole buffer
        let new_patterns = discover_patterns(&self.buffer.all());

        // 7. Periodic scenario rehearsal
        if self.metrics.learning_sessions % self.config.scenario_every == 0 {
            self.run_scenario_learning().await;
        }

        self.metrics.learning_sessions += 1;
        self.update_average(performance.accuracy);

        LearningResult {
            model_updates,
            parameter_adjustments: vec![adjustment],
            new_patterns,
            performance,
        }
    }

    fn create_experiences(
        &self,
        readings: &[NormalizedReading],
        analysis: Option<&AnalysisResult>,
        execution_results: &[ExecutionResult],
    ) -> Vec<Experience> {
        let mut experiences = Vec::new();

        for reading in readings {
            experiences.push(Experience::new(
                ExperienceKind::SensorData,
                DateTime::<Utc>::from_timestamp(reading.timestamp as i64, 0)
                    .unwrap_or_else(Utc::now),
                json!({
                    "sensor_id": reading.sensor_id,
                    "sensor_kind": reading.kind.to_string(),
                    "scaled": reading.scaled,
                    "quality": reading.quality.to_string(),
                }),
                None,
                Some(reading.confidence),
            ));
        }

        if let Some(analysis) = analysis {
            for anomaly in &analysis.anomalies {
                experiences.push(Experience::new(
                    ExperienceKind::AnomalyDetection,
                    DateTime::<Utc>::from_timestamp(anomaly.timestamp as i64, 0)
                        .unwrap_or_else(Utc::now),
                    json!({
                        "sensor_id": anomaly.sensor_id,
                        "expected_range": anomaly.expected_range,
                    }),
                    Some(json!({
                        "severity": anomaly.severity,
                        "description": anomaly.description,
                    })),
                    // A mild anomaly is a better detection outcome than a
                    // severe one slipping through.
                    Some(1.0 - anomaly.severity),
                ));
            }
        }

        for result in execution_results {
            experiences.push(Experience::new(
                ExperienceKind::ActionOutcome,
                result.completed_at,
                json!({ "action_id": result.action_id }),
                Some(json!({
                    "success": result.success,
                    "execution_secs": result.duration_secs,
                })),
                Some(if result.success { 1.0 } else { 0.0 }),
            ));
        }

        experiences
    }

    /// Incremental updates driven by high-importance recent experiences.
    fn incremental_updates(&mut self) -> Vec<ModelUpdate> {
        let batch = self.buffer.by_importance(self.config.batch_size, 0.7);
        if batch.len() < MIN_BATCH {
            return Vec::new();
        }

        let mut updates = Vec::new();
        for (model_name, kind) in [
            ("anomaly_detection", ExperienceKind::AnomalyDetection),
            ("pattern_recognition", ExperienceKind::PatternDiscovery),
        ] {
            let used = batch.iter().filter(|e| e.kind == kind).count();
            if used > 0 {
                updates.push(ModelUpdate {
                    model_name: model_name.to_string(),
                    update_type: "incremental".to_string(),
                    at: Utc::now(),
                    accuracy_before: self.metrics.average_performance,
                    metadata: BTreeMap::from([(
                        "experiences_used".to_string(),
                        serde_json::Value::from(used),
                    )]),
                });
            }
        }
        updates
    }

    /// Mean feedback of the last window vs the window before it.
    pub fn drift_detected(&self) -> bool {
        let recent: Vec<f64> = self
            .buffer
            .recent(DRIFT_WINDOW)
            .iter()
            .filter_map(|e| e.feedback_score)
            .collect();
        let historical: Vec<f64> = self
            .buffer
            .historical(DRIFT_WINDOW, DRIFT_WINDOW)
            .iter()
            .filter_map(|e| e.feedback_score)
            .collect();

        if recent.len() < DRIFT_MIN_SAMPLES || historical.len() < DRIFT_MIN_SAMPLES {
            return false;
        }
        let recent_mean = recent.iter().sum::<f64>() / recent.len() as f64;
        let historical_mean = historical.iter().sum::<f64>() / historical.len() as f64;
        (recent_mean - historical_mean).abs() > self.config.drift_threshold
    }

    async fn run_scenario_learning(&mut self) {
        let Some(hook) = self.hook.clone() else {
            return;
        };
        let houses = self.twin.house_ids().await;
        if houses.is_empty() {
            return;
        }

        let scenarios = ScenarioEngine::generate(&mut self.rng);
        for scenario in scenarios.into_iter().take(SCENARIOS_PER_SESSION) {
            let house = &houses[self.rng.gen_range(0..houses.len())];
            let result = hook.run_scenario(&scenario, house).await;
            debug!(scenario = %scenario.kind, house = %house, success = result.success, "Scenario played");

            if result.success {
                let experience = Experience::new(
                    ExperienceKind::PatternDiscovery,
                    Utc::now(),
                    serde_json::to_value(&scenario).unwrap_or_default(),
                    serde_json::to_value(&result).ok(),
                    Some(1.0),
                );
                self.buffer.add(experience);
                self.metrics.scenarios_run += 1;
            } else if let Some(error) = &result.error {
                warn!(scenario = %scenario.kind, error = %error, "Scenario failed");
            }
        }
    }

    fn update_average(&mut self, accuracy: f64) {
        let sessions = self.metrics.learning_sessions as f64;
        self.metrics.average_performance =
            (self.metrics.average_performance * (sessions - 1.0) + accuracy) / sessions;
    }

    pub fn insights(&self) -> LearningInsights {
        let all = self.buffer.all();
        let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
        for experience in &all {
            *distribution
                .entry(format!("{:?}", experience.kind).to_lowercase())
                .or_insert(0) += 1;
        }

        let recent_scores: Vec<f64> = self
            .buffer
            .recent(DRIFT_WINDOW)
            .iter()
            .filter_map(|e| e.feedback_score)
            .collect();
        let trend = if recent_scores.len() >= 2 * DRIFT_MIN_SAMPLES {
            let early: f64 = recent_scores[..DRIFT_MIN_SAMPLES].iter().sum::<f64>()
                / DRIFT_MIN_SAMPLES as f64;
            let late: f64 = recent_scores[recent_scores.len() - DRIFT_MIN_SAMPLES..]
                .iter()
                .sum::<f64>()
                / DRIFT_MIN_SAMPLES as f64;
            if late > early + 0.1 {
                "improving"
            } else if late < early - 0.1 {
                "declining"
            } else {
                "stable"
            }
        } else {
            "stable"
        };

        LearningInsights {
            total_experiences: all.len(),
            type_distribution: distribution,
            performance_trend: trend.to_string(),
            recent_average_feedback: if recent_scores.is_empty() {
                0.5
            } else {
                recent_scores.iter().sum::<f64>() / recent_scores.len() as f64
            },
            drift_detected: self.drift_detected(),
            scenarios_completed: self.metrics.scenarios_run,
            learning_effectiveness: self.metrics.average_performance,
        }
    }

    pub fn metrics(&self) -> &LearnMetrics {
        &self.metrics
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.size()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn exploration_rate(&self) -> f64 {
        self.optimizer.exploration_rate()
    }

    /// Record externally supplied user feedback as an experience.
    pub fn record_feedback(&mut self, input: serde_json::Value, score: f64) {
        self.buffer.add(Experience::new(
            ExperienceKind::UserFeedback,
            Utc::now(),
            input,
            None,
            Some(score.clamp(0.0, 1.0)),
        ));
    }

    /// Record a safety violation as a maximal-importance experience.
    pub fn record_safety_violation(&mut self, description: &str) {
        self.buffer.add(Experience::new(
            ExperienceKind::SafetyViolation,
            Utc::now(),
            json!({ "violation": description }),
            None,
            Some(0.0),
        ));
    }

    /// Aggregate performance for an arbitrary batch (used in diagnostics).
    pub fn evaluate_batch(&self, experiences: &[Experience]) -> PerformanceReport {
        self.evaluator.aggregate(experiences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twin::{house_builder, InMemoryTwin, TwinScenarioHook};
    use chrono::Duration;

    fn params() -> HashMap<TunableParameter, f64> {
        HashMap::from([(TunableParameter::TickInterval, 0.1)])
    }

    async fn module_with_twin() -> LearnModule {
        let twin = Arc::new(InMemoryTwin::new());
        house_builder("house1")
            .thermostat("thermostat_room1", 21.0)
            .light("light_hall")
            .lock("lock_front")
            .camera("camera_porch")
            .install(twin.as_ref())
            .await;
        let hook = Arc::new(TwinScenarioHook::new(twin.clone()));
        LearnModule::new(&LearnConfig::default(), twin, Some(hook))
    }

    fn failed_result() -> ExecutionResult {
        ExecutionResult {
            action_id: "action_x".into(),
            success: false,
            completed_at: Utc::now(),
            duration_secs: 0.01,
            payload: serde_json::Value::Null,
            error: Some("boom".into()),
        }
    }

    #[tokio::test]
    async fn learn_pass_creates_experiences_and_one_adjustment() {
        let mut module = module_with_twin().await;
        let results = vec![failed_result(), failed_result()];

        let outcome = module.learn(&[], None, &results, &params()).await;

        assert_eq!(outcome.parameter_adjustments.len(), 1);
        assert_eq!(module.metrics().experiences_processed, 2);
        assert!(module.buffer_size() >= 2);
        // All failures: accuracy 0 under the threshold
        assert_eq!(outcome.performance.accuracy, 0.0);
    }

    #[tokio::test]
    async fn first_session_plays_scenarios() {
        let mut module = module_with_twin().await;
        module.learn(&[], None, &[], &params()).await;
        assert!(module.metrics().scenarios_run > 0);
    }

    #[tokio::test]
    async fn drift_needs_full_windows() {
        let mut module = module_with_twin().await;
        assert!(!module.drift_detected());

        // 100 poor then 100 great outcomes
        for i in 0..200 {
            let score = if i < 100 { 0.2 } else { 0.9 };
            module.buffer.add(Experience::new(
                ExperienceKind::ActionOutcome,
                Utc::now() - Duration::seconds(200 - i),
                serde_json::Value::Null,
                None,
                Some(score),
            ));
        }
        assert!(module.drift_detected());
    }

    #[tokio::test]
    async fn buffer_stays_bounded() {
        let config = LearnConfig {
            buffer_size: 50,
            ..LearnConfig::default()
        };
        let twin = Arc::new(InMemoryTwin::new());
        let mut module = LearnModule::new(&config, twin, None);
        for _ in 0..10 {
            let results: Vec<ExecutionResult> = (0..20).map(|_| failed_result()).collect();
            module.learn(&[], None, &results, &params()).await;
        }
        assert!(module.buffer_size() <= 50);
    }

    #[tokio::test]
    async fn insights_report_distribution_and_trend() {
        let mut module = module_with_twin().await;
        for _ in 0..30 {
            module.record_feedback(serde_json::Value::Null, 0.9);
        }
        let insights = module.insights();
        assert!(insights.total_experiences >= 30);
        assert!(insights.type_distribution.contains_key("userfeedback"));
        assert!(insights.recent_average_feedback > 0.8);
    }

    #[tokio::test]
    async fn safety_violations_are_maximally_important() {
        let mut module = module_with_twin().await;
        module.record_safety_violation("cycle exceeded safety timeout");
        let top = module.buffer.by_importance(1, 0.9);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].kind, ExperienceKind::SafetyViolation);
    }
}
