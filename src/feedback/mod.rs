//! Feedback stage: synthesize, validate, speculatively test, execute.
//!
//! Actions run strictly in non-increasing priority order with insertion order
//! as the tie-break. Every execution is preceded by a rollback checkpoint;
//! a failed execution restores the captured pre-state exactly once.

mod executor;
mod rollback;
mod safety;
mod synthesizer;
mod twin_sim;

pub use executor::ActionExecutor;
pub use rollback::RollbackJournal;
pub use safety::{
    Constraint, ConstraintError, PowerLimitConstraint, RateLimitConstraint, SafetyValidator,
    TemperatureLimitConstraint,
};
pub use synthesizer::ActionSynthesizer;
pub use twin_sim::TwinSimulator;

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::FeedbackConfig;
use crate::twin::Twin;
use crate::types::{
    ActionStatus, AnalysisResult, ControlAction, ExecutionResult, SafetyReport, TwinReport,
};

/// Completed actions retained for status lookups.
const RECENT_ACTIONS: usize = 100;

// ============================================================================
// Metrics & Status
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackMetrics {
    pub actions_generated: u64,
    pub actions_executed: u64,
    pub actions_failed: u64,
    pub safety_violations: u64,
    pub twin_validations: u64,
    pub rollbacks_performed: u64,
}

impl FeedbackMetrics {
    pub fn success_rate(&self) -> f64 {
        let attempts = self.actions_executed + self.actions_failed;
        self.actions_executed as f64 / attempts.max(1) as f64
    }
}

/// Snapshot of one action's progress, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ActionStatusView {
    pub action_id: String,
    pub status: ActionStatus,
    pub kind: crate::types::ActionKind,
    pub priority: crate::types::Priority,
    pub safety_reports: Vec<SafetyReport>,
    pub twin_report: Option<TwinReport>,
    pub error: Option<String>,
}

// ============================================================================
// Feedback Module
// ============================================================================

/// Turns analysis artifacts into executed (or rejected) control actions.
pub struct FeedbackModule {
    synthesizer: ActionSynthesizer,
    validator: SafetyValidator,
    twin_sim: TwinSimulator,
    rollback: RollbackJournal,
    executor: ActionExecutor,
    recent_actions: VecDeque<ControlAction>,
    metrics: FeedbackMetrics,
}

impl FeedbackModule {
    pub fn new(config: &FeedbackConfig, twin: Arc<dyn Twin>, house_id: &str) -> Self {
        Self {
            synthesizer: ActionSynthesizer::new(house_id),
            validator: SafetyValidator::new(config),
            twin_sim: TwinSimulator::new(
                Arc::clone(&twin),
                config.temp_limits_c,
                config.power_limit_w,
            ),
            rollback: RollbackJournal::new(Arc::clone(&twin)),
            executor: ActionExecutor::new(twin),
            recent_actions: VecDeque::with_capacity(RECENT_ACTIONS),
            metrics: FeedbackMetrics::default(),
        }
    }

    /// Full feedback pass over one analysis result.
    pub async fn process_analysis(&mut self, analysis: &AnalysisResult) -> Vec<ExecutionResult> {
        let actions = self.synthesizer.synthesize(analysis);
        self.metrics.actions_generated += actions.len() as u64;

        let mut admitted = Vec::new();
        for mut action in actions {
            if self.validate(&mut action).await {
                admitted.push(action);
            } else {
                self.metrics.safety_violations += 1;
                self.remember(action);
            }
        }

        // Non-increasing priority; the stable sort keeps insertion order
        // within a priority level.
        admitted.sort_by(|a, b| b.priority.cmp(&a.priority));

        self.execute_all(admitted).await
    }

    /// Submit externally built actions through the same validate/execute
    /// path. Used by diagnostics and tests.
    pub async fn submit_actions(&mut self, actions: Vec<ControlAction>) -> Vec<ExecutionResult> {
        self.metrics.actions_generated += actions.len() as u64;
        let mut admitted = Vec::new();
        for mut action in actions {
            if self.validate(&mut action).await {
                admitted.push(action);
            } else {
                self.metrics.safety_violations += 1;
                self.remember(action);
            }
        }
        admitted.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.execute_all(admitted).await
    }

    /// Constraint validation followed by speculative twin testing.
    async fn validate(&mut self, action: &mut ControlAction) -> bool {
        action.transition(ActionStatus::Validating);

        let safety = self.validator.validate(action);
        let safe = safety.safe;
        action.safety_reports.push(safety);
        if !safe {
            action.fail("safety constraint violations");
            debug!(action = %action.id, "Action rejected by safety validator");
            return false;
        }

        action.transition(ActionStatus::TwinTesting);
        self.metrics.twin_validations += 1;

        let twin_report = self.twin_sim.validate_action(action).await;
        let safe = twin_report.safe;
        action.twin_report = Some(twin_report);
        if !safe {
            action.fail("twin simulation predicted unsafe outcome");
            debug!(action = %action.id, "Action rejected by twin simulation");
            return false;
        }

        true
    }

    /// Execute admitted actions in order, with checkpoint/rollback around
    /// each.
    async fn execute_all(&mut self, actions: Vec<ControlAction>) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(actions.len());

        for mut action in actions {
            action.checkpoint_id = self.rollback.checkpoint(&action).await;

            let result = self.executor.execute(&mut action).await;
            if result.success {
                self.metrics.actions_executed += 1;
                if let Some(checkpoint) = &action.checkpoint_id {
                    self.rollback.discard(checkpoint);
                }
            } else {
                self.metrics.actions_failed += 1;
                if let Some(checkpoint) = action.checkpoint_id.clone() {
                    match self.rollback.rollback(&checkpoint).await {
                        Ok(true) => self.metrics.rollbacks_performed += 1,
                        Ok(false) => {}
                        Err(e) => warn!(action = %action.id, error = %e, "Rollback failed"),
                    }
                }
            }

            self.remember(action);
            results.push(result);
        }

        results
    }

    fn remember(&mut self, action: ControlAction) {
        if self.recent_actions.len() >= RECENT_ACTIONS {
            self.recent_actions.pop_front();
        }
        self.recent_actions.push_back(action);
    }

    /// Restore every checkpoint left pending by a cancelled feedback phase.
    /// Returns the number of rollbacks performed.
    pub async fn rollback_pending(&mut self) -> usize {
        let mut restored = 0;
        for checkpoint in self.rollback.pending_ids() {
            match self.rollback.rollback(&checkpoint).await {
                Ok(true) => {
                    self.metrics.rollbacks_performed += 1;
                    restored += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(checkpoint = %checkpoint, error = %e, "Pending rollback failed"),
            }
        }
        restored
    }

    /// Status of a recently processed action.
    pub fn action_status(&self, action_id: &str) -> Option<ActionStatusView> {
        self.recent_actions
            .iter()
            .rev()
            .find(|a| a.id == action_id)
            .map(|a| ActionStatusView {
                action_id: a.id.clone(),
                status: a.status,
                kind: a.kind,
                priority: a.priority,
                safety_reports: a.safety_reports.clone(),
                twin_report: a.twin_report.clone(),
                error: a.error.clone(),
            })
    }

    pub fn metrics(&self) -> &FeedbackMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twin::{house_builder, InMemoryTwin};
    use crate::types::{ActionContext, ActionKind, Params, Priority};

    async fn setup() -> (FeedbackModule, Arc<InMemoryTwin>, String) {
        let twin = Arc::new(InMemoryTwin::new());
        let house = house_builder("house1")
            .thermostat("thermostat_room1", 21.0)
            .light("light_hall")
            .install(twin.as_ref())
            .await;
        let module = FeedbackModule::new(&FeedbackConfig::default(), twin.clone(), &house);
        (module, twin, house)
    }

    fn lighting_action(house: &str, priority: Priority) -> ControlAction {
        ControlAction::new(
            ActionKind::Lighting,
            "light_hall",
            Params::new().set("power", true).set("brightness", 60.0),
            priority,
            ActionContext {
                house_id: Some(house.to_string()),
                ..ActionContext::default()
            },
            None,
        )
    }

    #[tokio::test]
    async fn empty_analysis_produces_no_results_but_succeeds() {
        let (mut module, _twin, _house) = setup().await;
        let results = module.process_analysis(&AnalysisResult::empty()).await;
        assert!(results.is_empty());
        assert_eq!(module.metrics().actions_generated, 0);
    }

    #[tokio::test]
    async fn valid_action_executes_and_mutates_twin() {
        let (mut module, twin, house) = setup().await;
        let results = module
            .submit_actions(vec![lighting_action(&house, Priority::Medium)])
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(module.metrics().actions_executed, 1);

        let light = twin.device(&house, "light_hall").await.expect("device");
        assert_eq!(light.state.get_bool("power"), Some(true));
    }

    #[tokio::test]
    async fn rate_limited_eleventh_action_is_suppressed() {
        let (mut module, _twin, house) = setup().await;

        let actions: Vec<ControlAction> = (0..11)
            .map(|_| lighting_action(&house, Priority::Medium))
            .collect();
        let results = module.submit_actions(actions).await;

        assert_eq!(results.len(), 10);
        assert_eq!(module.metrics().actions_executed, 10);
        assert_eq!(module.metrics().safety_violations, 1);
    }

    #[tokio::test]
    async fn execution_order_is_by_priority_then_insertion() {
        let (mut module, _twin, house) = setup().await;

        let low = lighting_action(&house, Priority::Low);
        let critical = lighting_action(&house, Priority::Critical);
        let medium_a = lighting_action(&house, Priority::Medium);
        let medium_b = lighting_action(&house, Priority::Medium);
        let expected = vec![
            critical.id.clone(),
            medium_a.id.clone(),
            medium_b.id.clone(),
            low.id.clone(),
        ];

        let results = module
            .submit_actions(vec![low, critical, medium_a, medium_b])
            .await;
        let order: Vec<String> = results.iter().map(|r| r.action_id.clone()).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn rejected_action_is_queryable_with_its_reports() {
        let (mut module, _twin, house) = setup().await;
        let action = ControlAction::new(
            ActionKind::Climate,
            "thermostat_room1",
            Params::new().set("target_temperature", 99.0),
            Priority::High,
            ActionContext {
                house_id: Some(house),
                ..ActionContext::default()
            },
            None,
        );
        let id = action.id.clone();

        let results = module.submit_actions(vec![action]).await;
        assert!(results.is_empty());

        let view = module.action_status(&id).expect("status");
        assert_eq!(view.status, ActionStatus::Failed);
        assert_eq!(view.safety_reports.len(), 1);
        assert!(!view.safety_reports[0].safe);
    }
}
