//! The control loop orchestrator.
//!
//! Drives Sense -> Analyze -> Feedback -> Learn on a fixed-delay tick. Every
//! phase is wrapped in its circuit breaker and its deadline; phase failures
//! convert to empty artifacts plus counters and never unwind past the loop.
//! Only initialization may fail loudly.
//!
//! The loop is driven through [`SaflaLoop::run`]; concurrent control (stop,
//! pause, safe mode) goes through the cheap clonable [`LoopHandle`].

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::breaker::{BreakerPanel, BreakerState, BreakerStatus, FailureRecord};
use super::perf::{optimize, Adjustment, AlertKind, PerfAlert, PerfMetrics, PerformanceMonitor};
use super::safety_monitor::{SafetyMonitor, SafetyStatus, ViolationRecord};
use crate::analyze::{AnalyzeMetrics, AnalyzeModule};
use crate::config::LoopConfig;
use crate::feedback::{ActionStatusView, FeedbackMetrics, FeedbackModule};
use crate::learn::{LearnHook, LearnMetrics, LearnModule, LearningInsights};
use crate::sense::{SenseMetrics, SenseModule, SensorStatistics};
use crate::twin::{Journal, SensorSource, Twin};
use crate::types::{
    AnalysisResult, CyclePhase, CycleRecord, ExecutionResult, LearningResult, NormalizedReading,
    Params, SensorKind, TunableParameter,
};

/// Window handed to the sensor source each sense phase.
const SENSE_WINDOW: Duration = Duration::from_secs(60);
/// Component-failure burst that forces safe mode.
const FAILURE_BURST_LIMIT: usize = 10;
const FAILURE_BURST_WINDOW: Duration = Duration::from_secs(300);

// ============================================================================
// States & Errors
// ============================================================================

/// Loop lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Inactive,
    Initializing,
    Running,
    Paused,
    Error,
    Shutdown,
    SafeMode,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Error => write!(f, "error"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::SafeMode => write!(f, "safe_mode"),
        }
    }
}

/// The only error kind that escapes to the caller.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("fatal initialization failure: {0}")]
    Fatal(String),
}

impl From<crate::config::ConfigError> for LoopError {
    fn from(e: crate::config::ConfigError) -> Self {
        Self::Fatal(e.to_string())
    }
}

/// Phase-local failures. These never leave the orchestrator; they become
/// empty artifacts, counters and breaker bookkeeping.
#[derive(Debug, Error)]
enum PhaseError {
    #[error("circuit breaker open; phase skipped")]
    BreakerOpen,

    #[error("phase timed out after {0:.3}s")]
    Timeout(f64),

    #[error("transient I/O failure: {0}")]
    TransientIo(String),
}

// ============================================================================
// Control Handle
// ============================================================================

const MODE_NONE: u8 = 0;
const MODE_ENTER_SAFE: u8 = 1;
const MODE_EXIT_SAFE: u8 = 2;

#[derive(Default)]
struct ControlFlags {
    paused: AtomicBool,
    safe_mode_request: AtomicU8,
}

/// Clonable remote control for a running loop.
#[derive(Clone)]
pub struct LoopHandle {
    cancel: CancellationToken,
    flags: Arc<ControlFlags>,
}

impl LoopHandle {
    /// Stop the loop after the current cycle.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
    }

    pub fn enter_safe_mode(&self) {
        self.flags
            .safe_mode_request
            .store(MODE_ENTER_SAFE, Ordering::SeqCst);
    }

    pub fn exit_safe_mode(&self) {
        self.flags
            .safe_mode_request
            .store(MODE_EXIT_SAFE, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ============================================================================
// Metrics & Reports
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopMetrics {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub safe_mode_activations: u64,
    pub component_failures: u64,
    pub safety_violations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentMetrics {
    pub sense: SenseMetrics,
    pub analyze: AnalyzeMetrics,
    pub feedback: FeedbackMetrics,
    pub learn: LearnMetrics,
}

/// Full status block for operators.
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub state: LoopState,
    pub current_cycle: Option<String>,
    pub cycle_count: u64,
    pub uptime_secs: f64,
    pub performance: PerfMetrics,
    pub breakers: BTreeMap<String, BreakerStatus>,
    pub components: ComponentMetrics,
    pub safety: SafetyStatus,
    pub config: LoopConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleStats {
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub available: bool,
    pub failure_count: u32,
    pub last_failure: Option<chrono::DateTime<chrono::Utc>>,
}

/// Deep diagnostic block for operators and tests.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticInfo {
    pub state: LoopState,
    pub cycle_stats: CycleStats,
    pub component_health: BTreeMap<String, ComponentHealth>,
    pub recent_failures: Vec<FailureRecord>,
    pub safety: SafetyStatus,
    pub recent_violations: Vec<ViolationRecord>,
    pub performance: PerfMetrics,
    pub config: LoopConfig,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SaflaLoop {
    config: LoopConfig,
    state: LoopState,

    sense: SenseModule,
    analyze: AnalyzeModule,
    feedback: FeedbackModule,
    learn: LearnModule,
    source: Box<dyn SensorSource>,
    journal: Option<Arc<dyn Journal>>,

    breakers: BreakerPanel,
    safety: SafetyMonitor,
    perf: PerformanceMonitor,

    cancel: CancellationToken,
    flags: Arc<ControlFlags>,

    cycle_count: u64,
    current_cycle_id: Option<String>,
    last_learn: Instant,
    started_at: Option<Instant>,
    metrics: LoopMetrics,
}

impl SaflaLoop {
    pub fn new(
        config: LoopConfig,
        twin: Arc<dyn Twin>,
        source: Box<dyn SensorSource>,
        house_id: &str,
    ) -> Self {
        let sense = SenseModule::new(config.sense.clone());
        let analyze = AnalyzeModule::new(&config.analyze);
        let feedback = FeedbackModule::new(&config.feedback, Arc::clone(&twin), house_id);
        let learn = LearnModule::new(&config.learn, Arc::clone(&twin), None);
        let safety = SafetyMonitor::new(config.safety.clone());

        Self {
            config,
            state: LoopState::Inactive,
            sense,
            analyze,
            feedback,
            learn,
            source,
            journal: None,
            breakers: BreakerPanel::new(),
            safety,
            perf: PerformanceMonitor::new(),
            cancel: CancellationToken::new(),
            flags: Arc::new(ControlFlags::default()),
            cycle_count: 0,
            current_cycle_id: None,
            last_learn: Instant::now(),
            started_at: None,
            metrics: LoopMetrics::default(),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_learn_hook(mut self, hook: Arc<dyn LearnHook>) -> Self {
        self.learn.set_hook(hook);
        self
    }

    /// Remote control usable from other tasks while the loop runs.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            cancel: self.cancel.clone(),
            flags: Arc::clone(&self.flags),
        }
    }

    /// Validate configuration and arm the loop. The only operation that may
    /// fail loudly; on failure the loop refuses to leave `initializing`.
    pub fn initialize(&mut self) -> Result<(), LoopError> {
        self.state = LoopState::Initializing;
        if let Err(e) = self.config.validate() {
            self.state = LoopState::Error;
            return Err(e.into());
        }
        self.safety = SafetyMonitor::new(self.config.safety.clone());
        self.state = LoopState::Running;
        info!("Control loop initialized");
        Ok(())
    }

    /// Run cycles until stopped. Fixed-delay scheduling: the tick interval is
    /// slept after each cycle completes, not subtracted from it.
    pub async fn run(&mut self) -> Result<(), LoopError> {
        if !matches!(self.state, LoopState::Running | LoopState::SafeMode) {
            self.initialize()?;
        }
        self.started_at = Some(Instant::now());
        info!(tick = ?self.config.tick_interval(), "Control loop running");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.apply_control_flags();

            match self.state {
                LoopState::Running | LoopState::SafeMode => {
                    self.run_single_cycle().await;
                }
                LoopState::Paused => {}
                _ => break,
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.tick_interval()) => {}
            }
        }

        self.state = LoopState::Shutdown;
        info!(
            cycles = self.cycle_count,
            completed = self.metrics.cycles_completed,
            failed = self.metrics.cycles_failed,
            "Control loop stopped"
        );
        Ok(())
    }

    /// Fold queued control requests into the state machine.
    fn apply_control_flags(&mut self) {
        match self.flags.safe_mode_request.swap(MODE_NONE, Ordering::SeqCst) {
            MODE_ENTER_SAFE => self.enter_safe_mode(),
            MODE_EXIT_SAFE => self.exit_safe_mode(),
            _ => {}
        }

        let paused = self.flags.paused.load(Ordering::SeqCst);
        self.state = if paused {
            LoopState::Paused
        } else if self.safety.safe_mode_active() {
            LoopState::SafeMode
        } else {
            LoopState::Running
        };
    }

    /// One full cycle. Public for diagnostics and tests.
    pub async fn run_single_cycle(&mut self) -> CycleRecord {
        let cycle_id = format!(
            "cycle_{:06}_{}",
            self.cycle_count,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        self.cycle_count += 1;
        self.current_cycle_id = Some(cycle_id.clone());
        let mut cycle = CycleRecord::new(cycle_id);
        let safe_mode = self.safety.safe_mode_active();

        // First guarded-phase failure this cycle. An empty-but-successful
        // sense is not one; learn failures never count (they cannot fail the
        // cycle). A cycle that hit one is recorded as failed.
        let mut hard_failure: Option<String> = None;

        // --- Sense ---
        cycle.start_phase(CyclePhase::Sense);
        let readings = match self.guarded_sense().await {
            Ok(readings) => {
                let got_data = !readings.is_empty();
                cycle.complete_phase(
                    CyclePhase::Sense,
                    got_data,
                    (!got_data).then(|| "no readings collected".to_string()),
                );
                readings
            }
            Err(e) => {
                cycle.complete_phase(CyclePhase::Sense, false, Some(e.to_string()));
                hard_failure = Some(format!("sense: {e}"));
                Vec::new()
            }
        };
        cycle.reading_count = readings.len();

        // --- Analyze (skipped entirely in safe mode or with nothing sensed) ---
        let analysis: Option<AnalysisResult> = if !safe_mode && !readings.is_empty() {
            cycle.start_phase(CyclePhase::Analyze);
            match self.guarded_analyze(&readings).await {
                Ok(result) => {
                    cycle.complete_phase(CyclePhase::Analyze, true, None);
                    Some(result)
                }
                Err(e) => {
                    cycle.complete_phase(CyclePhase::Analyze, false, Some(e.to_string()));
                    hard_failure.get_or_insert_with(|| format!("analyze: {e}"));
                    None
                }
            }
        } else {
            None
        };

        // --- Feedback (successful even when no actions are produced) ---
        let execution_results: Vec<ExecutionResult> = if !safe_mode {
            cycle.start_phase(CyclePhase::Feedback);
            match &analysis {
                Some(result) => match self.guarded_feedback(result).await {
                    Ok(results) => {
                        cycle.complete_phase(CyclePhase::Feedback, true, None);
                        results
                    }
                    Err(e) => {
                        cycle.complete_phase(CyclePhase::Feedback, false, Some(e.to_string()));
                        hard_failure.get_or_insert_with(|| format!("feedback: {e}"));
                        Vec::new()
                    }
                },
                None => {
                    cycle.complete_phase(CyclePhase::Feedback, true, None);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        // --- Learn (coarser cadence; never fails the cycle) ---
        if !safe_mode && self.last_learn.elapsed() >= self.config.learn_interval() {
            cycle.start_phase(CyclePhase::Learn);
            match self
                .guarded_learn(&readings, analysis.as_ref(), &execution_results)
                .await
            {
                Ok(result) => {
                    cycle.complete_phase(CyclePhase::Learn, true, None);
                    cycle.learning = Some(result);
                }
                Err(e) => {
                    cycle.complete_phase(CyclePhase::Learn, false, Some(e.to_string()));
                }
            }
            self.last_learn = Instant::now();
        }

        cycle.readings = readings;
        cycle.analysis = analysis;
        cycle.execution_results = execution_results;
        let success = hard_failure.is_none();
        cycle.complete(success, hard_failure);
        if success {
            self.metrics.cycles_completed += 1;
        } else {
            self.metrics.cycles_failed += 1;
        }

        // --- Audit & bookkeeping ---
        let (is_safe, violations) = self.safety.check_cycle(&cycle);
        if !is_safe {
            self.metrics.safety_violations += violations.len() as u64;
            for violation in &violations {
                self.learn.record_safety_violation(violation);
            }
            if self.safety.should_enter_safe_mode(&violations) {
                self.enter_safe_mode();
            }
        }
        if self.breakers.failures_within(FAILURE_BURST_WINDOW) >= FAILURE_BURST_LIMIT {
            warn!("Component failure burst detected");
            self.enter_safe_mode();
        }

        self.perf.record_cycle(&cycle);
        let alerts = self.perf.check_alerts();
        if !alerts.is_empty() {
            self.handle_alerts(alerts);
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(cycle.journal_entry()).await {
                warn!(error = %e, "Cycle journal append failed");
            }
        }

        self.current_cycle_id = None;
        debug!(
            cycle = %cycle.cycle_id,
            readings = cycle.reading_count,
            actions = cycle.execution_results.len(),
            "Cycle complete"
        );
        cycle
    }

    // ------------------------------------------------------------------
    // Guarded phases: breaker check, deadline, failure accounting
    // ------------------------------------------------------------------

    async fn guarded_sense(&mut self) -> Result<Vec<NormalizedReading>, PhaseError> {
        if !self.breakers.is_available(CyclePhase::Sense) {
            return Err(PhaseError::BreakerOpen);
        }
        let deadline = self.config.phase_timeout(CyclePhase::Sense);
        match tokio::time::timeout(deadline, self.sense.collect(&mut *self.source, SENSE_WINDOW))
            .await
        {
            Ok(Ok(readings)) => {
                self.breakers.record_success(CyclePhase::Sense);
                Ok(readings)
            }
            Ok(Err(e)) => {
                self.metrics.component_failures += 1;
                self.breakers.record_failure(CyclePhase::Sense, &e.to_string());
                Err(PhaseError::TransientIo(e.to_string()))
            }
            Err(_) => {
                self.metrics.component_failures += 1;
                self.breakers.record_failure(CyclePhase::Sense, "sense deadline exceeded");
                Err(PhaseError::Timeout(deadline.as_secs_f64()))
            }
        }
    }

    async fn guarded_analyze(
        &mut self,
        readings: &[NormalizedReading],
    ) -> Result<AnalysisResult, PhaseError> {
        if !self.breakers.is_available(CyclePhase::Analyze) {
            return Err(PhaseError::BreakerOpen);
        }
        let deadline = self.config.phase_timeout(CyclePhase::Analyze);
        match tokio::time::timeout(deadline, self.analyze.analyze(readings)).await {
            Ok(result) => {
                self.breakers.record_success(CyclePhase::Analyze);
                Ok(result)
            }
            Err(_) => {
                self.metrics.component_failures += 1;
                self.breakers
                    .record_failure(CyclePhase::Analyze, "analyze deadline exceeded");
                Err(PhaseError::Timeout(deadline.as_secs_f64()))
            }
        }
    }

    async fn guarded_feedback(
        &mut self,
        analysis: &AnalysisResult,
    ) -> Result<Vec<ExecutionResult>, PhaseError> {
        if !self.breakers.is_available(CyclePhase::Feedback) {
            return Err(PhaseError::BreakerOpen);
        }
        let deadline = self.config.phase_timeout(CyclePhase::Feedback);
        match tokio::time::timeout(deadline, self.feedback.process_analysis(analysis)).await {
            Ok(results) => {
                self.breakers.record_success(CyclePhase::Feedback);
                Ok(results)
            }
            Err(_) => {
                self.metrics.component_failures += 1;
                self.breakers
                    .record_failure(CyclePhase::Feedback, "feedback deadline exceeded");
                // A cancelled execution may have left twin mutations behind a
                // captured checkpoint; restore them before the next tick.
                let restored = self.feedback.rollback_pending().await;
                if restored > 0 {
                    warn!(restored, "Rolled back in-flight mutations after feedback timeout");
                }
                Err(PhaseError::Timeout(deadline.as_secs_f64()))
            }
        }
    }

    async fn guarded_learn(
        &mut self,
        readings: &[NormalizedReading],
        analysis: Option<&AnalysisResult>,
        execution_results: &[ExecutionResult],
    ) -> Result<LearningResult, PhaseError> {
        if !self.breakers.is_available(CyclePhase::Learn) {
            return Err(PhaseError::BreakerOpen);
        }
        let deadline = self.config.phase_timeout(CyclePhase::Learn);
        let params = self.current_params();
        match tokio::time::timeout(
            deadline,
            self.learn
                .learn(readings, analysis, execution_results, &params),
        )
        .await
        {
            Ok(result) => {
                self.breakers.record_success(CyclePhase::Learn);
                Ok(result)
            }
            Err(_) => {
                self.metrics.component_failures += 1;
                self.breakers
                    .record_failure(CyclePhase::Learn, "learn deadline exceeded");
                Err(PhaseError::Timeout(deadline.as_secs_f64()))
            }
        }
    }

    /// Snapshot of the live values for the optimizer's parameter space.
    fn current_params(&self) -> HashMap<TunableParameter, f64> {
        HashMap::from([
            (
                TunableParameter::SenseBufferSize,
                self.config.sense.buffer_size as f64,
            ),
            (
                TunableParameter::AnalysisCacheSize,
                self.config.analyze.cache_size as f64,
            ),
            (
                TunableParameter::TickInterval,
                self.config.timing.tick_interval_secs,
            ),
        ])
    }

    // ------------------------------------------------------------------
    // Alerts & safe mode
    // ------------------------------------------------------------------

    fn handle_alerts(&mut self, alerts: Vec<PerfAlert>) {
        for alert in alerts {
            warn!(kind = ?alert.kind, message = %alert.message, "Performance alert");
            match alert.kind {
                AlertKind::Performance => {
                    // Give every phase a little more room.
                    for phase in CyclePhase::ALL {
                        let current = self.config.phase_timeout(phase).as_secs_f64();
                        self.config.set_phase_timeout(phase, current * 1.1);
                    }
                }
                AlertKind::Reliability => {
                    if alert.value > 0.5 {
                        self.enter_safe_mode();
                    }
                }
            }
        }
    }

    pub fn enter_safe_mode(&mut self) {
        if !self.safety.safe_mode_active() {
            warn!("Entering safe mode: only sensing remains active");
            self.safety.set_safe_mode(true);
            self.metrics.safe_mode_activations += 1;
        }
        if self.state != LoopState::Paused {
            self.state = LoopState::SafeMode;
        }
    }

    pub fn exit_safe_mode(&mut self) {
        if self.safety.safe_mode_active() {
            info!("Exiting safe mode");
            self.safety.set_safe_mode(false);
        }
        if self.state == LoopState::SafeMode {
            self.state = LoopState::Running;
        }
    }

    // ------------------------------------------------------------------
    // Operator surface
    // ------------------------------------------------------------------

    /// Apply the auto-tuner to the live configuration.
    pub fn optimize_performance(&mut self) -> Vec<Adjustment> {
        optimize(&mut self.config, self.perf.metrics())
    }

    pub fn status(&self) -> LoopStatus {
        LoopStatus {
            state: self.state,
            current_cycle: self.current_cycle_id.clone(),
            cycle_count: self.cycle_count,
            uptime_secs: self
                .started_at
                .map_or(0.0, |t| t.elapsed().as_secs_f64()),
            performance: self.perf.metrics().clone(),
            breakers: self.breakers.snapshot(),
            components: ComponentMetrics {
                sense: self.sense.metrics(),
                analyze: self.analyze.metrics().clone(),
                feedback: self.feedback.metrics().clone(),
                learn: self.learn.metrics().clone(),
            },
            safety: self.safety.status(),
            config: self.config.clone(),
        }
    }

    pub fn diagnostic_info(&self) -> DiagnosticInfo {
        let component_health = CyclePhase::ALL
            .into_iter()
            .map(|phase| {
                (
                    phase.to_string(),
                    ComponentHealth {
                        available: self.breakers.state(phase) != BreakerState::Open,
                        failure_count: self.breakers.failure_count(phase),
                        last_failure: self
                            .breakers
                            .snapshot()
                            .get(&phase.to_string())
                            .and_then(|b| b.last_failure),
                    },
                )
            })
            .collect();

        DiagnosticInfo {
            state: self.state,
            cycle_stats: CycleStats {
                total_cycles: self.cycle_count,
                successful_cycles: self.metrics.cycles_completed,
                failed_cycles: self.metrics.cycles_failed,
                success_rate: self.metrics.cycles_completed as f64
                    / self.cycle_count.max(1) as f64,
            },
            component_health,
            recent_failures: self.breakers.recent_failures(10),
            safety: self.safety.status(),
            recent_violations: self.safety.recent_violations(5),
            performance: self.perf.metrics().clone(),
            config: self.config.clone(),
        }
    }

    pub fn register_sensor(&mut self, sensor_id: &str, kind: SensorKind, metadata: Params) {
        self.sense.register_sensor(sensor_id, kind, metadata);
    }

    pub fn sensor_statistics(&self, sensor_id: &str) -> Option<SensorStatistics> {
        self.sense.sensor_statistics(sensor_id)
    }

    pub fn learning_insights(&self) -> LearningInsights {
        self.learn.insights()
    }

    pub fn action_status(&self, action_id: &str) -> Option<ActionStatusView> {
        self.feedback.action_status(action_id)
    }

    /// Route user feedback into the experience buffer.
    pub fn record_user_feedback(&mut self, input: serde_json::Value, score: f64) {
        self.learn.record_feedback(input, score);
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twin::{house_builder, AcquisitionError, InMemoryTwin};
    use crate::types::Reading;
    use async_trait::async_trait;

    struct NullSource;

    #[async_trait]
    impl SensorSource for NullSource {
        async fn fetch(&mut self, _window: Duration) -> Result<Vec<Reading>, AcquisitionError> {
            Ok(Vec::new())
        }
    }

    async fn test_loop(config: LoopConfig) -> SaflaLoop {
        let twin = Arc::new(InMemoryTwin::new());
        let house = house_builder("house1")
            .thermostat("thermostat_room1", 21.0)
            .install(twin.as_ref())
            .await;
        SaflaLoop::new(config, twin, Box::new(NullSource), &house)
    }

    #[tokio::test]
    async fn invalid_config_refuses_to_leave_initializing() {
        let mut config = LoopConfig::default();
        config.timing.tick_interval_secs = 0.0;
        let mut safla = test_loop(config).await;

        let err = safla.initialize().expect_err("bad config must be fatal");
        assert!(matches!(err, LoopError::Fatal(_)));
        assert_eq!(safla.state(), LoopState::Error);
    }

    #[tokio::test]
    async fn performance_alert_inflates_every_phase_timeout() {
        let mut safla = test_loop(LoopConfig::default()).await;
        let before: Vec<f64> = CyclePhase::ALL
            .iter()
            .map(|p| safla.config().phase_timeout(*p).as_secs_f64())
            .collect();

        safla.handle_alerts(vec![PerfAlert {
            kind: AlertKind::Performance,
            message: "slow cycles".into(),
            value: 1.5,
        }]);

        for (phase, old) in CyclePhase::ALL.iter().zip(before) {
            let new = safla.config().phase_timeout(*phase).as_secs_f64();
            assert!((new - old * 1.1).abs() < 1e-12, "{phase} not inflated");
        }
    }

    #[tokio::test]
    async fn severe_reliability_alert_enters_safe_mode() {
        let mut safla = test_loop(LoopConfig::default()).await;
        safla.handle_alerts(vec![PerfAlert {
            kind: AlertKind::Reliability,
            message: "error rate 60%".into(),
            value: 0.6,
        }]);
        assert_eq!(safla.state(), LoopState::SafeMode);
        assert_eq!(safla.metrics().safe_mode_activations, 1);

        // A moderate error rate does not
        safla.exit_safe_mode();
        safla.handle_alerts(vec![PerfAlert {
            kind: AlertKind::Reliability,
            message: "error rate 20%".into(),
            value: 0.2,
        }]);
        assert_eq!(safla.state(), LoopState::Running);
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip_through_the_handle() {
        let mut safla = test_loop(LoopConfig::default()).await;
        safla.initialize().expect("initialize");
        let handle = safla.handle();

        handle.pause();
        safla.apply_control_flags();
        assert_eq!(safla.state(), LoopState::Paused);

        handle.resume();
        safla.apply_control_flags();
        assert_eq!(safla.state(), LoopState::Running);

        // Safe mode survives a pause/resume cycle
        handle.enter_safe_mode();
        safla.apply_control_flags();
        assert_eq!(safla.state(), LoopState::SafeMode);
        handle.pause();
        safla.apply_control_flags();
        assert_eq!(safla.state(), LoopState::Paused);
        handle.resume();
        safla.apply_control_flags();
        assert_eq!(safla.state(), LoopState::SafeMode);
    }

    #[tokio::test]
    async fn stopped_handle_reports_cancellation() {
        let safla = test_loop(LoopConfig::default()).await;
        let handle = safla.handle();
        assert!(!handle.is_stopped());
        handle.stop();
        assert!(handle.is_stopped());
    }
}
