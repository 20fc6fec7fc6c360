//! End-to-end loop behavior: hot-room mitigation through the full
//! analyze -> synthesize -> validate -> simulate -> execute chain, cycle
//! record structure, and auto-tuning against observed latencies.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use haven::analyze::AnalyzeModule;
use haven::config::{AnalyzeConfig, FeedbackConfig, LoopConfig};
use haven::feedback::FeedbackModule;
use haven::runtime::Adjustment;
use haven::twin::AcquisitionError;
use haven::types::{DataQuality, Params, PatternPayload, RawValue};
use haven::{
    house_builder, CyclePhase, InMemoryTwin, NormalizedReading, Reading, SaflaLoop, SensorKind,
    SensorSource, Twin,
};

// ============================================================================
// Helpers
// ============================================================================

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp() as f64
}

/// Scale Celsius over the default [-10, 40] range.
fn scale_temp(celsius: f64) -> f64 {
    (celsius.clamp(-10.0, 40.0) + 10.0) / 50.0
}

fn temp_reading(sensor_id: &str, timestamp: f64, celsius: f64) -> NormalizedReading {
    NormalizedReading {
        sensor_id: sensor_id.to_string(),
        kind: SensorKind::Temperature,
        timestamp,
        value: RawValue::Number(celsius),
        scaled: scale_temp(celsius),
        unit: "C".into(),
        quality: DataQuality::High,
        confidence: 1.0,
        processing_latency: 0.0,
        metadata: BTreeMap::new(),
    }
}

async fn demo_twin() -> (Arc<InMemoryTwin>, String) {
    let twin = Arc::new(InMemoryTwin::new());
    let house = house_builder("house1")
        .thermostat("thermostat_room1", 22.0)
        .light("light_hall")
        .install(twin.as_ref())
        .await;
    (twin, house)
}

/// Source that emits one fresh temperature reading per fetch.
struct SteadySource {
    celsius: f64,
}

#[async_trait]
impl SensorSource for SteadySource {
    async fn fetch(&mut self, _window: Duration) -> Result<Vec<Reading>, AcquisitionError> {
        Ok(vec![Reading {
            sensor_id: "room1_temp".into(),
            kind: SensorKind::Temperature,
            timestamp: now_secs(),
            value: RawValue::Number(self.celsius),
            unit: "C".into(),
        }])
    }
}

// ============================================================================
// Hot-Room Mitigation
// ============================================================================

/// A fifteen-minute ramp from 22C to 36C shows up as a rising linear trend.
#[tokio::test]
async fn rising_room_temperature_is_detected_as_a_trend() {
    let start = now_secs() - 900.0;
    let readings: Vec<NormalizedReading> = (0..30)
        .map(|i| {
            let t = start + i as f64 * 30.0;
            temp_reading("room1_temp", t, 22.0 + 14.0 * i as f64 / 29.0)
        })
        .collect();

    let mut analyze = AnalyzeModule::new(&AnalyzeConfig::default());
    let result = analyze.analyze(&readings).await;

    let trend = result
        .patterns
        .iter()
        .find_map(|p| match &p.payload {
            PatternPayload::LinearTrend {
                slope, r_squared, ..
            } => Some((*slope, *r_squared)),
            _ => None,
        })
        .expect("a linear trend should be detected");
    assert!(trend.0 > 0.0, "slope should be positive");
    assert!(trend.1 > 0.9, "fit should be strong, got {}", trend.1);

    // The forecaster also extrapolates upward
    assert!(result.predictions.iter().any(|p| p.trend > 0.0));
}

/// A sudden 36C spike in an otherwise stable room flows through the whole
/// feedback chain: severe anomaly, cooling action at high priority, safety
/// and twin validation pass, executor applies it to the thermostat.
#[tokio::test]
async fn hot_spike_is_mitigated_end_to_end() {
    let start = now_secs() - 900.0;
    let mut readings: Vec<NormalizedReading> = (0..29)
        .map(|i| {
            let t = start + i as f64 * 30.0;
            // Small deterministic wobble keeps the variance nonzero
            temp_reading("room1_temp", t, 22.0 + 0.1 * (i % 3) as f64)
        })
        .collect();
    readings.push(temp_reading("room1_temp", start + 880.0, 36.0));

    let mut analyze = AnalyzeModule::new(&AnalyzeConfig::default());
    let analysis = analyze.analyze(&readings).await;

    let spike = analysis
        .anomalies
        .iter()
        .find(|a| a.severity > 0.8)
        .expect("the spike should be a severe anomaly");
    assert!(spike.severity > 0.5);
    assert_eq!(spike.sensor_id, "room1_temp");

    let (twin, house) = demo_twin().await;
    let mut feedback = FeedbackModule::new(&FeedbackConfig::default(), twin.clone(), &house);
    let results = feedback.process_analysis(&analysis).await;

    assert!(!results.is_empty(), "a mitigation should have executed");
    assert!(results.iter().all(|r| r.success));
    assert_eq!(feedback.metrics().actions_executed, results.len() as u64);
    assert_eq!(feedback.metrics().safety_violations, 0);

    let thermostat = twin.device(&house, "thermostat_room1").await.expect("device");
    assert_eq!(thermostat.state.get_str("hvac_mode"), Some("cool"));
    assert_eq!(thermostat.state.get_f64("temperature"), Some(34.0));
}

// ============================================================================
// Cycle Structure
// ============================================================================

#[tokio::test]
async fn single_cycle_records_phases_and_readings() {
    let (twin, house) = demo_twin().await;
    let mut safla = SaflaLoop::new(
        LoopConfig::default(),
        twin,
        Box::new(SteadySource { celsius: 22.0 }),
        &house,
    );
    safla.initialize().expect("initialize");

    let cycle = safla.run_single_cycle().await;

    assert!(cycle.success);
    assert_eq!(cycle.reading_count, 1);
    assert!(cycle.phase_completed(CyclePhase::Sense));
    assert!(cycle.phase_completed(CyclePhase::Analyze));
    assert!(cycle.phase_completed(CyclePhase::Feedback));
    // Learn has not come due yet on a fresh loop
    assert!(!cycle.phase_timings.contains_key(&CyclePhase::Learn));

    // Phase timings are consistent with the cycle total and the deadlines
    let total = cycle.total_secs.expect("total");
    let sum: f64 = cycle.phase_timings.values().sum();
    assert!(sum <= total + 1e-6);
    for (phase, secs) in &cycle.phase_timings {
        let deadline = safla.config().phase_timeout(*phase).as_secs_f64();
        assert!(
            *secs <= deadline * 1.2,
            "{phase} took {secs}s against a {deadline}s deadline"
        );
    }
}

#[tokio::test]
async fn status_and_diagnostics_reflect_activity() {
    let (twin, house) = demo_twin().await;
    let mut safla = SaflaLoop::new(
        LoopConfig::default(),
        twin,
        Box::new(SteadySource { celsius: 22.0 }),
        &house,
    );
    safla.initialize().expect("initialize");
    safla.register_sensor("room1_temp", SensorKind::Temperature, Params::new());

    for _ in 0..3 {
        safla.run_single_cycle().await;
    }

    let status = safla.status();
    assert_eq!(status.cycle_count, 3);
    assert_eq!(status.components.sense.readings_validated, 3);
    assert!(status.breakers.values().all(|b| b.failure_count == 0));
    assert!(!status.safety.safe_mode_active);

    let diag = safla.diagnostic_info();
    assert_eq!(diag.cycle_stats.total_cycles, 3);
    assert_eq!(diag.cycle_stats.success_rate, 1.0);
    assert!(diag.component_health.values().all(|h| h.available));

    let stats = safla.sensor_statistics("room1_temp").expect("stats");
    assert_eq!(stats.count, 3);
    assert!(stats.mean > 0.0 && stats.mean < 1.0);
}

// ============================================================================
// Auto-Tuning
// ============================================================================

/// A hundred fast cycles against the default 50ms sense deadline pull the
/// deadline down to the 10ms floor.
#[tokio::test]
async fn sustained_headroom_narrows_the_sense_timeout() {
    let (twin, house) = demo_twin().await;
    let mut safla = SaflaLoop::new(
        LoopConfig::default(),
        twin,
        Box::new(SteadySource { celsius: 22.0 }),
        &house,
    );
    safla.initialize().expect("initialize");

    for _ in 0..100 {
        safla.run_single_cycle().await;
    }

    let adjustments = safla.optimize_performance();
    let sense = adjustments
        .iter()
        .find_map(|a| match a {
            Adjustment::TimeoutOptimization {
                phase: CyclePhase::Sense,
                new_secs,
                ..
            } => Some(*new_secs),
            _ => None,
        })
        .expect("a sense timeout adjustment");

    // Never below the 10ms floor
    assert!(sense >= 0.010 - 1e-12);
    assert!(sense < 0.050);
    assert!(
        (safla.config().phase_timeout(CyclePhase::Sense).as_secs_f64() - sense).abs() < 1e-12
    );
}
