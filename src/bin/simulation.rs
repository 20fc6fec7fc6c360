//! Smart-home simulation harness
//!
//! Generates synthetic household sensor streams and drives the control loop
//! end-to-end against an in-memory twin. Useful for demos and for watching
//! the loop's behavior under configurable conditions:
//! - Slow daily temperature swings with occasional hot-spike injection
//! - Humidity drift, motion bursts, power-draw spikes
//!
//! # Usage
//! ```bash
//! ./simulation --duration-secs 30 --tick-ms 100 --spikes
//! ```

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use haven::twin::AcquisitionError;
use haven::types::{Params, RawValue, Reading};
use haven::{
    house_builder, InMemoryTwin, LoopConfig, SaflaLoop, SensorKind, SensorSource, TwinScenarioHook,
};

// ============================================================================
// Simulation Constants
// ============================================================================

/// Baseline room temperature (Celsius)
const BASE_TEMP_C: f64 = 21.0;
/// Daily temperature swing amplitude (Celsius)
const TEMP_SWING_C: f64 = 3.0;
/// Baseline relative humidity (%)
const BASE_HUMIDITY: f64 = 45.0;
/// Baseline household power draw (W)
const BASE_POWER_W: f64 = 400.0;
/// Injected hot-spike magnitude (Celsius)
const SPIKE_TEMP_C: f64 = 14.0;
/// Probability of a power spike per reading batch
const POWER_SPIKE_P: f64 = 0.05;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "simulation")]
#[command(about = "Synthetic smart-home data generator driving the control loop")]
struct Args {
    /// How long to run the loop, in seconds
    #[arg(short, long, default_value = "15")]
    duration_secs: u64,

    /// Tick interval in milliseconds
    #[arg(short, long, default_value = "100")]
    tick_ms: u64,

    /// House identifier for the demo twin
    #[arg(long, default_value = "house1")]
    house: String,

    /// RNG seed for reproducible streams
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Inject occasional hot spikes into the temperature stream
    #[arg(long)]
    spikes: bool,
}

// ============================================================================
// Simulated Sensor Source
// ============================================================================

/// Generates one small batch of readings per fetch.
struct SimulatedSource {
    rng: StdRng,
    tick: u64,
    spikes: bool,
    noise: Normal<f64>,
}

impl SimulatedSource {
    fn new(seed: u64, spikes: bool) -> anyhow::Result<Self> {
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
            spikes,
            noise: Normal::new(0.0, 0.15).context("noise distribution")?,
        })
    }

    fn now_secs() -> f64 {
        chrono::Utc::now().timestamp() as f64
    }
}

#[async_trait]
impl SensorSource for SimulatedSource {
    async fn fetch(&mut self, _window: Duration) -> Result<Vec<Reading>, AcquisitionError> {
        self.tick += 1;
        let now = Self::now_secs();

        // Slow daily swing plus per-reading noise
        let day_phase = (now % 86_400.0) / 86_400.0 * std::f64::consts::TAU;
        let mut temp =
            BASE_TEMP_C + TEMP_SWING_C * day_phase.sin() + self.noise.sample(&mut self.rng);
        if self.spikes && self.tick % 50 == 0 {
            temp += SPIKE_TEMP_C;
        }

        let humidity =
            (BASE_HUMIDITY + 5.0 * day_phase.cos() + self.noise.sample(&mut self.rng) * 10.0)
                .clamp(0.0, 100.0);
        let motion = self.rng.gen::<f64>() < 0.1;
        let mut power = BASE_POWER_W + self.noise.sample(&mut self.rng) * 50.0;
        if self.rng.gen::<f64>() < POWER_SPIKE_P {
            power += self.rng.gen_range(1_000.0..3_000.0);
        }

        Ok(vec![
            Reading {
                sensor_id: "room1_temp".into(),
                kind: SensorKind::Temperature,
                timestamp: now,
                value: RawValue::Number(temp),
                unit: "C".into(),
            },
            Reading {
                sensor_id: "room1_humidity".into(),
                kind: SensorKind::Humidity,
                timestamp: now,
                value: RawValue::Number(humidity),
                unit: "%".into(),
            },
            Reading {
                sensor_id: "hall_motion".into(),
                kind: SensorKind::Motion,
                timestamp: now,
                value: RawValue::Flag(motion),
                unit: String::new(),
            },
            Reading {
                sensor_id: "meter_power".into(),
                kind: SensorKind::Power,
                timestamp: now,
                value: RawValue::Number(power.max(0.0)),
                unit: "W".into(),
            },
        ])
    }

    fn source_name(&self) -> &str {
        "simulated household"
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    info!(
        duration_secs = args.duration_secs,
        tick_ms = args.tick_ms,
        spikes = args.spikes,
        "Starting smart-home simulation"
    );

    // Demo house twin
    let twin = Arc::new(InMemoryTwin::new());
    house_builder(&args.house)
        .thermostat("thermostat_room1", BASE_TEMP_C)
        .light("light_hall")
        .light("light_kitchen")
        .lock("lock_front")
        .camera("camera_porch")
        .power_meter("meter_power", BASE_POWER_W)
        .install(twin.as_ref())
        .await;

    let mut config = LoopConfig::load();
    config.timing.tick_interval_secs = args.tick_ms as f64 / 1_000.0;

    let source = SimulatedSource::new(args.seed, args.spikes)?;
    let hook = Arc::new(TwinScenarioHook::new(twin.clone()));
    let mut safla =
        SaflaLoop::new(config, twin, Box::new(source), &args.house).with_learn_hook(hook);

    safla.register_sensor("room1_temp", SensorKind::Temperature, Params::new());
    safla.register_sensor("room1_humidity", SensorKind::Humidity, Params::new());
    safla.register_sensor("hall_motion", SensorKind::Motion, Params::new());
    safla.register_sensor("meter_power", SensorKind::Power, Params::new());

    // Stop on ctrl-c or after the configured duration
    let handle = safla.handle();
    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; stopping loop");
            ctrl_c_handle.stop();
        }
    });
    let timer_handle = handle.clone();
    let duration = Duration::from_secs(args.duration_secs);
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        timer_handle.stop();
    });

    safla.run().await.context("control loop failed")?;

    // Final report
    let status = safla.status();
    info!("==============================================");
    info!("SIMULATION COMPLETE");
    info!("==============================================");
    info!("  Cycles run:        {}", status.cycle_count);
    info!(
        "  Success rate:      {:.1}%",
        status.performance.success_rate * 100.0
    );
    info!(
        "  Mean cycle time:   {:.1}ms",
        status.performance.average_cycle_secs * 1_000.0
    );
    info!(
        "  Readings accepted: {}",
        status.components.sense.readings_validated
    );
    info!(
        "  Anomalies found:   {}",
        status.components.analyze.anomalies_detected
    );
    info!(
        "  Actions executed:  {}",
        status.components.feedback.actions_executed
    );
    info!(
        "  Rollbacks:         {}",
        status.components.feedback.rollbacks_performed
    );
    info!(
        "  Experiences:       {}",
        status.components.learn.experiences_processed
    );
    info!("  Safe mode active:  {}", status.safety.safe_mode_active);

    let adjustments = safla.optimize_performance();
    if !adjustments.is_empty() {
        info!("  Auto-tune adjustments:");
        for adjustment in &adjustments {
            info!("    {}", serde_json::to_string(adjustment)?);
        }
    }

    let insights = safla.learning_insights();
    info!(
        "  Learning: {} experiences, trend {}, effectiveness {:.2}",
        insights.total_experiences, insights.performance_trend, insights.learning_effectiveness
    );

    Ok(())
}
