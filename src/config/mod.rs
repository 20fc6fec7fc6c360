//! Loop Configuration Module
//!
//! Every tunable the loop consults is a field here, loadable from a TOML file
//! with defaults matching the built-in constants. There is no global config:
//! the caller builds (or loads) a [`LoopConfig`] and hands it to the
//! orchestrator, which owns it for the life of the loop. The performance
//! auto-tuner adjusts timeouts and the tick interval through the typed
//! setters only.
//!
//! ## Loading Order
//!
//! 1. `HAVEN_CONFIG` environment variable (path to TOML file)
//! 2. `haven.toml` in the current working directory
//! 3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::types::CyclePhase;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one control loop instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub sense: SenseConfig,

    #[serde(default)]
    pub analyze: AnalyzeConfig,

    #[serde(default)]
    pub feedback: FeedbackConfig,

    #[serde(default)]
    pub learn: LearnConfig,

    #[serde(default)]
    pub safety: SafetyConfig,
}

impl LoopConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("HAVEN_CONFIG") {
            match Self::from_file(&path) {
                Ok(config) => {
                    info!(path = %path, "Loaded config from HAVEN_CONFIG");
                    return config;
                }
                Err(e) => warn!(path = %path, error = %e, "HAVEN_CONFIG unusable, falling back"),
            }
        }

        let local = Path::new("haven.toml");
        if local.exists() {
            match Self::from_file("haven.toml") {
                Ok(config) => {
                    info!("Loaded config from ./haven.toml");
                    return config;
                }
                Err(e) => warn!(error = %e, "./haven.toml unusable, using defaults"),
            }
        }

        info!("Using built-in default configuration");
        Self::default()
    }

    /// Parse a specific TOML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Structural sanity checks, run once at initialization. A bad config is
    /// a fatal startup error, not a recoverable condition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.tick_interval_secs <= 0.0 {
            return Err(ConfigError::Invalid("tick_interval must be positive".into()));
        }
        if self.sense.buffer_size == 0 {
            return Err(ConfigError::Invalid("sense buffer_size must be nonzero".into()));
        }
        if self.analyze.cache_size == 0 {
            return Err(ConfigError::Invalid("analysis cache_size must be nonzero".into()));
        }
        if self.sense.temp_range_c.0 >= self.sense.temp_range_c.1 {
            return Err(ConfigError::Invalid(
                "temperature range must have min < max".into(),
            ));
        }
        if self.feedback.temp_limits_c.0 >= self.feedback.temp_limits_c.1 {
            return Err(ConfigError::Invalid(
                "climate safety limits must have min < max".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.analyze.contamination) {
            return Err(ConfigError::Invalid(
                "contamination must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Deadline for one phase.
    pub fn phase_timeout(&self, phase: CyclePhase) -> Duration {
        let secs = match phase {
            CyclePhase::Sense => self.timing.sense_timeout_secs,
            CyclePhase::Analyze => self.timing.analyze_timeout_secs,
            CyclePhase::Feedback => self.timing.feedback_timeout_secs,
            CyclePhase::Learn => self.timing.learn_timeout_secs,
        };
        Duration::from_secs_f64(secs)
    }

    /// Auto-tuner entry point for phase deadlines.
    pub fn set_phase_timeout(&mut self, phase: CyclePhase, secs: f64) {
        let slot = match phase {
            CyclePhase::Sense => &mut self.timing.sense_timeout_secs,
            CyclePhase::Analyze => &mut self.timing.analyze_timeout_secs,
            CyclePhase::Feedback => &mut self.timing.feedback_timeout_secs,
            CyclePhase::Learn => &mut self.timing.learn_timeout_secs,
        };
        *slot = secs;
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.timing.tick_interval_secs)
    }

    /// Auto-tuner entry point for the tick interval.
    pub fn set_tick_interval(&mut self, secs: f64) {
        self.timing.tick_interval_secs = secs;
    }

    pub fn learn_interval(&self) -> Duration {
        Duration::from_secs_f64(self.timing.learn_interval_secs)
    }
}

// ============================================================================
// Timing
// ============================================================================

/// Tick cadence and per-phase deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Fixed delay between cycles, in seconds.
    pub tick_interval_secs: f64,
    pub sense_timeout_secs: f64,
    pub analyze_timeout_secs: f64,
    pub feedback_timeout_secs: f64,
    pub learn_timeout_secs: f64,
    /// Minimum elapsed time between learn passes, in seconds.
    pub learn_interval_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 0.1,
            sense_timeout_secs: 0.05,
            analyze_timeout_secs: 0.2,
            feedback_timeout_secs: 0.15,
            learn_timeout_secs: 0.5,
            learn_interval_secs: 60.0,
        }
    }
}

// ============================================================================
// Sense
// ============================================================================

/// Validation and normalization tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenseConfig {
    /// Ring buffer capacity.
    pub buffer_size: usize,
    /// Readings older than this are rejected, in seconds.
    pub max_reading_age_secs: f64,
    /// Temperature normalization range, Celsius.
    pub temp_range_c: (f64, f64),
    /// Power normalizer ceiling, watts.
    pub max_power_w: f64,
    /// Light normalizer ceiling, watts.
    pub max_light_w: f64,
    /// CO2 normalization range, ppm.
    pub co2_range_ppm: (f64, f64),
    /// Air-quality normalization range, AQI.
    pub air_quality_range: (f64, f64),
    /// Noise normalization range, dB.
    pub noise_range_db: (f64, f64),
    /// Pressure normalization range, hPa.
    pub pressure_range_hpa: (f64, f64),
}

impl Default for SenseConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            max_reading_age_secs: 3_600.0,
            temp_range_c: (-10.0, 40.0),
            max_power_w: 10_000.0,
            max_light_w: 100.0,
            co2_range_ppm: (0.0, 5_000.0),
            air_quality_range: (0.0, 500.0),
            noise_range_db: (30.0, 120.0),
            pressure_range_hpa: (950.0, 1_050.0),
        }
    }
}

// ============================================================================
// Analyze
// ============================================================================

/// Analyzer thresholds and cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzeConfig {
    pub cache_size: usize,
    pub cache_ttl_secs: f64,
    /// Z-score threshold for statistical anomalies (strictly greater than).
    pub z_threshold: f64,
    /// Minimum r-squared for a trend to be reported.
    pub min_r_squared: f64,
    /// Expected outlier fraction for the isolation forest.
    pub contamination: f64,
    /// Valid periodicity range, seconds.
    pub min_period_secs: f64,
    pub max_period_secs: f64,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            cache_size: 1_000,
            cache_ttl_secs: 300.0,
            z_threshold: 3.0,
            min_r_squared: 0.7,
            contamination: 0.1,
            min_period_secs: 60.0,
            max_period_secs: 86_400.0,
        }
    }
}

// ============================================================================
// Feedback
// ============================================================================

/// Safety constraint limits for the feedback stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Climate actions must target temperatures within this range, Celsius.
    pub temp_limits_c: (f64, f64),
    /// Maximum actions per target within the rate window.
    pub max_rate: usize,
    /// Rate-limit trailing window, seconds.
    pub rate_window_secs: f64,
    /// Whole-house power ceiling, watts.
    pub power_limit_w: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            temp_limits_c: (10.0, 35.0),
            max_rate: 10,
            rate_window_secs: 60.0,
            power_limit_w: 5_000.0,
        }
    }
}

// ============================================================================
// Learn
// ============================================================================

/// Learn-stage cadence and optimizer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnConfig {
    /// Experience buffer capacity.
    pub buffer_size: usize,
    /// Accuracy below which incremental model updates are issued.
    pub accuracy_threshold: f64,
    /// High-importance batch size for incremental learning.
    pub batch_size: usize,
    /// Initial epsilon for the epsilon-greedy optimizer.
    pub exploration_rate: f64,
    pub learning_rate: f64,
    /// Mean feedback delta that signals concept drift.
    pub drift_threshold: f64,
    /// Run scenario learning every N learn passes.
    pub scenario_every: u64,
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            buffer_size: 50_000,
            accuracy_threshold: 0.85,
            batch_size: 32,
            exploration_rate: 0.1,
            learning_rate: 0.01,
            drift_threshold: 0.15,
            scenario_every: 10,
        }
    }
}

// ============================================================================
// Safety
// ============================================================================

/// Cycle-level safety audit thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// A cycle slower than this is a safety violation, seconds.
    pub max_cycle_secs: f64,
    /// Violations per trailing hour before the monitor trips.
    pub max_violations_per_hour: usize,
    /// Critical violations in one cycle that force safe mode.
    pub critical_failure_threshold: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_cycle_secs: 30.0,
            max_violations_per_hour: 5,
            critical_failure_threshold: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        assert!(LoopConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_tick_interval_is_rejected() {
        let mut config = LoopConfig::default();
        config.timing.tick_interval_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_temp_range_is_rejected() {
        let mut config = LoopConfig::default();
        config.sense.temp_range_c = (40.0, -10.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "[timing]\ntick_interval_secs = 0.25\n\n[feedback]\nmax_rate = 3\n"
        )
        .expect("write");

        let config = LoopConfig::from_file(file.path().to_str().expect("utf8 path"))
            .expect("parse");
        assert_eq!(config.timing.tick_interval_secs, 0.25);
        assert_eq!(config.feedback.max_rate, 3);
        // Untouched sections keep defaults
        assert_eq!(config.sense.buffer_size, 10_000);
        assert_eq!(config.analyze.cache_ttl_secs, 300.0);
    }

    #[test]
    fn phase_timeout_setters_round_trip() {
        let mut config = LoopConfig::default();
        config.set_phase_timeout(CyclePhase::Sense, 0.01);
        assert_eq!(
            config.phase_timeout(CyclePhase::Sense),
            Duration::from_secs_f64(0.01)
        );
    }
}
