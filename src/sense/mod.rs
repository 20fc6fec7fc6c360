//! Sense stage: collection, validation, quality scoring, normalization.
//!
//! One [`SenseModule::collect`] call per cycle pulls raw readings from the
//! external [`SensorSource`](crate::twin::SensorSource), drops anything
//! structurally invalid, scores the survivors, scales them to `[0, 1]` and
//! appends them to the ring buffer. Invalid readings never reach the buffer.

mod normalizer;
mod ring_buffer;

pub use normalizer::{value_in_valid_range, Normalizers};
pub use ring_buffer::RingBuffer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SenseConfig;
use crate::twin::{AcquisitionError, SensorSource};
use crate::types::{DataQuality, NormalizedReading, Params, Reading, SensorKind};

/// Readings fresher than this are high quality.
const FRESH_SECS: f64 = 5.0;
/// Readings fresher than this are at worst medium quality.
const RECENT_SECS: f64 = 30.0;
/// Readings fresher than this are at worst low quality; older are invalid.
const STALE_SECS: f64 = 60.0;
/// Confidence decays linearly to zero over this horizon.
const CONFIDENCE_DECAY_SECS: f64 = 300.0;
/// Error count past which a sensor's readings are downgraded.
const SENSOR_ERROR_LIMIT: u32 = 10;
/// Z-score past which a reading counts as a mild outlier.
const OUTLIER_Z: f64 = 3.0;
/// How many trailing readings the outlier check considers.
const OUTLIER_WINDOW: usize = 10;

// ============================================================================
// Sensor Registry
// ============================================================================

/// Per-sensor bookkeeping kept by the registry.
#[derive(Debug, Clone)]
struct SensorInfo {
    kind: SensorKind,
    metadata: Params,
    error_count: u32,
    quality_history: VecDeque<DataQuality>,
}

/// Statistics for a single sensor over its buffered readings.
#[derive(Debug, Clone, Serialize)]
pub struct SensorStatistics {
    pub sensor_id: String,
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub latest_value: Option<f64>,
    pub latest_timestamp: Option<f64>,
    /// Fraction of readings at each quality level.
    pub quality_distribution: BTreeMap<String, f64>,
}

/// Counters exposed by the sense stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SenseMetrics {
    pub readings_collected: u64,
    pub readings_validated: u64,
    pub readings_rejected: u64,
    pub last_collection: Option<DateTime<Utc>>,
    pub buffer_usage: f64,
    pub active_sensors: usize,
}

// ============================================================================
// Sense Module
// ============================================================================

/// Collects and normalizes sensor data.
pub struct SenseModule {
    config: SenseConfig,
    normalizers: Normalizers,
    buffer: RingBuffer,
    sensors: HashMap<String, SensorInfo>,
    metrics: SenseMetrics,
}

impl SenseModule {
    pub fn new(config: SenseConfig) -> Self {
        let normalizers = Normalizers::new(&config);
        let buffer = RingBuffer::new(config.buffer_size);
        Self {
            config,
            normalizers,
            buffer,
            sensors: HashMap::new(),
            metrics: SenseMetrics::default(),
        }
    }

    /// Register a sensor so its error history informs quality scoring.
    pub fn register_sensor(&mut self, sensor_id: &str, kind: SensorKind, metadata: Params) {
        self.sensors.insert(
            sensor_id.to_string(),
            SensorInfo {
                kind,
                metadata,
                error_count: 0,
                quality_history: VecDeque::with_capacity(OUTLIER_WINDOW),
            },
        );
    }

    /// One collection pass: fetch, validate, normalize, buffer.
    pub async fn collect(
        &mut self,
        source: &mut dyn SensorSource,
        window: Duration,
    ) -> Result<Vec<NormalizedReading>, AcquisitionError> {
        let raw = source.fetch(window).await?;
        self.metrics.readings_collected += raw.len() as u64;

        let now = Utc::now().timestamp() as f64 + f64::from(Utc::now().timestamp_subsec_millis()) / 1_000.0;

        let mut normalized = Vec::with_capacity(raw.len());
        for reading in raw {
            match self.normalize_one(&reading, now) {
                Some(n) => {
                    self.metrics.readings_validated += 1;
                    self.record_quality(&reading.sensor_id, n.quality);
                    self.buffer.push(n.clone());
                    normalized.push(n);
                }
                None => {
                    self.metrics.readings_rejected += 1;
                    if let Some(info) = self.sensors.get_mut(&reading.sensor_id) {
                        info.error_count += 1;
                    }
                }
            }
        }

        self.metrics.last_collection = Some(Utc::now());
        debug!(
            accepted = normalized.len(),
            rejected = self.metrics.readings_rejected,
            "Sense collection complete"
        );
        Ok(normalized)
    }

    /// Validate and normalize one reading. `None` means rejected.
    fn normalize_one(&self, reading: &Reading, now: f64) -> Option<NormalizedReading> {
        if !self.timestamp_valid(reading.timestamp, now) {
            warn!(sensor = %reading.sensor_id, ts = reading.timestamp, "Reading rejected: bad timestamp");
            return None;
        }
        if !value_in_valid_range(reading.kind, &reading.value) {
            warn!(sensor = %reading.sensor_id, "Reading rejected: out-of-range value");
            return None;
        }

        let quality = self.classify_quality(reading, now);
        if quality == DataQuality::Invalid {
            return None;
        }

        let scaled = self
            .normalizers
            .scale(reading.kind, &reading.value, &reading.unit)?;

        let age = (now - reading.timestamp).max(0.0);
        let age_decay = (1.0 - age / CONFIDENCE_DECAY_SECS).max(0.0);
        let confidence = quality.weight() * age_decay;

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "normalization_method".to_string(),
            serde_json::Value::from(self.normalizers.method(reading.kind)),
        );

        Some(NormalizedReading {
            sensor_id: reading.sensor_id.clone(),
            kind: reading.kind,
            timestamp: reading.timestamp,
            value: reading.value.clone(),
            scaled,
            unit: reading.unit.clone(),
            quality,
            confidence,
            processing_latency: age,
            metadata,
        })
    }

    /// Timestamps must fall within the trailing acceptance window and never
    /// in the future.
    fn timestamp_valid(&self, timestamp: f64, now: f64) -> bool {
        timestamp > now - self.config.max_reading_age_secs && timestamp <= now
    }

    /// Quality ladder: fresh and unremarkable readings rank high; age,
    /// outliers and flaky sensors push readings down the ladder.
    fn classify_quality(&self, reading: &Reading, now: f64) -> DataQuality {
        let age = (now - reading.timestamp).max(0.0);
        let outlier = self.is_outlier(reading);
        let flaky = self
            .sensors
            .get(&reading.sensor_id)
            .is_some_and(|info| info.error_count > SENSOR_ERROR_LIMIT);

        if age < FRESH_SECS && !outlier && !flaky {
            DataQuality::High
        } else if (age < RECENT_SECS || outlier) && !flaky {
            DataQuality::Medium
        } else if age < STALE_SECS || flaky {
            DataQuality::Low
        } else {
            DataQuality::Invalid
        }
    }

    /// Z-score test against the sensor's trailing readings.
    fn is_outlier(&self, reading: &Reading) -> bool {
        let Some(value) = reading.value.as_f64() else {
            return false;
        };
        let recent = self.buffer.by_sensor(&reading.sensor_id, OUTLIER_WINDOW * 10);
        if recent.len() < 3 {
            return false;
        }
        let values: Vec<f64> = recent
            .iter()
            .rev()
            .take(OUTLIER_WINDOW)
            .filter_map(|r| r.value.as_f64())
            .collect();
        if values.len() < 3 {
            return false;
        }
        let mean = values.iter().mean();
        let std = values.iter().population_std_dev();
        if std > 0.0 {
            ((value - mean) / std).abs() > OUTLIER_Z
        } else {
            false
        }
    }

    fn record_quality(&mut self, sensor_id: &str, quality: DataQuality) {
        if let Some(info) = self.sensors.get_mut(sensor_id) {
            if info.quality_history.len() >= OUTLIER_WINDOW {
                info.quality_history.pop_front();
            }
            info.quality_history.push_back(quality);
        }
    }

    /// Statistics over one sensor's buffered readings.
    pub fn sensor_statistics(&self, sensor_id: &str) -> Option<SensorStatistics> {
        let recent = self.buffer.by_sensor(sensor_id, 100);
        if recent.is_empty() {
            return None;
        }

        let values: Vec<f64> = recent.iter().map(|r| r.scaled).collect();
        let mut distribution: BTreeMap<String, f64> = BTreeMap::new();
        for r in &recent {
            *distribution.entry(r.quality.to_string()).or_insert(0.0) += 1.0;
        }
        let total = recent.len() as f64;
        for v in distribution.values_mut() {
            *v /= total;
        }

        Some(SensorStatistics {
            sensor_id: sensor_id.to_string(),
            count: values.len(),
            mean: values.iter().mean(),
            std_dev: values.iter().population_std_dev(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            latest_value: values.last().copied(),
            latest_timestamp: recent.last().map(|r| r.timestamp),
            quality_distribution: distribution,
        })
    }

    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }

    /// Direct buffer insertion, bypassing the source. Used by diagnostics and
    /// tests that seed a window.
    pub fn push_normalized(&mut self, reading: NormalizedReading) {
        self.buffer.push(reading);
    }

    pub fn registered_kind(&self, sensor_id: &str) -> Option<SensorKind> {
        self.sensors.get(sensor_id).map(|info| info.kind)
    }

    pub fn sensor_metadata(&self, sensor_id: &str) -> Option<&Params> {
        self.sensors.get(sensor_id).map(|info| &info.metadata)
    }

    pub fn metrics(&self) -> SenseMetrics {
        let mut metrics = self.metrics.clone();
        metrics.buffer_usage = self.buffer.len() as f64 / self.buffer.capacity() as f64;
        metrics.active_sensors = self.sensors.len();
        metrics
    }
}
