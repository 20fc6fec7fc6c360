//! Periodicity detection via discrete Fourier transform.
//!
//! Per sensor: resample to uniform spacing if the timestamps are ragged,
//! remove the linear trend, apply a Hann window to tame edge effects, take
//! the FFT and test the dominant positive frequency for significance.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::collections::BTreeMap;
use tracing::trace;

use super::PatternAnalyzer;
use crate::types::{NormalizedReading, Pattern, PatternKind, PatternPayload};

/// Minimum readings per sensor before the FFT is worth running.
const MIN_SAMPLES: usize = 10;
/// A peak must stand this far above the mean magnitude to count.
const PEAK_SIGNIFICANCE: f64 = 2.0;

pub struct PeriodicPatternAnalyzer {
    min_period_secs: f64,
    max_period_secs: f64,
}

impl PeriodicPatternAnalyzer {
    pub fn new(min_period_secs: f64, max_period_secs: f64) -> Self {
        Self {
            min_period_secs,
            max_period_secs,
        }
    }

    fn analyze_sensor(
        &self,
        sensor_id: &str,
        timestamps: &[f64],
        values: &[f64],
    ) -> Option<Pattern> {
        let n = values.len();
        if n < MIN_SAMPLES {
            return None;
        }

        // Sampling interval; resample onto a uniform grid if ragged.
        let diffs: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        let avg_interval = diffs.iter().sum::<f64>() / diffs.len() as f64;
        if avg_interval <= 0.0 {
            return None;
        }
        let diff_mean = avg_interval;
        let diff_std = (diffs.iter().map(|d| (d - diff_mean).powi(2)).sum::<f64>()
            / diffs.len() as f64)
            .sqrt();

        let values: Vec<f64> = if diff_std > avg_interval * 0.1 {
            resample_uniform(timestamps, values)
        } else {
            values.to_vec()
        };

        // Detrend against sample index, then window.
        let detrended = subtract_linear_trend(&values);
        let windowed: Vec<f64> = detrended
            .iter()
            .enumerate()
            .map(|(i, v)| v * hann(i, n))
            .collect();

        // Forward FFT
        let mut buffer: Vec<Complex<f64>> = windowed
            .iter()
            .map(|&v| Complex::new(v, 0.0))
            .collect();
        let mut planner = FftPlanner::new();
        planner.plan_fft_forward(n).process(&mut buffer);

        // Positive frequencies only (skip DC, stop at Nyquist)
        let half = n / 2;
        if half < 2 {
            return None;
        }
        let freq_resolution = 1.0 / (n as f64 * avg_interval);
        let magnitudes: Vec<f64> = buffer[1..half].iter().map(|c| c.norm()).collect();
        if magnitudes.is_empty() {
            return None;
        }

        let (peak_offset, peak_magnitude) = magnitudes
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, &m)| (i, m))?;
        let peak_freq = (peak_offset + 1) as f64 * freq_resolution;

        let mean_magnitude = magnitudes.iter().sum::<f64>() / magnitudes.len() as f64;
        if peak_magnitude < 1e-12 || peak_magnitude < mean_magnitude * PEAK_SIGNIFICANCE {
            trace!(sensor = sensor_id, "No significant spectral peak");
            return None;
        }

        let period = 1.0 / peak_freq;
        if period < self.min_period_secs || period > self.max_period_secs {
            return None;
        }

        let total: f64 = magnitudes.iter().sum();
        let confidence = (peak_magnitude / (total + 1e-10)).min(1.0);
        let phase = buffer[peak_offset + 1].arg();

        Some(Pattern {
            kind: PatternKind::Periodic,
            sensor_ids: vec![sensor_id.to_string()],
            confidence,
            start_time: timestamps[0],
            end_time: timestamps[timestamps.len() - 1],
            payload: PatternPayload::Periodic {
                period_secs: period,
                frequency_hz: peak_freq,
                amplitude: peak_magnitude,
                phase,
            },
        })
    }
}

impl PatternAnalyzer for PeriodicPatternAnalyzer {
    fn name(&self) -> &'static str {
        "periodic"
    }

    fn detect_patterns(&self, data: &[NormalizedReading]) -> Vec<Pattern> {
        let mut patterns = Vec::new();
        for (sensor_id, (timestamps, values)) in group_by_sensor(data) {
            if let Some(pattern) = self.analyze_sensor(&sensor_id, &timestamps, &values) {
                patterns.push(pattern);
            }
        }
        patterns
    }
}

/// Group scaled series per sensor, in deterministic sensor order.
pub(crate) fn group_by_sensor(
    data: &[NormalizedReading],
) -> BTreeMap<String, (Vec<f64>, Vec<f64>)> {
    let mut groups: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for reading in data {
        let entry = groups.entry(reading.sensor_id.clone()).or_default();
        entry.0.push(reading.timestamp);
        entry.1.push(reading.scaled);
    }
    groups
}

/// Linear interpolation onto an evenly spaced grid spanning the same window.
fn resample_uniform(timestamps: &[f64], values: &[f64]) -> Vec<f64> {
    let n = timestamps.len();
    let (t0, t1) = (timestamps[0], timestamps[n - 1]);
    let step = (t1 - t0) / (n - 1) as f64;

    (0..n)
        .map(|i| {
            let t = t0 + step * i as f64;
            interpolate(timestamps, values, t)
        })
        .collect()
}

fn interpolate(timestamps: &[f64], values: &[f64], t: f64) -> f64 {
    match timestamps.iter().position(|&ts| ts >= t) {
        Some(0) => values[0],
        Some(i) => {
            let (t_lo, t_hi) = (timestamps[i - 1], timestamps[i]);
            let (v_lo, v_hi) = (values[i - 1], values[i]);
            if (t_hi - t_lo).abs() < f64::EPSILON {
                v_lo
            } else {
                v_lo + (v_hi - v_lo) * (t - t_lo) / (t_hi - t_lo)
            }
        }
        None => values[values.len() - 1],
    }
}

/// Remove the least-squares line fit against the sample index.
fn subtract_linear_trend(values: &[f64]) -> Vec<f64> {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };
    let intercept = mean_y - slope * mean_x;

    values
        .iter()
        .enumerate()
        .map(|(i, &y)| y - (slope * i as f64 + intercept))
        .collect()
}

fn hann(i: usize, n: usize) -> f64 {
    if n < 2 {
        return 1.0;
    }
    let x = std::f64::consts::PI * 2.0 * i as f64 / (n - 1) as f64;
    0.5 * (1.0 - x.cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataQuality, RawValue, SensorKind};
    use std::collections::BTreeMap as Meta;

    fn reading(sensor_id: &str, timestamp: f64, scaled: f64) -> NormalizedReading {
        NormalizedReading {
            sensor_id: sensor_id.to_string(),
            kind: SensorKind::Temperature,
            timestamp,
            value: RawValue::Number(scaled),
            scaled,
            unit: "C".into(),
            quality: DataQuality::High,
            confidence: 1.0,
            processing_latency: 0.0,
            metadata: Meta::new(),
        }
    }

    /// Sine with a given period sampled uniformly.
    fn sine_series(sensor: &str, period_secs: f64, step_secs: f64, count: usize) -> Vec<NormalizedReading> {
        (0..count)
            .map(|i| {
                let t = i as f64 * step_secs;
                let v = 0.5 + 0.4 * (2.0 * std::f64::consts::PI * t / period_secs).sin();
                reading(sensor, 1_000_000.0 + t, v)
            })
            .collect()
    }

    #[test]
    fn detects_a_clean_daily_cycle() {
        // 2 full cycles of a 2-hour period at 1-minute sampling
        let data = sine_series("hall_light", 7_200.0, 60.0, 240);
        let analyzer = PeriodicPatternAnalyzer::new(60.0, 86_400.0);
        let patterns = analyzer.detect_patterns(&data);

        assert_eq!(patterns.len(), 1);
        let pattern = &patterns[0];
        assert_eq!(pattern.kind, PatternKind::Periodic);
        match pattern.payload {
            PatternPayload::Periodic { period_secs, .. } => {
                assert!(
                    (period_secs - 7_200.0).abs() / 7_200.0 < 0.25,
                    "period {period_secs} too far from 7200"
                );
            }
            _ => panic!("wrong payload kind"),
        }
        assert!(pattern.confidence > 0.0 && pattern.confidence <= 1.0);
    }

    #[test]
    fn flat_noisefree_signal_has_no_period() {
        let data: Vec<NormalizedReading> = (0..50)
            .map(|i| reading("s", 1_000.0 + i as f64 * 60.0, 0.5))
            .collect();
        let analyzer = PeriodicPatternAnalyzer::new(60.0, 86_400.0);
        assert!(analyzer.detect_patterns(&data).is_empty());
    }

    #[test]
    fn too_few_samples_are_skipped() {
        let data = sine_series("s", 600.0, 60.0, 8);
        let analyzer = PeriodicPatternAnalyzer::new(60.0, 86_400.0);
        assert!(analyzer.detect_patterns(&data).is_empty());
    }

    #[test]
    fn out_of_band_periods_are_rejected() {
        // 10-second period is below the 60-second floor
        let data = sine_series("s", 10.0, 1.0, 100);
        let analyzer = PeriodicPatternAnalyzer::new(60.0, 86_400.0);
        assert!(analyzer.detect_patterns(&data).is_empty());
    }

    #[test]
    fn ragged_sampling_is_resampled_not_dropped() {
        // Same sine but with jittered timestamps
        let mut data = sine_series("s", 3_600.0, 60.0, 120);
        for (i, r) in data.iter_mut().enumerate() {
            r.timestamp += if i % 3 == 0 { 20.0 } else { -15.0 };
        }
        let analyzer = PeriodicPatternAnalyzer::new(60.0, 86_400.0);
        let patterns = analyzer.detect_patterns(&data);
        assert_eq!(patterns.len(), 1);
    }
}
