//! Trend detection via least-squares polynomial fits.
//!
//! Fits degree-1 and degree-2 polynomials per sensor and reports whichever
//! explains the series well enough. The quadratic must beat the linear fit by
//! a clear margin to be preferred, otherwise a good line wins.

use super::periodic::group_by_sensor;
use super::PatternAnalyzer;
use crate::types::{NormalizedReading, Pattern, PatternKind, PatternPayload, TrendDirection};

/// Minimum readings per sensor before a fit is attempted.
const MIN_SAMPLES: usize = 5;
/// The quadratic r-squared must exceed the linear one by this factor.
const QUADRATIC_MARGIN: f64 = 1.1;

pub struct TrendAnalyzer {
    min_r_squared: f64,
}

impl TrendAnalyzer {
    pub fn new(min_r_squared: f64) -> Self {
        Self { min_r_squared }
    }

    fn analyze_sensor(&self, sensor_id: &str, timestamps: &[f64], values: &[f64]) -> Option<Pattern> {
        if values.len() < MIN_SAMPLES {
            return None;
        }

        // Time origin at the first sample keeps the normal equations stable.
        let t: Vec<f64> = timestamps.iter().map(|ts| ts - timestamps[0]).collect();

        let (slope, intercept) = fit_linear(&t, values)?;
        let r2_linear = r_squared(values, &t, |x| slope * x + intercept);

        let quad = fit_quadratic(&t, values);
        let r2_quad = quad
            .map(|[a, b, c]| r_squared(values, &t, |x| a * x * x + b * x + c))
            .unwrap_or(0.0);

        if let Some(coefficients) = quad {
            if r2_quad > r2_linear * QUADRATIC_MARGIN && r2_quad > self.min_r_squared {
                return Some(Pattern {
                    kind: PatternKind::Trend,
                    sensor_ids: vec![sensor_id.to_string()],
                    confidence: r2_quad,
                    start_time: timestamps[0],
                    end_time: timestamps[timestamps.len() - 1],
                    payload: PatternPayload::QuadraticTrend {
                        coefficients,
                        r_squared: r2_quad,
                        acceleration: coefficients[0] * 2.0,
                    },
                });
            }
        }

        if r2_linear > self.min_r_squared {
            return Some(Pattern {
                kind: PatternKind::Trend,
                sensor_ids: vec![sensor_id.to_string()],
                confidence: r2_linear,
                start_time: timestamps[0],
                end_time: timestamps[timestamps.len() - 1],
                payload: PatternPayload::LinearTrend {
                    slope,
                    direction: TrendDirection::from_slope(slope),
                    r_squared: r2_linear,
                    rate_per_hour: slope * 3_600.0,
                },
            });
        }

        None
    }
}

impl PatternAnalyzer for TrendAnalyzer {
    fn name(&self) -> &'static str {
        "trend"
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

// ============================================================================
// Least-Squares Fits
// ============================================================================

/// Ordinary least squares line: returns `(slope, intercept)`.
fn fit_linear(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        num += (xi - mean_x) * (yi - mean_y);
        den += (xi - mean_x).powi(2);
    }
    if den <= 0.0 {
        return None;
    }
    let slope = num / den;
    Some((slope, mean_y - slope * mean_x))
}

/// Degree-2 least squares via the 3x3 normal equations. Returns `[a, b, c]`
/// for `a*x^2 + b*x + c`.
fn fit_quadratic(x: &[f64], y: &[f64]) -> Option<[f64; 3]> {
    let n = x.len() as f64;
    let (mut sx, mut sx2, mut sx3, mut sx4) = (0.0, 0.0, 0.0, 0.0);
    let (mut sy, mut sxy, mut sx2y) = (0.0, 0.0, 0.0);
    for (&xi, &yi) in x.iter().zip(y) {
        let xi2 = xi * xi;
        sx += xi;
        sx2 += xi2;
        sx3 += xi2 * xi;
        sx4 += xi2 * xi2;
        sy += yi;
        sxy += xi * yi;
        sx2y += xi2 * yi;
    }

    // Normal equations, highest power first
    let mut m = [
        [sx4, sx3, sx2, sx2y],
        [sx3, sx2, sx, sxy],
        [sx2, sx, n, sy],
    ];
    solve_3x3(&mut m)
}

/// Gaussian elimination with partial pivoting on an augmented 3x4 system.
fn solve_3x3(m: &mut [[f64; 4]; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot_row = (col..3)
            .max_by(|&a, &b| {
                m[a][col]
                    .abs()
                    .partial_cmp(&m[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;
        if m[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot_row);
        for row in 0..3 {
            if row == col {
                continue;
            }
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }
    Some([m[0][3] / m[0][0], m[1][3] / m[1][1], m[2][3] / m[2][2]])
}

/// Coefficient of determination for a fitted curve.
fn r_squared(y: &[f64], x: &[f64], f: impl Fn(f64) -> f64) -> f64 {
    let n = y.len() as f64;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        ss_res += (yi - f(xi)).powi(2);
        ss_tot += (yi - mean_y).powi(2);
    }
    1.0 - ss_res / (ss_tot + 1e-10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataQuality, RawValue, SensorKind};
    use std::collections::BTreeMap;

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
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn clean_ramp_yields_a_linear_trend() {
        let data: Vec<NormalizedReading> = (0..30)
            .map(|i| reading("room1_temp", 1_000.0 + i as f64 * 30.0, 0.3 + 0.01 * i as f64))
            .collect();

        let analyzer = TrendAnalyzer::new(0.7);
        let patterns = analyzer.detect_patterns(&data);
        assert_eq!(patterns.len(), 1);

        match &patterns[0].payload {
            PatternPayload::LinearTrend {
                slope,
                direction,
                r_squared,
                rate_per_hour,
            } => {
                assert!(*slope > 0.0);
                assert_eq!(*direction, TrendDirection::Increasing);
                assert!(*r_squared > 0.9);
                assert!((rate_per_hour - slope * 3_600.0).abs() < 1e-12);
            }
            other => panic!("expected linear trend, got {other:?}"),
        }
    }

    #[test]
    fn symmetric_parabola_prefers_the_quadratic_fit() {
        // A valley centered in the window: no linear component at all, so the
        // quadratic clears the preference margin.
        let data: Vec<NormalizedReading> = (0..31)
            .map(|i| {
                let t = i as f64;
                reading("s", 1_000.0 + t, 0.1 + 0.002 * (t - 15.0).powi(2))
            })
            .collect();

        let analyzer = TrendAnalyzer::new(0.7);
        let patterns = analyzer.detect_patterns(&data);
        assert_eq!(patterns.len(), 1);
        match &patterns[0].payload {
            PatternPayload::QuadraticTrend {
                coefficients,
                acceleration,
                ..
            } => {
                assert!((coefficients[0] - 0.002).abs() < 1e-4);
                assert!((acceleration - coefficients[0] * 2.0).abs() < 1e-12);
            }
            other => panic!("expected quadratic trend, got {other:?}"),
        }
    }

    #[test]
    fn noise_produces_no_trend() {
        // Deterministic pseudo-noise with no drift
        let data: Vec<NormalizedReading> = (0..30)
            .map(|i| {
                let v = 0.5 + 0.2 * ((i * 7919 % 13) as f64 / 13.0 - 0.5);
                reading("s", 1_000.0 + i as f64, v)
            })
            .collect();
        let analyzer = TrendAnalyzer::new(0.7);
        assert!(analyzer.detect_patterns(&data).is_empty());
    }

    #[test]
    fn short_series_are_skipped() {
        let data: Vec<NormalizedReading> = (0..4)
            .map(|i| reading("s", 1_000.0 + i as f64, i as f64 * 0.1))
            .collect();
        let analyzer = TrendAnalyzer::new(0.7);
        assert!(analyzer.detect_patterns(&data).is_empty());
    }
}
