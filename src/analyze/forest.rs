//! Isolation-forest outlier detection over per-kind feature vectors.
//!
//! The forest is re-fit on every call over the sensor-kind group, which is
//! cheap at loop window sizes. Trees are seeded from a fixed seed so the same
//! snapshot always scores identically; the cache relies on that.
//!
//! Feature vector per reading: `[scaled value, hour-of-day/24, weekday/7]` —
//! a point is unusual relative to what this kind of sensor reports at this
//! time of day and week.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::trace;

use super::AnomalyAnalyzer;
use crate::types::{Anomaly, AnomalyKind, NormalizedReading, SensorKind};

/// Minimum readings per kind before the forest is worth fitting.
const MIN_SAMPLES: usize = 20;
/// Trees in the ensemble.
const N_TREES: usize = 50;
/// Subsample size per tree.
const SUBSAMPLE: usize = 256;
/// Fixed seed keeps scoring deterministic across re-fits of equal input.
const FOREST_SEED: u64 = 42;
/// Severity assigned to forest-flagged points.
const ML_SEVERITY: f64 = 0.8;

// ============================================================================
// Isolation Forest
// ============================================================================

enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

/// Average unsuccessful-search path length in a BST of `n` nodes; the
/// standard normalizer for isolation depth.
fn c_factor(n: usize) -> f64 {
    const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
}

fn build_tree(
    points: &[usize],
    features: &[Vec<f64>],
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= max_depth || points.len() <= 1 {
        return Node::Leaf { size: points.len() };
    }

    let dims = features[points[0]].len();
    let feature = rng.gen_range(0..dims);

    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for &p in points {
        let v = features[p][feature];
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if (hi - lo).abs() < 1e-12 {
        return Node::Leaf { size: points.len() };
    }

    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) = points
        .iter()
        .copied()
        .partition(|&p| features[p][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(&left, features, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(&right, features, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &Node, point: &[f64], depth: f64) -> f64 {
    match node {
        Node::Leaf { size } => depth + c_factor(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if point[*feature] < *threshold {
                path_length(left, point, depth + 1.0)
            } else {
                path_length(right, point, depth + 1.0)
            }
        }
    }
}

/// Ensemble of random isolation trees.
pub struct IsolationForest {
    contamination: f64,
}

impl IsolationForest {
    pub fn new(contamination: f64) -> Self {
        Self {
            contamination: contamination.clamp(0.0, 0.5),
        }
    }

    /// Fit on the given feature matrix and return an outlier flag per row.
    /// The top `contamination` fraction of anomaly scores is flagged.
    pub fn fit_predict(&self, features: &[Vec<f64>]) -> Vec<bool> {
        let n = features.len();
        if n < 2 {
            return vec![false; n];
        }

        let mut rng = StdRng::seed_from_u64(FOREST_SEED);
        let psi = SUBSAMPLE.min(n);
        let max_depth = (psi as f64).log2().ceil() as usize;
        let normalizer = c_factor(psi);

        let mut trees = Vec::with_capacity(N_TREES);
        for _ in 0..N_TREES {
            let mut sample: Vec<usize> = (0..n).collect();
            // Partial Fisher-Yates for the subsample
            for i in 0..psi {
                let j = rng.gen_range(i..n);
                sample.swap(i, j);
            }
            sample.truncate(psi);
            trees.push(build_tree(&sample, features, 0, max_depth, &mut rng));
        }

        let scores: Vec<f64> = features
            .iter()
            .map(|point| {
                let avg_path: f64 = trees
                    .iter()
                    .map(|t| path_length(t, point, 0.0))
                    .sum::<f64>()
                    / N_TREES as f64;
                if normalizer > 0.0 {
                    2.0_f64.powf(-avg_path / normalizer)
                } else {
                    0.5
                }
            })
            .collect();

        let flagged = ((n as f64) * self.contamination).floor() as usize;
        if flagged == 0 {
            return vec![false; n];
        }

        let mut ranked: Vec<usize> = (0..n).collect();
        ranked.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let cutoff = scores[ranked[flagged - 1]];

        scores.iter().map(|&s| s >= cutoff).collect()
    }
}

// ============================================================================
// ML Anomaly Analyzer
// ============================================================================

pub struct MlAnomalyAnalyzer {
    contamination: f64,
}

impl MlAnomalyAnalyzer {
    pub fn new(contamination: f64) -> Self {
        Self { contamination }
    }

    fn feature_vector(reading: &NormalizedReading) -> Vec<f64> {
        let dt = DateTime::<Utc>::from_timestamp(reading.timestamp as i64, 0)
            .unwrap_or_else(Utc::now);
        vec![
            reading.scaled,
            f64::from(dt.hour()) / 24.0,
            f64::from(dt.weekday().num_days_from_monday()) / 7.0,
        ]
    }
}

impl AnomalyAnalyzer for MlAnomalyAnalyzer {
    fn name(&self) -> &'static str {
        "isolation_forest"
    }

    fn detect_anomalies(&self, data: &[NormalizedReading]) -> Vec<Anomaly> {
        let mut groups: BTreeMap<SensorKind, Vec<&NormalizedReading>> = BTreeMap::new();
        for reading in data {
            groups.entry(reading.kind).or_default().push(reading);
        }

        let mut anomalies = Vec::new();
        for (kind, readings) in groups {
            if readings.len() < MIN_SAMPLES {
                continue;
            }

            let features: Vec<Vec<f64>> =
                readings.iter().map(|r| Self::feature_vector(r)).collect();
            let forest = IsolationForest::new(self.contamination);
            let flags = forest.fit_predict(&features);
            trace!(
                kind = %kind,
                flagged = flags.iter().filter(|f| **f).count(),
                total = readings.len(),
                "Isolation forest pass"
            );

            for (reading, flagged) in readings.iter().zip(flags) {
                if !flagged {
                    continue;
                }
                let mut metadata = BTreeMap::new();
                metadata.insert(
                    "model".to_string(),
                    serde_json::Value::from("isolation_forest"),
                );
                metadata.insert("sensor_kind".to_string(), serde_json::Value::from(kind.to_string()));
                metadata.insert(
                    "scaled_value".to_string(),
                    serde_json::Value::from(reading.scaled),
                );

                // Collective: the point is unusual against the joint profile
                // of its whole kind-group, not against one sensor's history.
                anomalies.push(Anomaly {
                    kind: AnomalyKind::Collective,
                    sensor_id: reading.sensor_id.clone(),
                    timestamp: reading.timestamp,
                    severity: ML_SEVERITY,
                    value: reading.value.clone(),
                    expected_range: (0.0, 1.0),
                    description: "Outlier relative to this sensor kind's recent profile".to_string(),
                    metadata,
                });
            }
        }
        anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataQuality, RawValue};

    fn reading(sensor_id: &str, timestamp: f64, scaled: f64) -> NormalizedReading {
        NormalizedReading {
            sensor_id: sensor_id.to_string(),
            kind: SensorKind::Power,
            timestamp,
            value: RawValue::Number(scaled),
            scaled,
            unit: "W".into(),
            quality: DataQuality::High,
            confidence: 1.0,
            processing_latency: 0.0,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn forest_isolates_a_distant_point() {
        let mut features: Vec<Vec<f64>> = (0..49)
            .map(|i| vec![0.5 + 0.001 * (i % 7) as f64, 0.5, 0.3])
            .collect();
        features.push(vec![0.99, 0.95, 0.9]);

        let forest = IsolationForest::new(0.02);
        let flags = forest.fit_predict(&features);
        assert_eq!(flags.iter().filter(|f| **f).count(), 1);
        assert!(flags[49], "the distant point should be the one flagged");
    }

    #[test]
    fn forest_is_deterministic_across_fits() {
        let features: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![(i as f64) / 40.0, 0.2, 0.6])
            .collect();
        let forest = IsolationForest::new(0.1);
        assert_eq!(forest.fit_predict(&features), forest.fit_predict(&features));
    }

    #[test]
    fn small_kind_groups_are_skipped() {
        let data: Vec<NormalizedReading> =
            (0..10).map(|i| reading("p", 1_000.0 + i as f64, 0.5)).collect();
        let analyzer = MlAnomalyAnalyzer::new(0.1);
        assert!(analyzer.detect_anomalies(&data).is_empty());
    }

    #[test]
    fn flagged_points_carry_fixed_severity() {
        let mut data: Vec<NormalizedReading> = (0..40)
            .map(|i| reading("p", 1_000_000.0 + i as f64 * 60.0, 0.5))
            .collect();
        data.push(reading("p", 1_003_000.0, 0.99));

        let analyzer = MlAnomalyAnalyzer::new(0.05);
        let anomalies = analyzer.detect_anomalies(&data);
        assert!(!anomalies.is_empty());
        assert!(anomalies.iter().all(|a| (a.severity - 0.8).abs() < 1e-12));
        assert!(anomalies.iter().all(|a| a.expected_range == (0.0, 1.0)));
        // Distinguishable from the per-sensor z-score detector by kind
        assert!(anomalies.iter().all(|a| a.kind == AnomalyKind::Collective));
    }
}
