//! Analyze stage: concurrent pattern/anomaly/prediction fan-out with a
//! memoizing cache in front.
//!
//! Every analyzer receives the same input snapshot and runs on the blocking
//! pool; their outputs are merged in a fixed analyzer order so a cycle's
//! observable artifact ordering is deterministic. A panicking analyzer
//! contributes nothing beyond a counter bump — one bad detector never aborts
//! the phase.

mod anomaly;
mod cache;
mod forecast;
mod forest;
mod periodic;
mod trend;

pub use anomaly::StatisticalAnomalyAnalyzer;
pub use cache::{fingerprint, AnalysisCache};
pub use forecast::ForecastAnalyzer;
pub use forest::{IsolationForest, MlAnomalyAnalyzer};
pub use periodic::PeriodicPatternAnalyzer;
pub use trend::TrendAnalyzer;

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::config::AnalyzeConfig;
use crate::types::{AnalysisResult, Anomaly, NormalizedReading, Pattern, Prediction};

// ============================================================================
// Analyzer Interfaces
// ============================================================================

/// Detects patterns over a reading snapshot. Implementations are pure over
/// their input and must not depend on other analyzers' outputs.
pub trait PatternAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect_patterns(&self, data: &[NormalizedReading]) -> Vec<Pattern>;
}

/// Detects anomalies over a reading snapshot.
pub trait AnomalyAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect_anomalies(&self, data: &[NormalizedReading]) -> Vec<Anomaly>;
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyzeMetrics {
    pub analyses_performed: u64,
    pub patterns_detected: u64,
    pub anomalies_detected: u64,
    pub predictions_made: u64,
    pub cache_hits: u64,
    pub analyzer_failures: u64,
    pub average_processing_secs: f64,
}

impl AnalyzeMetrics {
    pub fn cache_hit_rate(&self) -> f64 {
        self.cache_hits as f64 / (self.analyses_performed + self.cache_hits).max(1) as f64
    }
}

// ============================================================================
// Analyze Module
// ============================================================================

/// Pattern recognition and anomaly detection over sensed data.
pub struct AnalyzeModule {
    cache: AnalysisCache,
    pattern_analyzers: Vec<Arc<dyn PatternAnalyzer>>,
    anomaly_analyzers: Vec<Arc<dyn AnomalyAnalyzer>>,
    forecaster: Arc<ForecastAnalyzer>,
    metrics: AnalyzeMetrics,
}

enum Contribution {
    Patterns(Vec<Pattern>),
    Anomalies(Vec<Anomaly>),
    Predictions(Vec<Prediction>),
}

impl AnalyzeModule {
    pub fn new(config: &AnalyzeConfig) -> Self {
        let pattern_analyzers: Vec<Arc<dyn PatternAnalyzer>> = vec![
            Arc::new(PeriodicPatternAnalyzer::new(
                config.min_period_secs,
                config.max_period_secs,
            )),
            Arc::new(TrendAnalyzer::new(config.min_r_squared)),
        ];
        let anomaly_analyzers: Vec<Arc<dyn AnomalyAnalyzer>> = vec![
            Arc::new(StatisticalAnomalyAnalyzer::new(config.z_threshold)),
            Arc::new(MlAnomalyAnalyzer::new(config.contamination)),
        ];

        Self {
            cache: AnalysisCache::new(
                config.cache_size,
                Duration::from_secs_f64(config.cache_ttl_secs),
            ),
            pattern_analyzers,
            anomaly_analyzers,
            forecaster: Arc::new(ForecastAnalyzer),
            metrics: AnalyzeMetrics::default(),
        }
    }

    /// Analyze one snapshot. A cache hit short-circuits the analyzer fan-out.
    pub async fn analyze(&mut self, data: &[NormalizedReading]) -> AnalysisResult {
        if let Some(hit) = self.cache.get(data) {
            self.metrics.cache_hits += 1;
            return hit;
        }

        let started = Instant::now();
        let shared: Arc<Vec<NormalizedReading>> = Arc::new(data.to_vec());

        let mut tasks = Vec::new();
        for analyzer in &self.pattern_analyzers {
            let analyzer = Arc::clone(analyzer);
            let input = Arc::clone(&shared);
            tasks.push((
                analyzer.name(),
                tokio::task::spawn_blocking(move || {
                    Contribution::Patterns(analyzer.detect_patterns(&input))
                }),
            ));
        }
        for analyzer in &self.anomaly_analyzers {
            let analyzer = Arc::clone(analyzer);
            let input = Arc::clone(&shared);
            tasks.push((
                analyzer.name(),
                tokio::task::spawn_blocking(move || {
                    Contribution::Anomalies(analyzer.detect_anomalies(&input))
                }),
            ));
        }
        {
            let forecaster = Arc::clone(&self.forecaster);
            let input = Arc::clone(&shared);
            tasks.push((
                "forecast",
                tokio::task::spawn_blocking(move || {
                    Contribution::Predictions(forecaster.predict(&input))
                }),
            ));
        }

        let mut patterns = Vec::new();
        let mut anomalies = Vec::new();
        let mut predictions = Vec::new();

        // Gather and merge in spawn order: the result ordering is fixed
        // regardless of which task finishes first.
        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Contribution::Patterns(mut p)) => patterns.append(&mut p),
                Ok(Contribution::Anomalies(mut a)) => anomalies.append(&mut a),
                Ok(Contribution::Predictions(mut p)) => predictions.append(&mut p),
                Err(e) => {
                    self.metrics.analyzer_failures += 1;
                    warn!(analyzer = name, error = %e, "Analyzer failed; contributing nothing");
                }
            }
        }

        let confidence = aggregate_confidence(&patterns, &anomalies, &predictions);
        let result = AnalysisResult {
            patterns,
            anomalies,
            predictions,
            confidence,
            processing_secs: started.elapsed().as_secs_f64(),
        };

        self.cache.set(data, result.clone());
        self.record_metrics(&result);
        result
    }

    fn record_metrics(&mut self, result: &AnalysisResult) {
        let m = &mut self.metrics;
        m.analyses_performed += 1;
        m.patterns_detected += result.patterns.len() as u64;
        m.anomalies_detected += result.anomalies.len() as u64;
        m.predictions_made += result.predictions.len() as u64;
        let count = m.analyses_performed as f64;
        m.average_processing_secs =
            (m.average_processing_secs * (count - 1.0) + result.processing_secs) / count;
    }

    pub fn metrics(&self) -> &AnalyzeMetrics {
        &self.metrics
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Mean of the available group means: pattern confidence, inverted anomaly
/// severity, prediction confidence. Floors at 0.3 when nothing was produced;
/// never NaN.
fn aggregate_confidence(
    patterns: &[Pattern],
    anomalies: &[Anomaly],
    predictions: &[Prediction],
) -> f64 {
    let mut group_means = Vec::with_capacity(3);

    if !patterns.is_empty() {
        group_means
            .push(patterns.iter().map(|p| p.confidence).sum::<f64>() / patterns.len() as f64);
    }
    if !anomalies.is_empty() {
        group_means
            .push(1.0 - anomalies.iter().map(|a| a.severity).sum::<f64>() / anomalies.len() as f64);
    }
    if !predictions.is_empty() {
        group_means.push(
            predictions.iter().map(|p| p.confidence).sum::<f64>() / predictions.len() as f64,
        );
    }

    if group_means.is_empty() {
        return 0.3;
    }
    (group_means.iter().sum::<f64>() / group_means.len() as f64).clamp(0.0, 1.0)
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

    fn rising_batch() -> Vec<NormalizedReading> {
        (0..30)
            .map(|i| reading("room1_temp", 1_000.0 + i as f64 * 30.0, 0.3 + 0.01 * i as f64))
            .collect()
    }

    #[tokio::test]
    async fn empty_batch_yields_floor_confidence() {
        let mut module = AnalyzeModule::new(&AnalyzeConfig::default());
        let result = module.analyze(&[]).await;
        assert!(result.is_empty());
        assert_eq!(result.confidence, 0.3);
        assert!(!result.confidence.is_nan());
    }

    #[tokio::test]
    async fn rising_series_produces_trend_and_prediction() {
        let mut module = AnalyzeModule::new(&AnalyzeConfig::default());
        let result = module.analyze(&rising_batch()).await;

        assert!(result.patterns.iter().any(|p| matches!(
            p.payload,
            crate::types::PatternPayload::LinearTrend { .. }
        )));
        assert_eq!(result.predictions.len(), 1);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }

    #[tokio::test]
    async fn second_analysis_of_same_batch_hits_the_cache() {
        let mut module = AnalyzeModule::new(&AnalyzeConfig::default());
        let batch = rising_batch();
        let first = module.analyze(&batch).await;
        let second = module.analyze(&batch).await;

        assert_eq!(module.metrics().cache_hits, 1);
        assert_eq!(module.metrics().analyses_performed, 1);
        // Cache-hit result equals the original analysis
        assert_eq!(first.patterns.len(), second.patterns.len());
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.predictions.len(), second.predictions.len());
    }

    #[test]
    fn aggregate_confidence_is_never_nan() {
        assert_eq!(aggregate_confidence(&[], &[], &[]), 0.3);

        let anomalies = vec![Anomaly {
            kind: crate::types::AnomalyKind::Statistical,
            sensor_id: "s".into(),
            timestamp: 0.0,
            severity: 0.9,
            value: RawValue::Number(1.0),
            expected_range: (0.0, 1.0),
            description: String::new(),
            metadata: BTreeMap::new(),
        }];
        let c = aggregate_confidence(&[], &anomalies, &[]);
        assert!((c - 0.1).abs() < 1e-9);
        assert!(!c.is_nan());
    }
}
