//! Analysis result memoization.
//!
//! Keyed by a cheap fingerprint over the input snapshot rather than the data
//! itself: first/last timestamp, reading count and distinct-sensor count
//! identify a batch well enough at loop cadence, and equal inputs re-analyze
//! to equal results (the analyzers are deterministic), so a fingerprint
//! collision between genuinely different batches is the only staleness risk
//! and the TTL bounds it.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{AnalysisResult, NormalizedReading};

/// Build the cache key for a reading batch.
pub fn fingerprint(data: &[NormalizedReading]) -> String {
    if data.is_empty() {
        return "empty".to_string();
    }
    let mut sensors: Vec<&str> = data.iter().map(|r| r.sensor_id.as_str()).collect();
    sensors.sort_unstable();
    sensors.dedup();
    format!(
        "{}_{}_{}_{}",
        data[0].timestamp,
        data[data.len() - 1].timestamp,
        data.len(),
        sensors.len()
    )
}

/// Bounded TTL cache mapping fingerprints to analysis results.
pub struct AnalysisCache {
    entries: HashMap<String, (AnalysisResult, Instant)>,
    max_size: usize,
    ttl: Duration,
}

impl AnalysisCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            ttl,
        }
    }

    /// Cached result for this batch, if fresh. Expired entries are dropped on
    /// lookup; a hit does not refresh the entry's TTL.
    pub fn get(&mut self, data: &[NormalizedReading]) -> Option<AnalysisResult> {
        let key = fingerprint(data);
        match self.entries.get(&key) {
            Some((result, inserted_at)) if inserted_at.elapsed() < self.ttl => {
                Some(result.clone())
            }
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store a result, evicting the oldest-inserted entry on overflow.
    pub fn set(&mut self, data: &[NormalizedReading], result: AnalysisResult) {
        if self.entries.len() >= self.max_size {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, inserted_at))| *inserted_at)
                .map(|(key, _)| key.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(fingerprint(data), (result, Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataQuality, RawValue, SensorKind};
    use std::collections::BTreeMap;

    fn reading(sensor_id: &str, timestamp: f64) -> NormalizedReading {
        NormalizedReading {
            sensor_id: sensor_id.to_string(),
            kind: SensorKind::Temperature,
            timestamp,
            value: RawValue::Number(20.0),
            scaled: 0.6,
            unit: "C".into(),
            quality: DataQuality::High,
            confidence: 1.0,
            processing_latency: 0.0,
            metadata: BTreeMap::new(),
        }
    }

    fn batch(n: usize) -> Vec<NormalizedReading> {
        (0..n).map(|i| reading("s1", 100.0 + i as f64)).collect()
    }

    #[test]
    fn fingerprint_captures_bounds_count_and_sensors() {
        let a = batch(5);
        assert_eq!(fingerprint(&a), "100_104_5_1");

        let mut b = batch(5);
        b[2].sensor_id = "s2".into();
        assert_eq!(fingerprint(&b), "100_104_5_2");

        assert_eq!(fingerprint(&[]), "empty");
    }

    #[tokio::test]
    async fn hit_within_ttl_returns_equal_result() {
        let mut cache = AnalysisCache::new(10, Duration::from_secs(300));
        let data = batch(5);
        let mut result = AnalysisResult::empty();
        result.confidence = 0.77;
        cache.set(&data, result);

        let hit = cache.get(&data).expect("hit");
        assert_eq!(hit.confidence, 0.77);
        // A hit does not advance the TTL or consume the entry
        assert!(cache.get(&data).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_miss_and_are_dropped() {
        let mut cache = AnalysisCache::new(10, Duration::from_secs(300));
        let data = batch(5);
        cache.set(&data, AnalysisResult::empty());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.get(&data).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_evicts_oldest_insertion() {
        let mut cache = AnalysisCache::new(2, Duration::from_secs(300));
        let first = batch(1);
        let second = batch(2);
        let third = batch(3);

        cache.set(&first, AnalysisResult::empty());
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set(&second, AnalysisResult::empty());
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set(&third, AnalysisResult::empty());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&first).is_none());
        assert!(cache.get(&second).is_some());
        assert!(cache.get(&third).is_some());
    }
}
