//! Fixed-capacity ring buffer of normalized readings.
//!
//! Single producer (the sense stage), insertion-ordered, oldest-first
//! eviction when full. All queries are linear scans over the window, which is
//! fine at the window sizes the loop runs with.

use std::collections::VecDeque;

use crate::types::NormalizedReading;

#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    buffer: VecDeque<NormalizedReading>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Append a reading, evicting the oldest when at capacity.
    pub fn push(&mut self, reading: NormalizedReading) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(reading);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The last `n` readings in insertion order.
    pub fn last_n(&self, n: usize) -> Vec<NormalizedReading> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).cloned().collect()
    }

    /// Readings for one sensor, scanning at most the trailing `limit` entries.
    pub fn by_sensor(&self, sensor_id: &str, limit: usize) -> Vec<NormalizedReading> {
        let skip = self.buffer.len().saturating_sub(limit);
        self.buffer
            .iter()
            .skip(skip)
            .filter(|r| r.sensor_id == sensor_id)
            .cloned()
            .collect()
    }

    /// Readings newer than `now - window_secs`.
    pub fn time_window(&self, now: f64, window_secs: f64) -> Vec<NormalizedReading> {
        let cutoff = now - window_secs;
        self.buffer
            .iter()
            .filter(|r| r.timestamp > cutoff)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NormalizedReading> {
        self.buffer.iter()
    }
}
