//! Bounded, importance-aware experience history.

use std::collections::VecDeque;

use crate::types::{Experience, ExperienceKind};

/// FIFO buffer of experiences with query views by recency, importance and
/// kind. Eviction is oldest-first; importance influences queries, never
/// retention.
pub struct ExperienceBuffer {
    capacity: usize,
    experiences: VecDeque<Experience>,
}

impl ExperienceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            experiences: VecDeque::new(),
        }
    }

    pub fn add(&mut self, experience: Experience) {
        if self.experiences.len() >= self.capacity {
            self.experiences.pop_front();
        }
        self.experiences.push_back(experience);
    }

    /// Most recent `count` experiences in insertion order.
    pub fn recent(&self, count: usize) -> Vec<Experience> {
        let skip = self.experiences.len().saturating_sub(count);
        self.experiences.iter().skip(skip).cloned().collect()
    }

    /// Up to `count` experiences at or above `min_importance`, most important
    /// first (ties broken by recency).
    pub fn by_importance(&self, count: usize, min_importance: f64) -> Vec<Experience> {
        let mut important: Vec<Experience> = self
            .experiences
            .iter()
            .filter(|e| e.importance >= min_importance)
            .cloned()
            .collect();
        important.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        important.truncate(count);
        important
    }

    /// Last `count` experiences of one kind.
    pub fn by_kind(&self, kind: ExperienceKind, count: usize) -> Vec<Experience> {
        let matching: Vec<&Experience> = self
            .experiences
            .iter()
            .filter(|e| e.kind == kind)
            .collect();
        let skip = matching.len().saturating_sub(count);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// `count` experiences preceding the most recent `skip` ones.
    pub fn historical(&self, skip: usize, count: usize) -> Vec<Experience> {
        let len = self.experiences.len();
        if len <= skip {
            return Vec::new();
        }
        let end = len - skip;
        let start = end.saturating_sub(count);
        self.experiences.range(start..end).cloned().collect()
    }

    pub fn all(&self) -> Vec<Experience> {
        self.experiences.iter().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.experiences.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
