//! Cycle records: per-tick accounting of phase timings and outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;

use super::action::ExecutionResult;
use super::analysis::AnalysisResult;
use super::learning::LearningResult;
use super::reading::NormalizedReading;

/// The four pipeline phases of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Sense,
    Analyze,
    Feedback,
    Learn,
}

impl CyclePhase {
    pub const ALL: [Self; 4] = [Self::Sense, Self::Analyze, Self::Feedback, Self::Learn];
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sense => write!(f, "sense"),
            Self::Analyze => write!(f, "analyze"),
            Self::Feedback => write!(f, "feedback"),
            Self::Learn => write!(f, "learn"),
        }
    }
}

/// Accounting record for a single cycle. Each attempted phase records exactly
/// one timing; a phase absent from `phase_timings` was skipped entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    /// Phase currently in flight, if any.
    pub current_phase: Option<CyclePhase>,
    pub phases_completed: Vec<CyclePhase>,
    /// Seconds each attempted phase took.
    pub phase_timings: HashMap<CyclePhase, f64>,
    pub phase_errors: HashMap<CyclePhase, String>,

    // Data produced along the way
    pub reading_count: usize,
    /// The normalized batch this cycle sensed.
    #[serde(default)]
    pub readings: Vec<NormalizedReading>,
    pub analysis: Option<AnalysisResult>,
    pub execution_results: Vec<ExecutionResult>,
    pub learning: Option<LearningResult>,

    pub total_secs: Option<f64>,
    pub success: bool,
    pub error: Option<String>,

    #[serde(skip)]
    phase_started: Option<Instant>,
    #[serde(skip)]
    cycle_started: Option<Instant>,
}

impl CycleRecord {
    pub fn new(cycle_id: String) -> Self {
        Self {
            cycle_id,
            started_at: Utc::now(),
            current_phase: None,
            phases_completed: Vec::new(),
            phase_timings: HashMap::new(),
            phase_errors: HashMap::new(),
            reading_count: 0,
            readings: Vec::new(),
            analysis: None,
            execution_results: Vec::new(),
            learning: None,
            total_secs: None,
            success: false,
            error: None,
            phase_started: Some(Instant::now()),
            cycle_started: Some(Instant::now()),
        }
    }

    pub fn start_phase(&mut self, phase: CyclePhase) {
        self.current_phase = Some(phase);
        self.phase_started = Some(Instant::now());
    }

    /// Close out the phase started by the matching [`start_phase`] call.
    pub fn complete_phase(&mut self, phase: CyclePhase, success: bool, error: Option<String>) {
        if self.current_phase != Some(phase) {
            return;
        }
        let elapsed = self
            .phase_started
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.phase_timings.insert(phase, elapsed);
        if success {
            self.phases_completed.push(phase);
        } else {
            self.phase_errors
                .insert(phase, error.unwrap_or_else(|| "unknown error".to_string()));
        }
    }

    pub fn complete(&mut self, success: bool, error: Option<String>) {
        self.total_secs = Some(
            self.cycle_started
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
        );
        self.success = success;
        self.error = error;
        self.current_phase = None;
    }

    pub fn phase_completed(&self, phase: CyclePhase) -> bool {
        self.phases_completed.contains(&phase)
    }

    /// Compact journal entry offered to the [`Journal`](crate::twin::Journal)
    /// collaborator.
    pub fn journal_entry(&self) -> CycleJournalEntry {
        CycleJournalEntry {
            cycle_id: self.cycle_id.clone(),
            started_at: self.started_at,
            total_secs: self.total_secs.unwrap_or(0.0),
            phase_timings: self.phase_timings.clone(),
            success: self.success,
            readings: self.reading_count,
            actions_executed: self.execution_results.len(),
        }
    }
}

/// The minimal persisted form of a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleJournalEntry {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub total_secs: f64,
    pub phase_timings: HashMap<CyclePhase, f64>,
    pub success: bool,
    pub readings: usize,
    pub actions_executed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_phase_records_exactly_one_timing() {
        let mut record = CycleRecord::new("cycle_test".into());
        record.start_phase(CyclePhase::Sense);
        record.complete_phase(CyclePhase::Sense, true, None);
        record.start_phase(CyclePhase::Analyze);
        record.complete_phase(CyclePhase::Analyze, false, Some("boom".into()));
        record.complete(true, None);

        assert_eq!(record.phase_timings.len(), 2);
        assert!(record.phase_completed(CyclePhase::Sense));
        assert!(!record.phase_completed(CyclePhase::Analyze));
        assert_eq!(record.phase_errors[&CyclePhase::Analyze], "boom");
        // Learn/feedback were never attempted
        assert!(!record.phase_timings.contains_key(&CyclePhase::Learn));
    }

    #[test]
    fn completing_a_mismatched_phase_is_ignored() {
        let mut record = CycleRecord::new("cycle_test".into());
        record.start_phase(CyclePhase::Sense);
        record.complete_phase(CyclePhase::Feedback, true, None);
        assert!(record.phase_timings.is_empty());
    }

    #[test]
    fn phase_timings_sum_within_total() {
        let mut record = CycleRecord::new("cycle_test".into());
        for phase in CyclePhase::ALL {
            record.start_phase(phase);
            record.complete_phase(phase, true, None);
        }
        record.complete(true, None);
        let sum: f64 = record.phase_timings.values().sum();
        assert!(sum <= record.total_secs.unwrap_or(0.0) + 1e-6);
    }
}
