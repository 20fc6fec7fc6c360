//! Cycle-level safety audit.
//!
//! Runs after every completed cycle. A cycle violates safety when it ran far
//! too long, when any phase error smells critical, or when violations have
//! been piling up over the trailing hour. One critical violation in a cycle
//! is enough to demand safe mode.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

use crate::config::SafetyConfig;
use crate::types::CycleRecord;

/// Retained violation records.
const VIOLATION_HISTORY: usize = 1_000;

/// One recorded safety violation.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationRecord {
    pub violation: String,
    pub at: DateTime<Utc>,
    pub cycle_id: String,
}

/// Summary block for status output.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyStatus {
    pub safe_mode_active: bool,
    pub total_violations: usize,
    pub recent_violations: usize,
}

pub struct SafetyMonitor {
    config: SafetyConfig,
    violations: VecDeque<ViolationRecord>,
    safe_mode_active: bool,
}

impl SafetyMonitor {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            violations: VecDeque::with_capacity(VIOLATION_HISTORY),
            safe_mode_active: false,
        }
    }

    /// Audit one completed cycle. Returns `(safe, violations)`.
    pub fn check_cycle(&mut self, cycle: &CycleRecord) -> (bool, Vec<String>) {
        let mut found = Vec::new();

        if let Some(total) = cycle.total_secs {
            if total > self.config.max_cycle_secs {
                found.push(format!(
                    "Cycle duration {total:.1}s exceeds safety timeout"
                ));
            }
        }

        for (phase, error) in &cycle.phase_errors {
            let lowered = error.to_lowercase();
            if lowered.contains("critical") || lowered.contains("safety") {
                found.push(format!("Critical safety error in {phase}: {error}"));
            }
        }

        if self.recent_violation_count() >= self.config.max_violations_per_hour {
            found.push("Safety violation rate exceeds threshold".to_string());
        }

        for violation in &found {
            warn!(cycle = %cycle.cycle_id, violation = %violation, "Safety violation");
            if self.violations.len() >= VIOLATION_HISTORY {
                self.violations.pop_front();
            }
            self.violations.push_back(ViolationRecord {
                violation: violation.clone(),
                at: Utc::now(),
                cycle_id: cycle.cycle_id.clone(),
            });
        }

        (found.is_empty(), found)
    }

    /// Safe mode is warranted when enough of the cycle's violations are
    /// critical.
    pub fn should_enter_safe_mode(&self, violations: &[String]) -> bool {
        let critical = violations
            .iter()
            .filter(|v| v.to_lowercase().contains("critical"))
            .count();
        critical >= self.config.critical_failure_threshold
    }

    /// Violations recorded within the trailing hour.
    pub fn recent_violation_count(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        self.violations.iter().filter(|v| v.at > cutoff).count()
    }

    pub fn set_safe_mode(&mut self, active: bool) {
        self.safe_mode_active = active;
    }

    pub fn safe_mode_active(&self) -> bool {
        self.safe_mode_active
    }

    pub fn status(&self) -> SafetyStatus {
        SafetyStatus {
            safe_mode_active: self.safe_mode_active,
            total_violations: self.violations.len(),
            recent_violations: self.recent_violation_count(),
        }
    }

    pub fn recent_violations(&self, count: usize) -> Vec<ViolationRecord> {
        let skip = self.violations.len().saturating_sub(count);
        self.violations.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CyclePhase;

    fn monitor() -> SafetyMonitor {
        SafetyMonitor::new(SafetyConfig::default())
    }

    fn completed_cycle(total_secs: f64) -> CycleRecord {
        let mut cycle = CycleRecord::new("cycle_test".into());
        cycle.complete(true, None);
        cycle.total_secs = Some(total_secs);
        cycle
    }

    #[test]
    fn fast_clean_cycle_is_safe() {
        let mut m = monitor();
        let (safe, violations) = m.check_cycle(&completed_cycle(0.05));
        assert!(safe);
        assert!(violations.is_empty());
    }

    #[test]
    fn slow_cycle_violates_the_response_timeout() {
        let mut m = monitor();
        let (safe, violations) = m.check_cycle(&completed_cycle(31.0));
        assert!(!safe);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("exceeds safety timeout"));
        // Not critical: no safe-mode demand
        assert!(!m.should_enter_safe_mode(&violations));
    }

    #[test]
    fn critical_phase_error_demands_safe_mode() {
        let mut m = monitor();
        let mut cycle = completed_cycle(0.05);
        cycle
            .phase_errors
            .insert(CyclePhase::Analyze, "CRITICAL sensor fault".to_string());

        let (safe, violations) = m.check_cycle(&cycle);
        assert!(!safe);
        assert!(m.should_enter_safe_mode(&violations));
    }

    #[test]
    fn safety_keyword_matches_case_insensitively() {
        let mut m = monitor();
        let mut cycle = completed_cycle(0.05);
        cycle
            .phase_errors
            .insert(CyclePhase::Feedback, "Safety interlock tripped".to_string());
        let (safe, _) = m.check_cycle(&cycle);
        assert!(!safe);
    }

    #[test]
    fn violation_rate_over_the_hour_trips() {
        let mut m = monitor();
        // Five slow cycles leave five violations in the trailing hour
        for _ in 0..5 {
            m.check_cycle(&completed_cycle(31.0));
        }
        let (safe, violations) = m.check_cycle(&completed_cycle(0.05));
        assert!(!safe);
        assert!(violations
            .iter()
            .any(|v| v.contains("violation rate exceeds")));
    }

    #[test]
    fn status_reflects_history_and_mode() {
        let mut m = monitor();
        m.check_cycle(&completed_cycle(31.0));
        m.set_safe_mode(true);

        let status = m.status();
        assert!(status.safe_mode_active);
        assert_eq!(status.total_violations, 1);
        assert_eq!(status.recent_violations, 1);
    }
}
