//! Per-phase circuit breakers and failure accounting.
//!
//! One breaker guards each pipeline phase. Five consecutive failures open
//! the breaker; after the cooldown the next availability check admits exactly
//! one probe (half-open). A successful probe closes the breaker and clears
//! the count, a failed one re-opens it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::types::CyclePhase;

/// Consecutive failures that open a breaker.
const FAILURE_THRESHOLD: u32 = 5;
/// Wall-clock cooldown before an open breaker allows a probe.
const COOLDOWN: Duration = Duration::from_secs(300);
/// Retained failure records across all components.
const FAILURE_HISTORY: usize = 1_000;

// ============================================================================
// Breaker
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct CircuitBreaker {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: None,
            last_failure: None,
        }
    }

    /// Availability check; an expired cooldown promotes open to half-open.
    fn is_available(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled = self
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= COOLDOWN);
                if cooled {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Utc::now());

        match self.state {
            BreakerState::HalfOpen => {
                // Failed probe: straight back to open, new cooldown.
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            BreakerState::Closed if self.failure_count >= FAILURE_THRESHOLD => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    fn record_success(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Closed;
        }
        // Success breaks the failure streak.
        self.failure_count = 0;
        self.opened_at = None;
    }
}

// ============================================================================
// Panel
// ============================================================================

/// One recorded component failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub component: CyclePhase,
    pub error: String,
    pub at: DateTime<Utc>,
    #[serde(skip)]
    monotonic_at: Option<Instant>,
}

/// Snapshot of a breaker for status output.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

/// All four phase breakers plus the shared failure history.
pub struct BreakerPanel {
    breakers: HashMap<CyclePhase, CircuitBreaker>,
    failures: VecDeque<FailureRecord>,
}

impl BreakerPanel {
    pub fn new() -> Self {
        let breakers = CyclePhase::ALL
            .into_iter()
            .map(|phase| (phase, CircuitBreaker::new()))
            .collect();
        Self {
            breakers,
            failures: VecDeque::with_capacity(FAILURE_HISTORY),
        }
    }

    pub fn is_available(&mut self, phase: CyclePhase) -> bool {
        self.breakers
            .get_mut(&phase)
            .map_or(true, CircuitBreaker::is_available)
    }

    pub fn record_success(&mut self, phase: CyclePhase) {
        if let Some(breaker) = self.breakers.get_mut(&phase) {
            let was_half_open = breaker.state == BreakerState::HalfOpen;
            breaker.record_success();
            if was_half_open {
                info!(component = %phase, "Circuit breaker closed after successful probe");
            }
        }
    }

    pub fn record_failure(&mut self, phase: CyclePhase, error: &str) {
        if let Some(breaker) = self.breakers.get_mut(&phase) {
            let before = breaker.state;
            breaker.record_failure();
            if breaker.state == BreakerState::Open && before != BreakerState::Open {
                warn!(
                    component = %phase,
                    failures = breaker.failure_count,
                    "Circuit breaker opened"
                );
            }
        }

        if self.failures.len() >= FAILURE_HISTORY {
            self.failures.pop_front();
        }
        self.failures.push_back(FailureRecord {
            component: phase,
            error: error.to_string(),
            at: Utc::now(),
            monotonic_at: Some(Instant::now()),
        });
    }

    pub fn state(&self, phase: CyclePhase) -> BreakerState {
        self.breakers
            .get(&phase)
            .map_or(BreakerState::Closed, |b| b.state)
    }

    pub fn failure_count(&self, phase: CyclePhase) -> u32 {
        self.breakers.get(&phase).map_or(0, |b| b.failure_count)
    }

    /// Failures recorded within the trailing window.
    pub fn failures_within(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.failures
            .iter()
            .filter(|f| {
                f.monotonic_at
                    .is_some_and(|at| now.duration_since(at) <= window)
            })
            .count()
    }

    pub fn recent_failures(&self, count: usize) -> Vec<FailureRecord> {
        let skip = self.failures.len().saturating_sub(count);
        self.failures.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers
            .iter()
            .map(|(phase, breaker)| {
                (
                    phase.to_string(),
                    BreakerStatus {
                        state: breaker.state,
                        failure_count: breaker.failure_count,
                        last_failure: breaker.last_failure,
                    },
                )
            })
            .collect()
    }
}

impl Default for BreakerPanel {
    fn default() -> Self {
        Self::new()
    }
}
