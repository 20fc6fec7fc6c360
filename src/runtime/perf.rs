//! Cycle performance monitoring and the on-demand auto-tuner.
//!
//! The monitor keeps a bounded cycle history and derives rolling metrics over
//! the last hundred cycles. The tuner reads those metrics and proposes (and
//! applies) timeout and tick-interval adjustments: generous headroom shrinks
//! a deadline, a struggling phase gets more room.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::info;

use crate::config::LoopConfig;
use crate::types::{CyclePhase, CycleRecord};

/// Retained cycle summaries.
const CYCLE_HISTORY: usize = 1_000;
/// Rolling metrics window.
const METRICS_WINDOW: usize = 100;
/// Mean cycle time past this raises a performance alert, seconds.
const ALERT_CYCLE_SECS: f64 = 1.0;
/// Error rate past this raises a reliability alert.
const ALERT_ERROR_RATE: f64 = 0.1;

/// Timeout floor and ceiling for the tuner, seconds.
const TIMEOUT_FLOOR_SECS: f64 = 0.010;
const TIMEOUT_CEIL_SECS: f64 = 2.0;
/// Tick interval floor and ceiling, seconds.
const TICK_FLOOR_SECS: f64 = 0.050;
const TICK_CEIL_SECS: f64 = 1.0;

// ============================================================================
// Summaries & Metrics
// ============================================================================

#[derive(Debug, Clone)]
struct CycleSummary {
    started_at: DateTime<Utc>,
    total_secs: f64,
    success: bool,
    phases: HashMap<CyclePhase, (f64, bool)>,
}

/// Per-phase latency statistics over the metrics window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PhaseStats {
    pub average_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    pub success_rate: f64,
    pub samples: usize,
}

/// Rolling loop metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerfMetrics {
    pub success_rate: f64,
    pub error_rate: f64,
    pub average_cycle_secs: f64,
    /// Cycles per second over the window.
    pub throughput: f64,
    pub phase_performance: BTreeMap<String, PhaseStats>,
}

/// A derived alert over the rolling metrics.
#[derive(Debug, Clone, Serialize)]
pub struct PerfAlert {
    pub kind: AlertKind,
    pub message: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Performance,
    Reliability,
}

/// One tuner decision.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Adjustment {
    TimeoutOptimization {
        phase: CyclePhase,
        old_secs: f64,
        new_secs: f64,
        reason: String,
    },
    IntervalOptimization {
        old_secs: f64,
        new_secs: f64,
        reason: String,
    },
}

// ============================================================================
// Monitor
// ============================================================================

pub struct PerformanceMonitor {
    history: VecDeque<CycleSummary>,
    metrics: PerfMetrics,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(CYCLE_HISTORY),
            metrics: PerfMetrics::default(),
        }
    }

    pub fn record_cycle(&mut self, cycle: &CycleRecord) {
        let phases = cycle
            .phase_timings
            .iter()
            .map(|(&phase, &secs)| (phase, (secs, cycle.phase_completed(phase))))
            .collect();

        if self.history.len() >= CYCLE_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(CycleSummary {
            started_at: cycle.started_at,
            total_secs: cycle.total_secs.unwrap_or(0.0),
            success: cycle.success,
            phases,
        });
        self.recompute();
    }

    fn recompute(&mut self) {
        let window: Vec<&CycleSummary> = self
            .history
            .iter()
            .rev()
            .take(METRICS_WINDOW)
            .collect();
        if window.is_empty() {
            return;
        }

        let n = window.len() as f64;
        let successes = window.iter().filter(|c| c.success).count() as f64;
        let total_secs: f64 = window.iter().map(|c| c.total_secs).sum();

        let oldest = window.last().map(|c| c.started_at).unwrap_or_else(Utc::now);
        let span_secs = (Utc::now() - oldest).num_milliseconds().max(1) as f64 / 1_000.0;

        let mut phase_performance = BTreeMap::new();
        for phase in CyclePhase::ALL {
            let samples: Vec<(f64, bool)> = window
                .iter()
                .filter_map(|c| c.phases.get(&phase).copied())
                .collect();
            if samples.is_empty() {
                continue;
            }
            let count = samples.len() as f64;
            phase_performance.insert(
                phase.to_string(),
                PhaseStats {
                    average_secs: samples.iter().map(|(t, _)| t).sum::<f64>() / count,
                    min_secs: samples.iter().map(|(t, _)| *t).fold(f64::INFINITY, f64::min),
                    max_secs: samples
                        .iter()
                        .map(|(t, _)| *t)
                        .fold(f64::NEG_INFINITY, f64::max),
                    success_rate: samples.iter().filter(|(_, ok)| *ok).count() as f64 / count,
                    samples: samples.len(),
                },
            );
        }

        self.metrics = PerfMetrics {
            success_rate: successes / n,
            error_rate: (n - successes) / n,
            average_cycle_secs: total_secs / n,
            throughput: n / span_secs.max(1.0),
            phase_performance,
        };
    }

    pub fn metrics(&self) -> &PerfMetrics {
        &self.metrics
    }

    pub fn cycles_recorded(&self) -> usize {
        self.history.len()
    }

    /// Alerts over the current rolling metrics.
    pub fn check_alerts(&self) -> Vec<PerfAlert> {
        let mut alerts = Vec::new();
        if self.history.is_empty() {
            return alerts;
        }

        if self.metrics.average_cycle_secs > ALERT_CYCLE_SECS {
            alerts.push(PerfAlert {
                kind: AlertKind::Performance,
                message: format!(
                    "Average cycle time {:.3}s exceeds {ALERT_CYCLE_SECS}s",
                    self.metrics.average_cycle_secs
                ),
                value: self.metrics.average_cycle_secs,
            });
        }
        if self.metrics.error_rate > ALERT_ERROR_RATE {
            alerts.push(PerfAlert {
                kind: AlertKind::Reliability,
                message: format!(
                    "Error rate {:.0}% exceeds {:.0}%",
                    self.metrics.error_rate * 100.0,
                    ALERT_ERROR_RATE * 100.0
                ),
                value: self.metrics.error_rate,
            });
        }
        alerts
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Auto-Tuner
// ============================================================================

/// Adjust timeouts and the tick interval from observed latencies, applying
/// the changes to the config through its typed setters.
pub fn optimize(config: &mut LoopConfig, metrics: &PerfMetrics) -> Vec<Adjustment> {
    let mut adjustments = Vec::new();

    for phase in CyclePhase::ALL {
        let Some(stats) = metrics.phase_performance.get(&phase.to_string()) else {
            continue;
        };
        let timeout = config.phase_timeout(phase).as_secs_f64();

        if stats.average_secs < timeout * 0.5 {
            let new_secs = (stats.average_secs * 2.0).max(TIMEOUT_FLOOR_SECS);
            config.set_phase_timeout(phase, new_secs);
            adjustments.push(Adjustment::TimeoutOptimization {
                phase,
                old_secs: timeout,
                new_secs,
                reason: "Performance headroom available".to_string(),
            });
        } else if stats.success_rate < 0.9 && stats.average_secs > timeout * 0.8 {
            let new_secs = (timeout * 1.5).min(TIMEOUT_CEIL_SECS);
            config.set_phase_timeout(phase, new_secs);
            adjustments.push(Adjustment::TimeoutOptimization {
                phase,
                old_secs: timeout,
                new_secs,
                reason: "Low success rate near the deadline".to_string(),
            });
        }
    }

    let tick = config.tick_interval().as_secs_f64();
    let mean_cycle = metrics.average_cycle_secs;
    if mean_cycle > 0.0 {
        if mean_cycle < tick * 0.5 {
            let new_secs = (mean_cycle * 2.0).max(TICK_FLOOR_SECS);
            config.set_tick_interval(new_secs);
            adjustments.push(Adjustment::IntervalOptimization {
                old_secs: tick,
                new_secs,
                reason: "System has processing headroom".to_string(),
            });
        } else if mean_cycle > tick * 0.9 {
            let new_secs = (mean_cycle * 1.2).min(TICK_CEIL_SECS);
            config.set_tick_interval(new_secs);
            adjustments.push(Adjustment::IntervalOptimization {
                old_secs: tick,
                new_secs,
                reason: "System under load".to_string(),
            });
        }
    }

    if !adjustments.is_empty() {
        info!(count = adjustments.len(), "Auto-tuner applied adjustments");
    }
    adjustments
}
