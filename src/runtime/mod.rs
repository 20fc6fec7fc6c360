//! Loop runtime: orchestration, circuit breakers, cycle safety auditing and
//! performance monitoring/auto-tuning.

mod breaker;
mod orchestrator;
mod perf;
mod safety_monitor;

pub use breaker::{BreakerPanel, BreakerState, BreakerStatus, FailureRecord};
pub use orchestrator::{
    ComponentHealth, ComponentMetrics, CycleStats, DiagnosticInfo, LoopError, LoopHandle,
    LoopMetrics, LoopState, LoopStatus, SaflaLoop,
};
pub use perf::{
    optimize, Adjustment, AlertKind, PerfAlert, PerfMetrics, PerformanceMonitor, PhaseStats,
};
pub use safety_monitor::{SafetyMonitor, SafetyStatus, ViolationRecord};
