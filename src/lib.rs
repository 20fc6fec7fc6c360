//! HAVEN: adaptive smart-home control loop
//!
//! A soft-real-time pipeline over a household digital twin:
//!
//! - **Sense**: collect, validate and normalize sensor streams
//! - **Analyze**: detect periodicity, trends, statistical and learned
//!   anomalies; forecast next values
//! - **Feedback**: synthesize prioritized control actions, validate them
//!   against safety constraints, rehearse them on the twin, then execute with
//!   rollback
//! - **Learn**: accumulate experiences, track performance, detect drift and
//!   self-tune loop parameters
//!
//! The [`runtime::SaflaLoop`] orchestrator drives the four phases on a fixed
//! tick with per-phase deadlines, circuit breakers and a cycle-level safety
//! monitor that can degrade the loop to sensing-only safe mode.

pub mod config;
pub mod types;
pub mod twin;
pub mod sense;
pub mod analyze;
pub mod feedback;
pub mod learn;
pub mod runtime;

// Re-export the operator-facing surface
pub use config::LoopConfig;
pub use runtime::{DiagnosticInfo, LoopError, LoopHandle, LoopState, LoopStatus, SaflaLoop};

// Re-export the collaborator interfaces
pub use learn::{LearnHook, Scenario, ScenarioKind, ScenarioResult};
pub use twin::{
    house_builder, DeviceSnapshot, InMemoryTwin, Journal, SensorSource, Twin, TwinScenarioHook,
};

// Re-export commonly used types
pub use types::{
    AnalysisResult, Anomaly, ControlAction, CyclePhase, CycleRecord, ExecutionResult, Experience,
    NormalizedReading, Pattern, Prediction, Priority, Reading, SensorKind,
};
