//! External collaborator interfaces.
//!
//! The loop treats the digital twin as its system of record and talks to the
//! outside world only through the traits here: a [`SensorSource`] it reads
//! from, a [`Twin`] it inspects and mutates, and an optional [`Journal`] it
//! offers completed cycle records to. No file formats or wire protocols are
//! mandated; collaborators honor these signatures and nothing more.

mod memory;

pub use memory::{house_builder, HouseBuilder, InMemoryTwin, TwinScenarioHook};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::types::{CycleJournalEntry, Params, Reading};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum TwinError {
    #[error("house not found: {0}")]
    HouseNotFound(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("twin update failed: {0}")]
    UpdateFailed(String),
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("sensor source unavailable: {0}")]
    Unavailable(String),

    #[error("sensor read failed: {0}")]
    ReadFailed(String),
}

#[derive(Debug, Error)]
#[error("journal append failed: {0}")]
pub struct JournalError(pub String);

// ============================================================================
// Device Snapshots
// ============================================================================

/// Point-in-time view of one twin device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: String,
    /// Device class: "light", "climate", "lock", "camera", "meter", ...
    pub class: String,
    /// Current state values.
    pub state: Params,
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Source of raw sensor readings.
///
/// `fetch` is lazy and finite: it returns whatever arrived within the window
/// and is not restartable per call.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn fetch(&mut self, window: Duration) -> Result<Vec<Reading>, AcquisitionError>;

    /// Human-readable name for logs.
    fn source_name(&self) -> &str {
        "sensor source"
    }
}

/// The digital twin of the houses under control.
#[async_trait]
pub trait Twin: Send + Sync {
    /// Snapshot of one device, if the house and device exist.
    async fn device(&self, house_id: &str, device_id: &str) -> Option<DeviceSnapshot>;

    /// Merge a partial state into a device. Idempotent for equal patches.
    async fn update_device(
        &self,
        house_id: &str,
        device_id: &str,
        patch: &Params,
    ) -> Result<(), TwinError>;

    /// All devices of a class within a house (used by emergency response).
    async fn devices_of_class(&self, house_id: &str, class: &str) -> Vec<DeviceSnapshot>;

    /// Ids of all known houses.
    async fn house_ids(&self) -> Vec<String>;
}

/// Optional sink for completed cycle records. Failures are logged, never
/// propagated into the loop.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, entry: CycleJournalEntry) -> Result<(), JournalError>;
}
