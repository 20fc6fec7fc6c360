//! Rollback journal: pre-action checkpoints and one-shot restore.
//!
//! A checkpoint captures the pre-state of every device an action is about to
//! touch, not just the nominal target — a batch optimization mutating five
//! sub-devices restores all five. Restores run at most once per checkpoint;
//! a second restore of the same handle is a no-op.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::twin::{Twin, TwinError};
use crate::types::{ActionKind, ControlAction, Params};

/// Captured pre-state for one action.
#[derive(Debug, Clone)]
struct Checkpoint {
    house_id: String,
    /// Device id -> state before the action.
    pre_states: Vec<(String, Params)>,
    #[allow(dead_code)]
    at: DateTime<Utc>,
    #[allow(dead_code)]
    action_id: String,
}

pub struct RollbackJournal {
    twin: Arc<dyn Twin>,
    checkpoints: HashMap<String, Checkpoint>,
}

impl RollbackJournal {
    pub fn new(twin: Arc<dyn Twin>) -> Self {
        Self {
            twin,
            checkpoints: HashMap::new(),
        }
    }

    /// Capture pre-states for everything the action will touch. Returns the
    /// checkpoint id, or `None` when there is nothing to capture (no house
    /// context or no matching devices).
    pub async fn checkpoint(&mut self, action: &ControlAction) -> Option<String> {
        let house_id = action.context.house_id.clone()?;

        let mut pre_states = Vec::new();
        for device_id in self.affected_devices(action, &house_id).await {
            if let Some(snapshot) = self.twin.device(&house_id, &device_id).await {
                pre_states.push((device_id, snapshot.state));
            }
        }
        if pre_states.is_empty() {
            return None;
        }

        let checkpoint_id = format!(
            "checkpoint_{}_{}",
            action.id,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        self.checkpoints.insert(
            checkpoint_id.clone(),
            Checkpoint {
                house_id,
                pre_states,
                at: Utc::now(),
                action_id: action.id.clone(),
            },
        );
        debug!(checkpoint = %checkpoint_id, "Checkpoint captured");
        Some(checkpoint_id)
    }

    /// Devices the action can mutate.
    async fn affected_devices(&self, action: &ControlAction, house_id: &str) -> Vec<String> {
        match action.kind {
            ActionKind::EnergyOptimization => action
                .params
                .get("devices_to_optimize")
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|e| e.get("device_id").and_then(|v| v.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            ActionKind::EmergencyResponse => {
                let mut ids = Vec::new();
                for class in ["light", "lock", "camera"] {
                    ids.extend(
                        self.twin
                            .devices_of_class(house_id, class)
                            .await
                            .into_iter()
                            .map(|d| d.id),
                    );
                }
                ids
            }
            _ => vec![action.target.clone()],
        }
    }

    /// Restore every captured device to its pre-state and consume the
    /// checkpoint. Returns `Ok(false)` for an unknown (or already restored)
    /// checkpoint.
    pub async fn rollback(&mut self, checkpoint_id: &str) -> Result<bool, TwinError> {
        let Some(checkpoint) = self.checkpoints.remove(checkpoint_id) else {
            debug!(checkpoint = checkpoint_id, "Rollback skipped: unknown or already restored");
            return Ok(false);
        };

        for (device_id, pre_state) in &checkpoint.pre_states {
            if let Err(e) = self
                .twin
                .update_device(&checkpoint.house_id, device_id, pre_state)
                .await
            {
                warn!(device = %device_id, error = %e, "Rollback restore failed for device");
                return Err(e);
            }
        }
        debug!(checkpoint = checkpoint_id, devices = checkpoint.pre_states.len(), "Rollback complete");
        Ok(true)
    }

    /// Drop a checkpoint without restoring (successful execution path).
    pub fn discard(&mut self, checkpoint_id: &str) {
        self.checkpoints.remove(checkpoint_id);
    }

    /// Ids of checkpoints that were neither restored nor discarded. Non-empty
    /// after a feedback phase was cancelled mid-execution.
    pub fn pending_ids(&self) -> Vec<String> {
        self.checkpoints.keys().cloned().collect()
    }

    pub fn pending(&self) -> usize {
        self.checkpoints.len()
    }
}
