//! Action execution against the twin.
//!
//! Dispatches on action kind to a per-kind applier that translates action
//! parameters into a device-state patch. Errors never cross the boundary:
//! every outcome, including twin failures, becomes an [`ExecutionResult`].

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::twin::Twin;
use crate::types::{ActionKind, ActionStatus, ControlAction, ExecutionResult, Params};

pub struct ActionExecutor {
    twin: Arc<dyn Twin>,
}

impl ActionExecutor {
    pub fn new(twin: Arc<dyn Twin>) -> Self {
        Self { twin }
    }

    /// Execute an action, mutating the twin. Never panics or propagates
    /// errors; failures are reported in the result.
    pub async fn execute(&self, action: &mut ControlAction) -> ExecutionResult {
        let started = Instant::now();
        action.transition(ActionStatus::Executing);

        let outcome = match action.kind {
            ActionKind::Lighting => self.apply_keyed(action, &["brightness", "power", "color"], &[]).await,
            ActionKind::Climate | ActionKind::ComfortAdjustment => {
                self.apply_keyed(
                    action,
                    &["hvac_mode", "fan_speed"],
                    &[("target_temperature", "temperature")],
                )
                .await
            }
            ActionKind::Security => {
                self.apply_keyed(action, &["locked", "armed", "recording"], &[]).await
            }
            ActionKind::EnergyOptimization => self.apply_energy_optimization(action).await,
            ActionKind::EmergencyResponse => self.apply_emergency_response(action).await,
            ActionKind::Maintenance => {
                debug!(action = %action.id, target = %action.target, "Maintenance action noted");
                Ok(json!({ "target": action.target, "noted": true }))
            }
        };

        let duration = started.elapsed().as_secs_f64();
        match outcome {
            Ok(payload) => {
                action.transition(ActionStatus::Completed);
                ExecutionResult {
                    action_id: action.id.clone(),
                    success: true,
                    completed_at: Utc::now(),
                    duration_secs: duration,
                    payload,
                    error: None,
                }
            }
            Err(error) => {
                action.fail(error.clone());
                ExecutionResult {
                    action_id: action.id.clone(),
                    success: false,
                    completed_at: Utc::now(),
                    duration_secs: duration,
                    payload: serde_json::Value::Null,
                    error: Some(error),
                }
            }
        }
    }

    /// Copy whitelisted parameter keys into a state patch and apply it.
    /// `renames` maps a parameter key to a different device-state key.
    async fn apply_keyed(
        &self,
        action: &ControlAction,
        keys: &[&str],
        renames: &[(&str, &str)],
    ) -> Result<serde_json::Value, String> {
        let mut patch = Params::new();
        for key in keys {
            if let Some(value) = action.params.get(key) {
                patch.insert(key, value.clone());
            }
        }
        for (from, to) in renames {
            if let Some(value) = action.params.get(from) {
                patch.insert(to, value.clone());
            }
        }

        if let Some(house_id) = &action.context.house_id {
            if !patch.is_empty() {
                self.twin
                    .update_device(house_id, &action.target, &patch)
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }

        Ok(json!({
            "device_id": action.target,
            "state_update": patch,
        }))
    }

    /// Apply a batch of sub-device patches.
    async fn apply_energy_optimization(
        &self,
        action: &ControlAction,
    ) -> Result<serde_json::Value, String> {
        let Some(house_id) = action.context.house_id.clone() else {
            return Ok(json!({ "optimized_devices": [] }));
        };

        let mut optimized = Vec::new();
        if let Some(devices) = action.params.get("devices_to_optimize").and_then(|v| v.as_array())
        {
            for entry in devices {
                let Some(device_id) = entry.get("device_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                let patch: Params = entry
                    .get("state_update")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| format!("bad state_update for {device_id}: {e}"))?
                    .unwrap_or_default();

                self.twin
                    .update_device(&house_id, device_id, &patch)
                    .await
                    .map_err(|e| e.to_string())?;
                optimized.push(json!({ "device_id": device_id, "state_update": patch }));
            }
        }

        Ok(json!({ "optimized_devices": optimized }))
    }

    /// Force every relevant device into a safe configuration.
    async fn apply_emergency_response(
        &self,
        action: &ControlAction,
    ) -> Result<serde_json::Value, String> {
        let Some(house_id) = action.context.house_id.clone() else {
            return Err("emergency response requires a house context".to_string());
        };
        let response_type = action
            .params
            .get_str("response_type")
            .unwrap_or("unknown")
            .to_string();

        let mut taken = Vec::new();
        if response_type == "smoke_alarm" {
            // Light every exit path and unlock every door.
            let bright = Params::new().set("power", true).set("brightness", 100.0);
            for light in self.twin.devices_of_class(&house_id, "light").await {
                self.twin
                    .update_device(&house_id, &light.id, &bright)
                    .await
                    .map_err(|e| e.to_string())?;
                taken.push(format!("activated light {}", light.id));
            }
            let unlocked = Params::new().set("locked", false);
            for lock in self.twin.devices_of_class(&house_id, "lock").await {
                self.twin
                    .update_device(&house_id, &lock.id, &unlocked)
                    .await
                    .map_err(|e| e.to_string())?;
                taken.push(format!("unlocked {}", lock.id));
            }
            info!(house = %house_id, actions = taken.len(), "Emergency response applied");
        }

        Ok(json!({
            "emergency_type": response_type,
            "actions_taken": taken,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twin::{house_builder, InMemoryTwin};
    use crate::types::{ActionContext, Priority};

    async fn setup() -> (Arc<InMemoryTwin>, String) {
        let twin = Arc::new(InMemoryTwin::new());
        let house = house_builder("house1")
            .thermostat("thermostat_room1", 21.0)
            .light("light_hall")
            .light("light_kitchen")
            .lock("lock_front")
            .install(twin.as_ref())
            .await;
        (twin, house)
    }

    fn context(house: &str) -> ActionContext {
        ActionContext {
            house_id: Some(house.to_string()),
            ..ActionContext::default()
        }
    }

    #[tokio::test]
    async fn climate_applier_renames_target_temperature() {
        let (twin, house) = setup().await;
        let executor = ActionExecutor::new(twin.clone());
        let mut action = ControlAction::new(
            ActionKind::Climate,
            "thermostat_room1",
            Params::new()
                .set("target_temperature", 24.5)
                .set("hvac_mode", "cool"),
            Priority::High,
            context(&house),
            None,
        );

        let result = executor.execute(&mut action).await;
        assert!(result.success);
        assert_eq!(action.status, ActionStatus::Completed);

        let device = twin.device(&house, "thermostat_room1").await.expect("device");
        assert_eq!(device.state.get_f64("temperature"), Some(24.5));
        assert_eq!(device.state.get_str("hvac_mode"), Some("cool"));
    }

    #[tokio::test]
    async fn unknown_target_fails_without_panicking() {
        let (twin, house) = setup().await;
        let executor = ActionExecutor::new(twin);
        let mut action = ControlAction::new(
            ActionKind::Lighting,
            "light_missing",
            Params::new().set("power", true),
            Priority::Medium,
            context(&house),
            None,
        );

        let result = executor.execute(&mut action).await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(action.status, ActionStatus::Failed);
    }

    #[tokio::test]
    async fn energy_optimization_iterates_sub_devices() {
        let (twin, house) = setup().await;
        let executor = ActionExecutor::new(twin.clone());
        let devices = serde_json::json!([
            { "device_id": "light_hall", "state_update": { "power": false } },
            { "device_id": "light_kitchen", "state_update": { "power": false } },
        ]);
        let mut action = ControlAction::new(
            ActionKind::EnergyOptimization,
            "house_schedule",
            Params::new().set("devices_to_optimize", devices),
            Priority::Low,
            context(&house),
            None,
        );

        let result = executor.execute(&mut action).await;
        assert!(result.success);
        assert_eq!(
            result.payload["optimized_devices"].as_array().map(Vec::len),
            Some(2)
        );
        let hall = twin.device(&house, "light_hall").await.expect("device");
        assert_eq!(hall.state.get_bool("power"), Some(false));
    }

    #[tokio::test]
    async fn smoke_alarm_forces_safe_configuration() {
        let (twin, house) = setup().await;
        let executor = ActionExecutor::new(twin.clone());
        let mut action = ControlAction::new(
            ActionKind::EmergencyResponse,
            house.clone(),
            Params::new().set("response_type", "smoke_alarm"),
            Priority::Critical,
            context(&house),
            None,
        );

        let result = executor.execute(&mut action).await;
        assert!(result.success);

        for light in twin.devices_of_class(&house, "light").await {
            assert_eq!(light.state.get_bool("power"), Some(true));
            assert_eq!(light.state.get_f64("brightness"), Some(100.0));
        }
        let lock = twin.device(&house, "lock_front").await.expect("lock");
        assert_eq!(lock.state.get_bool("locked"), Some(false));
    }

    #[tokio::test]
    async fn execution_measures_duration_and_preserves_action_id() {
        let (twin, house) = setup().await;
        let executor = ActionExecutor::new(twin);
        let mut action = ControlAction::new(
            ActionKind::Security,
            "lock_front",
            Params::new().set("locked", false),
            Priority::High,
            context(&house),
            None,
        );
        let id = action.id.clone();

        let result = executor.execute(&mut action).await;
        assert_eq!(result.action_id, id);
        assert!(result.duration_secs >= 0.0);
    }
}
