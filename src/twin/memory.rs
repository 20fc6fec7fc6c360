//! In-memory reference twin.
//!
//! Backs the simulation binary and the test suites. State lives behind a
//! `tokio::sync::RwLock`; updates merge partial state, so applying the same
//! patch twice is a no-op beyond the first.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{DeviceSnapshot, Twin, TwinError};
use crate::learn::{LearnHook, Scenario, ScenarioKind, ScenarioResult};
use crate::types::Params;
use std::sync::Arc;

// ============================================================================
// In-Memory Twin
// ============================================================================

/// Simple map-backed twin: house id -> device id -> snapshot.
#[derive(Default)]
pub struct InMemoryTwin {
    houses: RwLock<HashMap<String, HashMap<String, DeviceSnapshot>>>,
}

impl InMemoryTwin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a device in a house, creating the house if needed.
    pub async fn add_device(&self, house_id: &str, device: DeviceSnapshot) {
        let mut houses = self.houses.write().await;
        houses
            .entry(house_id.to_string())
            .or_default()
            .insert(device.id.clone(), device);
    }

    /// Number of devices in a house.
    pub async fn device_count(&self, house_id: &str) -> usize {
        self.houses
            .read()
            .await
            .get(house_id)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl Twin for InMemoryTwin {
    async fn device(&self, house_id: &str, device_id: &str) -> Option<DeviceSnapshot> {
        self.houses
            .read()
            .await
            .get(house_id)
            .and_then(|devices| devices.get(device_id))
            .cloned()
    }

    async fn update_device(
        &self,
        house_id: &str,
        device_id: &str,
        patch: &Params,
    ) -> Result<(), TwinError> {
        let mut houses = self.houses.write().await;
        let devices = houses
            .get_mut(house_id)
            .ok_or_else(|| TwinError::HouseNotFound(house_id.to_string()))?;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| TwinError::DeviceNotFound(device_id.to_string()))?;

        for (key, value) in patch.iter() {
            device.state.insert(key, value.clone());
        }
        debug!(house = house_id, device = device_id, keys = patch.0.len(), "Twin state updated");
        Ok(())
    }

    async fn devices_of_class(&self, house_id: &str, class: &str) -> Vec<DeviceSnapshot> {
        self.houses
            .read()
            .await
            .get(house_id)
            .map(|devices| {
                devices
                    .values()
                    .filter(|d| d.class == class)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn house_ids(&self) -> Vec<String> {
        self.houses.read().await.keys().cloned().collect()
    }
}

// ============================================================================
// House Builder
// ============================================================================

/// Fluent construction of a demo house.
pub struct HouseBuilder {
    house_id: String,
    devices: Vec<DeviceSnapshot>,
}

/// Start building a house twin.
pub fn house_builder(house_id: &str) -> HouseBuilder {
    HouseBuilder {
        house_id: house_id.to_string(),
        devices: Vec::new(),
    }
}

impl HouseBuilder {
    pub fn device(mut self, id: &str, class: &str, state: Params) -> Self {
        self.devices.push(DeviceSnapshot {
            id: id.to_string(),
            class: class.to_string(),
            state,
        });
        self
    }

    pub fn thermostat(self, id: &str, temperature: f64) -> Self {
        let state = Params::new()
            .set("temperature", temperature)
            .set("hvac_mode", "off")
            .set("fan_speed", "auto");
        self.device(id, "climate", state)
    }

    pub fn light(self, id: &str) -> Self {
        let state = Params::new()
            .set("power", false)
            .set("brightness", 0.0)
            .set("color", "warm_white");
        self.device(id, "light", state)
    }

    pub fn lock(self, id: &str) -> Self {
        let state = Params::new().set("locked", true).set("armed", false);
        self.device(id, "lock", state)
    }

    pub fn camera(self, id: &str) -> Self {
        let state = Params::new().set("recording", false);
        self.device(id, "camera", state)
    }

    pub fn power_meter(self, id: &str, watts: f64) -> Self {
        let state = Params::new().set("power_consumption", watts);
        self.device(id, "meter", state)
    }

    /// Register every device with the twin.
    pub async fn install(self, twin: &InMemoryTwin) -> String {
        for device in self.devices {
            twin.add_device(&self.house_id, device).await;
        }
        self.house_id
    }
}

// ============================================================================
// Scenario Hook
// ============================================================================

/// Reference [`LearnHook`] that plays scenarios against a twin, mirroring how
/// a real deployment would drive rehearsals on its digital model.
pub struct TwinScenarioHook {
    twin: Arc<dyn Twin>,
}

impl TwinScenarioHook {
    pub fn new(twin: Arc<dyn Twin>) -> Self {
        Self { twin }
    }

    async fn run_power_outage(&self, scenario: &Scenario, house_id: &str) -> ScenarioResult {
        let mut result = ScenarioResult::new(scenario.kind);

        let mut all_devices = Vec::new();
        for class in ["light", "climate", "lock", "camera", "meter"] {
            all_devices.extend(self.twin.devices_of_class(house_id, class).await);
        }
        if all_devices.is_empty() {
            return result.failed("house twin has no devices");
        }

        let initial: HashMap<String, Params> = all_devices
            .iter()
            .map(|d| (d.id.clone(), d.state.clone()))
            .collect();

        let affected: Vec<&DeviceSnapshot> =
            if scenario.params.get_str("affected_circuits") == Some("main") {
                all_devices.iter().collect()
            } else {
                let mut rng = rand::thread_rng();
                let count = (all_devices.len() as f64 * 0.6).ceil() as usize;
                all_devices
                    .choose_multiple(&mut rng, count.max(1))
                    .collect()
            };

        let outage = Params::new().set("power", false);
        for device in &affected {
            if self
                .twin
                .update_device(house_id, &device.id, &outage)
                .await
                .is_ok()
            {
                result.actions.push(format!("cut power to {}", device.id));
            }
        }

        let automatic = scenario.params.get_str("recovery_strategy") == Some("automatic");
        for device in &affected {
            let critical = device.class == "climate" || device.class == "lock";
            if automatic || critical {
                if let Some(state) = initial.get(&device.id) {
                    if self
                        .twin
                        .update_device(house_id, &device.id, state)
                        .await
                        .is_ok()
                    {
                        result.actions.push(format!("restored {}", device.id));
                    }
                }
            }
        }

        result.outcome("device_failures", !affected.is_empty());
        result.outcome("backup_activation", automatic);
        result.success = true;
        result
    }

    async fn run_temperature_extreme(&self, scenario: &Scenario, house_id: &str) -> ScenarioResult {
        let mut result = ScenarioResult::new(scenario.kind);
        let thermostats = self.twin.devices_of_class(house_id, "climate").await;
        if thermostats.is_empty() {
            return result.failed("no climate devices in house twin");
        }

        let external = scenario.params.get_f64("external_temp_c").unwrap_or(20.0);
        for thermostat in &thermostats {
            let patch = if external < 0.0 {
                Params::new()
                    .set("hvac_mode", "heat")
                    .set("temperature", 22.0)
                    .set("fan_speed", "high")
            } else if external > 35.0 {
                Params::new()
                    .set("hvac_mode", "cool")
                    .set("temperature", 20.0)
                    .set("fan_speed", "high")
            } else {
                continue;
            };
            if self
                .twin
                .update_device(house_id, &thermostat.id, &patch)
                .await
                .is_ok()
            {
                result
                    .actions
                    .push(format!("adjusted {} for {external:.0}C outside", thermostat.id));
            }
        }

        result.outcome("climate_activation", !result.actions.is_empty());
        result.success = true;
        result
    }

    async fn run_occupancy_change(&self, scenario: &Scenario, house_id: &str) -> ScenarioResult {
        let mut result = ScenarioResult::new(scenario.kind);
        let occupants = scenario.params.get_f64("occupant_count").unwrap_or(2.0);
        let pattern = scenario.params.get_str("pattern").unwrap_or("normal");
        let lights = self.twin.devices_of_class(house_id, "light").await;

        if pattern == "vacation" || occupants == 0.0 {
            let off = Params::new().set("power", false);
            for light in &lights {
                if self.twin.update_device(house_id, &light.id, &off).await.is_ok() {
                    result.actions.push(format!("turned off {}", light.id));
                }
            }
            let locked = Params::new().set("locked", true);
            for lock in self.twin.devices_of_class(house_id, "lock").await {
                if self.twin.update_device(house_id, &lock.id, &locked).await.is_ok() {
                    result.actions.push(format!("locked {}", lock.id));
                }
            }
            result.outcome("security_mode_change", true);
        } else if pattern == "party" || occupants > 4.0 {
            let bright = Params::new().set("power", true).set("brightness", 80.0);
            for light in &lights {
                if self.twin.update_device(house_id, &light.id, &bright).await.is_ok() {
                    result.actions.push(format!("activated {}", light.id));
                }
            }
        }

        result.outcome("lighting_adjustment", !result.actions.is_empty());
        result.success = true;
        result
    }

    async fn run_security_breach(&self, scenario: &Scenario, house_id: &str) -> ScenarioResult {
        let mut result = ScenarioResult::new(scenario.kind);
        let breach = scenario.params.get_str("breach_type").unwrap_or("motion");

        if breach == "door" {
            let locked = Params::new().set("locked", true);
            for lock in self.twin.devices_of_class(house_id, "lock").await {
                if self.twin.update_device(house_id, &lock.id, &locked).await.is_ok() {
                    result.actions.push(format!("emergency locked {}", lock.id));
                }
            }
        } else {
            let floodlight = Params::new().set("power", true).set("brightness", 100.0);
            for light in self.twin.devices_of_class(house_id, "light").await {
                if self
                    .twin
                    .update_device(house_id, &light.id, &floodlight)
                    .await
                    .is_ok()
                {
                    result.actions.push(format!("emergency lit {}", light.id));
                }
            }
        }

        let cameras = self.twin.devices_of_class(house_id, "camera").await;
        let record = Params::new().set("recording", true).set("alert_mode", true);
        for camera in &cameras {
            if self.twin.update_device(house_id, &camera.id, &record).await.is_ok() {
                result.actions.push(format!("recording on {}", camera.id));
            }
        }

        result.outcome("alarm_activation", true);
        result.outcome("recording_start", !cameras.is_empty());
        result.success = true;
        result
    }
}

#[async_trait]
impl LearnHook for TwinScenarioHook {
    async fn run_scenario(&self, scenario: &Scenario, house_id: &str) -> ScenarioResult {
        match scenario.kind {
            ScenarioKind::PowerOutage => self.run_power_outage(scenario, house_id).await,
            ScenarioKind::TemperatureExtreme => {
                self.run_temperature_extreme(scenario, house_id).await
            }
            ScenarioKind::OccupancyChange => self.run_occupancy_change(scenario, house_id).await,
            ScenarioKind::SecurityBreach => self.run_security_breach(scenario, house_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn demo_twin() -> (InMemoryTwin, String) {
        let twin = InMemoryTwin::new();
        let house = house_builder("house1")
            .thermostat("thermostat_room1", 21.0)
            .light("light_hall")
            .light("light_kitchen")
            .lock("lock_front")
            .camera("camera_porch")
            .install(&twin)
            .await;
        (twin, house)
    }

    #[tokio::test]
    async fn update_merges_partial_state() {
        let (twin, house) = demo_twin().await;
        let patch = Params::new().set("temperature", 24.0);
        twin.update_device(&house, "thermostat_room1", &patch)
            .await
            .expect("update");

        let device = twin.device(&house, "thermostat_room1").await.expect("device");
        assert_eq!(device.state.get_f64("temperature"), Some(24.0));
        // Untouched keys survive the merge
        assert_eq!(device.state.get_str("hvac_mode"), Some("off"));
    }

    #[tokio::test]
    async fn equal_patch_is_idempotent() {
        let (twin, house) = demo_twin().await;
        let patch = Params::new().set("brightness", 50.0).set("power", true);
        twin.update_device(&house, "light_hall", &patch).await.expect("first");
        let after_first = twin.device(&house, "light_hall").await.expect("device").state;
        twin.update_device(&house, "light_hall", &patch).await.expect("second");
        let after_second = twin.device(&house, "light_hall").await.expect("device").state;
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn unknown_device_is_an_error() {
        let (twin, house) = demo_twin().await;
        let err = twin
            .update_device(&house, "nonexistent", &Params::new())
            .await
            .expect_err("should fail");
        assert!(matches!(err, TwinError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn class_queries_filter_devices() {
        let (twin, house) = demo_twin().await;
        assert_eq!(twin.devices_of_class(&house, "light").await.len(), 2);
        assert_eq!(twin.devices_of_class(&house, "climate").await.len(), 1);
        assert!(twin.devices_of_class(&house, "meter").await.is_empty());
    }

    #[tokio::test]
    async fn security_breach_scenario_starts_recording() {
        let (twin, house) = demo_twin().await;
        let twin = Arc::new(twin);
        let hook = TwinScenarioHook::new(twin.clone());

        let scenario = Scenario {
            kind: ScenarioKind::SecurityBreach,
            description: "test breach".into(),
            params: Params::new().set("breach_type", "motion"),
        };
        let result = hook.run_scenario(&scenario, &house).await;

        assert!(result.success);
        let camera = twin.device(&house, "camera_porch").await.expect("camera");
        assert_eq!(camera.state.get_bool("recording"), Some(true));
    }
}
