//! Per-kind normalization strategies.
//!
//! Each strategy scales a validated raw value into `[0, 1]`. Unit conversion
//! happens here (F/K to Celsius, kW/mW to watts) so everything downstream
//! sees one scale per kind.

use crate::config::SenseConfig;
use crate::types::{RawValue, SensorKind};

// ============================================================================
// Strategies
// ============================================================================

/// Min-max temperature scaling with unit conversion to Celsius.
#[derive(Debug, Clone)]
pub struct TemperatureNormalizer {
    min_c: f64,
    max_c: f64,
}

impl TemperatureNormalizer {
    pub fn new(min_c: f64, max_c: f64) -> Self {
        Self { min_c, max_c }
    }

    /// Convert a raw reading to Celsius based on its unit tag.
    pub fn to_celsius(value: f64, unit: &str) -> f64 {
        match unit {
            "F" | "f" | "°F" => (value - 32.0) * 5.0 / 9.0,
            "K" | "k" => value - 273.15,
            _ => value,
        }
    }

    pub fn normalize(&self, value: f64, unit: &str) -> f64 {
        let celsius = Self::to_celsius(value, unit).clamp(self.min_c, self.max_c);
        (celsius - self.min_c) / (self.max_c - self.min_c)
    }
}

/// Humidity: clamp to `[0, 100]` percent and divide by 100.
#[derive(Debug, Clone, Copy)]
pub struct HumidityNormalizer;

impl HumidityNormalizer {
    pub fn normalize(&self, value: f64) -> f64 {
        value.clamp(0.0, 100.0) / 100.0
    }
}

/// Binary sensors (motion, door, window): truthy -> 1.0, else 0.0.
#[derive(Debug, Clone, Copy)]
pub struct BinaryNormalizer;

impl BinaryNormalizer {
    pub fn normalize(&self, value: &RawValue) -> f64 {
        if value.is_truthy() {
            1.0
        } else {
            0.0
        }
    }
}

/// Log-scaled power: `log10(w + 1) / log10(max + 1)`, clamped to `[0, 1]`.
///
/// Log scaling keeps the low-wattage region (where most devices live)
/// well-resolved while still ranking a space heater above a phone charger.
#[derive(Debug, Clone, Copy)]
pub struct LogPowerNormalizer {
    max_watts: f64,
}

impl LogPowerNormalizer {
    pub fn new(max_watts: f64) -> Self {
        Self { max_watts }
    }

    /// Convert to watts based on the unit tag.
    pub fn to_watts(value: f64, unit: &str) -> f64 {
        match unit {
            "kW" | "kw" => value * 1_000.0,
            "mW" | "mw" => value / 1_000.0,
            _ => value,
        }
    }

    pub fn normalize(&self, value: f64, unit: &str) -> f64 {
        let watts = Self::to_watts(value, unit);
        if watts <= 0.0 {
            return 0.0;
        }
        let scaled = (watts + 1.0).log10() / (self.max_watts + 1.0).log10();
        scaled.clamp(0.0, 1.0)
    }
}

/// Plain min-max scaling over a fixed kind-specific range.
#[derive(Debug, Clone, Copy)]
pub struct LinearRangeNormalizer {
    min: f64,
    max: f64,
}

impl LinearRangeNormalizer {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn normalize(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min, self.max);
        (clamped - self.min) / (self.max - self.min)
    }
}

// ============================================================================
// Strategy Set
// ============================================================================

/// The full set of per-kind strategies, built from config once at startup.
#[derive(Debug, Clone)]
pub struct Normalizers {
    temperature: TemperatureNormalizer,
    humidity: HumidityNormalizer,
    binary: BinaryNormalizer,
    power: LogPowerNormalizer,
    light: LogPowerNormalizer,
    co2: LinearRangeNormalizer,
    air_quality: LinearRangeNormalizer,
    noise: LinearRangeNormalizer,
    pressure: LinearRangeNormalizer,
    vibration: LinearRangeNormalizer,
}

impl Normalizers {
    pub fn new(config: &SenseConfig) -> Self {
        Self {
            temperature: TemperatureNormalizer::new(config.temp_range_c.0, config.temp_range_c.1),
            humidity: HumidityNormalizer,
            binary: BinaryNormalizer,
            power: LogPowerNormalizer::new(config.max_power_w),
            light: LogPowerNormalizer::new(config.max_light_w),
            co2: LinearRangeNormalizer::new(config.co2_range_ppm.0, config.co2_range_ppm.1),
            air_quality: LinearRangeNormalizer::new(
                config.air_quality_range.0,
                config.air_quality_range.1,
            ),
            noise: LinearRangeNormalizer::new(config.noise_range_db.0, config.noise_range_db.1),
            pressure: LinearRangeNormalizer::new(
                config.pressure_range_hpa.0,
                config.pressure_range_hpa.1,
            ),
            vibration: LinearRangeNormalizer::new(0.0, 10.0),
        }
    }

    /// Scale a validated raw value into `[0, 1]`. Returns `None` for values
    /// that have no numeric interpretation for a non-binary kind.
    pub fn scale(&self, kind: SensorKind, value: &RawValue, unit: &str) -> Option<f64> {
        if kind.is_binary() {
            return Some(self.binary.normalize(value));
        }
        let numeric = value.as_f64()?;
        let scaled = match kind {
            SensorKind::Temperature => self.temperature.normalize(numeric, unit),
            SensorKind::Humidity => self.humidity.normalize(numeric),
            SensorKind::Power => self.power.normalize(numeric, unit),
            SensorKind::Light => self.light.normalize(numeric, unit),
            SensorKind::Co2 => self.co2.normalize(numeric),
            SensorKind::AirQuality => self.air_quality.normalize(numeric),
            SensorKind::Noise => self.noise.normalize(numeric),
            SensorKind::Pressure => self.pressure.normalize(numeric),
            SensorKind::Vibration => self.vibration.normalize(numeric),
            SensorKind::Motion | SensorKind::Door | SensorKind::Window => unreachable!(),
        };
        Some(scaled)
    }

    /// Human-readable method tag recorded in reading metadata.
    pub fn method(&self, kind: SensorKind) -> &'static str {
        match kind {
            SensorKind::Temperature => "min-max-scaling",
            SensorKind::Humidity => "percentage",
            SensorKind::Motion | SensorKind::Door | SensorKind::Window => "binary",
            SensorKind::Power | SensorKind::Light => "log-scaling",
            _ => "min-max",
        }
    }
}

/// Structural range validation, applied before normalization. Values outside
/// physically plausible bounds are rejected outright.
pub fn value_in_valid_range(kind: SensorKind, value: &RawValue) -> bool {
    if kind.is_binary() {
        // Flags, numbers and state strings are all acceptable for binaries.
        return true;
    }
    let Some(v) = value.as_f64() else {
        return false;
    };
    match kind {
        SensorKind::Temperature => (-50.0..=150.0).contains(&v),
        SensorKind::Humidity => (0.0..=100.0).contains(&v),
        SensorKind::Power | SensorKind::Light => v >= 0.0,
        SensorKind::Co2 => (0.0..=10_000.0).contains(&v),
        _ => v.is_finite(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizers() -> Normalizers {
        Normalizers::new(&SenseConfig::default())
    }

    #[test]
    fn fahrenheit_converts_before_scaling() {
        // 32F = 0C; range [-10, 40] puts 0C at 0.2
        let scaled = normalizers()
            .scale(SensorKind::Temperature, &RawValue::Number(32.0), "F")
            .expect("scaled");
        assert!((scaled - 0.2).abs() < 1e-9);
    }

    #[test]
    fn kelvin_converts_before_scaling() {
        let scaled = normalizers()
            .scale(SensorKind::Temperature, &RawValue::Number(293.15), "K")
            .expect("scaled");
        // 20C over [-10, 40] -> 0.6
        assert!((scaled - 0.6).abs() < 1e-9);
    }

    #[test]
    fn temperature_clamps_to_configured_range() {
        let n = normalizers();
        let hot = n
            .scale(SensorKind::Temperature, &RawValue::Number(90.0), "C")
            .expect("scaled");
        let cold = n
            .scale(SensorKind::Temperature, &RawValue::Number(-30.0), "C")
            .expect("scaled");
        assert_eq!(hot, 1.0);
        assert_eq!(cold, 0.0);
    }

    #[test]
    fn normalization_is_idempotent_for_in_range_values() {
        // Normalizing an already scaled value of an identity-range normalizer
        // must agree with applying the scaling twice.
        let n = LinearRangeNormalizer::new(0.0, 1.0);
        let v = 0.73;
        let once = n.normalize(v);
        let twice = n.normalize(once);
        assert!((once - twice).abs() < 1e-9);
    }

    #[test]
    fn humidity_divides_by_hundred() {
        let scaled = normalizers()
            .scale(SensorKind::Humidity, &RawValue::Number(55.0), "%")
            .expect("scaled");
        assert!((scaled - 0.55).abs() < 1e-9);
    }

    #[test]
    fn binary_kinds_map_truthiness() {
        let n = normalizers();
        assert_eq!(
            n.scale(SensorKind::Motion, &RawValue::Flag(true), ""),
            Some(1.0)
        );
        assert_eq!(
            n.scale(SensorKind::Door, &RawValue::Text("open".into()), ""),
            Some(0.0)
        );
        assert_eq!(
            n.scale(SensorKind::Window, &RawValue::Number(3.0), ""),
            Some(1.0)
        );
    }

    #[test]
    fn power_log_scales_and_converts_units() {
        let n = normalizers();
        let kw = n
            .scale(SensorKind::Power, &RawValue::Number(1.0), "kW")
            .expect("scaled");
        let w = n
            .scale(SensorKind::Power, &RawValue::Number(1_000.0), "W")
            .expect("scaled");
        assert!((kw - w).abs() < 1e-12);
        assert!(kw > 0.0 && kw < 1.0);

        // At the ceiling the scale saturates
        let max = n
            .scale(SensorKind::Power, &RawValue::Number(10_000.0), "W")
            .expect("scaled");
        assert!((max - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_power_scales_to_zero() {
        let scaled = normalizers()
            .scale(SensorKind::Power, &RawValue::Number(0.0), "W")
            .expect("scaled");
        assert_eq!(scaled, 0.0);
    }

    #[test]
    fn range_validation_rejects_implausible_values() {
        assert!(!value_in_valid_range(
            SensorKind::Temperature,
            &RawValue::Number(200.0)
        ));
        assert!(!value_in_valid_range(
            SensorKind::Humidity,
            &RawValue::Number(120.0)
        ));
        assert!(!value_in_valid_range(
            SensorKind::Co2,
            &RawValue::Number(20_000.0)
        ));
        assert!(!value_in_valid_range(
            SensorKind::Power,
            &RawValue::Number(-5.0)
        ));
        assert!(value_in_valid_range(
            SensorKind::Temperature,
            &RawValue::Number(21.5)
        ));
    }
}
