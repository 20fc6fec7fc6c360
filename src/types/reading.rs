//! Sensor reading types shared by the sense stage and everything downstream.
//!
//! A raw [`Reading`] arrives from a [`SensorSource`](crate::twin::SensorSource)
//! and carries whatever the device reported. The sense stage validates it,
//! scores its quality, and scales it into a [`NormalizedReading`] whose
//! `scaled` value is always in `[0, 1]`. Normalized readings are immutable
//! after construction; downstream stages only ever borrow or clone them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Sensor Kinds
// ============================================================================

/// Kinds of sensors the loop understands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Motion,
    Light,
    Pressure,
    Power,
    Door,
    Window,
    Co2,
    AirQuality,
    Noise,
    Vibration,
}

impl SensorKind {
    /// Binary sensors report presence/position rather than a magnitude.
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Motion | Self::Door | Self::Window)
    }

    /// Stable ordinal used as an ML feature component.
    pub fn ordinal(self) -> usize {
        match self {
            Self::Temperature => 0,
            Self::Humidity => 1,
            Self::Motion => 2,
            Self::Light => 3,
            Self::Pressure => 4,
            Self::Power => 5,
            Self::Door => 6,
            Self::Window => 7,
            Self::Co2 => 8,
            Self::AirQuality => 9,
            Self::Noise => 10,
            Self::Vibration => 11,
        }
    }

    /// Parse the lowercase wire name used by device integrations.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "temperature" => Some(Self::Temperature),
            "humidity" => Some(Self::Humidity),
            "motion" => Some(Self::Motion),
            "light" => Some(Self::Light),
            "pressure" => Some(Self::Pressure),
            "power" => Some(Self::Power),
            "door" => Some(Self::Door),
            "window" => Some(Self::Window),
            "co2" => Some(Self::Co2),
            "air_quality" => Some(Self::AirQuality),
            "noise" => Some(Self::Noise),
            "vibration" => Some(Self::Vibration),
            _ => None,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Motion => "motion",
            Self::Light => "light",
            Self::Pressure => "pressure",
            Self::Power => "power",
            Self::Door => "door",
            Self::Window => "window",
            Self::Co2 => "co2",
            Self::AirQuality => "air_quality",
            Self::Noise => "noise",
            Self::Vibration => "vibration",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Raw Values
// ============================================================================

/// A raw sensor value as reported by the device.
///
/// Binary sensors report flags, most others report numbers, and a few report
/// short state strings ("on", "open").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(_) => None,
        }
    }

    /// Truthiness used by binary normalizers: booleans directly, numbers
    /// greater than zero, and the usual affirmative strings.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Flag(b) => *b,
            Self::Number(n) => *n > 0.0,
            Self::Text(s) => matches!(
                s.to_ascii_lowercase().as_str(),
                "true" | "yes" | "1" | "on"
            ),
        }
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

// ============================================================================
// Readings
// ============================================================================

/// A raw, timestamped sensor reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// Stable sensor identifier, conventionally `{device}_{kind}`.
    pub sensor_id: String,
    pub kind: SensorKind,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub value: RawValue,
    /// Unit tag as reported ("C", "F", "W", "kW", "%", ...).
    pub unit: String,
}

/// Quality classification assigned during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    High,
    Medium,
    Low,
    Invalid,
}

impl DataQuality {
    /// Weight applied to the confidence score.
    pub fn weight(self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 0.8,
            Self::Low => 0.5,
            Self::Invalid => 0.0,
        }
    }
}

impl std::fmt::Display for DataQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

/// A validated, quality-scored, unit-scaled reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedReading {
    pub sensor_id: String,
    pub kind: SensorKind,
    pub timestamp: f64,
    /// Raw value as received.
    pub value: RawValue,
    /// Scaled value, always in `[0, 1]`.
    pub scaled: f64,
    pub unit: String,
    pub quality: DataQuality,
    /// Confidence in `[0, 1]`: quality weight x linear age decay.
    pub confidence: f64,
    /// Seconds between the reading's timestamp and its normalization.
    pub processing_latency: f64,
    /// Opaque metadata bag (device id, normalization method, ...).
    pub metadata: BTreeMap<String, serde_json::Value>,
}
