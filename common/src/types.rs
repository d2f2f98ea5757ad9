use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{connectivity::ConnectionState, error::CommandError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneId {
    Floor,
    Air,
}

impl ZoneId {
    pub const ALL: [ZoneId; 2] = [ZoneId::Floor, ZoneId::Air];

    pub fn index(self) -> usize {
        match self {
            Self::Floor => 0,
            Self::Air => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Floor => "floor",
            Self::Air => "air",
        }
    }

    pub fn sensor(self) -> SensorId {
        match self {
            Self::Floor => SensorId::Floor,
            Self::Air => SensorId::Air,
        }
    }
}

impl FromStr for ZoneId {
    type Err = CommandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "floor" => Ok(Self::Floor),
            "air" => Ok(Self::Air),
            other => Err(CommandError::UnknownZone(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorId {
    Floor,
    Air,
    Outdoor,
    WaterIn,
    WaterOut,
}

impl SensorId {
    pub const COUNT: usize = 5;
    pub const ALL: [SensorId; Self::COUNT] = [
        SensorId::Floor,
        SensorId::Air,
        SensorId::Outdoor,
        SensorId::WaterIn,
        SensorId::WaterOut,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Floor => 0,
            Self::Air => 1,
            Self::Outdoor => 2,
            Self::WaterIn => 3,
            Self::WaterOut => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Floor => "floor",
            Self::Air => "air",
            Self::Outdoor => "outdoor",
            Self::WaterIn => "water_in",
            Self::WaterOut => "water_out",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Floor => "Floor",
            Self::Air => "Air",
            Self::Outdoor => "Outdoor",
            Self::WaterIn => "Water In",
            Self::WaterOut => "Water Out",
        }
    }
}

impl FromStr for SensorId {
    type Err = CommandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|sensor| sensor.as_str() == value)
            .ok_or(CommandError::UnknownSensor(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideMode {
    #[default]
    Auto,
    ForceOn,
    ForceOff,
}

impl OverrideMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::ForceOn => "FORCE_ON",
            Self::ForceOff => "FORCE_OFF",
        }
    }
}

impl FromStr for OverrideMode {
    type Err = CommandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "on" | "force_on" => Ok(Self::ForceOn),
            "off" | "force_off" => Ok(Self::ForceOff),
            other => Err(CommandError::UnknownOverrideMode(other.to_string())),
        }
    }
}

/// Water-loop health derived from the supply/return delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowStatus {
    Ok,
    Warning,
    Critical,
    Error,
}

impl FlowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneStatus {
    pub zone: ZoneId,
    pub status: &'static str,
    pub current_temp: Option<f32>,
    pub target_temp: f32,
    pub effective_target: f32,
    pub schedule_target: Option<f32>,
    pub hysteresis: f32,
    pub enabled: bool,
    pub override_mode: OverrideMode,
    pub override_remaining_ms: Option<u64>,
    pub relay_on: bool,
    pub thermal_runaway: bool,
    pub sensor_fault: bool,
    pub max_runtime_exceeded: bool,
    pub runtime_today_ms: u64,
    pub session_runtime_ms: u64,
    pub cycle_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStatus {
    pub sensor: SensorId,
    pub value: Option<f32>,
    pub valid: bool,
    pub faulted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub zones: Vec<ZoneStatus>,
    pub sensors: Vec<SensorStatus>,
    pub water_delta: Option<f32>,
    pub flow_status: Option<FlowStatus>,
    /// A zone sensor is latched faulted.
    pub critical_sensor_fault: bool,
    pub time_valid: bool,
    pub schedule_active: bool,
    pub active_rule: Option<usize>,
    pub schedule_info: Option<String>,
    pub connectivity: ConnectionState,
    pub last_error: Option<String>,
    pub uptime_ms: u64,
}

impl DeviceStatus {
    pub fn zone(&self, zone: ZoneId) -> Option<&ZoneStatus> {
        self.zones.iter().find(|status| status.zone == zone)
    }

    pub fn sensor(&self, sensor: SensorId) -> Option<&SensorStatus> {
        self.sensors.iter().find(|status| status.sensor == sensor)
    }
}
