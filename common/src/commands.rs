use std::str::FromStr;

use serde::Deserialize;

use crate::{
    error::CommandError,
    schedule::Schedule,
    topics::Topics,
    types::{OverrideMode, SensorId, ZoneId},
};

pub const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

/// Home Assistant climate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneMode {
    /// Enables the zone and returns it to automatic control.
    Heat,
    /// Forces the relay off through the override path.
    Off,
}

impl FromStr for ZoneMode {
    type Err = CommandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heat" => Ok(Self::Heat),
            "off" => Ok(Self::Off),
            other => Err(CommandError::UnknownZoneMode(other.to_string())),
        }
    }
}

/// Broker session settings. An absent or empty password keeps the stored one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrokerSettings {
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub base_topic: Option<String>,
}

fn default_broker_port() -> u16 {
    1883
}

/// Partial update of device-wide settings. Absent fields are left alone.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SystemSettings {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub max_runtime_ms: Option<u64>,
    #[serde(default)]
    pub min_cycle_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    SetOverride { zone: ZoneId, mode: OverrideMode },
    ResetThermalRunaway(ZoneId),
    ForceLocalFallback,
    DayRollover,
    SetTarget { zone: ZoneId, target_c: f32 },
    SetHysteresis { zone: ZoneId, hysteresis_c: f32 },
    SetZoneMode { zone: ZoneId, mode: ZoneMode },
    SetEnabled { zone: ZoneId, enabled: bool },
    SetCalibration { sensor: SensorId, offset_c: f32 },
    ReplaceSchedule(Schedule),
    ProvisionCredentials { ssid: String, password: String },
    ConfigureBroker(BrokerSettings),
    UpdateSystem(SystemSettings),
}

pub fn parse_temperature(value: &str) -> Result<f32, CommandError> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::InvalidTemperature(value.trim().to_string()))
}

pub fn parse_system_command(value: &str) -> Result<OperatorCommand, CommandError> {
    match value.trim() {
        "reset_runaway_floor" => Ok(OperatorCommand::ResetThermalRunaway(ZoneId::Floor)),
        "reset_runaway_air" => Ok(OperatorCommand::ResetThermalRunaway(ZoneId::Air)),
        "ap_mode" => Ok(OperatorCommand::ForceLocalFallback),
        "day_rollover" => Ok(OperatorCommand::DayRollover),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

pub fn parse_mqtt_command(
    topics: &Topics,
    topic: &str,
    payload: &[u8],
) -> Result<OperatorCommand, CommandError> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        return Err(CommandError::PayloadTooLarge(payload.len()));
    }
    let payload = std::str::from_utf8(payload).map_err(|_| CommandError::NonUtf8Payload)?;

    if topic == topics.command() {
        return parse_system_command(payload);
    }

    for zone in ZoneId::ALL {
        if topic == topics.zone_target_set(zone) {
            let target_c = parse_temperature(payload)?;
            return Ok(OperatorCommand::SetTarget { zone, target_c });
        }
        if topic == topics.zone_mode_set(zone) {
            let mode = payload.parse()?;
            return Ok(OperatorCommand::SetZoneMode { zone, mode });
        }
    }

    Err(CommandError::UnknownTopic(topic.to_string()))
}
