use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    types::{OverrideMode, SensorId, ZoneId},
};

pub const MAX_SCHEDULES: usize = 7;
pub const DEFAULT_TIMEZONE: &str = "America/Winnipeg";
pub const DEFAULT_BASE_TOPIC: &str = "homeassistant/climate/shop_thermostat";
pub const MIN_HYSTERESIS_C: f32 = 0.2;
pub const MAX_HYSTERESIS_C: f32 = 5.0;
pub const MAX_CALIBRATION_C: f32 = 10.0;
/// Bounds for the operator-settable cycle timings.
pub const SHORTEST_MIN_CYCLE_MS: u64 = 60_000;
pub const LONGEST_MIN_CYCLE_MS: u64 = 3_600_000;
pub const SHORTEST_MAX_RUNTIME_MS: u64 = 600_000;
pub const LONGEST_MAX_RUNTIME_MS: u64 = 86_400_000;

/// Fixed per-zone limits; these are properties of the plant, not user settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneLimits {
    pub min_target_c: f32,
    pub max_target_c: f32,
    pub runaway_ceiling_c: f32,
    pub default_target_c: f32,
    pub default_hysteresis_c: f32,
}

impl ZoneLimits {
    pub fn for_zone(zone: ZoneId) -> Self {
        match zone {
            // Frost protection loop.
            ZoneId::Floor => Self {
                min_target_c: 2.0,
                max_target_c: 15.0,
                runaway_ceiling_c: 20.0,
                default_target_c: 5.0,
                default_hysteresis_c: 2.0,
            },
            ZoneId::Air => Self {
                min_target_c: 10.0,
                max_target_c: 25.0,
                runaway_ceiling_c: 30.0,
                default_target_c: 18.0,
                default_hysteresis_c: 1.0,
            },
        }
    }

    pub fn clamp_target(&self, target_c: f32) -> f32 {
        target_c.clamp(self.min_target_c, self.max_target_c)
    }

    pub fn contains_target(&self, target_c: f32) -> bool {
        target_c.is_finite() && (self.min_target_c..=self.max_target_c).contains(&target_c)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermostatConfig {
    pub control_interval_ms: u64,
    pub schedule_interval_ms: u64,
    pub sensor_read_interval_ms: u64,
    pub sensor_conversion_ms: u64,
    pub sensor_fault_grace_ms: u64,
    pub min_cycle_ms: u64,
    pub max_runtime_ms: u64,
    pub override_timeout_ms: u64,
    pub state_publish_interval_ms: u64,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            control_interval_ms: 10_000,
            schedule_interval_ms: 60_000,
            sensor_read_interval_ms: 30_000,
            sensor_conversion_ms: 800,
            sensor_fault_grace_ms: 300_000,
            min_cycle_ms: 300_000,
            max_runtime_ms: 14_400_000,
            override_timeout_ms: 7_200_000,
            state_publish_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    #[serde(rename = "target")]
    pub target_c: f32,
    #[serde(rename = "hysteresis")]
    pub hysteresis_c: f32,
    pub enabled: bool,
    // Overrides are runtime-only and always come back as Auto after a restart.
    #[serde(skip)]
    pub override_mode: OverrideMode,
    #[serde(skip)]
    pub override_since_ms: Option<u64>,
}

impl ZoneConfig {
    pub fn defaults_for(zone: ZoneId) -> Self {
        let limits = ZoneLimits::for_zone(zone);
        Self {
            target_c: limits.default_target_c,
            hysteresis_c: limits.default_hysteresis_c,
            enabled: true,
            override_mode: OverrideMode::Auto,
            override_since_ms: None,
        }
    }

    pub fn sanitize(&mut self, zone: ZoneId) {
        let limits = ZoneLimits::for_zone(zone);
        if !self.target_c.is_finite() {
            self.target_c = limits.default_target_c;
        }
        self.target_c = limits.clamp_target(self.target_c);

        if !self.hysteresis_c.is_finite() {
            self.hysteresis_c = limits.default_hysteresis_c;
        }
        self.hysteresis_c = self.hysteresis_c.clamp(MIN_HYSTERESIS_C, MAX_HYSTERESIS_C);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfigs {
    pub floor: ZoneConfig,
    pub air: ZoneConfig,
}

impl Default for ZoneConfigs {
    fn default() -> Self {
        Self {
            floor: ZoneConfig::defaults_for(ZoneId::Floor),
            air: ZoneConfig::defaults_for(ZoneId::Air),
        }
    }
}

impl ZoneConfigs {
    pub fn zone(&self, zone: ZoneId) -> &ZoneConfig {
        match zone {
            ZoneId::Floor => &self.floor,
            ZoneId::Air => &self.air,
        }
    }

    pub fn zone_mut(&mut self, zone: ZoneId) -> &mut ZoneConfig {
        match zone {
            ZoneId::Floor => &mut self.floor,
            ZoneId::Air => &mut self.air,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterConfig {
    pub enabled: bool,
    pub delta_t_warning_low_c: f32,
    pub delta_t_warning_high_c: f32,
    pub delta_t_critical_c: f32,
    pub smart_pump_control: bool,
}

impl Default for WaterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delta_t_warning_low_c: 1.0,
            delta_t_warning_high_c: 15.0,
            delta_t_critical_c: 0.5,
            smart_pump_control: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SensorConfig {
    /// Offset added to every valid reading, indexed by [`SensorId::index`].
    pub calibration_c: [f32; SensorId::COUNT],
}

impl SensorConfig {
    pub fn offset(&self, sensor: SensorId) -> f32 {
        self.calibration_c[sensor.index()]
    }

    pub fn sanitize(&mut self) {
        for offset in &mut self.calibration_c {
            *offset = if offset.is_finite() {
                offset.clamp(-MAX_CALIBRATION_C, MAX_CALIBRATION_C)
            } else {
                0.0
            };
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_enabled: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub base_topic: String,
    pub device_name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_enabled: false,
            mqtt_host: String::new(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            device_name: "Shop Thermostat".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn has_credentials(&self) -> bool {
        let ssid = self.wifi_ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }

    pub fn session_enabled(&self) -> bool {
        self.mqtt_enabled && !self.mqtt_host.trim().is_empty()
    }

    pub fn sanitize(&mut self) {
        if self.base_topic.trim().is_empty() {
            self.base_topic = DEFAULT_BASE_TOPIC.to_string();
        }
        self.base_topic = self.base_topic.trim_end_matches('/').to_string();
        if self.mqtt_port == 0 {
            self.mqtt_port = 1883;
        }
    }
}

pub fn validate_credentials(ssid: &str, password: &str) -> Result<(), ConfigError> {
    if ssid.is_empty() || ssid.len() > 32 || !ssid.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
        return Err(ConfigError::InvalidSsid);
    }
    if !password.is_empty() && !(8..=64).contains(&password.len()) {
        return Err(ConfigError::InvalidPassword);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    pub association_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub session_backoff_base_ms: u64,
    pub session_backoff_max_ms: u64,
    pub session_timeout_ms: u64,
    pub local_fallback_enabled: bool,
    pub fallback_timeout_ms: u64,
    pub stall_alarm_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            association_timeout_ms: 60_000,
            reconnect_interval_ms: 30_000,
            session_backoff_base_ms: 5_000,
            session_backoff_max_ms: 300_000,
            session_timeout_ms: 30_000,
            local_fallback_enabled: true,
            fallback_timeout_ms: 900_000,
            stall_alarm_ms: 600_000,
        }
    }
}

impl ConnectivityConfig {
    pub fn sanitize(&mut self) {
        self.session_backoff_base_ms = self.session_backoff_base_ms.max(1_000);
        self.session_backoff_max_ms = self
            .session_backoff_max_ms
            .max(self.session_backoff_base_ms);
        self.association_timeout_ms = self.association_timeout_ms.max(5_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub thermostat: ThermostatConfig,
    #[serde(default)]
    pub zones: ZoneConfigs,
    #[serde(default)]
    pub water: WaterConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thermostat: ThermostatConfig::default(),
            zones: ZoneConfigs::default(),
            water: WaterConfig::default(),
            sensors: SensorConfig::default(),
            network: NetworkConfig::default(),
            connectivity: ConnectivityConfig::default(),
            timezone: default_timezone(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        for zone in ZoneId::ALL {
            self.zones.zone_mut(zone).sanitize(zone);
        }
        self.sensors.sanitize();
        self.network.sanitize();
        self.connectivity.sanitize();
        if self.water.delta_t_warning_low_c > self.water.delta_t_warning_high_c {
            self.water = WaterConfig {
                smart_pump_control: self.water.smart_pump_control,
                ..WaterConfig::default()
            };
        }
    }
}
