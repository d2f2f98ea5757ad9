use crate::{
    sensor::TEMP_DISCONNECTED_C,
    types::{DeviceStatus, OverrideMode, SensorId, ZoneId},
};

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";
pub const DISCOVERY_PREFIX: &str = "homeassistant";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn topic(&self, subtopic: &str) -> String {
        format!("{}/{}", self.base, subtopic)
    }

    /// Availability topic; also the last-will topic.
    pub fn availability(&self) -> String {
        self.topic("status")
    }

    pub fn zone_current(&self, zone: ZoneId) -> String {
        self.topic(&format!("{}/current", zone.as_str()))
    }

    pub fn zone_target(&self, zone: ZoneId) -> String {
        self.topic(&format!("{}/target", zone.as_str()))
    }

    pub fn zone_mode(&self, zone: ZoneId) -> String {
        self.topic(&format!("{}/mode", zone.as_str()))
    }

    pub fn zone_relay(&self, zone: ZoneId) -> String {
        self.topic(&format!("{}/relay", zone.as_str()))
    }

    pub fn zone_target_set(&self, zone: ZoneId) -> String {
        self.topic(&format!("{}/target/set", zone.as_str()))
    }

    pub fn zone_mode_set(&self, zone: ZoneId) -> String {
        self.topic(&format!("{}/mode/set", zone.as_str()))
    }

    pub fn sensor_state(&self, sensor: SensorId) -> String {
        match sensor {
            SensorId::Floor => self.zone_current(ZoneId::Floor),
            SensorId::Air => self.zone_current(ZoneId::Air),
            SensorId::Outdoor => self.topic("outdoor/current"),
            SensorId::WaterIn => self.topic("water/inlet"),
            SensorId::WaterOut => self.topic("water/outlet"),
        }
    }

    pub fn water_delta(&self) -> String {
        self.topic("water/delta")
    }

    pub fn water_flow_status(&self) -> String {
        self.topic("water/flow_status")
    }

    pub fn command(&self) -> String {
        self.topic("command")
    }

    pub fn command_topics(&self) -> Vec<String> {
        let mut topics = Vec::with_capacity(5);
        for zone in ZoneId::ALL {
            topics.push(self.zone_target_set(zone));
            topics.push(self.zone_mode_set(zone));
        }
        topics.push(self.command());
        topics
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

impl OutboundMessage {
    pub fn new(topic: String, payload: impl Into<String>, retained: bool) -> Self {
        Self {
            topic,
            payload: payload.into(),
            retained,
        }
    }
}

/// Mode reported to Home Assistant: `off` when disabled or forced off.
pub fn zone_mode_payload(enabled: bool, override_mode: OverrideMode) -> &'static str {
    if enabled && override_mode != OverrideMode::ForceOff {
        "heat"
    } else {
        "off"
    }
}

/// Periodic state publication. Invalid sensors are skipped rather than
/// published as sentinel values.
pub fn state_messages(topics: &Topics, status: &DeviceStatus) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();

    for sensor in &status.sensors {
        if let Some(value) = sensor.value.filter(|v| sensor.valid && *v != TEMP_DISCONNECTED_C) {
            messages.push(OutboundMessage::new(
                topics.sensor_state(sensor.sensor),
                format!("{value:.1}"),
                false,
            ));
        }
    }

    if let (Some(delta), Some(flow)) = (status.water_delta, status.flow_status) {
        messages.push(OutboundMessage::new(
            topics.water_delta(),
            format!("{delta:.1}"),
            false,
        ));
        messages.push(OutboundMessage::new(
            topics.water_flow_status(),
            flow.as_str(),
            false,
        ));
    }

    for zone in &status.zones {
        messages.push(OutboundMessage::new(
            topics.zone_target(zone.zone),
            format!("{:.1}", zone.target_temp),
            true,
        ));
        messages.push(OutboundMessage::new(
            topics.zone_mode(zone.zone),
            zone_mode_payload(zone.enabled, zone.override_mode),
            true,
        ));
        messages.push(OutboundMessage::new(
            topics.zone_relay(zone.zone),
            if zone.relay_on { "ON" } else { "OFF" },
            false,
        ));
    }

    messages
}
