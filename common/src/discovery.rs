use serde_json::{json, Value};

use crate::{
    config::ZoneLimits,
    topics::{OutboundMessage, Topics, DISCOVERY_PREFIX, PAYLOAD_OFFLINE, PAYLOAD_ONLINE},
    types::{SensorId, ZoneId},
};

const DEVICE_MODEL: &str = "Dual-Zone Shop Thermostat";
const DEVICE_MANUFACTURER: &str = "DIY";

pub struct DiscoveryContext<'a> {
    pub topics: &'a Topics,
    pub device_id: &'a str,
    pub device_name: &'a str,
}

impl DiscoveryContext<'_> {
    fn device(&self) -> Value {
        json!({
            "identifiers": [format!("shop_thermostat_{}", self.device_id)],
            "name": self.device_name,
            "model": DEVICE_MODEL,
            "manufacturer": DEVICE_MANUFACTURER,
            "sw_version": env!("CARGO_PKG_VERSION"),
        })
    }

    fn unique_id(&self, object: &str) -> String {
        format!("shop_thermo_{object}_{}", self.device_id)
    }

    fn config_topic(component: &str, object: &str) -> String {
        format!("{DISCOVERY_PREFIX}/{component}/shop_thermostat_{object}/config")
    }

    fn message(component: &str, object: &str, payload: Value) -> OutboundMessage {
        OutboundMessage::new(
            Self::config_topic(component, object),
            payload.to_string(),
            true,
        )
    }

    fn climate(&self, zone: ZoneId) -> OutboundMessage {
        let limits = ZoneLimits::for_zone(zone);
        let name = match zone {
            ZoneId::Floor => "Shop Floor Heating",
            ZoneId::Air => "Shop Air Heating",
        };
        let payload = json!({
            "name": name,
            "unique_id": self.unique_id(zone.as_str()),
            "mode_cmd_t": self.topics.zone_mode_set(zone),
            "mode_stat_t": self.topics.zone_mode(zone),
            "temp_cmd_t": self.topics.zone_target_set(zone),
            "temp_stat_t": self.topics.zone_target(zone),
            "curr_temp_t": self.topics.zone_current(zone),
            "modes": ["off", "heat"],
            "min_temp": limits.min_target_c,
            "max_temp": limits.max_target_c,
            "temp_step": 0.5,
            "temperature_unit": "C",
            "device": self.device(),
            "availability_topic": self.topics.availability(),
            "payload_available": PAYLOAD_ONLINE,
            "payload_not_available": PAYLOAD_OFFLINE,
        });
        Self::message("climate", zone.as_str(), payload)
    }

    fn temperature_sensor(&self, object: &str, name: &str, state_topic: String) -> OutboundMessage {
        let payload = json!({
            "name": format!("Shop {name}"),
            "unique_id": self.unique_id(object),
            "state_topic": state_topic,
            "device_class": "temperature",
            "unit_of_measurement": "°C",
            "device": self.device(),
            "availability_topic": self.topics.availability(),
        });
        Self::message("sensor", object, payload)
    }

    fn relay(&self, zone: ZoneId) -> OutboundMessage {
        let object = format!("{}_relay", zone.as_str());
        let name = match zone {
            ZoneId::Floor => "Shop Floor Pump",
            ZoneId::Air => "Shop Electric Heater",
        };
        let payload = json!({
            "name": name,
            "unique_id": self.unique_id(&object),
            "state_topic": self.topics.zone_relay(zone),
            "device_class": "running",
            "payload_on": "ON",
            "payload_off": "OFF",
            "device": self.device(),
            "availability_topic": self.topics.availability(),
        });
        Self::message("binary_sensor", &object, payload)
    }
}

/// Full discovery set: one climate entity per zone, every temperature
/// sensor, the water delta and both relays. All retained.
pub fn discovery_messages(context: &DiscoveryContext<'_>) -> Vec<OutboundMessage> {
    let mut messages: Vec<OutboundMessage> =
        ZoneId::ALL.iter().map(|zone| context.climate(*zone)).collect();

    for sensor in SensorId::ALL {
        let object = match sensor {
            SensorId::WaterIn => "water_inlet",
            SensorId::WaterOut => "water_outlet",
            other => other.as_str(),
        };
        messages.push(context.temperature_sensor(
            object,
            &format!("{} Temperature", sensor.display_name()),
            context.topics.sensor_state(sensor),
        ));
    }
    messages.push(context.temperature_sensor(
        "water_delta",
        "Water Delta-T",
        context.topics.water_delta(),
    ));

    for zone in ZoneId::ALL {
        messages.push(context.relay(zone));
    }

    messages
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::DEFAULT_BASE_TOPIC;

    #[test]
    fn publishes_retained_discovery_for_every_entity() {
        let topics = Topics::new(DEFAULT_BASE_TOPIC);
        let context = DiscoveryContext {
            topics: &topics,
            device_id: "a1b2c3",
            device_name: "Shop Thermostat",
        };

        let messages = discovery_messages(&context);
        assert_eq!(messages.len(), 2 + SensorId::COUNT + 1 + 2);
        assert!(messages.iter().all(|message| message.retained));

        let climate = messages
            .iter()
            .find(|m| m.topic == "homeassistant/climate/shop_thermostat_floor/config")
            .unwrap();
        let payload: Value = serde_json::from_str(&climate.payload).unwrap();
        assert_eq!(payload["unique_id"], "shop_thermo_floor_a1b2c3");
        assert_eq!(
            payload["temp_cmd_t"],
            "homeassistant/climate/shop_thermostat/floor/target/set"
        );
        assert_eq!(payload["min_temp"], 2.0);
        assert_eq!(payload["max_temp"], 15.0);
        assert_eq!(
            payload["device"]["identifiers"][0],
            "shop_thermostat_a1b2c3"
        );

        let inlet = messages
            .iter()
            .find(|m| m.topic == "homeassistant/sensor/shop_thermostat_water_inlet/config")
            .unwrap();
        let payload: Value = serde_json::from_str(&inlet.payload).unwrap();
        assert_eq!(
            payload["state_topic"],
            "homeassistant/climate/shop_thermostat/water/inlet"
        );

        assert!(messages
            .iter()
            .any(|m| m.topic == "homeassistant/binary_sensor/shop_thermostat_air_relay/config"));
    }
}
