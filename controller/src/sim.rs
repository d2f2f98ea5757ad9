use shop_thermostat_common::{
    sensor::TEMP_DISCONNECTED_C, HardwarePort, LinkPort, SensorId, ZoneId,
};
use tracing::{debug, info};

const OUTDOOR_C: f32 = -10.0;
const BOILER_SUPPLY_C: f32 = 35.0;

// Time constants in seconds.
const SLAB_LOSS_TAU_S: f32 = 40_000.0;
const SLAB_GAIN_TAU_S: f32 = 6_000.0;
const AIR_LOSS_TAU_S: f32 = 3_000.0;
const HEATER_RATE_C_PER_S: f32 = 0.01;
const LOOP_TAU_S: f32 = 120.0;

fn approach(current: f32, target: f32, dt_s: f32, tau_s: f32) -> f32 {
    current + (target - current) * (dt_s / tau_s).min(1.0)
}

#[derive(Debug, Clone)]
pub struct SimulatedPlant {
    temps: [f32; SensorId::COUNT],
    latched: [f32; SensorId::COUNT],
    disconnected: [bool; SensorId::COUNT],
    relays: [bool; 2],
}

impl Default for SimulatedPlant {
    fn default() -> Self {
        let mut temps = [0.0; SensorId::COUNT];
        temps[SensorId::Floor.index()] = 4.0;
        temps[SensorId::Air.index()] = 12.0;
        temps[SensorId::Outdoor.index()] = OUTDOOR_C;
        temps[SensorId::WaterIn.index()] = 4.0;
        temps[SensorId::WaterOut.index()] = 4.0;
        Self {
            temps,
            latched: [TEMP_DISCONNECTED_C; SensorId::COUNT],
            disconnected: [false; SensorId::COUNT],
            relays: [false; 2],
        }
    }
}

impl SimulatedPlant {
    pub fn set_disconnected(&mut self, sensor: SensorId, disconnected: bool) {
        self.disconnected[sensor.index()] = disconnected;
    }

    pub fn advance(&mut self, elapsed_ms: u64) {
        if elapsed_ms == 0 {
            return;
        }
        let dt_s = elapsed_ms as f32 / 1000.0;
        let outdoor = self.temps[SensorId::Outdoor.index()];
        let mut floor = self.temps[SensorId::Floor.index()];
        let mut air = self.temps[SensorId::Air.index()];
        let mut supply = self.temps[SensorId::WaterOut.index()];
        let mut ret = self.temps[SensorId::WaterIn.index()];

        if self.relays[ZoneId::Floor.index()] {
            supply = approach(supply, BOILER_SUPPLY_C, dt_s, LOOP_TAU_S);
            // The slab pulls roughly half of the supply/slab difference out of the loop.
            ret = approach(ret, floor + (supply - floor) * 0.5, dt_s, LOOP_TAU_S);
            floor = approach(floor, supply, dt_s, SLAB_GAIN_TAU_S);
        } else {
            supply = approach(supply, floor, dt_s, LOOP_TAU_S * 10.0);
            ret = approach(ret, floor, dt_s, LOOP_TAU_S * 10.0);
        }
        floor = approach(floor, outdoor, dt_s, SLAB_LOSS_TAU_S);

        if self.relays[ZoneId::Air.index()] {
            air += HEATER_RATE_C_PER_S * dt_s;
        }
        air = approach(air, outdoor.max(floor), dt_s, AIR_LOSS_TAU_S);

        self.temps[SensorId::Floor.index()] = floor;
        self.temps[SensorId::Air.index()] = air;
        self.temps[SensorId::WaterOut.index()] = supply;
        self.temps[SensorId::WaterIn.index()] = ret;
    }
}

#[cfg(test)]
impl SimulatedPlant {
    pub fn temperature(&self, sensor: SensorId) -> f32 {
        self.temps[sensor.index()]
    }

    pub fn relay(&self, zone: ZoneId) -> bool {
        self.relays[zone.index()]
    }
}

impl HardwarePort for SimulatedPlant {
    fn request_conversion(&mut self) {
        for sensor in SensorId::ALL {
            let index = sensor.index();
            self.latched[index] = if self.disconnected[index] {
                TEMP_DISCONNECTED_C
            } else {
                // 1/16 °C resolution.
                (self.temps[index] * 16.0).round() / 16.0
            };
        }
    }

    fn read_raw(&mut self, sensor: SensorId) -> f32 {
        self.latched[sensor.index()]
    }

    fn write_relay(&mut self, zone: ZoneId, on: bool) {
        let relay = &mut self.relays[zone.index()];
        if *relay != on {
            debug!("{} relay {}", zone.as_str(), if on { "ON" } else { "OFF" });
        }
        *relay = on;
    }
}

/// Host network stand-in. The machine is already online, so association
/// succeeds immediately for any non-empty SSID.
#[derive(Debug, Default)]
pub struct HostLink {
    station: Option<String>,
    access_point: bool,
}

#[cfg(test)]
impl HostLink {
    pub fn access_point_active(&self) -> bool {
        self.access_point
    }
}

impl LinkPort for HostLink {
    fn start_association(&mut self, ssid: &str, _password: &str) {
        info!("associating with `{ssid}`");
        self.station = (!ssid.trim().is_empty()).then(|| ssid.to_string());
    }

    fn stop_association(&mut self) {
        if let Some(ssid) = self.station.take() {
            info!("left `{ssid}`");
        }
    }

    fn start_access_point(&mut self) {
        info!("local access point up");
        self.access_point = true;
    }

    fn stop_access_point(&mut self) {
        if self.access_point {
            info!("local access point down");
        }
        self.access_point = false;
    }

    fn is_link_up(&self) -> bool {
        self.station.is_some()
    }
}
