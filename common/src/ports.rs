use crate::types::{SensorId, ZoneId};

pub trait HardwarePort {
    /// Starts a temperature conversion on every sensor. Results are read at
    /// least one conversion time later with [`HardwarePort::read_raw`].
    fn request_conversion(&mut self);

    /// Raw reading in °C. Disconnected sensors report the bus sentinel or NaN.
    fn read_raw(&mut self, sensor: SensorId) -> f32;

    fn write_relay(&mut self, zone: ZoneId, on: bool);
}

pub trait LinkPort {
    fn start_association(&mut self, ssid: &str, password: &str);
    fn stop_association(&mut self);
    fn start_access_point(&mut self);
    fn stop_access_point(&mut self);
    fn is_link_up(&self) -> bool;
}
