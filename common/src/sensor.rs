use tracing::{info, warn};

use crate::{
    config::{SensorConfig, WaterConfig},
    types::{FlowStatus, SensorId},
};

pub const TEMP_MIN_VALID_C: f32 = -55.0;
pub const TEMP_MAX_VALID_C: f32 = 125.0;
/// Value reported by a DS18B20 that dropped off the bus.
pub const TEMP_DISCONNECTED_C: f32 = -127.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub sensor: SensorId,
    pub raw_c: f32,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classified {
    pub valid: bool,
    /// Calibrated value; only meaningful when `valid`.
    pub value_c: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorFaultState {
    pub valid: bool,
    pub fault_latched: bool,
    pub fault_onset_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Readings {
    values_c: [f32; SensorId::COUNT],
    valid: [bool; SensorId::COUNT],
    pub timestamp_ms: Option<u64>,
    pub water_delta_c: f32,
}

impl Default for Readings {
    fn default() -> Self {
        Self {
            values_c: [0.0; SensorId::COUNT],
            valid: [false; SensorId::COUNT],
            timestamp_ms: None,
            water_delta_c: 0.0,
        }
    }
}

impl Readings {
    /// Last good value for the sensor. Kept across invalid samples.
    pub fn value(&self, sensor: SensorId) -> f32 {
        self.values_c[sensor.index()]
    }

    pub fn is_valid(&self, sensor: SensorId) -> bool {
        self.valid[sensor.index()]
    }

    pub fn valid_value(&self, sensor: SensorId) -> Option<f32> {
        self.is_valid(sensor).then(|| self.value(sensor))
    }

    pub fn water_loop_valid(&self) -> bool {
        self.is_valid(SensorId::WaterIn) && self.is_valid(SensorId::WaterOut)
    }
}

pub fn is_plausible(raw_c: f32) -> bool {
    raw_c > TEMP_MIN_VALID_C && raw_c < TEMP_MAX_VALID_C && raw_c != TEMP_DISCONNECTED_C
}

#[derive(Debug, Clone)]
pub struct SensorFaultMonitor {
    grace_ms: u64,
    calibration: SensorConfig,
    states: [SensorFaultState; SensorId::COUNT],
    readings: Readings,
}

impl SensorFaultMonitor {
    pub fn new(grace_ms: u64, calibration: SensorConfig) -> Self {
        Self {
            grace_ms,
            calibration,
            states: [SensorFaultState::default(); SensorId::COUNT],
            readings: Readings::default(),
        }
    }

    pub fn set_calibration(&mut self, calibration: SensorConfig) {
        self.calibration = calibration;
    }

    pub fn classify(&self, sample: &SensorSample) -> Classified {
        if is_plausible(sample.raw_c) {
            Classified {
                valid: true,
                value_c: sample.raw_c + self.calibration.offset(sample.sensor),
            }
        } else {
            Classified {
                valid: false,
                value_c: sample.raw_c,
            }
        }
    }

    pub fn update(&mut self, sensor: SensorId, valid: bool, now_ms: u64) {
        let grace_ms = self.grace_ms;
        let state = &mut self.states[sensor.index()];
        state.valid = valid;

        if valid {
            if state.fault_latched {
                info!("sensor {} recovered", sensor.as_str());
            }
            state.fault_onset_ms = None;
            state.fault_latched = false;
            return;
        }

        match state.fault_onset_ms {
            None => state.fault_onset_ms = Some(now_ms),
            Some(onset) => {
                if !state.fault_latched && now_ms.saturating_sub(onset) > grace_ms {
                    warn!(
                        "sensor {} faulted after {} ms of invalid readings",
                        sensor.as_str(),
                        now_ms.saturating_sub(onset)
                    );
                    state.fault_latched = true;
                }
            }
        }
    }

    pub fn ingest(&mut self, sample: &SensorSample) -> Classified {
        let classified = self.classify(sample);
        self.update(sample.sensor, classified.valid, sample.timestamp_ms);

        let index = sample.sensor.index();
        self.readings.valid[index] = classified.valid;
        if classified.valid {
            self.readings.values_c[index] = classified.value_c;
        }
        classified
    }

    pub fn ingest_cycle(&mut self, samples: &[SensorSample], now_ms: u64) {
        for sample in samples {
            self.ingest(sample);
        }
        self.readings.timestamp_ms = Some(now_ms);
        self.readings.water_delta_c = if self.readings.water_loop_valid() {
            self.readings.value(SensorId::WaterOut) - self.readings.value(SensorId::WaterIn)
        } else {
            0.0
        };
    }

    pub fn is_faulted(&self, sensor: SensorId) -> bool {
        self.states[sensor.index()].fault_latched
    }

    pub fn state(&self, sensor: SensorId) -> SensorFaultState {
        self.states[sensor.index()]
    }

    pub fn readings(&self) -> &Readings {
        &self.readings
    }

    pub fn has_readings(&self) -> bool {
        self.readings.timestamp_ms.is_some()
    }

    pub fn has_critical_fault(&self) -> bool {
        self.is_faulted(SensorId::Floor) || self.is_faulted(SensorId::Air)
    }

    pub fn flow_status(&self, water: &WaterConfig) -> FlowStatus {
        if !self.readings.water_loop_valid() {
            return FlowStatus::Error;
        }

        let delta = self.readings.water_delta_c;
        if delta < -0.5 {
            // Supply colder than return: reversed flow or swapped sensors.
            FlowStatus::Error
        } else if delta < water.delta_t_critical_c {
            FlowStatus::Critical
        } else if delta < water.delta_t_warning_low_c {
            FlowStatus::Warning
        } else if delta > water.delta_t_warning_high_c {
            FlowStatus::Error
        } else {
            FlowStatus::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const GRACE_MS: u64 = 300_000;

    fn monitor() -> SensorFaultMonitor {
        SensorFaultMonitor::new(GRACE_MS, SensorConfig::default())
    }

    fn sample(sensor: SensorId, raw_c: f32, timestamp_ms: u64) -> SensorSample {
        SensorSample {
            sensor,
            raw_c,
            timestamp_ms,
        }
    }

    #[test]
    fn classification_bounds_are_exclusive() {
        assert!(is_plausible(20.0));
        assert!(is_plausible(-54.9));
        assert!(!is_plausible(-55.0));
        assert!(!is_plausible(125.0));
        assert!(!is_plausible(TEMP_DISCONNECTED_C));
        assert!(!is_plausible(f32::NAN));
        assert!(!is_plausible(f32::INFINITY));
    }

    #[test]
    fn calibration_applies_to_valid_samples_only() {
        let mut calibration = SensorConfig::default();
        calibration.calibration_c[SensorId::Air.index()] = -0.5;
        let monitor = SensorFaultMonitor::new(GRACE_MS, calibration);

        let valid = monitor.classify(&sample(SensorId::Air, 20.0, 0));
        assert!(valid.valid);
        assert_eq!(valid.value_c, 19.5);

        let invalid = monitor.classify(&sample(SensorId::Air, TEMP_DISCONNECTED_C, 0));
        assert!(!invalid.valid);
    }

    #[test]
    fn fault_latches_only_after_grace_window() {
        let mut monitor = monitor();

        monitor.update(SensorId::Floor, false, 1_000);
        assert_eq!(monitor.state(SensorId::Floor).fault_onset_ms, Some(1_000));
        assert!(!monitor.is_faulted(SensorId::Floor));

        monitor.update(SensorId::Floor, false, 1_000 + GRACE_MS);
        assert!(!monitor.is_faulted(SensorId::Floor));

        monitor.update(SensorId::Floor, false, 1_001 + GRACE_MS);
        assert!(monitor.is_faulted(SensorId::Floor));
        assert!(monitor.has_critical_fault());
    }

    #[test]
    fn sustained_invalid_stream_latches_and_single_valid_clears() {
        let mut monitor = monitor();

        // One read every 30 s for a little over five minutes.
        for step in 0..=11 {
            monitor.ingest(&sample(SensorId::Air, TEMP_DISCONNECTED_C, step * 30_000));
        }
        assert!(monitor.is_faulted(SensorId::Air));

        monitor.ingest(&sample(SensorId::Air, 17.5, 360_000));
        assert!(!monitor.is_faulted(SensorId::Air));
        assert_eq!(monitor.state(SensorId::Air).fault_onset_ms, None);
    }

    #[test]
    fn interrupted_invalid_streak_restarts_onset() {
        let mut monitor = monitor();

        monitor.update(SensorId::Outdoor, false, 0);
        monitor.update(SensorId::Outdoor, true, 200_000);
        monitor.update(SensorId::Outdoor, false, 250_000);
        monitor.update(SensorId::Outdoor, false, 400_000);

        assert!(!monitor.is_faulted(SensorId::Outdoor));
        assert_eq!(
            monitor.state(SensorId::Outdoor).fault_onset_ms,
            Some(250_000)
        );
    }

    #[test]
    fn invalid_sample_keeps_last_good_value() {
        let mut monitor = monitor();
        monitor.ingest_cycle(&[sample(SensorId::Floor, 6.0, 0)], 0);
        monitor.ingest_cycle(&[sample(SensorId::Floor, f32::NAN, 30_000)], 30_000);

        let readings = monitor.readings();
        assert!(!readings.is_valid(SensorId::Floor));
        assert_eq!(readings.value(SensorId::Floor), 6.0);
        assert_eq!(readings.valid_value(SensorId::Floor), None);
    }

    #[test]
    fn water_delta_and_flow_status() {
        let water = WaterConfig::default();
        let mut monitor = monitor();

        monitor.ingest_cycle(
            &[
                sample(SensorId::WaterIn, 30.0, 0),
                sample(SensorId::WaterOut, 35.0, 0),
            ],
            0,
        );
        assert_eq!(monitor.readings().water_delta_c, 5.0);
        assert_eq!(monitor.flow_status(&water), FlowStatus::Ok);

        monitor.ingest_cycle(&[sample(SensorId::WaterOut, 30.75, 1)], 1);
        assert_eq!(monitor.flow_status(&water), FlowStatus::Warning);

        monitor.ingest_cycle(&[sample(SensorId::WaterOut, 30.25, 2)], 2);
        assert_eq!(monitor.flow_status(&water), FlowStatus::Critical);

        monitor.ingest_cycle(&[sample(SensorId::WaterOut, 29.0, 3)], 3);
        assert_eq!(monitor.flow_status(&water), FlowStatus::Error);

        monitor.ingest_cycle(&[sample(SensorId::WaterOut, 50.0, 4)], 4);
        assert_eq!(monitor.flow_status(&water), FlowStatus::Error);

        monitor.ingest_cycle(&[sample(SensorId::WaterIn, TEMP_DISCONNECTED_C, 5)], 5);
        assert_eq!(monitor.readings().water_delta_c, 0.0);
        assert_eq!(monitor.flow_status(&water), FlowStatus::Error);
    }
}
