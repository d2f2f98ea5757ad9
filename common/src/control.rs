use tracing::{error, info, warn};

use crate::{
    config::{ThermostatConfig, WaterConfig, ZoneConfig, ZoneConfigs, ZoneLimits},
    schedule::ScheduleOutcome,
    sensor::SensorFaultMonitor,
    types::{OverrideMode, ZoneId, ZoneStatus},
};

/// Which rule decided the relay state on an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    SensorFault,
    ThermalRunawayTrip,
    ThermalRunawayLatched,
    ZoneDisabled,
    ManualOverride,
    MaxRuntimeExceeded,
    MinCycleHold,
    Hysteresis,
    SmartPumpVeto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actuation {
    pub zone: ZoneId,
    pub relay_on: bool,
    pub reason: DecisionReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneInput {
    pub temp_c: f32,
    pub sensor_valid: bool,
    pub fault_latched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoneState {
    pub relay_on: bool,
    pub thermal_runaway: bool,
    pub sensor_fault: bool,
    pub max_runtime_exceeded: bool,
    pub relay_on_since_ms: Option<u64>,
    pub last_transition_ms: Option<u64>,
    pub runtime_today_ms: u64,
    pub cycle_count: u64,
}

#[derive(Debug, Clone)]
pub struct ZoneControlEngine {
    pub config: ThermostatConfig,
    states: [ZoneState; 2],
    schedule_targets: [Option<f32>; 2],
    last_error: Option<String>,
}

impl ZoneControlEngine {
    pub fn new(config: ThermostatConfig) -> Self {
        Self {
            config,
            states: [ZoneState::default(); 2],
            schedule_targets: [None; 2],
            last_error: None,
        }
    }

    pub fn state(&self, zone: ZoneId) -> &ZoneState {
        &self.states[zone.index()]
    }

    pub fn is_relay_on(&self, zone: ZoneId) -> bool {
        self.states[zone.index()].relay_on
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn schedule_target(&self, zone: ZoneId) -> Option<f32> {
        self.schedule_targets[zone.index()]
    }

    /// Schedule targets only steer zones running in Auto.
    pub fn effective_target(&self, zone: ZoneId, zone_config: &ZoneConfig) -> f32 {
        match self.schedule_targets[zone.index()] {
            Some(target) if zone_config.override_mode == OverrideMode::Auto => target,
            _ => zone_config.target_c,
        }
    }

    /// Runs one control period for both zones. The pump veto is applied
    /// before either relay changes.
    pub fn update(
        &mut self,
        zones: &mut ZoneConfigs,
        monitor: &SensorFaultMonitor,
        water: &WaterConfig,
        now_ms: u64,
    ) -> [Actuation; 2] {
        let readings = monitor.readings();
        let mut decisions = ZoneId::ALL.map(|zone| {
            let sensor = zone.sensor();
            let input = ZoneInput {
                temp_c: readings.value(sensor),
                sensor_valid: readings.is_valid(sensor),
                fault_latched: monitor.is_faulted(sensor),
            };
            self.decide(zone, zones.zone_mut(zone), input, now_ms)
        });

        if water.enabled && water.smart_pump_control {
            let floor = &mut decisions[ZoneId::Floor.index()];
            if floor.0
                && readings.water_loop_valid()
                && readings.water_delta_c < water.delta_t_warning_low_c
            {
                info!(
                    "smart pump: floor loop off, water delta {:.1}C below {:.1}C",
                    readings.water_delta_c, water.delta_t_warning_low_c
                );
                *floor = (false, DecisionReason::SmartPumpVeto);
            }
        }

        let [floor, air] = decisions;
        [
            self.drive(ZoneId::Floor, floor.0, floor.1, now_ms),
            self.drive(ZoneId::Air, air.0, air.1, now_ms),
        ]
    }

    pub fn evaluate(
        &mut self,
        zone: ZoneId,
        zone_config: &mut ZoneConfig,
        input: ZoneInput,
        now_ms: u64,
    ) -> Actuation {
        let (on, reason) = self.decide(zone, zone_config, input, now_ms);
        self.drive(zone, on, reason, now_ms)
    }

    // Rules in priority order; the first match decides. Latches are updated
    // here, the relay is not.
    fn decide(
        &mut self,
        zone: ZoneId,
        zone_config: &mut ZoneConfig,
        input: ZoneInput,
        now_ms: u64,
    ) -> (bool, DecisionReason) {
        let limits = ZoneLimits::for_zone(zone);
        let index = zone.index();

        if !input.sensor_valid || input.fault_latched {
            self.states[index].sensor_fault = true;
            self.last_error = Some(format!("Sensor fault on {}", zone.as_str()));
            return (false, DecisionReason::SensorFault);
        }
        self.states[index].sensor_fault = false;

        if input.temp_c > limits.runaway_ceiling_c {
            if !self.states[index].thermal_runaway {
                error!(
                    "thermal runaway on {}: {:.1}C above {:.1}C ceiling",
                    zone.as_str(),
                    input.temp_c,
                    limits.runaway_ceiling_c
                );
            }
            self.states[index].thermal_runaway = true;
            self.last_error = Some(format!("Thermal runaway on {}", zone.as_str()));
            return (false, DecisionReason::ThermalRunawayTrip);
        }

        // Only an explicit reset clears this.
        if self.states[index].thermal_runaway {
            return (false, DecisionReason::ThermalRunawayLatched);
        }

        if !zone_config.enabled {
            return (false, DecisionReason::ZoneDisabled);
        }

        if zone_config.override_mode != OverrideMode::Auto {
            let since = *zone_config.override_since_ms.get_or_insert(now_ms);
            if now_ms.saturating_sub(since) > self.config.override_timeout_ms {
                info!(
                    "{} override {} expired, back to auto",
                    zone.as_str(),
                    zone_config.override_mode.as_str()
                );
                zone_config.override_mode = OverrideMode::Auto;
                zone_config.override_since_ms = None;
            } else {
                let on = zone_config.override_mode == OverrideMode::ForceOn;
                return (on, DecisionReason::ManualOverride);
            }
        }

        let state = self.states[index];
        if state.relay_on {
            let on_for = state
                .relay_on_since_ms
                .map(|since| now_ms.saturating_sub(since))
                .unwrap_or(0);
            if on_for > self.config.max_runtime_ms {
                warn!(
                    "{} exceeded max runtime ({})",
                    zone.as_str(),
                    format_runtime(on_for)
                );
                self.states[index].max_runtime_exceeded = true;
                self.last_error = Some(format!("Max runtime exceeded on {}", zone.as_str()));
                return (false, DecisionReason::MaxRuntimeExceeded);
            }
        }

        if let Some(last) = state.last_transition_ms {
            if now_ms.saturating_sub(last) < self.config.min_cycle_ms {
                return (state.relay_on, DecisionReason::MinCycleHold);
            }
        }

        let target = self.effective_target(zone, zone_config);
        let half_band = zone_config.hysteresis_c / 2.0;
        let on = if input.temp_c < target - half_band {
            true
        } else if input.temp_c > target + half_band {
            false
        } else {
            state.relay_on
        };

        (on, DecisionReason::Hysteresis)
    }

    /// Stores the resolved schedule targets. Returns whether a zone in Auto
    /// now steers toward a different target.
    pub fn apply_schedule(&mut self, outcome: &ScheduleOutcome, zones: &ZoneConfigs) -> bool {
        let mut changed = false;
        for zone in ZoneId::ALL {
            let limits = ZoneLimits::for_zone(zone);
            let target = outcome.target(zone).map(|t| limits.clamp_target(t));
            let slot = &mut self.schedule_targets[zone.index()];
            if *slot != target {
                info!(
                    "{} schedule target {:?} -> {:?}",
                    zone.as_str(),
                    *slot,
                    target
                );
                *slot = target;
                changed |= zones.zone(zone).override_mode == OverrideMode::Auto;
            }
        }
        changed
    }

    pub fn clear_schedule_targets(&mut self) {
        self.schedule_targets = [None; 2];
    }

    pub fn set_override(
        &mut self,
        zone: ZoneId,
        zone_config: &mut ZoneConfig,
        mode: OverrideMode,
        now_ms: u64,
    ) {
        info!("{} override set to {}", zone.as_str(), mode.as_str());
        zone_config.override_mode = mode;
        zone_config.override_since_ms = (mode != OverrideMode::Auto).then_some(now_ms);
    }

    /// Operator acknowledgement after inspecting the zone. Also clears the
    /// max-runtime flag. Returns whether anything was latched.
    pub fn reset_thermal_runaway(&mut self, zone: ZoneId) -> bool {
        let state = &mut self.states[zone.index()];
        let was_latched = state.thermal_runaway || state.max_runtime_exceeded;
        state.thermal_runaway = false;
        state.max_runtime_exceeded = false;
        info!("thermal runaway reset for {}", zone.as_str());
        was_latched
    }

    pub fn reset_runtime_counters(&mut self) {
        for state in &mut self.states {
            state.runtime_today_ms = 0;
        }
    }

    pub fn runtime_ms(&self, zone: ZoneId, now_ms: u64) -> u64 {
        self.states[zone.index()].runtime_today_ms + self.session_runtime_ms(zone, now_ms)
    }

    pub fn session_runtime_ms(&self, zone: ZoneId, now_ms: u64) -> u64 {
        let state = &self.states[zone.index()];
        match state.relay_on_since_ms {
            Some(since) if state.relay_on => now_ms.saturating_sub(since),
            _ => 0,
        }
    }

    pub fn status_label(&self, zone: ZoneId, zone_config: &ZoneConfig) -> &'static str {
        let state = &self.states[zone.index()];
        if state.thermal_runaway {
            "RUNAWAY"
        } else if state.sensor_fault {
            "FAULT"
        } else if state.max_runtime_exceeded {
            "MAX_RUN"
        } else if zone_config.override_mode == OverrideMode::ForceOn {
            "FORCE_ON"
        } else if zone_config.override_mode == OverrideMode::ForceOff {
            "FORCE_OFF"
        } else if !zone_config.enabled {
            "DISABLED"
        } else if state.relay_on {
            "HEATING"
        } else {
            "IDLE"
        }
    }

    pub fn zone_status(
        &self,
        zone: ZoneId,
        zone_config: &ZoneConfig,
        current_temp: Option<f32>,
        now_ms: u64,
    ) -> ZoneStatus {
        let state = &self.states[zone.index()];
        let override_remaining_ms = zone_config.override_since_ms.and_then(|since| {
            (zone_config.override_mode != OverrideMode::Auto).then(|| {
                self.config
                    .override_timeout_ms
                    .saturating_sub(now_ms.saturating_sub(since))
            })
        });

        ZoneStatus {
            zone,
            status: self.status_label(zone, zone_config),
            current_temp,
            target_temp: zone_config.target_c,
            effective_target: self.effective_target(zone, zone_config),
            schedule_target: self.schedule_target(zone),
            hysteresis: zone_config.hysteresis_c,
            enabled: zone_config.enabled,
            override_mode: zone_config.override_mode,
            override_remaining_ms,
            relay_on: state.relay_on,
            thermal_runaway: state.thermal_runaway,
            sensor_fault: state.sensor_fault,
            max_runtime_exceeded: state.max_runtime_exceeded,
            runtime_today_ms: self.runtime_ms(zone, now_ms),
            session_runtime_ms: self.session_runtime_ms(zone, now_ms),
            cycle_count: state.cycle_count,
        }
    }

    fn drive(&mut self, zone: ZoneId, on: bool, reason: DecisionReason, now_ms: u64) -> Actuation {
        let state = &mut self.states[zone.index()];

        if on != state.relay_on {
            state.last_transition_ms = Some(now_ms);
            state.cycle_count += 1;

            if on {
                state.relay_on_since_ms = Some(now_ms);
                state.max_runtime_exceeded = false;
            } else if let Some(since) = state.relay_on_since_ms.take() {
                state.runtime_today_ms += now_ms.saturating_sub(since);
            }
            state.relay_on = on;
            info!(
                "{} relay {} ({reason:?})",
                zone.as_str(),
                if on { "on" } else { "off" }
            );
        }

        Actuation {
            zone,
            relay_on: on,
            reason,
        }
    }
}

pub fn format_runtime(ms: u64) -> String {
    let seconds = ms / 1_000;
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::SensorConfig,
        sensor::{SensorSample, TEMP_DISCONNECTED_C},
        types::SensorId,
    };

    const MIN: u64 = 60_000;

    fn engine() -> ZoneControlEngine {
        ZoneControlEngine::new(ThermostatConfig::default())
    }

    fn air_config(target_c: f32, hysteresis_c: f32) -> ZoneConfig {
        ZoneConfig {
            target_c,
            hysteresis_c,
            ..ZoneConfig::defaults_for(ZoneId::Air)
        }
    }

    fn valid(temp_c: f32) -> ZoneInput {
        ZoneInput {
            temp_c,
            sensor_valid: true,
            fault_latched: false,
        }
    }

    #[test]
    fn hysteresis_scenario() {
        let mut engine = engine();
        let mut config = air_config(20.0, 2.0);

        let first = engine.evaluate(ZoneId::Air, &mut config, valid(18.5), 0);
        assert_eq!(first.relay_on, true);
        assert_eq!(first.reason, DecisionReason::Hysteresis);

        let off = engine.evaluate(ZoneId::Air, &mut config, valid(21.2), 5 * MIN);
        assert_eq!(off.relay_on, false);

        engine.evaluate(ZoneId::Air, &mut config, valid(18.0), 10 * MIN);
        let mid = engine.evaluate(ZoneId::Air, &mut config, valid(20.0), 16 * MIN);
        assert_eq!(mid.relay_on, true);
        assert_eq!(engine.state(ZoneId::Air).cycle_count, 3);
    }

    #[test]
    fn holds_state_inside_band_from_both_sides() {
        let mut engine = engine();
        let mut config = air_config(20.0, 2.0);

        for temp in [19.0, 20.0, 20.9, 21.0] {
            let decision = engine.evaluate(ZoneId::Air, &mut config, valid(temp), 0);
            assert_eq!(decision.relay_on, false, "{temp}");
        }
        assert_eq!(engine.state(ZoneId::Air).last_transition_ms, None);
    }

    #[test]
    fn min_cycle_time_holds_transitions() {
        let mut engine = engine();
        let mut config = air_config(20.0, 2.0);

        engine.evaluate(ZoneId::Air, &mut config, valid(15.0), 0);
        let held = engine.evaluate(ZoneId::Air, &mut config, valid(25.0), 4 * MIN);
        assert_eq!(held.relay_on, true);
        assert_eq!(held.reason, DecisionReason::MinCycleHold);

        let released = engine.evaluate(ZoneId::Air, &mut config, valid(25.0), 5 * MIN);
        assert_eq!(released.relay_on, false);
    }

    #[test]
    fn max_runtime_forces_off_and_clears_on_next_rising_edge() {
        let mut engine = engine();
        let mut config = air_config(20.0, 2.0);

        engine.evaluate(ZoneId::Air, &mut config, valid(12.0), 0);
        let still_on = engine.evaluate(ZoneId::Air, &mut config, valid(12.0), 240 * MIN);
        assert_eq!(still_on.relay_on, true);

        let tripped = engine.evaluate(ZoneId::Air, &mut config, valid(12.0), 241 * MIN);
        assert_eq!(tripped.relay_on, false);
        assert_eq!(tripped.reason, DecisionReason::MaxRuntimeExceeded);
        assert!(engine.state(ZoneId::Air).max_runtime_exceeded);
        assert_eq!(engine.last_error(), Some("Max runtime exceeded on air"));
        assert_eq!(engine.state(ZoneId::Air).runtime_today_ms, 241 * MIN);

        let restarted = engine.evaluate(ZoneId::Air, &mut config, valid(12.0), 247 * MIN);
        assert_eq!(restarted.relay_on, true);
        assert!(!engine.state(ZoneId::Air).max_runtime_exceeded);
    }

    #[test]
    fn thermal_runaway_is_sticky_until_reset() {
        let mut engine = engine();
        let mut config = ZoneConfig::defaults_for(ZoneId::Floor);

        engine.evaluate(ZoneId::Floor, &mut config, valid(1.0), 0);
        assert!(engine.is_relay_on(ZoneId::Floor));

        let trip = engine.evaluate(ZoneId::Floor, &mut config, valid(20.5), MIN);
        assert_eq!(trip.reason, DecisionReason::ThermalRunawayTrip);
        assert!(!trip.relay_on);

        for step in 2..20 {
            let decision = engine.evaluate(ZoneId::Floor, &mut config, valid(0.0), step * 10 * MIN);
            assert_eq!(decision.relay_on, false);
            assert_eq!(decision.reason, DecisionReason::ThermalRunawayLatched);
        }

        config.override_mode = OverrideMode::ForceOn;
        let forced = engine.evaluate(ZoneId::Floor, &mut config, valid(0.0), 300 * MIN);
        assert_eq!(forced.reason, DecisionReason::ThermalRunawayLatched);
        assert_eq!(engine.status_label(ZoneId::Floor, &config), "RUNAWAY");

        assert!(engine.reset_thermal_runaway(ZoneId::Floor));
        let resumed = engine.evaluate(ZoneId::Floor, &mut config, valid(0.0), 301 * MIN);
        assert_eq!(resumed.relay_on, true);
        assert_eq!(resumed.reason, DecisionReason::ManualOverride);
    }

    #[test]
    fn sensor_fault_outranks_override() {
        let mut engine = engine();
        let mut config = air_config(20.0, 1.0);
        engine.set_override(ZoneId::Air, &mut config, OverrideMode::ForceOn, 0);

        let decision = engine.evaluate(
            ZoneId::Air,
            &mut config,
            ZoneInput {
                temp_c: TEMP_DISCONNECTED_C,
                sensor_valid: false,
                fault_latched: false,
            },
            MIN,
        );
        assert_eq!(decision.relay_on, false);
        assert_eq!(decision.reason, DecisionReason::SensorFault);
        assert_eq!(engine.last_error(), Some("Sensor fault on air"));

        let latched = engine.evaluate(
            ZoneId::Air,
            &mut config,
            ZoneInput {
                temp_c: 15.0,
                sensor_valid: true,
                fault_latched: true,
            },
            2 * MIN,
        );
        assert_eq!(latched.reason, DecisionReason::SensorFault);
    }

    #[test]
    fn override_wins_over_hysteresis_and_schedule_then_expires() {
        let mut engine = engine();
        let mut zones = ZoneConfigs::default();

        engine.set_override(ZoneId::Air, &mut zones.air, OverrideMode::ForceOff, 0);
        let outcome = ScheduleOutcome {
            targets: [None, Some(24.0)],
            active_rule: Some(0),
            summary: None,
        };
        assert!(!engine.apply_schedule(&outcome, &zones));
        assert_eq!(engine.schedule_target(ZoneId::Air), Some(24.0));
        assert_eq!(engine.effective_target(ZoneId::Air, &zones.air), 18.0);

        let forced = engine.evaluate(ZoneId::Air, &mut zones.air, valid(5.0), 60 * MIN);
        assert_eq!(forced.relay_on, false);
        assert_eq!(forced.reason, DecisionReason::ManualOverride);
        assert_eq!(engine.status_label(ZoneId::Air, &zones.air), "FORCE_OFF");

        let at_limit = engine.evaluate(ZoneId::Air, &mut zones.air, valid(5.0), 120 * MIN);
        assert_eq!(at_limit.reason, DecisionReason::ManualOverride);

        let reverted = engine.evaluate(ZoneId::Air, &mut zones.air, valid(5.0), 120 * MIN + 1);
        assert_eq!(reverted.relay_on, true);
        assert_eq!(reverted.reason, DecisionReason::Hysteresis);
        assert_eq!(zones.air.override_mode, OverrideMode::Auto);
        assert_eq!(zones.air.override_since_ms, None);
    }

    #[test]
    fn schedule_target_replaces_configured_target_while_present() {
        let mut engine = engine();
        let mut zones = ZoneConfigs::default();
        let outcome = ScheduleOutcome {
            targets: [Some(40.0), None],
            active_rule: Some(3),
            summary: None,
        };

        assert!(engine.apply_schedule(&outcome, &zones));
        assert_eq!(engine.schedule_target(ZoneId::Floor), Some(15.0));
        assert_eq!(engine.effective_target(ZoneId::Floor, &zones.floor), 15.0);

        let heating = engine.evaluate(ZoneId::Floor, &mut zones.floor, valid(10.0), 0);
        assert_eq!(heating.relay_on, true);

        assert!(engine.apply_schedule(&ScheduleOutcome::default(), &zones));
        assert_eq!(engine.effective_target(ZoneId::Floor, &zones.floor), 5.0);
    }

    #[test]
    fn schedule_window_ending_under_override_leaves_no_stale_target() {
        let mut engine = engine();
        let mut zones = ZoneConfigs::default();
        let window = ScheduleOutcome {
            targets: [None, Some(25.0)],
            active_rule: Some(0),
            summary: None,
        };
        assert!(engine.apply_schedule(&window, &zones));

        engine.set_override(ZoneId::Air, &mut zones.air, OverrideMode::ForceOff, 0);
        engine.apply_schedule(&ScheduleOutcome::default(), &zones);
        assert_eq!(engine.schedule_target(ZoneId::Air), None);

        engine.set_override(ZoneId::Air, &mut zones.air, OverrideMode::Auto, MIN);
        assert_eq!(engine.effective_target(ZoneId::Air, &zones.air), 18.0);
        let decision = engine.evaluate(ZoneId::Air, &mut zones.air, valid(20.0), MIN);
        assert_eq!(decision.relay_on, false);
    }

    #[test]
    fn disabled_zone_stays_off() {
        let mut engine = engine();
        let mut config = air_config(20.0, 1.0);
        config.enabled = false;

        let decision = engine.evaluate(ZoneId::Air, &mut config, valid(5.0), 0);
        assert_eq!(decision.relay_on, false);
        assert_eq!(decision.reason, DecisionReason::ZoneDisabled);
        assert_eq!(engine.status_label(ZoneId::Air, &config), "DISABLED");
    }

    #[test]
    fn smart_pump_vetoes_floor_when_water_delta_is_low() {
        let mut engine = engine();
        let mut zones = ZoneConfigs::default();
        let water = WaterConfig {
            smart_pump_control: true,
            ..WaterConfig::default()
        };
        let mut monitor = SensorFaultMonitor::new(300_000, SensorConfig::default());
        let samples = [
            (SensorId::Floor, 1.0),
            (SensorId::Air, 18.0),
            (SensorId::WaterIn, 30.0),
            (SensorId::WaterOut, 30.4),
        ]
        .map(|(sensor, raw_c)| SensorSample {
            sensor,
            raw_c,
            timestamp_ms: 0,
        });
        monitor.ingest_cycle(&samples, 0);

        let [floor, air] = engine.update(&mut zones, &monitor, &water, 0);
        assert_eq!(floor.relay_on, false);
        assert_eq!(floor.reason, DecisionReason::SmartPumpVeto);
        assert_eq!(air.reason, DecisionReason::Hysteresis);
        assert_eq!(engine.state(ZoneId::Floor).cycle_count, 0);
        assert_eq!(engine.state(ZoneId::Floor).last_transition_ms, None);
        assert!(!engine.is_relay_on(ZoneId::Floor));

        let relaxed = WaterConfig::default();
        let [floor, _] = engine.update(&mut zones, &monitor, &relaxed, 6 * MIN);
        assert_eq!(floor.relay_on, true);
    }

    #[test]
    fn runtime_accounting_and_rollover() {
        let mut engine = engine();
        let mut config = air_config(20.0, 2.0);

        engine.evaluate(ZoneId::Air, &mut config, valid(15.0), 0);
        engine.evaluate(ZoneId::Air, &mut config, valid(25.0), 30 * MIN);
        engine.evaluate(ZoneId::Air, &mut config, valid(15.0), 40 * MIN);

        assert_eq!(engine.session_runtime_ms(ZoneId::Air, 50 * MIN), 10 * MIN);
        assert_eq!(engine.runtime_ms(ZoneId::Air, 50 * MIN), 40 * MIN);

        engine.reset_runtime_counters();
        assert_eq!(engine.runtime_ms(ZoneId::Air, 50 * MIN), 10 * MIN);
        assert_eq!(engine.state(ZoneId::Air).cycle_count, 3);
    }

    #[test]
    fn zone_status_reports_override_remaining() {
        let mut engine = engine();
        let mut config = air_config(20.0, 1.0);
        engine.set_override(ZoneId::Air, &mut config, OverrideMode::ForceOn, 0);
        engine.evaluate(ZoneId::Air, &mut config, valid(19.0), 0);

        let status = engine.zone_status(ZoneId::Air, &config, Some(19.0), 30 * MIN);
        assert_eq!(status.status, "FORCE_ON");
        assert_eq!(status.override_remaining_ms, Some(90 * MIN));
        assert_eq!(status.session_runtime_ms, 30 * MIN);
        assert!(status.relay_on);
    }

    #[test]
    fn formats_runtime() {
        assert_eq!(format_runtime(0), "0s");
        assert_eq!(format_runtime(59_999), "59s");
        assert_eq!(format_runtime(61_000), "1m 1s");
        assert_eq!(format_runtime(4 * 3_600_000 + 60_000), "4h 1m");
    }
}
