use tracing::{debug, info, warn};

use crate::{
    commands::{BrokerSettings, OperatorCommand, SystemSettings, ZoneMode},
    config::{
        validate_credentials, RuntimeConfig, ZoneLimits, LONGEST_MAX_RUNTIME_MS,
        LONGEST_MIN_CYCLE_MS, MAX_CALIBRATION_C, MAX_HYSTERESIS_C, MIN_HYSTERESIS_C,
        SHORTEST_MAX_RUNTIME_MS, SHORTEST_MIN_CYCLE_MS,
    },
    connectivity::{ConnectivityAction, ConnectivitySupervisor},
    control::{Actuation, ZoneControlEngine},
    error::ConfigError,
    ports::HardwarePort,
    schedule::{DayOfWeek, Schedule, ScheduleOutcome, ScheduleResolver, WallClock},
    sensor::{SensorFaultMonitor, SensorSample},
    types::{DeviceStatus, OverrideMode, SensorId, SensorStatus, ZoneId},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub sensors_read: bool,
    pub actuations: Option<[Actuation; 2]>,
    pub schedule: Option<ScheduleOutcome>,
    pub connectivity: Vec<ConnectivityAction>,
    pub day_rolled_over: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    pub config_changed: bool,
    pub schedule_changed: bool,
    /// Broker host, credentials or topic changed; the client must be rebuilt.
    pub broker_changed: bool,
    pub discovery_changed: bool,
    pub connectivity: Vec<ConnectivityAction>,
}

pub struct Device<H: HardwarePort> {
    hardware: H,
    config: RuntimeConfig,
    schedule: Schedule,
    monitor: SensorFaultMonitor,
    engine: ZoneControlEngine,
    resolver: ScheduleResolver,
    supervisor: ConnectivitySupervisor,

    started_ms: u64,
    conversion_requested_ms: Option<u64>,
    last_sensor_request_ms: Option<u64>,
    last_control_ms: Option<u64>,
    last_schedule_ms: Option<u64>,
    last_day: Option<DayOfWeek>,
}

impl<H: HardwarePort> Device<H> {
    pub fn new(
        mut hardware: H,
        mut config: RuntimeConfig,
        mut schedule: Schedule,
        now_ms: u64,
    ) -> Self {
        config.sanitize();
        schedule.normalize();

        for zone in ZoneId::ALL {
            hardware.write_relay(zone, false);
        }

        let monitor = SensorFaultMonitor::new(
            config.thermostat.sensor_fault_grace_ms,
            config.sensors.clone(),
        );
        let engine = ZoneControlEngine::new(config.thermostat.clone());
        let supervisor = ConnectivitySupervisor::new(
            config.connectivity.clone(),
            config.network.has_credentials(),
            config.network.session_enabled(),
        );

        Self {
            hardware,
            config,
            schedule,
            monitor,
            engine,
            resolver: ScheduleResolver::new(),
            supervisor,
            started_ms: now_ms,
            conversion_requested_ms: None,
            last_sensor_request_ms: None,
            last_control_ms: None,
            last_schedule_ms: None,
            last_day: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn engine(&self) -> &ZoneControlEngine {
        &self.engine
    }

    pub fn monitor(&self) -> &SensorFaultMonitor {
        &self.monitor
    }

    pub fn supervisor(&self) -> &ConnectivitySupervisor {
        &self.supervisor
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    /// One pass of the driver loop. `wall_clock` is `None` until time is synced.
    pub fn tick(
        &mut self,
        now_ms: u64,
        wall_clock: Option<WallClock>,
        link_up: bool,
    ) -> TickReport {
        let mut report = TickReport {
            sensors_read: self.poll_sensors(now_ms),
            ..TickReport::default()
        };

        if let Some(clock) = wall_clock {
            if self.last_day.is_some_and(|day| day != clock.day) {
                info!("day rollover, resetting runtime counters");
                self.engine.reset_runtime_counters();
                report.day_rolled_over = true;
            }
            self.last_day = Some(clock.day);
        }

        let control_due = due(
            self.last_control_ms,
            now_ms,
            self.config.thermostat.control_interval_ms,
        );
        if self.monitor.has_readings() && control_due {
            let actuations = self.engine.update(
                &mut self.config.zones,
                &self.monitor,
                &self.config.water,
                now_ms,
            );
            for actuation in &actuations {
                self.hardware.write_relay(actuation.zone, actuation.relay_on);
            }
            self.last_control_ms = Some(now_ms);
            report.actuations = Some(actuations);
        }

        match wall_clock {
            Some(clock) => {
                self.resolver.set_time_valid(true);
                let interval_ms = self.config.thermostat.schedule_interval_ms;
                if due(self.last_schedule_ms, now_ms, interval_ms) {
                    let outcome = self.resolver.evaluate(&self.schedule, clock);
                    if self.engine.apply_schedule(&outcome, &self.config.zones) {
                        // Apply a new schedule target on the next tick.
                        self.last_control_ms = None;
                    }
                    self.last_schedule_ms = Some(now_ms);
                    report.schedule = Some(outcome);
                }
            }
            None => {
                if self.resolver.time_valid() {
                    warn!("wall clock lost, schedule suspended");
                    self.engine.clear_schedule_targets();
                }
                self.resolver.set_time_valid(false);
                self.last_schedule_ms = None;
            }
        }

        report.connectivity = self.supervisor.poll(now_ms, link_up);
        report
    }

    pub fn apply_command(
        &mut self,
        command: OperatorCommand,
        now_ms: u64,
    ) -> Result<CommandOutcome, ConfigError> {
        let mut outcome = CommandOutcome::default();

        match command {
            OperatorCommand::SetOverride { zone, mode } => {
                self.engine
                    .set_override(zone, self.config.zones.zone_mut(zone), mode, now_ms);
                self.request_control();
            }
            OperatorCommand::ResetThermalRunaway(zone) => {
                self.engine.reset_thermal_runaway(zone);
                self.request_control();
            }
            OperatorCommand::ForceLocalFallback => {
                outcome.connectivity = self.supervisor.force_local_fallback(now_ms);
            }
            OperatorCommand::DayRollover => {
                info!("day rollover requested");
                self.engine.reset_runtime_counters();
            }
            OperatorCommand::SetTarget { zone, target_c } => {
                let clamped = ZoneLimits::for_zone(zone).clamp_target(target_c);
                let zone_config = self.config.zones.zone_mut(zone);
                if (zone_config.target_c - clamped).abs() > f32::EPSILON {
                    info!(
                        "{} target {:.1}C -> {:.1}C",
                        zone.as_str(),
                        zone_config.target_c,
                        clamped
                    );
                    zone_config.target_c = clamped;
                    outcome.config_changed = true;
                    self.request_control();
                }
            }
            OperatorCommand::SetHysteresis { zone, hysteresis_c } => {
                let clamped = hysteresis_c.clamp(MIN_HYSTERESIS_C, MAX_HYSTERESIS_C);
                let zone_config = self.config.zones.zone_mut(zone);
                if (zone_config.hysteresis_c - clamped).abs() > f32::EPSILON {
                    info!("{} hysteresis {:.1}C", zone.as_str(), clamped);
                    zone_config.hysteresis_c = clamped;
                    outcome.config_changed = true;
                    self.request_control();
                }
            }
            OperatorCommand::SetZoneMode { zone, mode } => {
                match mode {
                    ZoneMode::Heat => {
                        let zone_config = self.config.zones.zone_mut(zone);
                        outcome.config_changed = !zone_config.enabled;
                        zone_config.enabled = true;
                        self.engine
                            .set_override(zone, zone_config, OverrideMode::Auto, now_ms);
                    }
                    ZoneMode::Off => {
                        self.engine.set_override(
                            zone,
                            self.config.zones.zone_mut(zone),
                            OverrideMode::ForceOff,
                            now_ms,
                        );
                    }
                }
                self.request_control();
            }
            OperatorCommand::SetEnabled { zone, enabled } => {
                let zone_config = self.config.zones.zone_mut(zone);
                if zone_config.enabled != enabled {
                    let state = if enabled { "enabled" } else { "disabled" };
                    info!("{} zone {state}", zone.as_str());
                    zone_config.enabled = enabled;
                    outcome.config_changed = true;
                    self.request_control();
                }
            }
            OperatorCommand::SetCalibration { sensor, offset_c } => {
                let clamped = offset_c.clamp(-MAX_CALIBRATION_C, MAX_CALIBRATION_C);
                info!("{} calibration {clamped:+.1}C", sensor.as_str());
                self.config.sensors.calibration_c[sensor.index()] = clamped;
                self.monitor.set_calibration(self.config.sensors.clone());
                outcome.config_changed = true;
            }
            OperatorCommand::ReplaceSchedule(mut schedule) => {
                schedule.normalize();
                self.schedule = schedule;
                self.engine.clear_schedule_targets();
                self.last_schedule_ms = None;
                self.request_control();
                outcome.schedule_changed = true;
            }
            OperatorCommand::ProvisionCredentials { ssid, password } => {
                validate_credentials(&ssid, &password)?;
                info!("wifi credentials provisioned for `{ssid}`");
                self.config.network.wifi_ssid = ssid;
                self.config.network.wifi_pass = password;
                outcome.config_changed = true;
                outcome.connectivity = self
                    .supervisor
                    .credentials_changed(self.config.network.has_credentials(), now_ms);
            }
            OperatorCommand::ConfigureBroker(settings) => {
                self.configure_broker(settings, &mut outcome)?;
            }
            OperatorCommand::UpdateSystem(settings) => {
                self.update_system(settings, &mut outcome)?;
            }
        }

        Ok(outcome)
    }

    fn configure_broker(
        &mut self,
        settings: BrokerSettings,
        outcome: &mut CommandOutcome,
    ) -> Result<(), ConfigError> {
        let host = settings.host.trim();
        if settings.enabled && host.is_empty() {
            return Err(ConfigError::MissingBrokerHost);
        }

        let network = &mut self.config.network;
        network.mqtt_enabled = settings.enabled;
        network.mqtt_host = host.to_string();
        network.mqtt_port = settings.port;
        network.mqtt_user = settings.user;
        if let Some(password) = settings.password.filter(|p| !p.is_empty()) {
            network.mqtt_pass = password;
        }
        if let Some(base_topic) = settings.base_topic {
            network.base_topic = base_topic;
        }
        network.sanitize();
        info!(
            "broker {}:{} {}",
            network.mqtt_host,
            network.mqtt_port,
            if network.mqtt_enabled { "enabled" } else { "disabled" }
        );

        outcome.config_changed = true;
        outcome.broker_changed = true;
        outcome.connectivity = self
            .supervisor
            .session_settings_changed(self.config.network.session_enabled());
        Ok(())
    }

    fn update_system(
        &mut self,
        settings: SystemSettings,
        outcome: &mut CommandOutcome,
    ) -> Result<(), ConfigError> {
        let device_name = settings.device_name.map(|name| name.trim().to_string());
        if device_name.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::EmptyDeviceName);
        }
        let timezone = settings.timezone.map(|tz| tz.trim().to_string());
        if timezone.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::EmptyTimezone);
        }

        if let Some(name) = device_name {
            outcome.discovery_changed = name != self.config.network.device_name;
            self.config.network.device_name = name;
        }
        if let Some(timezone) = timezone {
            if timezone != self.config.timezone {
                info!("timezone {timezone}");
                self.config.timezone = timezone;
                self.last_schedule_ms = None;
            }
        }
        let thermostat = &mut self.config.thermostat;
        if let Some(max_runtime_ms) = settings.max_runtime_ms {
            thermostat.max_runtime_ms =
                max_runtime_ms.clamp(SHORTEST_MAX_RUNTIME_MS, LONGEST_MAX_RUNTIME_MS);
        }
        if let Some(min_cycle_ms) = settings.min_cycle_ms {
            thermostat.min_cycle_ms =
                min_cycle_ms.clamp(SHORTEST_MIN_CYCLE_MS, LONGEST_MIN_CYCLE_MS);
        }
        self.engine.config = thermostat.clone();
        self.request_control();

        outcome.config_changed = true;
        Ok(())
    }

    pub fn session_established(&mut self, now_ms: u64) -> Vec<ConnectivityAction> {
        self.supervisor.session_established(now_ms)
    }

    pub fn session_failed(&mut self, now_ms: u64) {
        self.supervisor.session_failed(now_ms);
    }

    pub fn status(&self, now_ms: u64) -> DeviceStatus {
        let readings = self.monitor.readings();
        let has_readings = self.monitor.has_readings();
        let water_enabled = self.config.water.enabled && has_readings;
        let outcome = self.resolver.last_outcome();

        DeviceStatus {
            zones: ZoneId::ALL
                .iter()
                .map(|zone| {
                    self.engine.zone_status(
                        *zone,
                        self.config.zones.zone(*zone),
                        readings.valid_value(zone.sensor()),
                        now_ms,
                    )
                })
                .collect(),
            sensors: SensorId::ALL
                .iter()
                .map(|sensor| SensorStatus {
                    sensor: *sensor,
                    value: readings.valid_value(*sensor),
                    valid: readings.is_valid(*sensor),
                    faulted: self.monitor.is_faulted(*sensor),
                })
                .collect(),
            water_delta: (water_enabled && readings.water_loop_valid())
                .then_some(readings.water_delta_c),
            flow_status: water_enabled.then(|| self.monitor.flow_status(&self.config.water)),
            critical_sensor_fault: self.monitor.has_critical_fault(),
            time_valid: self.resolver.time_valid(),
            schedule_active: outcome.active_rule.is_some(),
            active_rule: outcome.active_rule,
            schedule_info: outcome.summary.clone(),
            connectivity: self.supervisor.state(now_ms),
            last_error: self.engine.last_error().map(str::to_string),
            uptime_ms: now_ms.saturating_sub(self.started_ms),
        }
    }

    fn poll_sensors(&mut self, now_ms: u64) -> bool {
        if let Some(requested) = self.conversion_requested_ms {
            if now_ms.saturating_sub(requested) < self.config.thermostat.sensor_conversion_ms {
                return false;
            }
            let samples: Vec<SensorSample> = SensorId::ALL
                .iter()
                .map(|sensor| SensorSample {
                    sensor: *sensor,
                    raw_c: self.hardware.read_raw(*sensor),
                    timestamp_ms: now_ms,
                })
                .collect();
            self.monitor.ingest_cycle(&samples, now_ms);
            self.conversion_requested_ms = None;
            debug!("sensor cycle complete");
            return true;
        }

        let interval_ms = self.config.thermostat.sensor_read_interval_ms;
        if due(self.last_sensor_request_ms, now_ms, interval_ms) {
            self.hardware.request_conversion();
            self.conversion_requested_ms = Some(now_ms);
            self.last_sensor_request_ms = Some(now_ms);
        }
        false
    }

    fn request_control(&mut self) {
        self.last_control_ms = None;
    }
}

fn due(last_ms: Option<u64>, now_ms: u64, interval_ms: u64) -> bool {
    last_ms
        .map(|last| now_ms.saturating_sub(last) >= interval_ms)
        .unwrap_or(true)
}
