pub mod commands;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod device;
pub mod discovery;
pub mod error;
pub mod ports;
pub mod schedule;
pub mod sensor;
pub mod topics;
pub mod types;

pub use commands::{
    parse_mqtt_command, BrokerSettings, OperatorCommand, SystemSettings, ZoneMode,
    MAX_MQTT_PAYLOAD_BYTES,
};
pub use config::{
    ConnectivityConfig, NetworkConfig, RuntimeConfig, ThermostatConfig, ZoneConfig, ZoneLimits,
};
pub use connectivity::{
    Backoff, ConnectionState, ConnectivityAction, ConnectivitySupervisor, LinkStatus,
    SessionStatus,
};
pub use control::{format_runtime, Actuation, DecisionReason, ZoneControlEngine};
pub use device::{CommandOutcome, Device, TickReport};
pub use discovery::{discovery_messages, DiscoveryContext};
pub use error::{CommandError, ConfigError};
pub use ports::{HardwarePort, LinkPort};
pub use schedule::{DayOfWeek, Schedule, ScheduleResolver, ScheduleRule, WallClock};
pub use sensor::{SensorFaultMonitor, SensorSample};
pub use topics::{state_messages, OutboundMessage, Topics};
pub use types::{DeviceStatus, OverrideMode, SensorId, ZoneId};
