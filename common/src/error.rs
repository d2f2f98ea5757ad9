use thiserror::Error;

/// Rejected operator input from MQTT or the HTTP API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("unknown zone `{0}`")]
    UnknownZone(String),
    #[error("unknown sensor `{0}`")]
    UnknownSensor(String),
    #[error("unknown override mode `{0}` (use auto, on or off)")]
    UnknownOverrideMode(String),
    #[error("unknown zone mode `{0}` (use heat or off)")]
    UnknownZoneMode(String),
    #[error("invalid temperature `{0}`")]
    InvalidTemperature(String),
    #[error("unknown system command `{0}`")]
    UnknownCommand(String),
    #[error("no handler for topic `{0}`")]
    UnknownTopic(String),
    #[error("payload is not valid utf-8")]
    NonUtf8Payload,
    #[error("payload of {0} bytes exceeds the limit")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid time of day `{0}` (expected HH:MM)")]
    InvalidTimeOfDay(String),
    #[error("wifi ssid must be 1-32 printable ASCII bytes")]
    InvalidSsid,
    #[error("wifi password must be empty or 8-64 bytes")]
    InvalidPassword,
    #[error("broker host is required while the session is enabled")]
    MissingBrokerHost,
    #[error("device name must not be empty")]
    EmptyDeviceName,
    #[error("timezone must not be empty")]
    EmptyTimezone,
}
