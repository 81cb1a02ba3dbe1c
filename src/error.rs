//! Error types for the nearby sensor.
//!
//! Per-advertisement problems never surface here: malformed, foreign or weak
//! advertisements are filtered out silently. Only startup and collaborator
//! failures are reported as errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error reading {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Signal threshold {0} dBm is outside the supported range -127..=20 dBm")]
    ThresholdOutOfRange(i32),

    #[error("Hold duration must be a positive number of seconds, got {0}")]
    InvalidHoldDuration(i64),

    #[error("No Bluetooth adapter matching {0:?}")]
    AdapterNotFound(Option<String>),
}

pub type Result<T> = std::result::Result<T, SensorError>;
