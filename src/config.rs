use std::path::Path;
use std::time::Duration;

use serde_derive::Deserialize;

use crate::error::{Result, SensorError};

/// Lowest RSSI a BLE controller reports.
pub const MIN_THRESHOLD_DBM: i32 = -127;
/// Highest RSSI a BLE controller reports.
pub const MAX_THRESHOLD_DBM: i32 = 20;

pub const DEFAULT_THRESHOLD_DBM: i32 = -50;
pub const DEFAULT_HOLD_SECONDS: i64 = 5;

/// Beacons observed longer ago than this are stale when evaluated.
pub const RECENCY_WINDOW: Duration = Duration::from_secs(2);

const DEFAULT_SENSOR_NAME: &str = "Nearby Sensor";

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub mqtt: Option<MqttConfig>,
    pub sensor: Option<SensorConfig>,
    pub scan: Option<ScanConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SensorConfig {
    pub name: Option<String>,
    /// Minimum accepted signal strength, in dBm.
    pub threshold: Option<i32>,
    /// Switch-off delay after the last qualifying beacon.
    pub hold_seconds: Option<i64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    /// Substring matched against the adapter description, e.g. "hci0".
    pub adapter: Option<String>,
    /// Hex-dump every manufacturer data payload at debug level.
    pub dump_advertisements: Option<bool>,
}

/// Validated parameters of the presence state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSettings {
    pub threshold: i16,
    pub hold: Duration,
    pub recency_window: Duration,
}

impl PresenceSettings {
    pub fn new(threshold: i32, hold_seconds: i64) -> Result<Self> {
        if !(MIN_THRESHOLD_DBM..=MAX_THRESHOLD_DBM).contains(&threshold) {
            return Err(SensorError::ThresholdOutOfRange(threshold));
        }
        if hold_seconds <= 0 {
            return Err(SensorError::InvalidHoldDuration(hold_seconds));
        }

        Ok(PresenceSettings {
            // In range per the check above.
            threshold: threshold as i16,
            hold: Duration::from_secs(hold_seconds as u64),
            recency_window: RECENCY_WINDOW,
        })
    }
}

impl Default for PresenceSettings {
    fn default() -> Self {
        PresenceSettings {
            threshold: DEFAULT_THRESHOLD_DBM as i16,
            hold: Duration::from_secs(DEFAULT_HOLD_SECONDS as u64),
            recency_window: RECENCY_WINDOW,
        }
    }
}

impl AppConfig {
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::de::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| SensorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn sensor_name(&self) -> String {
        self.sensor
            .as_ref()
            .and_then(|s| s.name.clone())
            .unwrap_or_else(|| DEFAULT_SENSOR_NAME.to_string())
    }

    /// Validates the presence parameters, preferring explicit overrides
    /// (from the command line) to the values in the file.
    pub fn presence_settings(
        &self,
        threshold_override: Option<i32>,
        hold_override: Option<i64>,
    ) -> Result<PresenceSettings> {
        let sensor = self.sensor.clone().unwrap_or_default();
        PresenceSettings::new(
            threshold_override
                .or(sensor.threshold)
                .unwrap_or(DEFAULT_THRESHOLD_DBM),
            hold_override
                .or(sensor.hold_seconds)
                .unwrap_or(DEFAULT_HOLD_SECONDS),
        )
    }

    pub fn dump_advertisements(&self) -> bool {
        self.scan
            .as_ref()
            .and_then(|s| s.dump_advertisements)
            .unwrap_or(false)
    }
}
