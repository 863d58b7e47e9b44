use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use uuid::Uuid;

use crate::transport::{DEFAULT_BAUD_RATE, DEFAULT_WIFI_PORT};

/// Connection manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    /// Number of recent readings kept for the predictor and for display
    pub buffer_capacity: usize,
    /// Number of newest readings the predictor looks at for its trend
    pub prediction_window: usize,
    /// Upper bound for opening a transport
    pub connect_timeout_secs: u64,
    /// Upper bound for a pending read to unblock once a channel is closed
    pub teardown_timeout_ms: u64,
    /// How long to scan for a Bluetooth peripheral before giving up
    pub ble_scan_timeout_secs: u64,
    /// GATT characteristic carrying readings (None = first notifying
    /// characteristic of the Environmental Sensing service)
    pub ble_characteristic: Option<Uuid>,
    /// Port used when a WiFi target does not name one
    pub wifi_port: u16,
    /// Baud rate used when a serial target does not name one
    pub baud_rate: u32,
    /// Remote forecast service endpoint
    pub forecast_url: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            prediction_window: 12,
            connect_timeout_secs: 10,
            teardown_timeout_ms: 500,
            ble_scan_timeout_secs: 10,
            ble_characteristic: None,
            wifi_port: DEFAULT_WIFI_PORT,
            baud_rate: DEFAULT_BAUD_RATE,
            forecast_url: None,
        }
    }
}

impl LinkConfig {
    /// Load configuration from environment variables (and a `.env` file if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            buffer_capacity: parse_var("BUFFER_SIZE", defaults.buffer_capacity)?,
            prediction_window: parse_var("PREDICTION_WINDOW", defaults.prediction_window)?,
            connect_timeout_secs: parse_var("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs)?,
            teardown_timeout_ms: parse_var("TEARDOWN_TIMEOUT_MS", defaults.teardown_timeout_ms)?,
            ble_scan_timeout_secs: parse_var(
                "BLE_SCAN_TIMEOUT_SECS",
                defaults.ble_scan_timeout_secs,
            )?,
            ble_characteristic: match env::var("BLE_CHARACTERISTIC") {
                Ok(value) => Some(Uuid::parse_str(value.trim()).map_err(|_| {
                    ConfigError::InvalidValue(format!(
                        "BLE_CHARACTERISTIC is not a UUID: {}",
                        value
                    ))
                })?),
                Err(_) => None,
            },
            // WEBSOCKET_PORT is what the station firmware documentation uses
            wifi_port: match env::var("WIFI_PORT") {
                Ok(_) => parse_var("WIFI_PORT", defaults.wifi_port)?,
                Err(_) => parse_var("WEBSOCKET_PORT", defaults.wifi_port)?,
            },
            baud_rate: parse_var("BAUDRATE", defaults.baud_rate)?,
            forecast_url: env::var("FORECAST_URL").ok().filter(|s| !s.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        if self.prediction_window == 0 {
            return Err(ConfigError::InvalidValue(
                "prediction window must be at least 1".to_string(),
            ));
        }
        if self.teardown_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "teardown timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Raise zero sizes and timeouts to the smallest usable value
    pub fn clamped(mut self) -> Self {
        self.buffer_capacity = self.buffer_capacity.max(1);
        self.prediction_window = self.prediction_window.max(1);
        self.teardown_timeout_ms = self.teardown_timeout_ms.max(1);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn ble_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.ble_scan_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has invalid value: {}", name, value))),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
