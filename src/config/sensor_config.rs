use crate::errors::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::fs;

/// Root configuration struct expecting `[[sensor]]` TOML array format
#[derive(Debug, Deserialize)]
pub struct SensorConfig {
    #[serde(rename = "sensor", default)]
    pub sensors: Vec<SensorEntry>,
}

/// One sensor entry, matching each `[[sensor]]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorEntry {
    pub id: String,
    pub driver: String,
    pub bus: String,
    /// I2C address; each driver falls back to its breakout's default
    pub address: Option<u8>,
    /// Poll rate in Hz
    pub frequency: Option<u32>,
    /// Native GPIO wiring; when present the driver skips Qwiic mode
    #[serde(default)]
    pub pins: PinConfig,
    pub sea_level_hpa: Option<f32>,
    pub threshold: Option<u16>,
    pub samples: Option<u32>,
    pub gas_profile: Option<u8>,
    pub low_power: Option<bool>,
    pub vref: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PinConfig {
    /// Digital input/output line
    pub signal: Option<u32>,
    /// ADC channel
    pub analog: Option<u32>,
    pub trigger: Option<u32>,
    pub echo: Option<u32>,
}

impl PinConfig {
    pub fn is_native(&self) -> bool {
        self.signal.is_some() || self.analog.is_some() || self.trigger.is_some() || self.echo.is_some()
    }
}

/// Loads config from TOML file
pub fn load_sensor_config(path: &str) -> ConfigResult<SensorConfig> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::LoadError {
        path: path.to_string(),
        source,
    })?;
    parse_sensor_config(&content)
}

pub fn parse_sensor_config(content: &str) -> ConfigResult<SensorConfig> {
    let parsed: SensorConfig = toml::from_str(content)?;
    let mut seen = std::collections::HashSet::new();
    for s in &parsed.sensors {
        if !seen.insert(s.id.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: format!("sensor.{}.id", s.id),
                reason: "duplicate sensor id".to_string(),
            });
        }
        if s.frequency == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: format!("sensor.{}.frequency", s.id),
                reason: "frequency must be at least 1 Hz".to_string(),
            });
        }
    }
    Ok(parsed)
}
