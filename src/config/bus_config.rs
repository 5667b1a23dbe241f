use crate::bus::gpio::ADC_WIDTHS;
use crate::bus::BusType;
use crate::errors::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::fs;

/// Root structure for loading `[[bus]]` style TOML config
#[derive(Debug, Deserialize)]
pub struct BusConfig {
    #[serde(rename = "bus", default)]
    pub buses: Vec<BusEntry>,
}

/// One bus entry (I2C adapter, spidev node, UART, GPIO controller)
#[derive(Debug, Clone, Deserialize)]
pub struct BusEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: String,
    /// Device node; unused for `gpio`
    #[serde(default)]
    pub path: String,
    /// UART baud rate
    pub baud: Option<u32>,
    /// SPI clock
    pub speed_hz: Option<u32>,
    /// SPI mode 0..3
    pub mode: Option<u8>,
    /// IIO device directory holding `in_voltageN_raw` files
    pub adc_path: Option<String>,
    pub adc_bits: Option<u8>,
}

impl BusEntry {
    pub fn bus_type(&self) -> ConfigResult<BusType> {
        BusType::from_str(&self.r#type).ok_or_else(|| ConfigError::InvalidValue {
            field: format!("bus.{}.type", self.id),
            reason: format!("unknown bus type '{}'", self.r#type),
        })
    }
}

/// Load bus config file
pub fn load_bus_config(path: &str) -> ConfigResult<BusConfig> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::LoadError {
        path: path.to_string(),
        source,
    })?;
    parse_bus_config(&content)
}

pub fn parse_bus_config(content: &str) -> ConfigResult<BusConfig> {
    let parsed: BusConfig = toml::from_str(content)?;
    for bus in &parsed.buses {
        let kind = bus.bus_type()?;
        if kind != BusType::Gpio && bus.path.is_empty() {
            return Err(ConfigError::MissingField {
                field: format!("bus.{}.path", bus.id),
            });
        }
        if let Some(bits) = bus.adc_bits {
            if !ADC_WIDTHS.contains(&bits) {
                return Err(ConfigError::InvalidValue {
                    field: format!("bus.{}.adc_bits", bus.id),
                    reason: format!("{} is outside 1..=16", bits),
                });
            }
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_bus_kind() {
        let cfg = parse_bus_config(
            r#"
            [[bus]]
            id = "i2c1"
            type = "i2c"
            path = "/dev/i2c-1"

            [[bus]]
            id = "rtc"
            type = "spi"
            path = "/dev/spidev0.0"
            speed_hz = 1000000
            mode = 1

            [[bus]]
            id = "uart0"
            type = "serial"
            path = "/dev/ttyS0"
            baud = 9600

            [[bus]]
            id = "gpio"
            type = "gpio"
            adc_path = "/sys/bus/iio/devices/iio:device0"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.buses.len(), 4);
        assert_eq!(cfg.buses[1].mode, Some(1));
        assert_eq!(cfg.buses[3].bus_type().unwrap(), BusType::Gpio);
    }

    #[test]
    fn rejects_unknown_type_and_missing_path() {
        let unknown = parse_bus_config("[[bus]]\nid = \"x\"\ntype = \"can\"\npath = \"/dev/can0\"\n");
        assert!(matches!(unknown, Err(ConfigError::InvalidValue { .. })));

        let no_path = parse_bus_config("[[bus]]\nid = \"x\"\ntype = \"i2c\"\n");
        assert!(matches!(no_path, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn rejects_out_of_range_adc_width() {
        for bits in [0, 17, 32] {
            let cfg = format!("[[bus]]\nid = \"gpio\"\ntype = \"gpio\"\nadc_bits = {}\n", bits);
            assert!(matches!(parse_bus_config(&cfg), Err(ConfigError::InvalidValue { .. })));
        }
        assert!(parse_bus_config("[[bus]]\nid = \"gpio\"\ntype = \"gpio\"\nadc_bits = 10\n").is_ok());
    }
}
