pub mod gpio;
pub mod i2c;
pub mod serial;
pub mod spi;

#[cfg(test)]
pub mod mock;

use crate::errors::{SensorError, SensorResult};
use gpio::GpioBus;
use i2c::I2CBus;
use serial::SerialBus;
use spi::SpiBus;

/// Bus type enum for the interfaces a breakout can hang off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    I2C,
    Spi,
    Serial,
    Gpio,
}

impl BusType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "i2c" => Some(BusType::I2C),
            "spi" => Some(BusType::Spi),
            "serial" | "uart" => Some(BusType::Serial),
            "gpio" | "native" => Some(BusType::Gpio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BusType::I2C => "i2c",
            BusType::Spi => "spi",
            BusType::Serial => "serial",
            BusType::Gpio => "gpio",
        }
    }
}

/// An opened bus, shared between every sensor configured on it
pub enum Bus {
    I2c(I2CBus),
    Spi(SpiBus),
    Serial(SerialBus),
    Gpio(GpioBus),
}

impl Bus {
    pub fn kind(&self) -> BusType {
        match self {
            Bus::I2c(_) => BusType::I2C,
            Bus::Spi(_) => BusType::Spi,
            Bus::Serial(_) => BusType::Serial,
            Bus::Gpio(_) => BusType::Gpio,
        }
    }

    pub fn i2c(&mut self, sensor: &str) -> SensorResult<&mut I2CBus> {
        match self {
            Bus::I2c(bus) => Ok(bus),
            _ => Err(mismatch(sensor, BusType::I2C)),
        }
    }

    pub fn spi(&mut self, sensor: &str) -> SensorResult<&mut SpiBus> {
        match self {
            Bus::Spi(bus) => Ok(bus),
            _ => Err(mismatch(sensor, BusType::Spi)),
        }
    }

    pub fn serial(&mut self, sensor: &str) -> SensorResult<&mut SerialBus> {
        match self {
            Bus::Serial(bus) => Ok(bus),
            _ => Err(mismatch(sensor, BusType::Serial)),
        }
    }

    pub fn gpio(&mut self, sensor: &str) -> SensorResult<&mut GpioBus> {
        match self {
            Bus::Gpio(bus) => Ok(bus),
            _ => Err(mismatch(sensor, BusType::Gpio)),
        }
    }
}

fn mismatch(sensor: &str, expected: BusType) -> SensorError {
    SensorError::BusMismatch {
        sensor: sensor.to_string(),
        expected: expected.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_type_parses_aliases() {
        assert_eq!(BusType::from_str("I2C"), Some(BusType::I2C));
        assert_eq!(BusType::from_str("uart"), Some(BusType::Serial));
        assert_eq!(BusType::from_str("native"), Some(BusType::Gpio));
        assert_eq!(BusType::from_str("can"), None);
    }

    #[test]
    fn wrong_bus_kind_is_reported() {
        let (i2c, _mock) = mock::MockI2c::new();
        let mut bus = Bus::I2c(i2c);
        assert!(bus.i2c("t0").is_ok());
        match bus.spi("t0") {
            Err(SensorError::BusMismatch { expected, .. }) => assert_eq!(expected, "spi"),
            _ => panic!("expected a bus mismatch"),
        }
    }
}
