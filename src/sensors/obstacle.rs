//! IR obstacle sensor. Native boards expose an analog level and a
//! comparator output; the Qwiic board reports the level and applies a
//! host-programmed threshold.

use super::qwiic::{NativeLine, QwiicDevice, Wiring, DEFAULT_ADDRESS};
use super::{SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::gpio::{AnalogInput, GpioPin};
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;

const READ_REG: u8 = 0;
const CMD_SET_THRESHOLD: u8 = 0x02;
pub const MAX_THRESHOLD: u16 = 1023;
pub const DEFAULT_THRESHOLD: u16 = 512;

/// Host pins of a native board; either may be left unwired
pub struct ObstaclePins {
    pub analog: Option<NativeLine<dyn AnalogInput>>,
    pub digital: Option<NativeLine<dyn GpioPin>>,
}

pub struct ObstacleSensor {
    id: String,
    bus_id: String,
    wiring: Wiring<ObstaclePins>,
    threshold: u16,
}

impl ObstacleSensor {
    pub fn new(id: String, bus_id: String, wiring: Wiring<ObstaclePins>) -> Self {
        Self {
            id,
            bus_id,
            wiring,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub async fn begin(&mut self, bus: &mut Bus) -> SensorResult<()> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => dev.ensure_present(bus.i2c(&self.id)?, &self.id).await,
            Wiring::Native(pins) => {
                let gpio = bus.gpio(&self.id)?;
                if let Some(analog) = pins.analog.as_mut() {
                    analog.attach(gpio.analog(analog.line())?);
                }
                if let Some(digital) = pins.digital.as_mut() {
                    digital.attach(gpio.input(digital.line())?);
                }
                Ok(())
            }
        }
    }

    pub async fn analog_read(&mut self, bus: &mut Bus) -> SensorResult<u16> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => {
                let mut data = [0u8; 2];
                dev.read_register(bus.i2c(&self.id)?, READ_REG, &mut data).await?;
                Ok(u16::from_be_bytes(data))
            }
            Wiring::Native(pins) => match pins.analog.as_mut() {
                Some(analog) => Ok(analog.get(&self.id)?.read_raw()?),
                None => Err(SensorError::invalid(&self.id, "no analog pin wired")),
            },
        }
    }

    /// Program the Qwiic board's detection threshold (0..=1023)
    pub async fn set_threshold(&mut self, bus: &mut Bus, value: u16) -> SensorResult<()> {
        if value > MAX_THRESHOLD {
            return Err(SensorError::invalid(
                &self.id,
                format!("threshold {} outside 0..={}", value, MAX_THRESHOLD),
            ));
        }
        match &self.wiring {
            Wiring::Qwiic(dev) => {
                let [msb, lsb] = value.to_be_bytes();
                dev.send_data(bus.i2c(&self.id)?, &[CMD_SET_THRESHOLD, msb, lsb]).await?;
                self.threshold = value;
                Ok(())
            }
            Wiring::Native(_) => Err(SensorError::invalid(
                &self.id,
                "threshold is set by the on-board trimmer in native mode",
            )),
        }
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    /// Native: the comparator pin level. Qwiic: analog level below the threshold.
    pub async fn digital_read(&mut self, bus: &mut Bus) -> SensorResult<bool> {
        if let Wiring::Native(pins) = &mut self.wiring {
            return match pins.digital.as_mut() {
                Some(digital) => Ok(digital.get(&self.id)?.is_high()?),
                None => Err(SensorError::invalid(&self.id, "no digital pin wired")),
            };
        }
        Ok(self.analog_read(bus).await? < self.threshold)
    }
}

#[async_trait]
impl SensorDriver for ObstacleSensor {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        self.begin(bus).await?;
        if let Wiring::Qwiic(_) = self.wiring {
            let threshold = self.threshold;
            self.set_threshold(bus, threshold).await?;
        }
        Ok(())
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let (analog_raw, detected) = match &self.wiring {
            Wiring::Qwiic(_) => {
                let raw = self.analog_read(bus).await?;
                (Some(raw), Some(raw < self.threshold))
            }
            Wiring::Native(pins) => {
                let has_analog = pins.analog.is_some();
                let has_digital = pins.digital.is_some();
                let raw = if has_analog { Some(self.analog_read(bus).await?) } else { None };
                let detected = if has_digital { Some(self.digital_read(bus).await?) } else { None };
                (raw, detected)
            }
        };
        Ok(SensorDataFrame {
            analog_raw,
            detected,
            ..SensorDataFrame::default()
        })
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn bus(&self) -> &str {
        &self.bus_id
    }
}

pub static OBSTACLE_FACTORY: ObstacleFactory = ObstacleFactory;

pub struct ObstacleFactory;

impl SensorFactory for ObstacleFactory {
    fn name(&self) -> &'static str {
        "obstacle"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let wiring = if entry.pins.analog.is_some() || entry.pins.signal.is_some() {
            Wiring::Native(ObstaclePins {
                analog: entry.pins.analog.map(NativeLine::new),
                digital: entry.pins.signal.map(NativeLine::new),
            })
        } else {
            Wiring::Qwiic(QwiicDevice::new(entry.address.unwrap_or(DEFAULT_ADDRESS)))
        };
        let mut sensor = ObstacleSensor::new(entry.id.clone(), entry.bus.clone(), wiring);
        if let Some(threshold) = entry.threshold {
            if threshold > MAX_THRESHOLD {
                return Err(SensorError::ConfigError {
                    sensor: entry.id.clone(),
                    reason: format!("threshold {} outside 0..={}", threshold, MAX_THRESHOLD),
                });
            }
            sensor.threshold = threshold;
        }
        Ok(Box::new(sensor))
    }
}
