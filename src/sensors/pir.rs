//! PIR motion sensor, native output pin or Qwiic.

use super::qwiic::{NativeLine, QwiicDevice, Wiring, DEFAULT_ADDRESS};
use super::{SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::gpio::GpioPin;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;

pub struct Pir {
    id: String,
    bus_id: String,
    wiring: Wiring<NativeLine<dyn GpioPin>>,
    /// Seconds the output stays high after a trigger (Qwiic only)
    delay: u32,
}

impl Pir {
    pub fn new(id: String, bus_id: String, wiring: Wiring<NativeLine<dyn GpioPin>>) -> Self {
        Self { id, bus_id, wiring, delay: 2 }
    }

    pub async fn begin(&mut self, bus: &mut Bus) -> SensorResult<()> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => dev.ensure_present(bus.i2c(&self.id)?, &self.id).await,
            Wiring::Native(line) => {
                let pin = bus.gpio(&self.id)?.input(line.line())?;
                line.attach(pin);
                Ok(())
            }
        }
    }

    /// True while motion is being reported
    pub async fn state(&mut self, bus: &mut Bus) -> SensorResult<bool> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => {
                let mut data = [0u8; 1];
                dev.read_data(bus.i2c(&self.id)?, &mut data).await?;
                Ok(data[0] != 0)
            }
            Wiring::Native(line) => Ok(line.get(&self.id)?.is_high()?),
        }
    }

    /// Hold time after a trigger. Native boards set this with the trimmer.
    pub async fn set_delay(&mut self, bus: &mut Bus, seconds: u32) -> SensorResult<()> {
        match &self.wiring {
            Wiring::Qwiic(dev) => {
                dev.send_data(bus.i2c(&self.id)?, &seconds.to_le_bytes()).await?;
                self.delay = seconds;
                Ok(())
            }
            Wiring::Native(_) => Err(SensorError::invalid(
                &self.id,
                "hold time is set by the on-board trimmer in native mode",
            )),
        }
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Qwiic boards answer a probe; native pins are always there
    pub async fn available(&mut self, bus: &mut Bus) -> SensorResult<bool> {
        match &self.wiring {
            Wiring::Qwiic(dev) => Ok(dev.is_present(bus.i2c(&self.id)?).await),
            Wiring::Native(_) => Ok(true),
        }
    }
}

#[async_trait]
impl SensorDriver for Pir {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        self.begin(bus).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        Ok(SensorDataFrame {
            detected: Some(self.state(bus).await?),
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

pub static PIR_FACTORY: PirFactory = PirFactory;

pub struct PirFactory;

impl SensorFactory for PirFactory {
    fn name(&self) -> &'static str {
        "pir"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let wiring = match entry.pins.signal {
            Some(line) => Wiring::Native(NativeLine::new(line)),
            None if entry.pins.is_native() => {
                return Err(SensorError::ConfigError {
                    sensor: entry.id.clone(),
                    reason: "native wiring needs pins.signal".to_string(),
                })
            }
            None => Wiring::Qwiic(QwiicDevice::new(entry.address.unwrap_or(DEFAULT_ADDRESS))),
        };
        Ok(Box::new(Pir::new(entry.id.clone(), entry.bus.clone(), wiring)))
    }
}
