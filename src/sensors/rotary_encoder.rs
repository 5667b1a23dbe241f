//! Qwiic rotary encoder with push button.
//!
//! The board keeps a 5-byte block at register 0: a little-endian signed
//! count in bytes 0..2 and the latched event code in byte 4.

use super::qwiic::{QwiicDevice, DEFAULT_ADDRESS};
use super::{EncoderEvent, EncoderReading, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;

const DATA_REG: u8 = 0;
const DATA_LEN: usize = 5;
const CMD_RESET_COUNT: u8 = 0xBE;
const RESET_COMMIT: u8 = 0xAA;

pub struct RotaryEncoder {
    id: String,
    bus_id: String,
    dev: QwiicDevice,
}

impl RotaryEncoder {
    pub fn new(id: String, bus_id: String, address: u8) -> Self {
        Self {
            id,
            bus_id,
            dev: QwiicDevice::new(address),
        }
    }

    /// Fetch count and event in one transaction
    pub async fn reading(&mut self, bus: &mut Bus) -> SensorResult<EncoderReading> {
        let mut data = [0u8; DATA_LEN];
        self.dev.read_register(bus.i2c(&self.id)?, DATA_REG, &mut data).await?;
        let event = EncoderEvent::from_raw(data[4])
            .ok_or_else(|| SensorError::data(&self.id, format!("unknown event code {}", data[4])))?;
        Ok(EncoderReading {
            count: i16::from_le_bytes([data[0], data[1]]),
            event,
        })
    }

    pub async fn count(&mut self, bus: &mut Bus) -> SensorResult<i16> {
        Ok(self.reading(bus).await?.count)
    }

    pub async fn state(&mut self, bus: &mut Bus) -> SensorResult<EncoderEvent> {
        Ok(self.reading(bus).await?.event)
    }

    pub async fn reset_count(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        self.dev.send_data(i2c, &[CMD_RESET_COUNT]).await?;
        self.dev.send_address(i2c, RESET_COMMIT).await?;
        Ok(())
    }
}

#[async_trait]
impl SensorDriver for RotaryEncoder {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        self.dev.ensure_present(bus.i2c(&self.id)?, &self.id).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        Ok(SensorDataFrame {
            encoder: Some(self.reading(bus).await?),
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

pub static ROTARY_ENCODER_FACTORY: RotaryEncoderFactory = RotaryEncoderFactory;

pub struct RotaryEncoderFactory;

impl SensorFactory for RotaryEncoderFactory {
    fn name(&self) -> &'static str {
        "rotary_encoder"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        if entry.pins.is_native() {
            return Err(SensorError::ConfigError {
                sensor: entry.id.clone(),
                reason: "the rotary encoder is Qwiic only".to_string(),
            });
        }
        Ok(Box::new(RotaryEncoder::new(
            entry.id.clone(),
            entry.bus.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
        )))
    }
}
