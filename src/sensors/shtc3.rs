//! Sensirion SHTC3 humidity and temperature sensor.

use super::{SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::i2c::I2CBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_ADDRESS: u8 = 0x70;

const CMD_SLEEP: u16 = 0xB098;
const CMD_WAKEUP: u16 = 0x3517;
const CMD_RESET: u16 = 0x805D;
const CMD_READ_ID: u16 = 0xEFC8;
const CMD_MEASURE: u16 = 0x7CA2;
const CMD_MEASURE_LP: u16 = 0x6458;

const HUMIDITY_K: f32 = 0.001525878906;
const TEMPERATURE_K: f32 = 0.002670288086;
const TEMPERATURE_MIN: f32 = 45.0;

/// Sensirion CRC-8: polynomial 0x31, init 0xFF
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

pub struct Shtc3 {
    id: String,
    address: u8,
    bus_id: String,
    low_power: bool,
    raw_temperature: u16,
    raw_humidity: u16,
}

impl Shtc3 {
    pub fn new(id: String, address: u8, bus_id: String) -> Self {
        Self {
            id,
            address,
            bus_id,
            low_power: false,
            raw_temperature: 0,
            raw_humidity: 0,
        }
    }

    pub fn with_low_power(mut self, low_power: bool) -> Self {
        self.low_power = low_power;
        self
    }

    async fn command(&self, bus: &mut I2CBus, cmd: u16) -> SensorResult<()> {
        bus.write(self.address, &cmd.to_be_bytes()).await?;
        Ok(())
    }

    async fn transfer(&self, bus: &mut I2CBus, cmd: u16, buf: &mut [u8], pause: Duration) -> SensorResult<()> {
        self.command(bus, cmd).await?;
        sleep(pause).await;
        bus.read(self.address, buf).await?;
        Ok(())
    }

    fn check_word(&self, word: &[u8]) -> SensorResult<u16> {
        let expected = crc8(&word[..2]);
        if expected != word[2] {
            return Err(SensorError::CrcMismatch {
                sensor: self.id.clone(),
                expected,
                actual: word[2],
            });
        }
        Ok(u16::from_be_bytes([word[0], word[1]]))
    }

    pub async fn wakeup(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.command(bus, CMD_WAKEUP).await?;
        // tPU
        sleep(Duration::from_micros(240)).await;
        Ok(())
    }

    pub async fn sleep(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.command(bus, CMD_SLEEP).await
    }

    pub async fn reset(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.command(bus, CMD_RESET).await?;
        sleep(Duration::from_micros(240)).await;
        Ok(())
    }

    /// Validates the ID signature, resets, optionally samples once, then sleeps
    pub async fn begin(&mut self, bus: &mut I2CBus, do_sample: bool) -> SensorResult<()> {
        sleep(Duration::from_micros(240)).await;
        self.wakeup(bus).await?;

        let mut id = [0u8; 3];
        self.transfer(bus, CMD_READ_ID, &mut id, Duration::from_millis(1)).await?;
        let word = self.check_word(&id)?;
        if word & 0x0800 == 0 || word & 0x003F != 0x0007 {
            return Err(SensorError::WrongChipId {
                sensor: self.id.clone(),
                expected: 0x0807,
                actual: word,
            });
        }

        self.reset(bus).await?;
        if do_sample {
            self.sample(bus).await?;
        }
        self.sleep(bus).await
    }

    /// Wake, measure (15 ms, normal or low-power command) and go back to sleep
    pub async fn sample(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.wakeup(bus).await?;
        let cmd = if self.low_power { CMD_MEASURE_LP } else { CMD_MEASURE };
        let mut data = [0u8; 6];
        let result = self.transfer(bus, cmd, &mut data, Duration::from_millis(15)).await;
        self.sleep(bus).await?;
        result?;

        self.raw_temperature = self.check_word(&data[0..3])?;
        self.raw_humidity = self.check_word(&data[3..6])?;
        Ok(())
    }

    /// °C from the last sample
    pub fn temperature(&self) -> f32 {
        self.raw_temperature as f32 * TEMPERATURE_K - TEMPERATURE_MIN
    }

    /// %RH from the last sample
    pub fn humidity(&self) -> f32 {
        self.raw_humidity as f32 * HUMIDITY_K
    }
}

#[async_trait]
impl SensorDriver for Shtc3 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        self.begin(i2c, false).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let i2c = bus.i2c(&self.id)?;
        self.sample(i2c).await?;
        Ok(SensorDataFrame {
            temperature: Some(self.temperature()),
            humidity: Some(self.humidity()),
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

pub static SHTC3_FACTORY: Shtc3Factory = Shtc3Factory;

pub struct Shtc3Factory;

impl SensorFactory for Shtc3Factory {
    fn name(&self) -> &'static str {
        "shtc3"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let sensor = Shtc3::new(
            entry.id.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
            entry.bus.clone(),
        )
        .with_low_power(entry.low_power.unwrap_or(false));
        Ok(Box::new(sensor))
    }
}
