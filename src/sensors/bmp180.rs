use super::{isa_altitude, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::i2c::I2CBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_ADDRESS: u8 = 0x77;
pub const SEA_LEVEL_HPA: f32 = 1013.25;

const CALIB: u8 = 0xAA;
const CONTROL: u8 = 0xF4;
const DATA: u8 = 0xF6;

const CMD_TEMPERATURE: u8 = 0x2E;
const CMD_PRESSURE: u8 = 0x34;

/// Pressure oversampling, `2^oss` internal samples per reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    UltraLowPower = 0,
    Standard = 1,
    HighResolution = 2,
    UltraHighResolution = 3,
}

impl Oversampling {
    fn conversion_time(self) -> Duration {
        Duration::from_millis(2 + (3u64 << self as u8))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calibration {
    pub ac1: i16,
    pub ac2: i16,
    pub ac3: i16,
    pub ac4: u16,
    pub ac5: u16,
    pub ac6: u16,
    pub b1: i16,
    pub b2: i16,
    pub mb: i16,
    pub mc: i16,
    pub md: i16,
}

impl Calibration {
    /// Eleven big-endian words starting at 0xAA. None if the EEPROM reads blank.
    pub fn from_registers(raw: &[u8; 22]) -> Option<Self> {
        let words: Vec<u16> = raw.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
        if words.iter().any(|&w| w == 0 || w == 0xFFFF) {
            return None;
        }
        Some(Self {
            ac1: words[0] as i16,
            ac2: words[1] as i16,
            ac3: words[2] as i16,
            ac4: words[3],
            ac5: words[4],
            ac6: words[5],
            b1: words[6] as i16,
            b2: words[7] as i16,
            mb: words[8] as i16,
            mc: words[9] as i16,
            md: words[10] as i16,
        })
    }

    /// Returns tenths of °C and the B5 term pressure needs. None when the
    /// raw sample cancels MD and the division has no result.
    pub fn temperature(&self, ut: i64) -> Option<(i64, i64)> {
        let x1 = ((ut - self.ac6 as i64) * self.ac5 as i64) >> 15;
        let divisor = x1 + self.md as i64;
        if divisor == 0 {
            return None;
        }
        let x2 = ((self.mc as i64) << 11) / divisor;
        let b5 = x1 + x2;
        Some(((b5 + 8) >> 4, b5))
    }

    /// Pa
    pub fn pressure(&self, up: i64, b5: i64, oss: Oversampling) -> Option<i64> {
        let oss = oss as u8 as i64;
        let b6 = b5 - 4000;
        let x1 = (self.b2 as i64 * ((b6 * b6) >> 12)) >> 11;
        let x2 = (self.ac2 as i64 * b6) >> 11;
        let x3 = x1 + x2;
        let b3 = (((self.ac1 as i64 * 4 + x3) << oss) + 2) >> 2;

        let x1 = (self.ac3 as i64 * b6) >> 13;
        let x2 = (self.b1 as i64 * ((b6 * b6) >> 12)) >> 16;
        let x3 = (x1 + x2 + 2) >> 2;
        let b4 = (self.ac4 as i64 * (x3 + 32768)) >> 15;
        if b4 == 0 {
            return None;
        }
        let b7 = (up - b3) * (50000 >> oss);
        let p = if b7 < 0x8000_0000 { (b7 * 2) / b4 } else { (b7 / b4) * 2 };

        let x1 = ((p >> 8) * (p >> 8) * 3038) >> 16;
        let x2 = (-7357 * p) >> 16;
        Some(p + ((x1 + x2 + 3791) >> 4))
    }
}

pub struct Bmp180 {
    id: String,
    address: u8,
    bus_id: String,
    oss: Oversampling,
    sea_level_hpa: f32,
    calibration: Option<Calibration>,
    b5: i64,
}

impl Bmp180 {
    pub fn new(id: String, address: u8, bus_id: String) -> Self {
        Self {
            id,
            address,
            bus_id,
            oss: Oversampling::UltraLowPower,
            sea_level_hpa: SEA_LEVEL_HPA,
            calibration: None,
            b5: 0,
        }
    }

    pub fn with_oversampling(mut self, oss: Oversampling) -> Self {
        self.oss = oss;
        self
    }

    pub fn set_sea_level_pressure(&mut self, hpa: f32) {
        self.sea_level_hpa = hpa;
    }

    pub async fn begin(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        let mut raw = [0u8; 22];
        bus.read_bytes(self.address, CALIB, &mut raw).await?;
        let calibration = Calibration::from_registers(&raw).ok_or_else(|| SensorError::CalibrationError {
            sensor: self.id.clone(),
            reason: "calibration EEPROM reads blank".to_string(),
        })?;
        self.calibration = Some(calibration);
        Ok(())
    }

    fn calibration(&self) -> SensorResult<&Calibration> {
        self.calibration
            .as_ref()
            .ok_or_else(|| SensorError::NotInitialized { sensor: self.id.clone() })
    }

    async fn raw_temperature(&self, bus: &mut I2CBus) -> SensorResult<i64> {
        bus.write_byte(self.address, CONTROL, CMD_TEMPERATURE).await?;
        sleep(Duration::from_millis(5)).await;
        let mut data = [0u8; 2];
        bus.read_bytes(self.address, DATA, &mut data).await?;
        Ok(u16::from_be_bytes(data) as i64)
    }

    async fn raw_pressure(&self, bus: &mut I2CBus) -> SensorResult<i64> {
        bus.write_byte(self.address, CONTROL, CMD_PRESSURE + ((self.oss as u8) << 6)).await?;
        sleep(self.oss.conversion_time()).await;
        let mut data = [0u8; 3];
        bus.read_bytes(self.address, DATA, &mut data).await?;
        let raw = ((data[0] as i64) << 16) | ((data[1] as i64) << 8) | data[2] as i64;
        Ok(raw >> (8 - self.oss as u8))
    }

    /// °C
    pub async fn temperature(&mut self, bus: &mut I2CBus) -> SensorResult<f32> {
        let ut = self.raw_temperature(bus).await?;
        let (tenths, b5) = self
            .calibration()?
            .temperature(ut)
            .ok_or_else(|| SensorError::data(&self.id, "temperature compensation divided by zero"))?;
        self.b5 = b5;
        Ok(tenths as f32 / 10.0)
    }

    /// Temperature from the last conversion, without touching the bus
    fn b5_temperature(&self) -> f32 {
        ((self.b5 + 8) >> 4) as f32 / 10.0
    }

    /// hPa; always takes a fresh temperature sample first
    pub async fn pressure(&mut self, bus: &mut I2CBus) -> SensorResult<f32> {
        self.temperature(bus).await?;
        let up = self.raw_pressure(bus).await?;
        let pa = self
            .calibration()?
            .pressure(up, self.b5, self.oss)
            .ok_or_else(|| SensorError::data(&self.id, "pressure compensation divided by zero"))?;
        Ok(pa as f32 / 100.0)
    }
}

#[async_trait]
impl SensorDriver for Bmp180 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        self.begin(i2c).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let i2c = bus.i2c(&self.id)?;
        let pressure = self.pressure(i2c).await?;
        let temperature = self.b5_temperature();
        Ok(SensorDataFrame {
            temperature: Some(temperature),
            pressure: Some(pressure),
            altitude: Some(isa_altitude(pressure, self.sea_level_hpa)),
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

pub static BMP180_FACTORY: Bmp180Factory = Bmp180Factory;

pub struct Bmp180Factory;

impl SensorFactory for Bmp180Factory {
    fn name(&self) -> &'static str {
        "bmp180"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let mut sensor = Bmp180::new(
            entry.id.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
            entry.bus.clone(),
        )
        .with_oversampling(Oversampling::Standard);
        if let Some(hpa) = entry.sea_level_hpa {
            sensor.set_sea_level_pressure(hpa);
        }
        Ok(Box::new(sensor))
    }
}
