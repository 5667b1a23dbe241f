use super::{isa_altitude, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::i2c::I2CBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;

pub const DEFAULT_ADDRESS: u8 = 0x76;
pub const SEA_LEVEL_HPA: f32 = 1013.25;

// Register addresses for the BME280
const CALIB_TP: u8 = 0x88;
const CALIB_H1: u8 = 0xA1;
const CALIB_H2: u8 = 0xE1;
const CTRL_HUM: u8 = 0xF2;
const CTRL_MEAS: u8 = 0xF4;
const CONFIG: u8 = 0xF5;
const DATA: u8 = 0xF7;

// Humidity x1; temperature x1, pressure x1, normal mode; 1000 ms standby, filter off
const CTRL_HUM_X1: u8 = 0x01;
const CTRL_MEAS_NORMAL_X1: u8 = 0x27;
const CONFIG_1000MS: u8 = 0xA0;

/// Raw ADC values from one burst read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub temperature: i64,
    pub pressure: i64,
    pub humidity: i64,
}

impl RawSample {
    fn from_burst(data: &[u8; 8]) -> Self {
        let b = |i: usize| data[i] as i64;
        Self {
            pressure: (b(0) << 12) | (b(1) << 4) | (b(2) >> 4),
            temperature: (b(3) << 12) | (b(4) << 4) | (b(5) >> 4),
            humidity: (b(6) << 8) | b(7),
        }
    }
}

/// Factory trim values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    pub t1: i64,
    pub t2: i64,
    pub t3: i64,
    pub p1: i64,
    pub p2: i64,
    pub p3: i64,
    pub p4: i64,
    pub p5: i64,
    pub p6: i64,
    pub p7: i64,
    pub p8: i64,
    pub p9: i64,
    pub h1: i64,
    pub h2: i64,
    pub h3: i64,
    pub h4: i64,
    pub h5: i64,
    pub h6: i64,
}

impl Calibration {
    /// `tp` is 0x88..=0x9F, `h1` is 0xA1 and `h` is 0xE1..=0xE7
    pub fn from_registers(tp: &[u8; 24], h1: u8, h: &[u8; 7]) -> Self {
        let u16le = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]) as i64;
        let i16le = |i: usize| i16::from_le_bytes([tp[i], tp[i + 1]]) as i64;
        let (e4, e5, e6) = (h[3] as i64, h[4] as i64, h[5] as i64);
        Self {
            t1: u16le(0),
            t2: i16le(2),
            t3: i16le(4),
            p1: u16le(6),
            p2: i16le(8),
            p3: i16le(10),
            p4: i16le(12),
            p5: i16le(14),
            p6: i16le(16),
            p7: i16le(18),
            p8: i16le(20),
            p9: i16le(22),
            h1: h1 as i64,
            h2: i16::from_le_bytes([h[0], h[1]]) as i64,
            h3: h[2] as i64,
            h4: (e4 << 4) | (e5 & 0x0F),
            h5: (e6 << 4) | (e5 >> 4),
            h6: h[6] as i8 as i64,
        }
    }

    /// Returns °C and the fine temperature the other channels need
    pub fn temperature(&self, adc_t: i64) -> (f32, i64) {
        let var1 = (((adc_t >> 3) - (self.t1 << 1)) * self.t2) >> 11;
        let delta = (adc_t >> 4) - self.t1;
        let var2 = (((delta * delta) >> 12) * self.t3) >> 14;
        let t_fine = var1 + var2;
        (((t_fine * 5 + 128) >> 8) as f32 / 100.0, t_fine)
    }

    /// hPa
    pub fn pressure(&self, adc_p: i64, t_fine: i64) -> f32 {
        let mut var1 = t_fine - 128000;
        let mut var2 = var1 * var1 * self.p6;
        var2 += (var1 * self.p5) << 17;
        var2 += self.p4 << 35;
        var1 = ((var1 * var1 * self.p3) >> 8) + ((var1 * self.p2) << 12);
        var1 = (((1i64 << 47) + var1) * self.p1) >> 33;
        if var1 == 0 {
            return 0.0;
        }
        let mut p = 1048576 - adc_p;
        p = (((p << 31) - var2) * 3125) / var1;
        let var1 = (self.p9 * (p >> 13) * (p >> 13)) >> 25;
        let var2 = (self.p8 * p) >> 19;
        ((((p + var1 + var2) >> 8) + (self.p7 << 4)) as f64 / 25600.0) as f32
    }

    /// %RH
    pub fn humidity(&self, adc_h: i64, t_fine: i64) -> f32 {
        let mut v = t_fine - 76800;
        let scaled = (((adc_h << 14) - (self.h4 << 20) - (self.h5 * v)) + 16384) >> 15;
        let curve = ((((((v * self.h6) >> 10) * (((v * self.h3) >> 11) + 32768)) >> 10) + 2097152)
            * self.h2
            + 8192)
            >> 14;
        v = scaled * curve;
        v -= ((((v >> 15) * (v >> 15)) >> 7) * self.h1) >> 4;
        v = v.clamp(0, 419430400);
        (v >> 12) as f32 / 1024.0
    }
}

pub struct Bme280 {
    id: String,
    address: u8,
    bus_id: String,
    sea_level_hpa: f32,
    calibration: Option<Calibration>,
}

impl Bme280 {
    pub fn new(id: String, address: u8, bus_id: String) -> Self {
        Self {
            id,
            address,
            bus_id,
            sea_level_hpa: SEA_LEVEL_HPA,
            calibration: None,
        }
    }

    pub fn set_sea_level_pressure(&mut self, hpa: f32) {
        self.sea_level_hpa = hpa;
    }

    /// Load trim values and start continuous x1 sampling
    pub async fn begin(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        let mut tp = [0u8; 24];
        bus.read_bytes(self.address, CALIB_TP, &mut tp).await?;
        let h1 = bus.read_u8(self.address, CALIB_H1).await?;
        let mut h = [0u8; 7];
        bus.read_bytes(self.address, CALIB_H2, &mut h).await?;
        let calibration = Calibration::from_registers(&tp, h1, &h);
        if calibration.t1 == 0 || calibration.p1 == 0 {
            return Err(SensorError::CalibrationError {
                sensor: self.id.clone(),
                reason: "trim registers read back as zero".to_string(),
            });
        }
        self.calibration = Some(calibration);

        bus.write_byte(self.address, CTRL_HUM, CTRL_HUM_X1).await?;
        bus.write_byte(self.address, CTRL_MEAS, CTRL_MEAS_NORMAL_X1).await?;
        bus.write_byte(self.address, CONFIG, CONFIG_1000MS).await?;
        Ok(())
    }

    pub async fn read_raw_data(&self, bus: &mut I2CBus) -> SensorResult<RawSample> {
        let mut data = [0u8; 8];
        bus.read_bytes(self.address, DATA, &mut data).await?;
        Ok(RawSample::from_burst(&data))
    }

    fn calibration(&self) -> SensorResult<&Calibration> {
        self.calibration
            .as_ref()
            .ok_or_else(|| SensorError::NotInitialized { sensor: self.id.clone() })
    }

    /// (°C, hPa, %RH)
    pub async fn read_all(&self, bus: &mut I2CBus) -> SensorResult<(f32, f32, f32)> {
        let raw = self.read_raw_data(bus).await?;
        let cal = self.calibration()?;
        let (temperature, t_fine) = cal.temperature(raw.temperature);
        Ok((
            temperature,
            cal.pressure(raw.pressure, t_fine),
            cal.humidity(raw.humidity, t_fine),
        ))
    }

    pub async fn altitude(&self, bus: &mut I2CBus) -> SensorResult<f32> {
        let (_, pressure, _) = self.read_all(bus).await?;
        Ok(isa_altitude(pressure, self.sea_level_hpa))
    }
}

#[async_trait]
impl SensorDriver for Bme280 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        self.begin(i2c).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let (temperature, pressure, humidity) = self.read_all(bus.i2c(&self.id)?).await?;
        Ok(SensorDataFrame {
            temperature: Some(temperature),
            pressure: Some(pressure),
            humidity: Some(humidity),
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

pub static BME280_FACTORY: Bme280Factory = Bme280Factory;

pub struct Bme280Factory;

impl SensorFactory for Bme280Factory {
    fn name(&self) -> &'static str {
        "bme280"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let mut sensor = Bme280::new(
            entry.id.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
            entry.bus.clone(),
        );
        if let Some(hpa) = entry.sea_level_hpa {
            sensor.set_sea_level_pressure(hpa);
        }
        Ok(Box::new(sensor))
    }
}
