use super::{hypsometric_altitude, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::i2c::I2CBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

pub const DEFAULT_ADDRESS: u8 = 0x76;
pub const ALT_ADDRESS: u8 = 0x77;
pub const SEA_LEVEL_HPA: f32 = 1013.23;

// Register addresses for the BMP280
const CALIB: u8 = 0x88;
const CHIP_ID: u8 = 0xD0;
const RESET: u8 = 0xE0;
const STATUS: u8 = 0xF3;
const CTRL_MEAS: u8 = 0xF4;
const CONFIG: u8 = 0xF5;
const PRESS_MSB: u8 = 0xF7;
const TEMP_MSB: u8 = 0xFA;

const BMP280_ID: u8 = 0x58;
const RESET_CODE: u8 = 0xB6;
const STATUS_MEASURING: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sleep = 0,
    Forced = 1,
    Normal = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    Skip = 0,
    X1 = 1,
    X2 = 2,
    X4 = 3,
    X8 = 4,
    X16 = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IirFilter {
    Off = 0,
    X2 = 1,
    X4 = 2,
    X8 = 3,
    X16 = 4,
}

/// Inactive period between normal-mode conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standby {
    Ms0_5 = 0,
    Ms62_5 = 1,
    Ms125 = 2,
    Ms250 = 3,
    Ms500 = 4,
    Ms1000 = 5,
    Ms2000 = 6,
    Ms4000 = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub mode: Mode,
    pub pressure_oversampling: Oversampling,
    pub temperature_oversampling: Oversampling,
    pub iir_filter: IirFilter,
    pub standby: Standby,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Sleep,
            pressure_oversampling: Oversampling::X16,
            temperature_oversampling: Oversampling::X2,
            iir_filter: IirFilter::Off,
            standby: Standby::Ms0_5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
    pub p: [f64; 9],
}

impl Calibration {
    pub fn from_registers(calib: &[u8; 24]) -> Self {
        let u16le = |i: usize| u16::from_le_bytes([calib[i], calib[i + 1]]) as f64;
        let i16le = |i: usize| i16::from_le_bytes([calib[i], calib[i + 1]]) as f64;
        let mut p = [0.0; 9];
        p[0] = u16le(6);
        for (n, slot) in p.iter_mut().enumerate().skip(1) {
            *slot = i16le(6 + n * 2);
        }
        Self {
            t1: u16le(0),
            t2: i16le(2),
            t3: i16le(4),
            p,
        }
    }

    /// Returns °C and t_fine
    pub fn temperature(&self, adc_t: u32) -> (f64, f64) {
        let adc = adc_t as f64;
        let var1 = (adc / 16384.0 - self.t1 / 1024.0) * self.t2;
        let var2 = (adc / 131072.0 - self.t1 / 8192.0).powi(2) * self.t3;
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pa
    pub fn pressure(&self, adc_p: u32, t_fine: f64) -> f64 {
        let [p1, p2, p3, p4, p5, p6, p7, p8, p9] = self.p;
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * p6 / 32768.0;
        var2 += var1 * p5 * 2.0;
        var2 = var2 / 4.0 + p4 * 65536.0;
        var1 = (p3 * var1 * var1 / 524288.0 + p2 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * p1;
        if var1 == 0.0 {
            return 0.0;
        }
        let mut pressure = 1048576.0 - adc_p as f64;
        pressure = (pressure - var2 / 4096.0) * 6250.0 / var1;
        let var1 = p9 * pressure * pressure / 2147483648.0;
        let var2 = pressure * p8 / 32768.0;
        pressure + (var1 + var2 + p7) / 16.0
    }
}

fn raw20(data: &[u8; 3]) -> u32 {
    ((data[0] as u32) << 12) | ((data[1] as u32) << 4) | ((data[2] as u32) >> 4)
}

pub struct Bmp280 {
    id: String,
    address: u8,
    bus_id: String,
    settings: Settings,
    sea_level_hpa: f32,
    ctrl_meas: u8,
    config: u8,
    calibration: Option<Calibration>,
    t_fine: f64,
}

impl Bmp280 {
    pub fn new(id: String, address: u8, bus_id: String) -> Self {
        Self {
            id,
            address,
            bus_id,
            settings: Settings::default(),
            sea_level_hpa: SEA_LEVEL_HPA,
            ctrl_meas: 0,
            config: 0,
            calibration: None,
            t_fine: 0.0,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    async fn write8(&self, bus: &mut I2CBus, reg: u8, value: u8) -> SensorResult<()> {
        bus.write_byte(self.address, reg, value).await?;
        sleep(Duration::from_micros(100)).await;
        Ok(())
    }

    pub async fn begin(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.reset(bus).await?;
        sleep(Duration::from_millis(10)).await;

        let chip_id = bus.read_u8(self.address, CHIP_ID).await?;
        if chip_id != BMP280_ID {
            return Err(SensorError::WrongChipId {
                sensor: self.id.clone(),
                expected: BMP280_ID as u16,
                actual: chip_id as u16,
            });
        }

        let mut calib = [0u8; 24];
        bus.read_bytes(self.address, CALIB, &mut calib).await?;
        self.calibration = Some(Calibration::from_registers(&calib));

        let s = self.settings;
        self.set_iir_filter(bus, s.iir_filter).await?;
        self.set_standby_time(bus, s.standby).await?;
        self.set_oversampling(bus, s.pressure_oversampling, s.temperature_oversampling).await?;
        self.set_mode(bus, s.mode).await
    }

    pub async fn reset(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.write8(bus, RESET, RESET_CODE).await
    }

    pub async fn set_mode(&mut self, bus: &mut I2CBus, mode: Mode) -> SensorResult<()> {
        self.ctrl_meas = (self.ctrl_meas & 0xFC) | (mode as u8 & 0x03);
        self.settings.mode = mode;
        self.write8(bus, CTRL_MEAS, self.ctrl_meas).await
    }

    pub async fn set_oversampling(
        &mut self,
        bus: &mut I2CBus,
        pressure: Oversampling,
        temperature: Oversampling,
    ) -> SensorResult<()> {
        self.ctrl_meas = ((temperature as u8 & 0x07) << 5) | ((pressure as u8 & 0x07) << 2) | (self.ctrl_meas & 0x03);
        self.settings.pressure_oversampling = pressure;
        self.settings.temperature_oversampling = temperature;
        self.write8(bus, CTRL_MEAS, self.ctrl_meas).await
    }

    pub async fn set_iir_filter(&mut self, bus: &mut I2CBus, filter: IirFilter) -> SensorResult<()> {
        self.config = (self.config & 0xE3) | ((filter as u8 & 0x07) << 2);
        self.settings.iir_filter = filter;
        self.write8(bus, CONFIG, self.config).await
    }

    pub async fn set_standby_time(&mut self, bus: &mut I2CBus, standby: Standby) -> SensorResult<()> {
        self.config = (self.config & 0x1F) | ((standby as u8 & 0x07) << 5);
        self.settings.standby = standby;
        self.write8(bus, CONFIG, self.config).await
    }

    pub fn set_sea_level_pressure(&mut self, hpa: f32) {
        self.sea_level_hpa = hpa;
    }

    fn calibration(&self) -> SensorResult<&Calibration> {
        self.calibration
            .as_ref()
            .ok_or_else(|| SensorError::NotInitialized { sensor: self.id.clone() })
    }

    async fn read_raw(&self, bus: &mut I2CBus, reg: u8) -> SensorResult<u32> {
        let mut data = [0u8; 3];
        bus.read_bytes(self.address, reg, &mut data).await?;
        Ok(raw20(&data))
    }

    /// °C
    pub async fn temperature(&mut self, bus: &mut I2CBus) -> SensorResult<f32> {
        let adc = self.read_raw(bus, TEMP_MSB).await?;
        let (t, t_fine) = self.calibration()?.temperature(adc);
        self.t_fine = t_fine;
        Ok(t as f32)
    }

    /// hPa; refreshes the temperature first since compensation depends on it
    pub async fn pressure(&mut self, bus: &mut I2CBus) -> SensorResult<f32> {
        self.temperature(bus).await?;
        let adc = self.read_raw(bus, PRESS_MSB).await?;
        Ok((self.calibration()?.pressure(adc, self.t_fine) / 100.0) as f32)
    }

    /// (°C, hPa, m)
    pub async fn measurements(&mut self, bus: &mut I2CBus) -> SensorResult<(f32, f32, f32)> {
        let temperature = self.temperature(bus).await?;
        let pressure = self.pressure(bus).await?;
        let altitude = hypsometric_altitude(pressure, temperature, self.sea_level_hpa);
        Ok((temperature, pressure, altitude))
    }

    pub async fn altitude(&mut self, bus: &mut I2CBus) -> SensorResult<f32> {
        Ok(self.measurements(bus).await?.2)
    }

    /// Trigger one forced conversion, wait for it and read the result.
    /// The chip drops back to sleep by itself afterwards.
    pub async fn measure_forced(&mut self, bus: &mut I2CBus) -> SensorResult<(f32, f32, f32)> {
        self.set_mode(bus, Mode::Forced).await?;
        let budget = self.conversion_time();
        let mut waited = Duration::ZERO;
        loop {
            sleep(Duration::from_millis(2)).await;
            waited += Duration::from_millis(2);
            let status = bus.read_u8(self.address, STATUS).await?;
            if status & STATUS_MEASURING == 0 {
                break;
            }
            if waited > budget {
                return Err(SensorError::BusTimeout {
                    bus: self.bus_id.clone(),
                    timeout_ms: budget.as_millis() as u64,
                });
            }
        }
        debug!("[{}] forced conversion done after {:?}", self.id, waited);
        self.measurements(bus).await
    }

    /// Worst-case conversion time for the current oversampling (datasheet table 13)
    pub fn conversion_time(&self) -> Duration {
        let factor = |os: Oversampling| match os {
            Oversampling::Skip => 0.0,
            other => (1u32 << (other as u32 - 1)) as f32,
        };
        let t = factor(self.settings.temperature_oversampling);
        let p = factor(self.settings.pressure_oversampling);
        let ms = 1.25 + 2.3 * t + 2.3 * p + if p > 0.0 { 0.575 } else { 0.0 };
        Duration::from_micros((ms * 1000.0) as u64 + 1000)
    }
}

#[async_trait]
impl SensorDriver for Bmp280 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        self.begin(i2c).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let i2c = bus.i2c(&self.id)?;
        let (temperature, pressure, altitude) = if self.settings.mode == Mode::Normal {
            self.measurements(i2c).await?
        } else {
            self.measure_forced(i2c).await?
        };
        Ok(SensorDataFrame {
            temperature: Some(temperature),
            pressure: Some(pressure),
            altitude: Some(altitude),
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

pub static BMP280_FACTORY: Bmp280Factory = Bmp280Factory;

pub struct Bmp280Factory;

impl SensorFactory for Bmp280Factory {
    fn name(&self) -> &'static str {
        "bmp280"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let settings = Settings {
            mode: Mode::Normal,
            ..Settings::default()
        };
        let mut sensor = Bmp280::new(
            entry.id.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
            entry.bus.clone(),
        )
        .with_settings(settings);
        if let Some(hpa) = entry.sea_level_hpa {
            sensor.set_sea_level_pressure(hpa);
        }
        Ok(Box::new(sensor))
    }
}
