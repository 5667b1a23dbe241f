//! Bosch BMP388 / BMP390 barometer.
//!
//! Besides plain temperature/pressure reads this driver covers the chip's
//! data-ready and FIFO interrupts, the 512-byte FIFO itself, the sensor
//! time counter and the I2C watchdog.

use super::{hypsometric_altitude, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::i2c::I2CBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

pub const DEFAULT_ADDRESS: u8 = 0x76;
pub const ALT_ADDRESS: u8 = 0x77;
pub const SEA_LEVEL_HPA: f32 = 1013.23;

// Register addresses for the BMP388
const CHIP_ID: u8 = 0x00;
const ERR_REG: u8 = 0x02;
const STATUS: u8 = 0x03;
const DATA_0: u8 = 0x04;
const DATA_3: u8 = 0x07;
const SENSORTIME_0: u8 = 0x0C;
const EVENT: u8 = 0x10;
const INT_STATUS: u8 = 0x11;
const FIFO_LENGTH_0: u8 = 0x12;
const FIFO_DATA: u8 = 0x14;
const FIFO_WTM_0: u8 = 0x15;
const FIFO_WTM_1: u8 = 0x16;
const FIFO_CONFIG_1: u8 = 0x17;
const FIFO_CONFIG_2: u8 = 0x18;
const INT_CTRL: u8 = 0x19;
const IF_CONF: u8 = 0x1A;
const PWR_CTRL: u8 = 0x1B;
const OSR: u8 = 0x1C;
const ODR: u8 = 0x1D;
const CONFIG: u8 = 0x1F;
const TRIM_PARAMS: u8 = 0x31;
const CMD: u8 = 0x7E;

const BMP388_ID: u8 = 0x50;
const BMP390_ID: u8 = 0x60;
const RESET_CODE: u8 = 0xB6;
const FIFO_FLUSH: u8 = 0xB0;

const STATUS_CMD_RDY: u8 = 0x10;
const ERR_CONF: u8 = 0x04;
const INT_FWM: u8 = 0x01;
const INT_FULL: u8 = 0x02;
const INT_DRDY: u8 = 0x08;
const INT_CTRL_DRDY_EN: u8 = 1 << 6;
const INT_CTRL_FIFO_EN: u8 = (1 << 3) | (1 << 4);

// FIFO frame headers
const FIFO_SENSOR_PRESS: u8 = 0x94;
const FIFO_SENSOR_TEMP: u8 = 0x90;
const FIFO_SENSOR_TIME: u8 = 0xA0;
const FIFO_EMPTY: u8 = 0x80;
const FIFO_CONFIG_CHANGE: u8 = 0x48;
const FIFO_CONFIG_ERROR: u8 = 0x44;

pub const FIFO_SIZE: u16 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sleep = 0,
    Forced = 1,
    Normal = 3,
}

impl Mode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Mode::Sleep,
            3 => Mode::Normal,
            _ => Mode::Forced,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    X1 = 0,
    X2 = 1,
    X4 = 2,
    X8 = 3,
    X16 = 4,
    X32 = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IirFilter {
    Off = 0,
    C1 = 1,
    C3 = 2,
    C7 = 3,
    C15 = 4,
    C31 = 5,
    C63 = 6,
    C127 = 7,
}

/// Output data rate, named after the period between normal-mode samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeStandby {
    Ms5 = 0x00,
    Ms10 = 0x01,
    Ms20 = 0x02,
    Ms40 = 0x03,
    Ms80 = 0x04,
    Ms160 = 0x05,
    Ms320 = 0x06,
    Ms640 = 0x07,
    Ms1280 = 0x08,
    Ms2560 = 0x09,
    Ms5120 = 0x0A,
    Ms10240 = 0x0B,
    Ms20480 = 0x0C,
    Ms40960 = 0x0D,
    Ms81920 = 0x0E,
    Ms163840 = 0x0F,
    Ms327680 = 0x10,
    Ms655360 = 0x11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDrive {
    PushPull = 0,
    OpenCollector = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveLevel {
    Low = 0,
    High = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latch {
    Unlatched = 0,
    Latched = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoDataSelect {
    Unfiltered = 0,
    Filtered = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogTimeout {
    Ms1_25 = 0,
    Ms40 = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub mode: Mode,
    pub pressure_oversampling: Oversampling,
    pub temperature_oversampling: Oversampling,
    pub iir_filter: IirFilter,
    pub time_standby: TimeStandby,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Sleep,
            pressure_oversampling: Oversampling::X16,
            temperature_oversampling: Oversampling::X2,
            iir_filter: IirFilter::Off,
            time_standby: TimeStandby::Ms5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoConfig {
    pub pressure: bool,
    /// Compute altitudes for pressure frames when draining
    pub altitude: bool,
    pub time: bool,
    /// Store every 2^n-th sample
    pub subsampling: u8,
    pub data_select: FifoDataSelect,
    pub stop_on_full: bool,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            pressure: true,
            altitude: true,
            time: true,
            subsampling: 0,
            data_select: FifoDataSelect::Filtered,
            stop_on_full: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoStatus {
    /// Watermark not reached yet
    Pending,
    Ready,
    /// The chip flagged a configuration error frame
    ConfigError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FifoReadout {
    pub status: FifoStatus,
    pub temperatures: Vec<f32>,
    pub pressures: Vec<f32>,
    pub altitudes: Vec<f32>,
    pub sensor_time: u32,
}

/// Trim values already scaled to floating point
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    t: [f64; 3],
    p: [f64; 11],
}

impl Calibration {
    pub fn from_registers(raw: &[u8; 21]) -> Self {
        let u16le = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]) as f64;
        let i16le = |i: usize| i16::from_le_bytes([raw[i], raw[i + 1]]) as f64;
        let i8at = |i: usize| raw[i] as i8 as f64;
        let pow2 = |e: i32| 2f64.powi(e);
        Self {
            t: [
                u16le(0) / pow2(-8),
                u16le(2) / pow2(30),
                i8at(4) / pow2(48),
            ],
            p: [
                (i16le(5) - pow2(14)) / pow2(20),
                (i16le(7) - pow2(14)) / pow2(29),
                i8at(9) / pow2(32),
                i8at(10) / pow2(37),
                u16le(11) / pow2(-3),
                u16le(13) / pow2(6),
                i8at(15) / pow2(8),
                i8at(16) / pow2(15),
                i16le(17) / pow2(48),
                i8at(19) / pow2(48),
                i8at(20) / pow2(65),
            ],
        }
    }

    /// °C
    pub fn temperature(&self, adc: u32) -> f64 {
        let d1 = adc as f64 - self.t[0];
        let d2 = d1 * self.t[1];
        d2 + d1 * d1 * self.t[2]
    }

    /// Pa, given the linearised temperature
    pub fn pressure(&self, adc: u32, t_lin: f64) -> f64 {
        let p = &self.p;
        let up = adc as f64;
        let t2 = t_lin * t_lin;
        let t3 = t2 * t_lin;
        let out1 = p[4] + p[5] * t_lin + p[6] * t2 + p[7] * t3;
        let out2 = up * (p[0] + p[1] * t_lin + p[2] * t2 + p[3] * t3);
        let up2 = up * up;
        let out3 = up2 * (p[8] + p[9] * t_lin) + up2 * up * p[10];
        out1 + out2 + out3
    }
}

fn u24(b: &[u8]) -> u32 {
    ((b[2] as u32) << 16) | ((b[1] as u32) << 8) | b[0] as u32
}

pub struct Bmp388 {
    id: String,
    address: u8,
    bus_id: String,
    settings: Settings,
    sea_level_hpa: f32,
    pwr_ctrl: u8,
    osr: u8,
    odr: u8,
    config: u8,
    int_ctrl: u8,
    fifo_config_1: u8,
    fifo_config_2: u8,
    alt_enable: bool,
    calibration: Option<Calibration>,
}

impl Bmp388 {
    pub fn new(id: String, address: u8, bus_id: String) -> Self {
        Self {
            id,
            address,
            bus_id,
            settings: Settings::default(),
            sea_level_hpa: SEA_LEVEL_HPA,
            pwr_ctrl: 0,
            osr: 0,
            odr: 0,
            config: 0,
            int_ctrl: 0,
            fifo_config_1: 0,
            fifo_config_2: 0,
            alt_enable: false,
            calibration: None,
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

    async fn read8(&self, bus: &mut I2CBus, reg: u8) -> SensorResult<u8> {
        Ok(bus.read_u8(self.address, reg).await?)
    }

    /// Poll STATUS.cmd_rdy; a `ReadError` once `timeout` passes without it
    async fn wait_cmd_ready(&self, bus: &mut I2CBus, timeout: Duration) -> SensorResult<()> {
        let start = Instant::now();
        loop {
            if self.read8(bus, STATUS).await? & STATUS_CMD_RDY != 0 {
                return Ok(());
            }
            if start.elapsed() > timeout {
                warn!("[{}] command interface busy for {:?}", self.id, timeout);
                return Err(SensorError::ReadError {
                    sensor: self.id.clone(),
                    reason: format!("command interface not ready after {} ms", timeout.as_millis()),
                });
            }
            sleep(Duration::from_millis(2)).await;
        }
    }

    pub async fn begin(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        if !self.reset(bus).await? {
            return Err(SensorError::init(&self.id, "power-on reset not detected after soft reset"));
        }
        sleep(Duration::from_millis(20)).await;
        self.wait_cmd_ready(bus, Duration::from_millis(100)).await?;

        let chip_id = self.read8(bus, CHIP_ID).await?;
        if chip_id != BMP388_ID && chip_id != BMP390_ID {
            return Err(SensorError::WrongChipId {
                sensor: self.id.clone(),
                expected: BMP388_ID as u16,
                actual: chip_id as u16,
            });
        }

        let mut trim = [0u8; 21];
        bus.read_bytes(self.address, TRIM_PARAMS, &mut trim).await?;
        self.calibration = Some(Calibration::from_registers(&trim));
        sleep(Duration::from_millis(10)).await;
        self.wait_cmd_ready(bus, Duration::from_millis(100)).await?;

        // Watchdog off, 4-wire SPI
        self.write8(bus, IF_CONF, 0x00).await?;
        let s = self.settings;
        self.set_iir_filter(bus, s.iir_filter).await?;
        self.set_time_standby(bus, s.time_standby).await?;
        self.set_oversampling(bus, s.pressure_oversampling, s.temperature_oversampling).await?;

        // press_en | temp_en | mode
        self.pwr_ctrl = 0x03 | ((s.mode as u8 & 0x03) << 4);
        self.wait_cmd_ready(bus, Duration::from_millis(100)).await?;
        self.write8(bus, PWR_CTRL, self.pwr_ctrl).await?;
        sleep(Duration::from_millis(50)).await;

        let mut verify = self.read8(bus, PWR_CTRL).await?;
        if verify != self.pwr_ctrl {
            let err = self.read8(bus, ERR_REG).await?;
            debug!("[{}] PWR_CTRL readback {:#04x}, ERR_REG {:#04x}; retrying", self.id, verify, err);
            sleep(Duration::from_millis(100)).await;
            self.write8(bus, PWR_CTRL, self.pwr_ctrl).await?;
            sleep(Duration::from_millis(100)).await;
            verify = self.read8(bus, PWR_CTRL).await?;
        }
        self.pwr_ctrl = verify;

        let final_mode = Mode::from_bits(verify >> 4);
        if final_mode != s.mode {
            warn!(
                "[{}] failed to set mode: expected {:?}, got {:?} (PWR_CTRL={:#04x})",
                self.id, s.mode, final_mode, verify
            );
        }
        Ok(())
    }

    /// Soft reset; true when the chip reports a fresh power-on
    pub async fn reset(&self, bus: &mut I2CBus) -> SensorResult<bool> {
        self.write8(bus, CMD, RESET_CODE).await?;
        sleep(Duration::from_millis(10)).await;
        Ok(self.read8(bus, EVENT).await? & 0x01 != 0)
    }

    pub async fn set_mode(&mut self, bus: &mut I2CBus, mode: Mode) -> SensorResult<()> {
        let current = self.read8(bus, PWR_CTRL).await?;
        self.pwr_ctrl = (current & 0x03) | ((mode as u8 & 0x03) << 4);
        self.wait_cmd_ready(bus, Duration::from_millis(100)).await?;
        self.write8(bus, PWR_CTRL, self.pwr_ctrl).await?;
        sleep(Duration::from_millis(20)).await;

        let mut verify = self.read8(bus, PWR_CTRL).await?;
        if verify != self.pwr_ctrl {
            let err = self.read8(bus, ERR_REG).await?;
            if err & ERR_CONF != 0 {
                // ODR too fast for the oversampling; fall back to a combination that fits
                warn!("[{}] configuration error, falling back to 80 ms / x2 / x2", self.id);
                self.set_time_standby(bus, TimeStandby::Ms80).await?;
                self.set_oversampling(bus, Oversampling::X2, Oversampling::X2).await?;
            }
            sleep(Duration::from_millis(10)).await;
            self.wait_cmd_ready(bus, Duration::from_millis(100)).await?;
            let current = self.read8(bus, PWR_CTRL).await?;
            self.pwr_ctrl = (current & 0x03) | ((mode as u8 & 0x03) << 4);
            self.write8(bus, PWR_CTRL, self.pwr_ctrl).await?;
            sleep(Duration::from_millis(20)).await;
            verify = self.read8(bus, PWR_CTRL).await?;
        }
        self.pwr_ctrl = verify;
        self.settings.mode = Mode::from_bits(verify >> 4);
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        Mode::from_bits(self.pwr_ctrl >> 4)
    }

    pub async fn set_oversampling(
        &mut self,
        bus: &mut I2CBus,
        pressure: Oversampling,
        temperature: Oversampling,
    ) -> SensorResult<()> {
        self.osr = ((temperature as u8 & 0x07) << 3) | (pressure as u8 & 0x07);
        self.settings.pressure_oversampling = pressure;
        self.settings.temperature_oversampling = temperature;
        self.write8(bus, OSR, self.osr).await
    }

    pub async fn set_pressure_oversampling(&mut self, bus: &mut I2CBus, os: Oversampling) -> SensorResult<()> {
        self.osr = (self.osr & 0xF8) | (os as u8 & 0x07);
        self.settings.pressure_oversampling = os;
        self.write8(bus, OSR, self.osr).await
    }

    pub async fn set_temperature_oversampling(&mut self, bus: &mut I2CBus, os: Oversampling) -> SensorResult<()> {
        self.osr = (self.osr & 0xC7) | ((os as u8 & 0x07) << 3);
        self.settings.temperature_oversampling = os;
        self.write8(bus, OSR, self.osr).await
    }

    pub async fn set_iir_filter(&mut self, bus: &mut I2CBus, filter: IirFilter) -> SensorResult<()> {
        self.config = (self.config & 0xF1) | ((filter as u8 & 0x07) << 1);
        self.settings.iir_filter = filter;
        self.write8(bus, CONFIG, self.config).await
    }

    pub async fn set_time_standby(&mut self, bus: &mut I2CBus, standby: TimeStandby) -> SensorResult<()> {
        self.odr = standby as u8 & 0x1F;
        self.settings.time_standby = standby;
        self.write8(bus, ODR, self.odr).await
    }

    pub fn set_sea_level_pressure(&mut self, hpa: f32) {
        self.sea_level_hpa = hpa;
    }

    /// Checks INT_STATUS.drdy. A finished forced conversion puts the chip back to sleep.
    pub async fn data_ready(&mut self, bus: &mut I2CBus) -> SensorResult<bool> {
        // Cached mode: a forced conversion may already have dropped back to sleep
        let mode = self.mode();
        let int_status = self.read8(bus, INT_STATUS).await?;
        if int_status & INT_DRDY != 0 {
            if mode == Mode::Forced {
                self.set_mode(bus, Mode::Sleep).await?;
            }
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn start_normal_conversion(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.set_mode(bus, Mode::Normal).await?;
        // First sample with heavy oversampling takes a while
        sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    /// Starts a one-shot conversion; ignored unless the chip is asleep
    pub async fn start_forced_conversion(&mut self, bus: &mut I2CBus) -> SensorResult<bool> {
        if self.mode() == Mode::Sleep {
            self.set_mode(bus, Mode::Forced).await?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn stop_conversion(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.set_mode(bus, Mode::Sleep).await
    }

    fn calibration(&self) -> SensorResult<&Calibration> {
        self.calibration
            .as_ref()
            .ok_or_else(|| SensorError::NotInitialized { sensor: self.id.clone() })
    }

    fn altitude_for(&self, temperature: f32, pressure: f32) -> f32 {
        hypsometric_altitude(pressure, temperature, self.sea_level_hpa)
    }

    /// °C, or `None` while no fresh sample is available
    pub async fn temperature(&mut self, bus: &mut I2CBus) -> SensorResult<Option<f32>> {
        if !self.data_ready(bus).await? {
            return Ok(None);
        }
        let mut data = [0u8; 3];
        bus.read_bytes(self.address, DATA_3, &mut data).await?;
        Ok(Some(self.calibration()?.temperature(u24(&data)) as f32))
    }

    /// (°C, hPa)
    pub async fn temp_pres(&mut self, bus: &mut I2CBus) -> SensorResult<Option<(f32, f32)>> {
        if !self.data_ready(bus).await? {
            return Ok(None);
        }
        let mut data = [0u8; 6];
        bus.read_bytes(self.address, DATA_0, &mut data).await?;
        let cal = self.calibration()?;
        let t = cal.temperature(u24(&data[3..6]));
        let p = cal.pressure(u24(&data[0..3]), t) / 100.0;
        Ok(Some((t as f32, p as f32)))
    }

    pub async fn pressure(&mut self, bus: &mut I2CBus) -> SensorResult<Option<f32>> {
        Ok(self.temp_pres(bus).await?.map(|(_, p)| p))
    }

    /// (°C, hPa, m)
    pub async fn measurements(&mut self, bus: &mut I2CBus) -> SensorResult<Option<(f32, f32, f32)>> {
        Ok(self
            .temp_pres(bus)
            .await?
            .map(|(t, p)| (t, p, self.altitude_for(t, p))))
    }

    pub async fn altitude(&mut self, bus: &mut I2CBus) -> SensorResult<Option<f32>> {
        Ok(self.measurements(bus).await?.map(|(_, _, a)| a))
    }

    fn int_pin_bits(drive: OutputDrive, level: ActiveLevel, latch: Latch) -> u8 {
        ((latch as u8 & 0x01) << 2) | ((level as u8 & 0x01) << 1) | (drive as u8 & 0x01)
    }

    pub async fn enable_interrupt(
        &mut self,
        bus: &mut I2CBus,
        drive: OutputDrive,
        level: ActiveLevel,
        latch: Latch,
    ) -> SensorResult<()> {
        self.int_ctrl = Self::int_pin_bits(drive, level, latch) | INT_CTRL_DRDY_EN;
        self.write8(bus, INT_CTRL, self.int_ctrl).await
    }

    pub async fn disable_interrupt(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.int_ctrl &= !INT_CTRL_DRDY_EN;
        self.write8(bus, INT_CTRL, self.int_ctrl).await
    }

    pub async fn set_int_output_drive(&mut self, bus: &mut I2CBus, drive: OutputDrive) -> SensorResult<()> {
        self.int_ctrl = (self.int_ctrl & !0x01) | (drive as u8 & 0x01);
        self.write8(bus, INT_CTRL, self.int_ctrl).await
    }

    pub async fn set_int_active_level(&mut self, bus: &mut I2CBus, level: ActiveLevel) -> SensorResult<()> {
        self.int_ctrl = (self.int_ctrl & !0x02) | ((level as u8 & 0x01) << 1);
        self.write8(bus, INT_CTRL, self.int_ctrl).await
    }

    pub async fn set_int_latch(&mut self, bus: &mut I2CBus, latch: Latch) -> SensorResult<()> {
        self.int_ctrl = (self.int_ctrl & !0x04) | ((latch as u8 & 0x01) << 2);
        self.write8(bus, INT_CTRL, self.int_ctrl).await
    }

    pub async fn enable_fifo(&mut self, bus: &mut I2CBus, cfg: FifoConfig) -> SensorResult<()> {
        self.alt_enable = cfg.altitude;
        self.fifo_config_1 = (1 << 4)
            | ((cfg.pressure as u8) << 3)
            | ((cfg.time as u8) << 2)
            | ((cfg.stop_on_full as u8) << 1)
            | 0x01;
        self.fifo_config_2 = ((cfg.data_select as u8 & 0x07) << 3) | (cfg.subsampling & 0x07);
        self.write8(bus, FIFO_CONFIG_1, self.fifo_config_1).await?;
        self.write8(bus, FIFO_CONFIG_2, self.fifo_config_2).await
    }

    pub async fn disable_fifo(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.fifo_config_1 &= !0x01;
        self.write8(bus, FIFO_CONFIG_1, self.fifo_config_1).await
    }

    fn fifo_flags(&self) -> (u16, u16, u16) {
        let time = ((self.fifo_config_1 >> 2) & 0x01) as u16;
        let press = ((self.fifo_config_1 >> 3) & 0x01) as u16;
        let temp = ((self.fifo_config_1 >> 4) & 0x01) as u16;
        (time, press, temp)
    }

    /// Watermark expressed as a number of stored samples
    pub async fn set_fifo_measurements(&mut self, bus: &mut I2CBus, count: u16) -> SensorResult<()> {
        let (_, press, temp) = self.fifo_flags();
        let frame = (press | temp) + 3 * press + 3 * temp;
        self.set_fifo_watermark(bus, count.saturating_mul(frame)).await
    }

    /// Watermark in bytes; rejected when it cannot fit beside a sensor-time frame
    pub async fn set_fifo_watermark(&mut self, bus: &mut I2CBus, bytes: u16) -> SensorResult<()> {
        let (time, _, _) = self.fifo_flags();
        if bytes as u32 + (time + 3 * time) as u32 + 2 > FIFO_SIZE as u32 {
            return Err(SensorError::invalid(
                &self.id,
                format!("FIFO watermark of {} bytes exceeds the {} byte FIFO", bytes, FIFO_SIZE),
            ));
        }
        self.write8(bus, FIFO_WTM_0, (bytes & 0xFF) as u8).await?;
        self.write8(bus, FIFO_WTM_1, ((bytes >> 8) & 0x01) as u8).await
    }

    pub async fn fifo_watermark(&self, bus: &mut I2CBus) -> SensorResult<u16> {
        let mut data = [0u8; 2];
        bus.read_bytes(self.address, FIFO_WTM_0, &mut data).await?;
        Ok(u16::from_le_bytes(data))
    }

    pub async fn set_fifo_press_enable(&mut self, bus: &mut I2CBus, enable: bool) -> SensorResult<()> {
        self.fifo_config_1 = (self.fifo_config_1 & !(1 << 3)) | ((enable as u8) << 3);
        self.write8(bus, FIFO_CONFIG_1, self.fifo_config_1).await
    }

    pub async fn set_fifo_time_enable(&mut self, bus: &mut I2CBus, enable: bool) -> SensorResult<()> {
        self.fifo_config_1 = (self.fifo_config_1 & !(1 << 2)) | ((enable as u8) << 2);
        self.write8(bus, FIFO_CONFIG_1, self.fifo_config_1).await
    }

    pub async fn set_fifo_stop_on_full(&mut self, bus: &mut I2CBus, enable: bool) -> SensorResult<()> {
        self.fifo_config_1 = (self.fifo_config_1 & !(1 << 1)) | ((enable as u8) << 1);
        self.write8(bus, FIFO_CONFIG_1, self.fifo_config_1).await
    }

    pub async fn set_fifo_subsampling(&mut self, bus: &mut I2CBus, subsampling: u8) -> SensorResult<()> {
        self.fifo_config_2 = (self.fifo_config_2 & !0x07) | (subsampling & 0x07);
        self.write8(bus, FIFO_CONFIG_2, self.fifo_config_2).await
    }

    pub async fn set_fifo_data_select(&mut self, bus: &mut I2CBus, select: FifoDataSelect) -> SensorResult<()> {
        self.fifo_config_2 = (self.fifo_config_2 & !(0x07 << 3)) | ((select as u8 & 0x07) << 3);
        self.write8(bus, FIFO_CONFIG_2, self.fifo_config_2).await
    }

    /// Bytes currently stored
    pub async fn fifo_length(&self, bus: &mut I2CBus) -> SensorResult<u16> {
        let mut data = [0u8; 2];
        bus.read_bytes(self.address, FIFO_LENGTH_0, &mut data).await?;
        Ok(u16::from_le_bytes([data[0], data[1] & 0x01]))
    }

    /// Watermark or full flag raised
    pub async fn fifo_ready(&self, bus: &mut I2CBus) -> SensorResult<bool> {
        let status = self.read8(bus, INT_STATUS).await?;
        Ok(status & (INT_FWM | INT_FULL) != 0)
    }

    pub async fn flush_fifo(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.write8(bus, CMD, FIFO_FLUSH).await
    }

    pub async fn enable_fifo_interrupt(
        &mut self,
        bus: &mut I2CBus,
        drive: OutputDrive,
        level: ActiveLevel,
        latch: Latch,
    ) -> SensorResult<()> {
        self.int_ctrl = Self::int_pin_bits(drive, level, latch) | INT_CTRL_FIFO_EN;
        self.write8(bus, INT_CTRL, self.int_ctrl).await
    }

    pub async fn disable_fifo_interrupt(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.int_ctrl &= !INT_CTRL_FIFO_EN;
        self.write8(bus, INT_CTRL, self.int_ctrl).await
    }

    /// Drain the FIFO once the watermark has been reached
    pub async fn fifo_data(&mut self, bus: &mut I2CBus) -> SensorResult<FifoReadout> {
        if !self.fifo_ready(bus).await? {
            return Ok(FifoReadout {
                status: FifoStatus::Pending,
                temperatures: Vec::new(),
                pressures: Vec::new(),
                altitudes: Vec::new(),
                sensor_time: 0,
            });
        }
        let (time, _, _) = self.fifo_flags();
        // The sensor-time frame is appended after the stored length
        let length = (self.fifo_length(bus).await? + time * 4) as usize;
        let mut raw = vec![0u8; length];
        if length > 0 {
            bus.read_bytes(self.address, FIFO_DATA, &mut raw).await?;
        }
        self.parse_fifo(&raw)
    }

    fn parse_fifo(&self, raw: &[u8]) -> SensorResult<FifoReadout> {
        let cal = self.calibration()?;
        let mut out = FifoReadout {
            status: FifoStatus::Ready,
            temperatures: Vec::new(),
            pressures: Vec::new(),
            altitudes: Vec::new(),
            sensor_time: 0,
        };
        let mut i = 0;
        while i < raw.len() {
            let header = raw[i];
            let body = &raw[i + 1..];
            match header {
                FIFO_SENSOR_PRESS if body.len() >= 6 => {
                    let t = cal.temperature(u24(&body[0..3]));
                    let p = (cal.pressure(u24(&body[3..6]), t) / 100.0) as f32;
                    out.temperatures.push(t as f32);
                    out.pressures.push(p);
                    if self.alt_enable {
                        out.altitudes.push(self.altitude_for(t as f32, p));
                    }
                    i += 7;
                }
                FIFO_SENSOR_TEMP if body.len() >= 3 => {
                    out.temperatures.push(cal.temperature(u24(&body[0..3])) as f32);
                    i += 4;
                }
                FIFO_SENSOR_TIME if body.len() >= 3 => {
                    out.sensor_time = u24(&body[0..3]);
                    i += 4;
                }
                FIFO_CONFIG_ERROR => {
                    out.status = FifoStatus::ConfigError;
                    i += 2;
                }
                FIFO_CONFIG_CHANGE | FIFO_EMPTY => i += 2,
                // Truncated frame at the end of the burst
                FIFO_SENSOR_PRESS | FIFO_SENSOR_TEMP | FIFO_SENSOR_TIME => break,
                _ => i += 1,
            }
        }
        Ok(out)
    }

    /// 24-bit free-running counter
    pub async fn sensor_time(&self, bus: &mut I2CBus) -> SensorResult<u32> {
        let mut data = [0u8; 3];
        bus.read_bytes(self.address, SENSORTIME_0, &mut data).await?;
        Ok(u24(&data))
    }

    pub async fn enable_i2c_watchdog(&self, bus: &mut I2CBus) -> SensorResult<()> {
        let value = self.read8(bus, IF_CONF).await? | (1 << 1);
        self.write8(bus, IF_CONF, value).await
    }

    pub async fn disable_i2c_watchdog(&self, bus: &mut I2CBus) -> SensorResult<()> {
        let value = self.read8(bus, IF_CONF).await? & !(1 << 1);
        self.write8(bus, IF_CONF, value).await
    }

    pub async fn set_i2c_watchdog_timeout(&self, bus: &mut I2CBus, timeout: WatchdogTimeout) -> SensorResult<()> {
        let value = (self.read8(bus, IF_CONF).await? & !(1 << 2)) | ((timeout as u8 & 0x01) << 2);
        self.write8(bus, IF_CONF, value).await
    }

    pub async fn error_reg(&self, bus: &mut I2CBus) -> SensorResult<u8> {
        self.read8(bus, ERR_REG).await
    }

    pub async fn status_reg(&self, bus: &mut I2CBus) -> SensorResult<u8> {
        self.read8(bus, STATUS).await
    }
}

#[async_trait]
impl SensorDriver for Bmp388 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        self.begin(i2c).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let i2c = bus.i2c(&self.id)?;
        if self.start_forced_conversion(i2c).await? {
            sleep(Duration::from_millis(40)).await;
        }
        let mut frame = SensorDataFrame::default();
        if let Some((t, p, alt)) = self.measurements(i2c).await? {
            frame.temperature = Some(t);
            frame.pressure = Some(p);
            frame.altitude = Some(alt);
        }
        Ok(frame)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn bus(&self) -> &str {
        &self.bus_id
    }
}

pub static BMP388_FACTORY: Bmp388Factory = Bmp388Factory;

pub struct Bmp388Factory;

impl SensorFactory for Bmp388Factory {
    fn name(&self) -> &'static str {
        "bmp388"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        // Continuous sampling at a rate the oversampling can keep up with
        let settings = Settings {
            mode: Mode::Normal,
            pressure_oversampling: Oversampling::X8,
            temperature_oversampling: Oversampling::X1,
            iir_filter: IirFilter::C3,
            time_standby: TimeStandby::Ms40,
        };
        let mut sensor = Bmp388::new(
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{AddrMode, MockI2c};

    // T1 = 27000, T2 = 2^14, T3 = 0: temperature is (adc - 27000 * 256) / 2^16.
    // P1 = P2 = 2^14 and P5 = 12650 leave a flat 101200 Pa.
    fn simple_trim() -> [u8; 21] {
        let mut trim = [0u8; 21];
        trim[0..2].copy_from_slice(&27000u16.to_le_bytes());
        trim[2..4].copy_from_slice(&16384u16.to_le_bytes());
        trim[5..7].copy_from_slice(&16384i16.to_le_bytes());
        trim[7..9].copy_from_slice(&16384i16.to_le_bytes());
        trim[11..13].copy_from_slice(&12650u16.to_le_bytes());
        trim
    }

    const ADC_25C: u32 = 27000 * 256 + 25 * 65536;

    fn mock_chip() -> (I2CBus, MockI2c) {
        let (bus, mock) = MockI2c::new();
        mock.add_device(DEFAULT_ADDRESS, AddrMode::Reg8);
        mock.set_reg(DEFAULT_ADDRESS, CHIP_ID as u16, BMP388_ID);
        mock.set_reg(DEFAULT_ADDRESS, STATUS as u16, STATUS_CMD_RDY);
        mock.set_reg(DEFAULT_ADDRESS, EVENT as u16, 0x01);
        mock.set_regs(DEFAULT_ADDRESS, TRIM_PARAMS as u16, &simple_trim());
        (bus, mock)
    }

    #[test]
    fn trim_scaling_follows_datasheet_exponents() {
        let cal = Calibration::from_registers(&simple_trim());
        assert!((cal.temperature(ADC_25C) - 25.0).abs() < 1e-9);
        let p = cal.pressure(123456, 25.0);
        assert!((p - 101200.0).abs() < 1e-6, "p = {}", p);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_programs_registers_and_enables_both_channels() {
        let (mut bus, mock) = mock_chip();
        let settings = Settings {
            mode: Mode::Normal,
            pressure_oversampling: Oversampling::X8,
            temperature_oversampling: Oversampling::X2,
            iir_filter: IirFilter::C3,
            time_standby: TimeStandby::Ms40,
        };
        let mut sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into()).with_settings(settings);
        sensor.begin(&mut bus).await.unwrap();

        assert_eq!(mock.writes(DEFAULT_ADDRESS)[0], vec![CMD, RESET_CODE]);
        assert_eq!(mock.reg(DEFAULT_ADDRESS, OSR as u16), (1 << 3) | 3);
        assert_eq!(mock.reg(DEFAULT_ADDRESS, CONFIG as u16), 2 << 1);
        assert_eq!(mock.reg(DEFAULT_ADDRESS, ODR as u16), 0x03);
        assert_eq!(mock.reg(DEFAULT_ADDRESS, PWR_CTRL as u16), 0x33);
        assert_eq!(sensor.mode(), Mode::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_power_on_event_fails_init() {
        let (mut bus, mock) = mock_chip();
        mock.set_reg(DEFAULT_ADDRESS, EVENT as u16, 0x00);
        let mut sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into());
        assert!(matches!(sensor.begin(&mut bus).await, Err(SensorError::InitError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_command_interface_stops_configuration() {
        let (mut bus, mock) = mock_chip();
        mock.set_reg(DEFAULT_ADDRESS, STATUS as u16, 0x00);
        let mut sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into());
        assert!(matches!(sensor.begin(&mut bus).await, Err(SensorError::ReadError { .. })));
        assert!(!mock
            .writes(DEFAULT_ADDRESS)
            .iter()
            .any(|w| w.len() == 2 && w[0] == PWR_CTRL));

        assert!(sensor.set_mode(&mut bus, Mode::Normal).await.is_err());
        assert_eq!(mock.reg(DEFAULT_ADDRESS, PWR_CTRL as u16), 0x00);
    }

    #[tokio::test(start_paused = true)]
    async fn bmp390_is_accepted_and_others_rejected() {
        let (mut bus, mock) = mock_chip();
        mock.set_reg(DEFAULT_ADDRESS, CHIP_ID as u16, BMP390_ID);
        let mut sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.begin(&mut bus).await.unwrap();

        mock.set_reg(DEFAULT_ADDRESS, CHIP_ID as u16, 0x58);
        assert!(matches!(
            sensor.begin(&mut bus).await,
            Err(SensorError::WrongChipId { actual: 0x58, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn readings_wait_for_data_ready() {
        let (mut bus, mock) = mock_chip();
        let mut sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.begin(&mut bus).await.unwrap();
        let mut data = [0u8; 6];
        data[0..3].copy_from_slice(&123456u32.to_le_bytes()[0..3]);
        data[3..6].copy_from_slice(&ADC_25C.to_le_bytes()[0..3]);
        mock.set_regs(DEFAULT_ADDRESS, DATA_0 as u16, &data);

        assert_eq!(sensor.temp_pres(&mut bus).await.unwrap(), None);

        mock.set_reg(DEFAULT_ADDRESS, INT_STATUS as u16, INT_DRDY);
        let (t, p, alt) = sensor.measurements(&mut bus).await.unwrap().unwrap();
        assert!((t - 25.0).abs() < 1e-4);
        assert!((p - 1012.0).abs() < 1e-3);
        assert!(alt.abs() < 15.0);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_conversion_returns_to_sleep_once_consumed() {
        let (mut bus, mock) = mock_chip();
        let mut sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.begin(&mut bus).await.unwrap();
        assert_eq!(sensor.mode(), Mode::Sleep);

        assert!(sensor.start_forced_conversion(&mut bus).await.unwrap());
        assert_eq!(sensor.mode(), Mode::Forced);
        // Already converting: a second request is ignored
        assert!(!sensor.start_forced_conversion(&mut bus).await.unwrap());

        mock.set_reg(DEFAULT_ADDRESS, INT_STATUS as u16, INT_DRDY);
        assert!(sensor.temperature(&mut bus).await.unwrap().is_some());
        assert_eq!(sensor.mode(), Mode::Sleep);
        assert_eq!(mock.reg(DEFAULT_ADDRESS, PWR_CTRL as u16), 0x03);
    }

    #[tokio::test(start_paused = true)]
    async fn watermark_must_fit_the_fifo() {
        let (mut bus, mock) = mock_chip();
        let mut sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.begin(&mut bus).await.unwrap();
        sensor.enable_fifo(&mut bus, FifoConfig::default()).await.unwrap();
        assert_eq!(mock.reg(DEFAULT_ADDRESS, FIFO_CONFIG_1 as u16), 0x1F);
        assert_eq!(mock.reg(DEFAULT_ADDRESS, FIFO_CONFIG_2 as u16), 1 << 3);

        // 10 pressure+temperature frames of 7 bytes
        sensor.set_fifo_measurements(&mut bus, 10).await.unwrap();
        assert_eq!(sensor.fifo_watermark(&mut bus).await.unwrap(), 70);

        let err = sensor.set_fifo_watermark(&mut bus, 510).await.unwrap_err();
        assert!(matches!(err, SensorError::InvalidArgument { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_frames_are_decoded() {
        let (mut bus, mock) = mock_chip();
        let mut sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.begin(&mut bus).await.unwrap();
        sensor.enable_fifo(&mut bus, FifoConfig::default()).await.unwrap();

        assert_eq!(sensor.fifo_data(&mut bus).await.unwrap().status, FifoStatus::Pending);

        let t = ADC_25C.to_le_bytes();
        let p = 123456u32.to_le_bytes();
        let mut fifo = vec![FIFO_CONFIG_CHANGE, 0x00];
        for _ in 0..2 {
            fifo.push(FIFO_SENSOR_PRESS);
            fifo.extend_from_slice(&t[0..3]);
            fifo.extend_from_slice(&p[0..3]);
        }
        fifo.push(FIFO_SENSOR_TEMP);
        fifo.extend_from_slice(&t[0..3]);
        let stored = fifo.len() as u16;
        fifo.extend_from_slice(&[FIFO_SENSOR_TIME, 0x10, 0x27, 0x00]);

        // INT_STATUS, FIFO_LENGTH, then the burst from FIFO_DATA
        mock.queue_read(DEFAULT_ADDRESS, &[INT_FWM]);
        mock.queue_read(DEFAULT_ADDRESS, &stored.to_le_bytes());
        mock.queue_read(DEFAULT_ADDRESS, &fifo);

        let out = sensor.fifo_data(&mut bus).await.unwrap();
        assert_eq!(out.status, FifoStatus::Ready);
        assert_eq!(out.temperatures.len(), 3);
        assert_eq!(out.pressures.len(), 2);
        assert_eq!(out.altitudes.len(), 2);
        assert!((out.pressures[0] - 1012.0).abs() < 1e-3);
        assert_eq!(out.sensor_time, 10000);
    }

    #[test]
    fn config_error_frame_sets_status() {
        let mut sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.calibration = Some(Calibration::from_registers(&simple_trim()));
        let out = sensor.parse_fifo(&[FIFO_CONFIG_ERROR, 0x00, FIFO_EMPTY, 0x00]).unwrap();
        assert_eq!(out.status, FifoStatus::ConfigError);
        assert!(out.temperatures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_bits_are_read_modify_write() {
        let (mut bus, mock) = mock_chip();
        let sensor = Bmp388::new("baro0".into(), DEFAULT_ADDRESS, "i2c1".into());
        mock.set_reg(DEFAULT_ADDRESS, IF_CONF as u16, 0x01);
        sensor.enable_i2c_watchdog(&mut bus).await.unwrap();
        sensor.set_i2c_watchdog_timeout(&mut bus, WatchdogTimeout::Ms40).await.unwrap();
        assert_eq!(mock.reg(DEFAULT_ADDRESS, IF_CONF as u16), 0x07);
        sensor.disable_i2c_watchdog(&mut bus).await.unwrap();
        assert_eq!(mock.reg(DEFAULT_ADDRESS, IF_CONF as u16), 0x05);

        mock.set_regs(DEFAULT_ADDRESS, SENSORTIME_0 as u16, &[0x01, 0x02, 0x03]);
        assert_eq!(sensor.sensor_time(&mut bus).await.unwrap(), 0x030201);
    }
}
