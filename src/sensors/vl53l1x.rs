//! ST VL53L1X time-of-flight ranging sensor.
//!
//! The chip uses 16-bit register addresses. Bring-up follows the ST
//! ultra-lite driver: soft reset, model check, one 91-byte block write of
//! the default configuration at 0x2D, then the part-to-part offset fixup.

use super::{SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::i2c::I2CBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

pub const DEFAULT_ADDRESS: u8 = 0x29;
pub const MODEL_ID: u16 = 0xEACC;

const SOFT_RESET: u16 = 0x0000;
const ALGO_PART_TO_PART_RANGE_OFFSET_MM: u16 = 0x001E;
const MM_CONFIG_OUTER_OFFSET_MM: u16 = 0x0022;
const CONFIG_START: u16 = 0x002D;
const GPIO_HV_MUX_CTRL: u16 = 0x0030;
const SYSTEM_INTERRUPT_CONFIG_GPIO: u16 = 0x0046;
const SYSTEM_THRESH_HIGH: u16 = 0x0072;
const SYSTEM_THRESH_LOW: u16 = 0x0074;
const SYSTEM_INTERRUPT_CLEAR: u16 = 0x0086;
const SYSTEM_MODE_START: u16 = 0x0087;
const RESULT_RANGE_STATUS: u16 = 0x0089;
const IDENTIFICATION_MODEL_ID: u16 = 0x010F;

const INTERRUPT_NEW_SAMPLE_READY: u8 = 0x20;
const INTERRUPT_NO_TARGET: u8 = 0x40;
const MODE_START_CONTINUOUS: u8 = 0x40;

/// Registers 0x2D..=0x87 as loaded at init
pub const DEFAULT_CONFIGURATION: [u8; 91] = [
    0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x02, 0x08, 0x00, 0x08, 0x10, 0x01, 0x01, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x0B, 0x00, 0x00, 0x02, 0x0A, 0x21,
    0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0xC8, 0x00, 0x00, 0x38, 0xFF, 0x01, 0x00, 0x08, 0x00,
    0x00, 0x01, 0xDB, 0x0F, 0x01, 0xF1, 0x0D, 0x01, 0x68, 0x00, 0x80, 0x08, 0xB8, 0x00, 0x00, 0x00,
    0x00, 0x0F, 0x89, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x0F, 0x0D, 0x0E, 0x0E, 0x00,
    0x00, 0x02, 0xC7, 0xFF, 0x9B, 0x00, 0x00, 0x00, 0x01, 0x01, 0x40,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RangeStatus {
    Ok,
    HardwareFail,
    MinRangeFail,
    SynchronizationInt,
    OutOfBoundsFail,
    SignalFail,
    WrapTargetFail,
    XtalkSignalFail,
    RangeValidMinRangeClipped,
    RangeValidNoWrapCheckFail,
}

impl RangeStatus {
    /// Decode the raw device status. Codes outside the table give `None`.
    pub fn from_raw(status: u8, stream_count: u8) -> Option<Self> {
        Some(match status {
            1 | 2 | 3 | 17 => RangeStatus::HardwareFail,
            13 => RangeStatus::MinRangeFail,
            18 => RangeStatus::SynchronizationInt,
            5 => RangeStatus::OutOfBoundsFail,
            4 | 6 => RangeStatus::SignalFail,
            7 => RangeStatus::WrapTargetFail,
            12 => RangeStatus::XtalkSignalFail,
            8 => RangeStatus::RangeValidMinRangeClipped,
            9 if stream_count == 0 => RangeStatus::RangeValidNoWrapCheckFail,
            9 => RangeStatus::Ok,
            _ => return None,
        })
    }

    pub fn is_valid(self) -> bool {
        matches!(
            self,
            RangeStatus::Ok | RangeStatus::RangeValidMinRangeClipped | RangeStatus::RangeValidNoWrapCheckFail
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangingResult {
    pub range_mm: u16,
    pub status: Option<RangeStatus>,
    /// Mcps, crosstalk corrected
    pub peak_signal_rate: f32,
    /// Mcps
    pub ambient_rate: f32,
}

impl RangingResult {
    /// Decode the 17-byte result block starting at RESULT__RANGE_STATUS
    pub fn from_block(data: &[u8; 17]) -> Self {
        let be = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
        Self {
            range_mm: be(13),
            status: RangeStatus::from_raw(data[0], data[2]),
            peak_signal_rate: be(15) as f32 / 128.0,
            ambient_rate: be(7) as f32 / 128.0,
        }
    }
}

/// Condition that raises the distance interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdWindow {
    Below = 0,
    Above = 1,
    Out = 2,
    In = 3,
}

pub struct Vl53l1x {
    id: String,
    address: u8,
    bus_id: String,
}

impl Vl53l1x {
    pub fn new(id: String, address: u8, bus_id: String) -> Self {
        Self { id, address, bus_id }
    }

    async fn write_reg(&self, bus: &mut I2CBus, reg: u16, value: u8) -> SensorResult<()> {
        bus.write_bytes16(self.address, reg, &[value]).await?;
        Ok(())
    }

    async fn write_reg16(&self, bus: &mut I2CBus, reg: u16, value: u16) -> SensorResult<()> {
        bus.write_bytes16(self.address, reg, &value.to_be_bytes()).await?;
        Ok(())
    }

    async fn read_reg(&self, bus: &mut I2CBus, reg: u16) -> SensorResult<u8> {
        let mut buf = [0u8; 1];
        bus.read_bytes16(self.address, reg, &mut buf).await?;
        Ok(buf[0])
    }

    async fn read_reg16(&self, bus: &mut I2CBus, reg: u16) -> SensorResult<u16> {
        let mut buf = [0u8; 2];
        bus.read_bytes16(self.address, reg, &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    pub async fn begin(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.reset(bus).await?;
        sleep(Duration::from_millis(1)).await;

        let model = self.model_id(bus).await?;
        if model != MODEL_ID {
            return Err(SensorError::WrongChipId {
                sensor: self.id.clone(),
                expected: MODEL_ID,
                actual: model,
            });
        }

        bus.write_bytes16(self.address, CONFIG_START, &DEFAULT_CONFIGURATION)
            .await?;

        let outer_offset = self.read_reg16(bus, MM_CONFIG_OUTER_OFFSET_MM).await?;
        self.write_reg16(bus, ALGO_PART_TO_PART_RANGE_OFFSET_MM, outer_offset.wrapping_mul(4))
            .await?;
        debug!("[{}] offset correction {} mm", self.id, outer_offset);

        sleep(Duration::from_millis(200)).await;
        Ok(())
    }

    pub async fn model_id(&self, bus: &mut I2CBus) -> SensorResult<u16> {
        self.read_reg16(bus, IDENTIFICATION_MODEL_ID).await
    }

    pub async fn reset(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.write_reg(bus, SOFT_RESET, 0x00).await?;
        sleep(Duration::from_millis(100)).await;
        self.write_reg(bus, SOFT_RESET, 0x01).await
    }

    /// Last measured distance in mm
    pub async fn distance(&self, bus: &mut I2CBus) -> SensorResult<u16> {
        Ok(self.read_detailed(bus).await?.range_mm)
    }

    pub async fn read_detailed(&self, bus: &mut I2CBus) -> SensorResult<RangingResult> {
        let mut data = [0u8; 17];
        bus.read_bytes16(self.address, RESULT_RANGE_STATUS, &mut data).await?;
        Ok(RangingResult::from_block(&data))
    }

    /// Interrupt on distance relative to `[low_mm, high_mm]`. `no_target`
    /// also fires when nothing is in range.
    pub async fn set_distance_threshold(
        &self,
        bus: &mut I2CBus,
        low_mm: u16,
        high_mm: u16,
        window: ThresholdWindow,
        no_target: bool,
    ) -> SensorResult<()> {
        let mut config = self.read_reg(bus, SYSTEM_INTERRUPT_CONFIG_GPIO).await? & 0x47;
        config |= window as u8;
        if no_target {
            config |= INTERRUPT_NO_TARGET;
        }
        self.write_reg(bus, SYSTEM_INTERRUPT_CONFIG_GPIO, config).await?;
        self.write_reg16(bus, SYSTEM_THRESH_LOW, low_mm).await?;
        self.write_reg16(bus, SYSTEM_THRESH_HIGH, high_mm).await
    }

    pub async fn start_ranging(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.clear_interrupt(bus).await?;
        self.write_reg(bus, SYSTEM_MODE_START, MODE_START_CONTINUOUS).await
    }

    pub async fn stop_ranging(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.write_reg(bus, SYSTEM_MODE_START, 0x00).await
    }

    /// GPIO1 goes low when a new sample is ready
    pub async fn enable_interrupt(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.write_reg(bus, SYSTEM_INTERRUPT_CONFIG_GPIO, INTERRUPT_NEW_SAMPLE_READY)
            .await?;
        let mux = self.read_reg(bus, GPIO_HV_MUX_CTRL).await?;
        self.write_reg(bus, GPIO_HV_MUX_CTRL, mux | 0x10).await
    }

    pub async fn clear_interrupt(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.write_reg(bus, SYSTEM_INTERRUPT_CLEAR, 0x01).await
    }
}

#[async_trait]
impl SensorDriver for Vl53l1x {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        self.begin(i2c).await?;
        self.start_ranging(i2c).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let i2c = bus.i2c(&self.id)?;
        let result = self.read_detailed(i2c).await?;
        self.clear_interrupt(i2c).await?;
        let distance_mm = match result.status {
            Some(status) if status.is_valid() => Some(result.range_mm as f32),
            status => {
                debug!("[{}] discarding range, status {:?}", self.id, status);
                None
            }
        };
        Ok(SensorDataFrame {
            distance_mm,
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

pub static VL53L1X_FACTORY: Vl53l1xFactory = Vl53l1xFactory;

pub struct Vl53l1xFactory;

impl SensorFactory for Vl53l1xFactory {
    fn name(&self) -> &'static str {
        "vl53l1x"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        Ok(Box::new(Vl53l1x::new(
            entry.id.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
            entry.bus.clone(),
        )))
    }
}
