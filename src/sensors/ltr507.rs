//! Lite-On LTR-507 ambient light and proximity sensor.

use super::{SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::i2c::I2CBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::SensorResult;
use async_trait::async_trait;

pub const DEFAULT_ADDRESS: u8 = 0x3A;

const ALS_CONTR: u8 = 0x80;
const PS_CONTR: u8 = 0x81;
const PS_LED: u8 = 0x82;
const PS_N_PULSES: u8 = 0x83;
const PS_MEAS_RATE: u8 = 0x84;
const ALS_MEAS_RATE: u8 = 0x85;
const PART_ID: u8 = 0x86;
const ALS_DATA_0: u8 = 0x88;
const ALS_PS_STATUS: u8 = 0x8C;
const PS_DATA_0: u8 = 0x8D;

const ALS_MODE: u8 = 0x02;
const PS_MODE: u8 = 0x02;
const ALS_DATA_VALID: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlsGain {
    /// 1 lux .. 64k lux
    Range1 = 0,
    Range2 = 1,
    Range3 = 2,
    /// 0.01 lux .. 320 lux
    Range4 = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlsBitWidth {
    Bits20 = 0,
    Bits19 = 1,
    Bits18 = 2,
    Bits17 = 3,
    Bits16 = 4,
    Bits12 = 5,
    Bits8 = 6,
    Bits4 = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlsRate {
    Ms100 = 0,
    Ms200 = 1,
    Ms500 = 2,
    Ms1000 = 3,
    Ms2000 = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPulseFreq {
    Khz30 = 0,
    Khz40 = 1,
    Khz50 = 2,
    Khz60 = 3,
    Khz70 = 4,
    Khz80 = 5,
    Khz90 = 6,
    Khz100 = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedDutyCycle {
    Percent25 = 0,
    Percent50 = 1,
    Percent75 = 2,
    Percent100 = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPeakCurrent {
    Ma5 = 0,
    Ma10 = 1,
    Ma20 = 2,
    Ma50 = 3,
    Ma100 = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsRate {
    Ms12_5 = 0,
    Ms50 = 1,
    Ms70 = 2,
    Ms100 = 3,
    Ms200 = 4,
    Ms500 = 5,
    Ms1000 = 6,
    Ms2000 = 7,
}

pub struct Ltr507 {
    id: String,
    address: u8,
    bus_id: String,
}

impl Ltr507 {
    pub fn new(id: String, address: u8, bus_id: String) -> Self {
        Self { id, address, bus_id }
    }

    async fn update_bits(&self, bus: &mut I2CBus, reg: u8, mask: u8, value: u8) -> SensorResult<()> {
        let current = bus.read_u8(self.address, reg).await?;
        bus.write_byte(self.address, reg, (current & !mask) | (value & mask)).await?;
        Ok(())
    }

    /// Both channels on, 16-bit ALS at 100 ms, 60 kHz LED at 50 mA with one pulse
    pub async fn begin(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.set_als_mode(bus, true).await?;
        self.set_ps_mode(bus, true).await?;
        self.set_als_gain(bus, AlsGain::Range1).await?;
        self.set_als_bit_width(bus, AlsBitWidth::Bits16).await?;
        self.set_als_rate(bus, AlsRate::Ms100).await?;
        self.set_led_pulse_freq(bus, LedPulseFreq::Khz60).await?;
        self.set_led_duty_cycle(bus, LedDutyCycle::Percent50).await?;
        self.set_ps_rate(bus, PsRate::Ms100).await?;
        self.set_led_peak_current(bus, LedPeakCurrent::Ma50).await?;
        self.set_ps_pulses(bus, 1).await
    }

    pub async fn set_als_mode(&self, bus: &mut I2CBus, active: bool) -> SensorResult<()> {
        self.update_bits(bus, ALS_CONTR, ALS_MODE, if active { ALS_MODE } else { 0 })
            .await
    }

    pub async fn set_ps_mode(&self, bus: &mut I2CBus, active: bool) -> SensorResult<()> {
        self.update_bits(bus, PS_CONTR, PS_MODE, if active { PS_MODE } else { 0 })
            .await
    }

    pub async fn set_als_gain(&self, bus: &mut I2CBus, gain: AlsGain) -> SensorResult<()> {
        self.update_bits(bus, ALS_CONTR, 0x18, (gain as u8) << 3).await
    }

    pub async fn set_als_bit_width(&self, bus: &mut I2CBus, width: AlsBitWidth) -> SensorResult<()> {
        self.update_bits(bus, ALS_MEAS_RATE, 0xE0, (width as u8) << 5).await
    }

    pub async fn set_als_rate(&self, bus: &mut I2CBus, rate: AlsRate) -> SensorResult<()> {
        self.update_bits(bus, ALS_MEAS_RATE, 0x07, rate as u8).await
    }

    pub async fn set_led_pulse_freq(&self, bus: &mut I2CBus, freq: LedPulseFreq) -> SensorResult<()> {
        self.update_bits(bus, PS_LED, 0xE0, (freq as u8) << 5).await
    }

    pub async fn set_led_duty_cycle(&self, bus: &mut I2CBus, duty: LedDutyCycle) -> SensorResult<()> {
        self.update_bits(bus, PS_LED, 0x18, (duty as u8) << 3).await
    }

    pub async fn set_led_peak_current(&self, bus: &mut I2CBus, current: LedPeakCurrent) -> SensorResult<()> {
        self.update_bits(bus, PS_LED, 0x07, current as u8).await
    }

    pub async fn set_ps_rate(&self, bus: &mut I2CBus, rate: PsRate) -> SensorResult<()> {
        bus.write_byte(self.address, PS_MEAS_RATE, rate as u8 & 0x07).await?;
        Ok(())
    }

    /// LED pulses per proximity measurement, clamped to 1..=15
    pub async fn set_ps_pulses(&self, bus: &mut I2CBus, pulses: u8) -> SensorResult<()> {
        bus.write_byte(self.address, PS_N_PULSES, pulses.clamp(1, 15)).await?;
        Ok(())
    }

    pub async fn part_id(&self, bus: &mut I2CBus) -> SensorResult<u8> {
        Ok(bus.read_u8(self.address, PART_ID).await?)
    }

    /// Raw ALS counts; 0 while the ALS data is not valid
    pub async fn light_intensity(&self, bus: &mut I2CBus) -> SensorResult<u16> {
        let status = bus.read_u8(self.address, ALS_PS_STATUS).await?;
        if status & ALS_DATA_VALID == 0 {
            return Ok(0);
        }
        let mut data = [0u8; 2];
        bus.read_bytes(self.address, ALS_DATA_0, &mut data).await?;
        Ok(u16::from_le_bytes(data))
    }

    /// 11-bit proximity counts
    pub async fn proximity(&self, bus: &mut I2CBus) -> SensorResult<u16> {
        let mut data = [0u8; 2];
        bus.read_bytes(self.address, PS_DATA_0, &mut data).await?;
        Ok(u16::from_le_bytes([data[0], data[1] & 0x07]))
    }
}

#[async_trait]
impl SensorDriver for Ltr507 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        self.begin(i2c).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let i2c = bus.i2c(&self.id)?;
        Ok(SensorDataFrame {
            light: Some(self.light_intensity(i2c).await?),
            proximity: Some(self.proximity(i2c).await?),
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

pub static LTR507_FACTORY: Ltr507Factory = Ltr507Factory;

pub struct Ltr507Factory;

impl SensorFactory for Ltr507Factory {
    fn name(&self) -> &'static str {
        "ltr507"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        Ok(Box::new(Ltr507::new(
            entry.id.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
            entry.bus.clone(),
        )))
    }
}
