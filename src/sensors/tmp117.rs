//! TI TMP117 high-accuracy digital thermometer.
//!
//! All registers are 16 bits wide and transferred MSB first. Temperatures
//! (reading, limits and offset) share one fixed-point format of 7.8125 m°C
//! per LSB.

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

pub const DEFAULT_ADDRESS: u8 = 0x49;
pub const RESOLUTION: f32 = 0.0078125;

const TEMPERATURE: u8 = 0x00;
const CONFIGURATION: u8 = 0x01;
const TEMP_HIGH_LIMIT: u8 = 0x02;
const TEMP_LOW_LIMIT: u8 = 0x03;
const EEPROM_UNLOCK: u8 = 0x04;
const EEPROM1: u8 = 0x05;
const EEPROM2: u8 = 0x06;
const TEMP_OFFSET: u8 = 0x07;
const EEPROM3: u8 = 0x08;
const DEVICE_ID: u8 = 0x0F;

const CFG_HIGH_ALERT: u16 = 1 << 15;
const CFG_LOW_ALERT: u16 = 1 << 14;
const CFG_DATA_READY: u16 = 1 << 13;
const CFG_EEPROM_BUSY: u16 = 1 << 12;
const CFG_THERM_MODE: u16 = 1 << 4;
const CFG_POLARITY: u16 = 1 << 3;
const CFG_DR_ALERT: u16 = 1 << 2;
const CFG_SOFT_RESET: u16 = 1 << 1;

const EEPROM_UNLOCK_CODE: u16 = 1 << 15;
const EEPROM_BUSY: u16 = 1 << 14;

/// What the ALERT pin signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Thermal (hysteresis) mode
    Thermal,
    /// Window alert mode
    Alert,
    /// Data-ready flag
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    Continuous = 0,
    Shutdown = 1,
    OneShot = 3,
}

/// CONV[2:0]; actual cycle time also depends on averaging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionTime {
    Ms15_5 = 0,
    Ms125 = 1,
    Ms250 = 2,
    Ms500 = 3,
    S1 = 4,
    S4 = 5,
    S8 = 6,
    S16 = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Averaging {
    None = 0,
    Ave8 = 1,
    Ave32 = 2,
    Ave64 = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AlertType {
    #[default]
    None,
    High,
    Low,
}

/// Decoded configuration register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigReport {
    pub high_alert: bool,
    pub low_alert: bool,
    pub data_ready: bool,
    pub eeprom_busy: bool,
    pub conversion_mode: u8,
    pub conversion_cycle: u8,
    pub averaging: u8,
    pub therm_mode: bool,
    pub polarity: bool,
    pub dr_alert: bool,
    pub soft_reset: bool,
}

impl ConfigReport {
    pub fn from_register(reg: u16) -> Self {
        Self {
            high_alert: reg & CFG_HIGH_ALERT != 0,
            low_alert: reg & CFG_LOW_ALERT != 0,
            data_ready: reg & CFG_DATA_READY != 0,
            eeprom_busy: reg & CFG_EEPROM_BUSY != 0,
            conversion_mode: ((reg >> 10) & 0x3) as u8,
            conversion_cycle: ((reg >> 7) & 0x7) as u8,
            averaging: ((reg >> 5) & 0x3) as u8,
            therm_mode: reg & CFG_THERM_MODE != 0,
            polarity: reg & CFG_POLARITY != 0,
            dr_alert: reg & CFG_DR_ALERT != 0,
            soft_reset: reg & CFG_SOFT_RESET != 0,
        }
    }
}

fn to_fixed(celsius: f32) -> u16 {
    (celsius / RESOLUTION) as i16 as u16
}

fn from_fixed(raw: u16) -> f32 {
    raw as i16 as f32 * RESOLUTION
}

pub struct Tmp117 {
    id: String,
    address: u8,
    bus_id: String,
    alert_type: AlertType,
    data_ready: bool,
}

impl Tmp117 {
    pub fn new(id: String, address: u8, bus_id: String) -> Self {
        Self {
            id,
            address,
            bus_id,
            alert_type: AlertType::None,
            data_ready: false,
        }
    }

    async fn write16(&self, bus: &mut I2CBus, reg: u8, value: u16) -> SensorResult<()> {
        bus.write_bytes(self.address, reg, &value.to_be_bytes()).await?;
        sleep(Duration::from_millis(10)).await;
        Ok(())
    }

    async fn read16(&self, bus: &mut I2CBus, reg: u8) -> SensorResult<u16> {
        let mut data = [0u8; 2];
        bus.read_bytes(self.address, reg, &mut data).await?;
        Ok(u16::from_be_bytes(data))
    }

    async fn write_config(&self, bus: &mut I2CBus, value: u16) -> SensorResult<()> {
        if self.eeprom_busy(bus).await? {
            return Err(SensorError::EepromBusy { sensor: self.id.clone() });
        }
        self.write16(bus, CONFIGURATION, value).await
    }

    /// Continuous conversion every 125 ms with 8x averaging, ALERT as data-ready, zero offset
    pub async fn init(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.set_conversion_mode(bus, ConversionMode::Continuous).await?;
        self.set_conversion_time(bus, ConversionTime::Ms125).await?;
        self.set_averaging(bus, Averaging::Ave8).await?;
        self.set_alert_mode(bus, PinMode::Data).await?;
        self.set_offset_temperature(bus, 0.0).await
    }

    /// Reads the configuration register, records the alert type and clears latched alert flags
    pub async fn read_config(&mut self, bus: &mut I2CBus) -> SensorResult<u16> {
        let reg = self.read16(bus, CONFIGURATION).await?;
        self.data_ready = reg & CFG_DATA_READY != 0;

        let high = reg & CFG_HIGH_ALERT != 0;
        let low = reg & CFG_LOW_ALERT != 0;
        self.alert_type = if high {
            AlertType::High
        } else if low {
            AlertType::Low
        } else {
            AlertType::None
        };
        if high || low {
            debug!("[{}] alert {:?} raised", self.id, self.alert_type);
            self.write16(bus, CONFIGURATION, reg & !(CFG_HIGH_ALERT | CFG_LOW_ALERT)).await?;
        }
        Ok(reg)
    }

    pub async fn update(&mut self, bus: &mut I2CBus) -> SensorResult<u16> {
        self.read_config(bus).await
    }

    pub async fn soft_reset(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.write_config(bus, CFG_SOFT_RESET).await
    }

    pub async fn set_alert_mode(&mut self, bus: &mut I2CBus, mode: PinMode) -> SensorResult<()> {
        let mut reg = self.read_config(bus).await?;
        match mode {
            PinMode::Thermal => {
                reg |= CFG_THERM_MODE;
                reg &= !(CFG_DR_ALERT | CFG_POLARITY);
            }
            PinMode::Alert => reg &= !(CFG_THERM_MODE | CFG_DR_ALERT | CFG_POLARITY),
            PinMode::Data => reg |= CFG_DR_ALERT,
        }
        self.write_config(bus, reg).await
    }

    /// Window alert mode, ALERT pin as alert flag, active low
    pub async fn configure_alert_mode(&self, bus: &mut I2CBus) -> SensorResult<()> {
        let reg = self.read16(bus, CONFIGURATION).await?;
        self.write_config(bus, reg & !(CFG_THERM_MODE | CFG_DR_ALERT | CFG_POLARITY))
            .await
    }

    pub async fn clear_alert_flags(&self, bus: &mut I2CBus) -> SensorResult<()> {
        let reg = self.read16(bus, CONFIGURATION).await?;
        self.write16(bus, CONFIGURATION, reg & !(CFG_HIGH_ALERT | CFG_LOW_ALERT)).await
    }

    pub async fn set_alert_temperature(&self, bus: &mut I2CBus, low: f32, high: f32) -> SensorResult<()> {
        if low > high {
            return Err(SensorError::invalid(
                &self.id,
                format!("alert window low {} °C above high {} °C", low, high),
            ));
        }
        self.write16(bus, TEMP_HIGH_LIMIT, to_fixed(high)).await?;
        self.write16(bus, TEMP_LOW_LIMIT, to_fixed(low)).await
    }

    pub async fn set_conversion_mode(&mut self, bus: &mut I2CBus, mode: ConversionMode) -> SensorResult<()> {
        let reg = self.read_config(bus).await?;
        self.write_config(bus, (reg & !(0x3 << 10)) | ((mode as u16 & 0x3) << 10))
            .await
    }

    pub async fn set_conversion_time(&mut self, bus: &mut I2CBus, time: ConversionTime) -> SensorResult<()> {
        let reg = self.read_config(bus).await?;
        self.write_config(bus, (reg & !(0x7 << 7)) | ((time as u16 & 0x7) << 7))
            .await
    }

    pub async fn set_averaging(&mut self, bus: &mut I2CBus, averaging: Averaging) -> SensorResult<()> {
        let reg = self.read_config(bus).await?;
        self.write_config(bus, (reg & !(0x3 << 5)) | ((averaging as u16 & 0x3) << 5))
            .await
    }

    pub async fn set_offset_temperature(&self, bus: &mut I2CBus, offset: f32) -> SensorResult<()> {
        self.write16(bus, TEMP_OFFSET, to_fixed(offset)).await
    }

    pub async fn offset_temperature(&self, bus: &mut I2CBus) -> SensorResult<f32> {
        Ok(from_fixed(self.read16(bus, TEMP_OFFSET).await?))
    }

    /// Calibrate the offset so the current reading becomes `target`
    pub async fn set_target_temperature(&self, bus: &mut I2CBus, target: f32) -> SensorResult<()> {
        let actual = self.temperature(bus).await?;
        self.set_offset_temperature(bus, target - actual).await
    }

    /// °C
    pub async fn temperature(&self, bus: &mut I2CBus) -> SensorResult<f32> {
        Ok(from_fixed(self.read16(bus, TEMPERATURE).await?))
    }

    pub async fn device_id(&self, bus: &mut I2CBus) -> SensorResult<u16> {
        Ok(self.read16(bus, DEVICE_ID).await? & 0x0FFF)
    }

    pub async fn device_revision(&self, bus: &mut I2CBus) -> SensorResult<u8> {
        Ok(((self.read16(bus, DEVICE_ID).await? >> 12) & 0xF) as u8)
    }

    pub fn alert_type(&self) -> AlertType {
        self.alert_type
    }

    /// Data-ready flag seen by the last configuration read
    pub fn data_ready(&self) -> bool {
        self.data_ready
    }

    pub async fn eeprom_busy(&self, bus: &mut I2CBus) -> SensorResult<bool> {
        Ok(self.read16(bus, EEPROM_UNLOCK).await? & EEPROM_BUSY != 0)
    }

    async fn unlock_eeprom(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.write16(bus, EEPROM_UNLOCK, EEPROM_UNLOCK_CODE).await?;
        sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    async fn lock_eeprom(&self, bus: &mut I2CBus) -> SensorResult<()> {
        self.write16(bus, EEPROM_UNLOCK, 0).await?;
        sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    fn eeprom_register(&self, slot: u8) -> SensorResult<u8> {
        match slot {
            1 => Ok(EEPROM1),
            2 => Ok(EEPROM2),
            3 => Ok(EEPROM3),
            _ => Err(SensorError::invalid(&self.id, format!("EEPROM slot {} not in 1..=3", slot))),
        }
    }

    /// Program one of the three general-purpose EEPROM words
    pub async fn write_eeprom(&self, bus: &mut I2CBus, slot: u8, data: u16) -> SensorResult<()> {
        let reg = self.eeprom_register(slot)?;
        if self.eeprom_busy(bus).await? {
            return Err(SensorError::EepromBusy { sensor: self.id.clone() });
        }
        self.unlock_eeprom(bus).await?;
        let written = self.write16(bus, reg, data).await;
        self.lock_eeprom(bus).await?;
        written
    }

    pub async fn read_eeprom(&self, bus: &mut I2CBus, slot: u8) -> SensorResult<u16> {
        let reg = self.eeprom_register(slot)?;
        if self.eeprom_busy(bus).await? {
            return Err(SensorError::EepromBusy { sensor: self.id.clone() });
        }
        self.read16(bus, reg).await
    }

    pub async fn config_report(&self, bus: &mut I2CBus) -> SensorResult<ConfigReport> {
        Ok(ConfigReport::from_register(self.read16(bus, CONFIGURATION).await?))
    }
}

#[async_trait]
impl SensorDriver for Tmp117 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        Tmp117::init(self, i2c).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let i2c = bus.i2c(&self.id)?;
        self.update(i2c).await?;
        Ok(SensorDataFrame {
            temperature: Some(self.temperature(i2c).await?),
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

pub static TMP117_FACTORY: Tmp117Factory = Tmp117Factory;

pub struct Tmp117Factory;

impl SensorFactory for Tmp117Factory {
    fn name(&self) -> &'static str {
        "tmp117"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        Ok(Box::new(Tmp117::new(
            entry.id.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
            entry.bus.clone(),
        )))
    }
}
