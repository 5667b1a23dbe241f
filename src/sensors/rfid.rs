//! 125 kHz RFID reader board.
//!
//! The same board talks either I2C (through its Qwiic microcontroller) or
//! plain UART text frames. Which one is used follows the bus the sensor is
//! configured on.

use super::qwiic::{QwiicDevice, DEFAULT_ADDRESS};
use super::{RfidTag, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::serial::SerialBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

const REG_AVAILABLE: u8 = 0;
const REG_TAG_ID: u8 = 1;
const REG_RAW_DATA: u8 = 2;
const REG_CLEAR: u8 = 3;

const PING: &[u8] = b"#rfping\n";
const PONG: &str = "#hello";
const SERIAL_IDLE: Duration = Duration::from_millis(100);
const PING_SETTLE: Duration = Duration::from_millis(15);
const PONG_MAX_LEN: usize = 25;
const FRAME_MAX_LEN: usize = 30;

pub struct Rfid {
    id: String,
    bus_id: String,
    dev: QwiicDevice,
    /// Last UART frame, handed out once
    tag_id: u32,
    raw: u64,
}

impl Rfid {
    pub fn new(id: String, bus_id: String, address: u8) -> Self {
        Self {
            id,
            bus_id,
            dev: QwiicDevice::new(address),
            tag_id: 0,
            raw: 0,
        }
    }

    fn wrong_bus(&self) -> SensorError {
        SensorError::BusMismatch {
            sensor: self.id.clone(),
            expected: "i2c or serial",
        }
    }

    /// True when the reader answers. Over I2C this also drops any stale tag.
    pub async fn check_hw(&mut self, bus: &mut Bus) -> SensorResult<bool> {
        match bus {
            Bus::I2c(i2c) => {
                if !self.dev.is_present(i2c).await {
                    return Ok(false);
                }
                self.dev.send_address(i2c, REG_CLEAR).await?;
                Ok(true)
            }
            Bus::Serial(port) => {
                port.write_all(PING).await?;
                sleep(PING_SETTLE).await;
                let reply = port.read_until_idle(PONG_MAX_LEN, SERIAL_IDLE).await?;
                Ok(String::from_utf8_lossy(&reply).contains(PONG))
            }
            _ => Err(self.wrong_bus()),
        }
    }

    /// Whether a new tag has been read. Over UART this consumes one frame.
    pub async fn available(&mut self, bus: &mut Bus) -> SensorResult<bool> {
        match bus {
            Bus::I2c(i2c) => {
                let mut flag = [0u8; 1];
                self.dev.read_register(i2c, REG_AVAILABLE, &mut flag).await?;
                Ok(flag[0] != 0)
            }
            Bus::Serial(port) => self.poll_serial(port).await,
            _ => Err(self.wrong_bus()),
        }
    }

    async fn poll_serial(&mut self, port: &mut SerialBus) -> SensorResult<bool> {
        let data = port.read_until_idle(FRAME_MAX_LEN, SERIAL_IDLE).await?;
        if data.is_empty() {
            return Ok(false);
        }
        let text = String::from_utf8_lossy(&data);
        match parse_frame(&text) {
            Some((tag_id, raw)) => {
                self.tag_id = tag_id;
                self.raw = raw;
                Ok(tag_id != 0 && raw != 0)
            }
            None => {
                debug!("[{}] ignoring serial data {:?}", self.id, text);
                Ok(false)
            }
        }
    }

    /// Tag ID number. Over UART the cached value is cleared once read.
    pub async fn tag_id(&mut self, bus: &mut Bus) -> SensorResult<u32> {
        match bus {
            Bus::I2c(i2c) => {
                let mut data = [0u8; 4];
                self.dev.read_register(i2c, REG_TAG_ID, &mut data).await?;
                Ok(u32::from_le_bytes(data))
            }
            Bus::Serial(_) => Ok(std::mem::take(&mut self.tag_id)),
            _ => Err(self.wrong_bus()),
        }
    }

    /// Raw 64-bit tag frame (header, data, parity)
    pub async fn raw(&mut self, bus: &mut Bus) -> SensorResult<u64> {
        match bus {
            Bus::I2c(i2c) => {
                let mut data = [0u8; 8];
                self.dev.read_register(i2c, REG_RAW_DATA, &mut data).await?;
                Ok(u64::from_le_bytes(data))
            }
            Bus::Serial(_) => Ok(std::mem::take(&mut self.raw)),
            _ => Err(self.wrong_bus()),
        }
    }

    /// Drop the board's latched tag. The UART protocol has no equivalent.
    pub async fn clear(&mut self, bus: &mut Bus) -> SensorResult<()> {
        match bus {
            Bus::I2c(i2c) => Ok(self.dev.send_address(i2c, REG_CLEAR).await?),
            Bus::Serial(_) => Ok(()),
            _ => Err(self.wrong_bus()),
        }
    }
}

/// Split a `$<decimal id>&<hex raw>` frame
fn parse_frame(text: &str) -> Option<(u32, u64)> {
    let id_start = text.find('$')?;
    let raw_start = text.find('&')?;
    let id = text.get(id_start + 1..raw_start)?.trim().parse().ok()?;
    Some((id, parse_hex_u64(&text[raw_start + 1..])))
}

/// Parse up to 16 hex digits, ignoring anything that is not a hex digit.
/// Short input is right-padded with zeros.
pub fn parse_hex_u64(text: &str) -> u64 {
    let mut digits: String = text
        .chars()
        .filter(char::is_ascii_hexdigit)
        .take(16)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    while digits.len() < 16 {
        digits.push('0');
    }
    digits.chars().fold(0u64, |acc, c| (acc << 4) | hex_digit(c) as u64)
}

pub fn format_hex64(value: u64) -> String {
    format!("{:016X}", value)
}

/// Value of one hex digit; anything else reads as 0
pub fn hex_digit(c: char) -> u8 {
    c.to_digit(16).map(|d| d as u8).unwrap_or(0)
}

/// Upper-case hex digit for the low nibble of `value`
pub fn hex_char(value: u8) -> char {
    let nibble = value & 0x0F;
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'A' + nibble - 10) as char,
    }
}

#[async_trait]
impl SensorDriver for Rfid {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        if self.check_hw(bus).await? {
            Ok(())
        } else {
            Err(SensorError::init(&self.id, "RFID reader did not answer"))
        }
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        if !self.available(bus).await? {
            return Ok(SensorDataFrame::default());
        }
        let tag = RfidTag {
            id: self.tag_id(bus).await?,
            raw: self.raw(bus).await?,
        };
        self.clear(bus).await?;
        Ok(SensorDataFrame {
            rfid: Some(tag),
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

pub static RFID_FACTORY: RfidFactory = RfidFactory;

pub struct RfidFactory;

impl SensorFactory for RfidFactory {
    fn name(&self) -> &'static str {
        "rfid"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        Ok(Box::new(Rfid::new(
            entry.id.clone(),
            entry.bus.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
        )))
    }
}
