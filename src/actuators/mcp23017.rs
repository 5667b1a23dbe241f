//! Microchip MCP23017 16-bit I2C port expander.
//!
//! Registers are used in the power-on IOCON.BANK = 0 layout, where every
//! port A register is immediately followed by its port B twin. Pins 0..7
//! are A0..A7 and 8..15 are B0..B7.

use crate::bus::i2c::I2CBus;
use crate::errors::{SensorError, SensorResult};

pub const DEFAULT_ADDRESS: u8 = 0x20;

pub const A0: u8 = 0;
pub const A1: u8 = 1;
pub const A2: u8 = 2;
pub const A3: u8 = 3;
pub const A4: u8 = 4;
pub const A5: u8 = 5;
pub const A6: u8 = 6;
pub const A7: u8 = 7;
pub const B0: u8 = 8;
pub const B1: u8 = 9;
pub const B2: u8 = 10;
pub const B3: u8 = 11;
pub const B4: u8 = 12;
pub const B5: u8 = 13;
pub const B6: u8 = 14;
pub const B7: u8 = 15;

const REG_IODIR: u8 = 0x00;
const REG_IPOL: u8 = 0x02;
const REG_GPINTEN: u8 = 0x04;
const REG_DEFVAL: u8 = 0x06;
const REG_INTCON: u8 = 0x08;
const REG_IOCON: u8 = 0x0A;
const REG_GPPU: u8 = 0x0C;
const REG_INTF: u8 = 0x0E;
const REG_INTCAP: u8 = 0x10;
const REG_GPIO: u8 = 0x12;
const REG_OLAT: u8 = 0x14;

const IOCON_MIRROR: u8 = 1 << 6;
const IOCON_ODR: u8 = 1 << 2;
const IOCON_INTPOL: u8 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Output,
    Input,
    InputPullup,
}

/// Per-pin settings; `None` leaves the register bit untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PinSetup {
    pub mode: Option<PinMode>,
    pub pullup: Option<bool>,
    /// Report the inverse of the pin level
    pub invert: Option<bool>,
    pub interrupt_enable: Option<bool>,
    /// Interrupt on mismatch with `default_value` instead of on any change
    pub compare_default: Option<bool>,
    pub default_value: Option<bool>,
    /// Output latch level
    pub value: Option<bool>,
}

/// Device-wide interrupt pin behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpanderSetup {
    /// INT pins active high
    pub interrupt_polarity: Option<bool>,
    /// INTA and INTB both report either port
    pub interrupt_mirror: Option<bool>,
    pub interrupt_open_drain: Option<bool>,
}

pub struct Mcp23017 {
    id: String,
    address: u8,
}

fn set_bit(byte: u8, bit: u8, on: bool) -> u8 {
    if on {
        byte | (1 << bit)
    } else {
        byte & !(1 << bit)
    }
}

impl Mcp23017 {
    pub fn new(id: &str, address: u8) -> Self {
        Self {
            id: id.to_string(),
            address,
        }
    }

    pub async fn begin(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        if bus.probe(self.address).await {
            Ok(())
        } else {
            Err(SensorError::init(
                &self.id,
                format!("no MCP23017 answering at {:#04x}", self.address),
            ))
        }
    }

    /// Register address and bit for `pin` within the A/B pair at `base`
    fn locate(&self, base: u8, pin: u8) -> SensorResult<(u8, u8)> {
        if pin > B7 {
            return Err(SensorError::invalid(&self.id, format!("pin {} outside 0..=15", pin)));
        }
        Ok((base + pin / 8, pin % 8))
    }

    async fn update_bit(&self, bus: &mut I2CBus, base: u8, pin: u8, on: bool) -> SensorResult<()> {
        let (reg, bit) = self.locate(base, pin)?;
        let current = bus.read_u8(self.address, reg).await?;
        bus.write_byte(self.address, reg, set_bit(current, bit, on)).await?;
        Ok(())
    }

    async fn read_bit(&self, bus: &mut I2CBus, base: u8, pin: u8) -> SensorResult<bool> {
        let (reg, bit) = self.locate(base, pin)?;
        Ok(bus.read_u8(self.address, reg).await? & (1 << bit) != 0)
    }

    async fn read_pair(&self, bus: &mut I2CBus, base: u8) -> SensorResult<u16> {
        let mut data = [0u8; 2];
        bus.read_bytes(self.address, base, &mut data).await?;
        Ok(u16::from_le_bytes(data))
    }

    pub async fn configure_pin(&mut self, bus: &mut I2CBus, pin: u8, setup: &PinSetup) -> SensorResult<()> {
        // Latch before direction so an output never glitches to the old level
        if let Some(value) = setup.value {
            self.update_bit(bus, REG_OLAT, pin, value).await?;
        }
        if let Some(mode) = setup.mode {
            self.update_bit(bus, REG_IODIR, pin, mode != PinMode::Output).await?;
            if mode == PinMode::InputPullup {
                self.update_bit(bus, REG_GPPU, pin, true).await?;
            }
        }
        let bits = [
            (REG_GPPU, setup.pullup),
            (REG_IPOL, setup.invert),
            (REG_DEFVAL, setup.default_value),
            (REG_INTCON, setup.compare_default),
            (REG_GPINTEN, setup.interrupt_enable),
        ];
        for (reg, value) in bits {
            if let Some(on) = value {
                self.update_bit(bus, reg, pin, on).await?;
            }
        }
        Ok(())
    }

    pub async fn pin_mode(&mut self, bus: &mut I2CBus, pin: u8, mode: PinMode) -> SensorResult<()> {
        self.configure_pin(bus, pin, &PinSetup { mode: Some(mode), ..PinSetup::default() }).await
    }

    pub async fn configure(&mut self, bus: &mut I2CBus, setup: &ExpanderSetup) -> SensorResult<()> {
        let mut iocon = bus.read_u8(self.address, REG_IOCON).await?;
        let fields = [
            (IOCON_INTPOL, setup.interrupt_polarity),
            (IOCON_MIRROR, setup.interrupt_mirror),
            (IOCON_ODR, setup.interrupt_open_drain),
        ];
        for (mask, value) in fields {
            match value {
                Some(true) => iocon |= mask,
                Some(false) => iocon &= !mask,
                None => {}
            }
        }
        bus.write_byte(self.address, REG_IOCON, iocon).await?;
        Ok(())
    }

    pub async fn digital_write(&mut self, bus: &mut I2CBus, pin: u8, high: bool) -> SensorResult<()> {
        self.update_bit(bus, REG_OLAT, pin, high).await
    }

    pub async fn digital_read(&mut self, bus: &mut I2CBus, pin: u8) -> SensorResult<bool> {
        self.read_bit(bus, REG_GPIO, pin).await
    }

    /// Both ports as one word, A in the low byte
    pub async fn read_port(&mut self, bus: &mut I2CBus) -> SensorResult<u16> {
        self.read_pair(bus, REG_GPIO).await
    }

    pub async fn write_port(&mut self, bus: &mut I2CBus, value: u16) -> SensorResult<()> {
        bus.write_bytes(self.address, REG_OLAT, &value.to_le_bytes()).await?;
        Ok(())
    }

    /// Pins that raised the pending interrupt
    pub async fn interrupt_flags(&mut self, bus: &mut I2CBus) -> SensorResult<u16> {
        self.read_pair(bus, REG_INTF).await
    }

    /// Port levels captured when the interrupt fired. Reading clears the interrupt.
    pub async fn interrupt_captured(&mut self, bus: &mut I2CBus) -> SensorResult<u16> {
        self.read_pair(bus, REG_INTCAP).await
    }
}
