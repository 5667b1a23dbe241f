//! HD44780 16x2 character LCD behind an I2C port expander.
//!
//! The expander's output port drives the LCD in 4-bit mode: data nibble on
//! bits 7..4, then RS, RW, E and the backlight on bits 0..3. Every LCD byte
//! goes out as two nibbles, each strobed with E high then low.

use crate::bus::i2c::I2CBus;
use crate::errors::SensorResult;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_ADDRESS: u8 = 0x20;

const EXP_OUTPUT: u8 = 0x01;
const EXP_POLARITY: u8 = 0x02;
const EXP_CONFIG: u8 = 0x03;

const BIT_RS: u8 = 1 << 0;
const BIT_E: u8 = 1 << 2;
const BIT_LED: u8 = 1 << 3;

const CMD_CLEAR: u8 = 0x01;
const CMD_HOME: u8 = 0x02;
const CMD_ENTRY_MODE: u8 = 0x04;
const CMD_DISPLAY_CONTROL: u8 = 0x08;
const CMD_SCROLL_LEFT: u8 = 0x18;
const CMD_SCROLL_RIGHT: u8 = 0x1C;
const CMD_FUNCTION_4BIT_2LINE: u8 = 0x28;
const CMD_SET_CGRAM: u8 = 0x40;
const CMD_SET_DDRAM: u8 = 0x80;

const ENTRY_LEFT_TO_RIGHT: u8 = 1 << 1;
const ENTRY_AUTOSCROLL: u8 = 1 << 0;
const DISPLAY_ON: u8 = 1 << 2;
const DISPLAY_CURSOR: u8 = 1 << 1;
const DISPLAY_BLINK: u8 = 1 << 0;

const ROW_OFFSETS: [u8; 2] = [0x00, 0x40];

/// Clear and home need 1.52 ms. Shorter command times are covered by the
/// I2C transactions themselves.
const SLOW_COMMAND: Duration = Duration::from_micros(1600);
const EXPANDER_SETTLE: Duration = Duration::from_millis(10);

pub struct LcdI2c {
    address: u8,
    register_select: bool,
    backlight: bool,
    entry_state: u8,
    display_state: u8,
}

impl LcdI2c {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            register_select: false,
            backlight: false,
            entry_state: ENTRY_LEFT_TO_RIGHT,
            display_state: DISPLAY_ON,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Set up the expander (unless it is already configured) and run the
    /// 4-bit power-on sequence.
    pub async fn begin(&mut self, bus: &mut I2CBus, configure_expander: bool) -> SensorResult<()> {
        if configure_expander {
            // All pins outputs, no inversion, everything low
            for reg in [EXP_CONFIG, EXP_POLARITY, EXP_OUTPUT] {
                bus.write(self.address, &[reg, 0x00]).await?;
                sleep(EXPANDER_SETTLE).await;
            }
        }
        self.initialize(bus).await
    }

    async fn initialize(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.register_select = false;
        for (value, wait_us) in [(0x30, 4200), (0x30, 150), (0x30, 37), (0x20, 37)] {
            self.send(bus, value, true).await?;
            if wait_us > 100 {
                sleep(Duration::from_micros(wait_us)).await;
            }
        }
        self.command(bus, CMD_FUNCTION_4BIT_2LINE).await?;
        self.display(bus, true).await?;
        self.clear(bus).await?;
        self.left_to_right(bus).await
    }

    fn port_byte(&self, nibble: u8, enable: bool) -> u8 {
        let mut out = nibble & 0xF0;
        if self.register_select {
            out |= BIT_RS;
        }
        if enable {
            out |= BIT_E;
        }
        if self.backlight {
            out |= BIT_LED;
        }
        out
    }

    async fn write_port(&mut self, bus: &mut I2CBus, value: u8) -> SensorResult<()> {
        bus.write(self.address, &[EXP_OUTPUT, value]).await?;
        Ok(())
    }

    /// Strobe one byte into the LCD. The power-on sequence only sends the
    /// high nibble while the controller is still in 8-bit mode.
    async fn send(&mut self, bus: &mut I2CBus, value: u8, high_nibble_only: bool) -> SensorResult<()> {
        let high = value & 0xF0;
        self.write_port(bus, self.port_byte(high, true)).await?;
        self.write_port(bus, self.port_byte(high, false)).await?;
        if !high_nibble_only {
            let low = value << 4;
            self.write_port(bus, self.port_byte(low, true)).await?;
            self.write_port(bus, self.port_byte(low, false)).await?;
        }
        Ok(())
    }

    async fn command(&mut self, bus: &mut I2CBus, cmd: u8) -> SensorResult<()> {
        self.register_select = false;
        self.send(bus, cmd, false).await
    }

    pub async fn clear(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.command(bus, CMD_CLEAR).await?;
        sleep(SLOW_COMMAND).await;
        Ok(())
    }

    pub async fn home(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.command(bus, CMD_HOME).await?;
        sleep(SLOW_COMMAND).await;
        Ok(())
    }

    async fn update_entry_mode(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.command(bus, CMD_ENTRY_MODE | self.entry_state).await
    }

    pub async fn left_to_right(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.entry_state |= ENTRY_LEFT_TO_RIGHT;
        self.update_entry_mode(bus).await
    }

    pub async fn right_to_left(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.entry_state &= !ENTRY_LEFT_TO_RIGHT;
        self.update_entry_mode(bus).await
    }

    /// Shift the whole display instead of the cursor as characters arrive
    pub async fn autoscroll(&mut self, bus: &mut I2CBus, on: bool) -> SensorResult<()> {
        if on {
            self.entry_state |= ENTRY_AUTOSCROLL;
        } else {
            self.entry_state &= !ENTRY_AUTOSCROLL;
        }
        self.update_entry_mode(bus).await
    }

    async fn set_display_bit(&mut self, bus: &mut I2CBus, bit: u8, on: bool) -> SensorResult<()> {
        if on {
            self.display_state |= bit;
        } else {
            self.display_state &= !bit;
        }
        self.command(bus, CMD_DISPLAY_CONTROL | self.display_state).await
    }

    pub async fn display(&mut self, bus: &mut I2CBus, on: bool) -> SensorResult<()> {
        self.set_display_bit(bus, DISPLAY_ON, on).await
    }

    pub async fn cursor(&mut self, bus: &mut I2CBus, on: bool) -> SensorResult<()> {
        self.set_display_bit(bus, DISPLAY_CURSOR, on).await
    }

    pub async fn blink(&mut self, bus: &mut I2CBus, on: bool) -> SensorResult<()> {
        self.set_display_bit(bus, DISPLAY_BLINK, on).await
    }

    pub async fn scroll_display_left(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.command(bus, CMD_SCROLL_LEFT).await
    }

    pub async fn scroll_display_right(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        self.command(bus, CMD_SCROLL_RIGHT).await
    }

    /// Store a 5x8 glyph in CGRAM slot `location` (taken modulo 8). The
    /// cursor is returned to the top-left afterwards.
    pub async fn create_char(&mut self, bus: &mut I2CBus, location: u8, glyph: &[u8; 8]) -> SensorResult<()> {
        self.command(bus, CMD_SET_CGRAM | ((location % 8) << 3)).await?;
        for row in glyph {
            self.write(bus, *row).await?;
        }
        self.set_cursor(bus, 0, 0).await
    }

    /// Row 0 starts at DDRAM 0x00, any other row at 0x40
    pub async fn set_cursor(&mut self, bus: &mut I2CBus, col: u8, row: u8) -> SensorResult<()> {
        let base = ROW_OFFSETS[usize::from(row != 0)];
        self.command(bus, CMD_SET_DDRAM | base.wrapping_add(col)).await
    }

    /// Write one character code (ASCII or a CGRAM slot 0..7)
    pub async fn write(&mut self, bus: &mut I2CBus, code: u8) -> SensorResult<()> {
        self.register_select = true;
        self.send(bus, code, false).await
    }

    /// Characters outside the controller's 8-bit ROM are shown as '?'
    pub async fn print(&mut self, bus: &mut I2CBus, text: &str) -> SensorResult<()> {
        for c in text.chars() {
            self.write(bus, u8::try_from(c).unwrap_or(b'?')).await?;
        }
        Ok(())
    }

    pub async fn set_backlight(&mut self, bus: &mut I2CBus, on: bool) -> SensorResult<()> {
        self.backlight = on;
        let value = if on { BIT_LED } else { 0 };
        self.write_port(bus, value).await
    }

    pub fn backlight(&self) -> bool {
        self.backlight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{AddrMode, MockI2c};

    fn lcd() -> (I2CBus, MockI2c, LcdI2c) {
        let (bus, mock) = MockI2c::new();
        mock.add_device(DEFAULT_ADDRESS, AddrMode::Reg8);
        (bus, mock, LcdI2c::new(DEFAULT_ADDRESS))
    }

    /// Port values sent to the expander output register, in order
    fn port_writes(mock: &MockI2c) -> Vec<u8> {
        mock.writes(DEFAULT_ADDRESS)
            .into_iter()
            .filter(|w| w[0] == EXP_OUTPUT && w.len() == 2)
            .map(|w| w[1])
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn begin_configures_expander_then_runs_power_on_sequence() {
        let (mut bus, mock, mut lcd) = lcd();
        lcd.begin(&mut bus, true).await.unwrap();

        let writes = mock.writes(DEFAULT_ADDRESS);
        assert_eq!(&writes[..3], &[vec![0x03, 0x00], vec![0x02, 0x00], vec![0x01, 0x00]]);
        // Four half-byte wake-ups, then function set, display, clear, entry mode
        assert_eq!(writes.len(), 3 + 4 * 2 + 4 * 4);

        let ports = port_writes(&mock);
        assert_eq!(&ports[1..9], &[0x34, 0x30, 0x34, 0x30, 0x34, 0x30, 0x24, 0x20]);
        // Entry mode 0x06 is the last command
        assert_eq!(&ports[ports.len() - 4..], &[0x04, 0x00, 0x64, 0x60]);
    }

    #[tokio::test]
    async fn cursor_on_second_row_offsets_by_0x40() {
        let (mut bus, mock, mut lcd) = lcd();
        lcd.set_cursor(&mut bus, 3, 1).await.unwrap();
        assert_eq!(port_writes(&mock), vec![0xC4, 0xC0, 0x34, 0x30]);
    }

    #[tokio::test]
    async fn characters_carry_rs_and_backlight() {
        let (mut bus, mock, mut lcd) = lcd();
        lcd.set_backlight(&mut bus, true).await.unwrap();
        mock.clear_writes(DEFAULT_ADDRESS);

        lcd.print(&mut bus, "A").await.unwrap();
        assert_eq!(port_writes(&mock), vec![0x4D, 0x49, 0x1D, 0x19]);

        mock.clear_writes(DEFAULT_ADDRESS);
        lcd.print(&mut bus, "\u{263A}").await.unwrap();
        // '?' is 0x3F
        assert_eq!(port_writes(&mock), vec![0x3D, 0x39, 0xFD, 0xF9]);
    }

    #[tokio::test]
    async fn display_flags_accumulate() {
        let (mut bus, mock, mut lcd) = lcd();
        lcd.cursor(&mut bus, true).await.unwrap();
        lcd.blink(&mut bus, true).await.unwrap();
        mock.clear_writes(DEFAULT_ADDRESS);

        lcd.display(&mut bus, false).await.unwrap();
        // 0x08 | cursor | blink = 0x0B
        assert_eq!(port_writes(&mock), vec![0x04, 0x00, 0xB4, 0xB0]);
    }

    #[tokio::test]
    async fn custom_glyph_goes_to_cgram_slot() {
        let (mut bus, mock, mut lcd) = lcd();
        lcd.create_char(&mut bus, 9, &[0x1F; 8]).await.unwrap();
        let ports = port_writes(&mock);
        // Slot 9 wraps to 1: 0x40 | 1 << 3 = 0x48
        assert_eq!(&ports[..4], &[0x44, 0x40, 0x84, 0x80]);
        // 1 command + 8 glyph rows + cursor home
        assert_eq!(ports.len(), 4 * 10);
    }
}
