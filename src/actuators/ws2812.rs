//! WS2812/WS2812B addressable LED strip clocked out of an SPI MOSI line.
//!
//! At 2.4 MHz one SPI bit lasts ~417 ns, so each LED bit becomes a 3-bit
//! symbol: `110` for one and `100` for zero. The bus must be configured at
//! [`SPI_HZ`].

use crate::bus::spi::SpiBus;
use crate::errors::{SensorError, SensorResult};

pub const SPI_HZ: u32 = 2_400_000;

/// Low time after the last pixel that latches the frame. 90 bytes of zeros
/// is 300 µs, long enough for the newer WS2812B revisions.
const RESET_BYTES: usize = 90;

const SYMBOL_ONE: u32 = 0b110;
const SYMBOL_ZERO: u32 = 0b100;

pub type Rgb = (u8, u8, u8);

pub struct Ws2812 {
    id: String,
    pixels: Vec<Rgb>,
    brightness: f32,
}

impl Ws2812 {
    pub fn new(id: &str, count: usize) -> Self {
        Self {
            id: id.to_string(),
            pixels: vec![(0, 0, 0); count],
            brightness: 1.0,
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Global scale applied when the frame is sent, clamped to 0.0..=1.0
    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = brightness.clamp(0.0, 1.0);
    }

    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn set(&mut self, index: usize, color: Rgb) -> SensorResult<()> {
        let count = self.pixels.len();
        let pixel = self.pixels.get_mut(index).ok_or_else(|| {
            SensorError::invalid(&self.id, format!("pixel {} out of range for {} LEDs", index, count))
        })?;
        *pixel = color;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<Rgb> {
        self.pixels.get(index).copied()
    }

    pub fn fill(&mut self, color: Rgb) {
        self.pixels.fill(color);
    }

    fn scale(&self, channel: u8) -> u8 {
        (channel as f32 * self.brightness).round() as u8
    }

    /// SPI bytes for the whole strip, GRB order, followed by the reset latch
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 9 + RESET_BYTES);
        for &(r, g, b) in &self.pixels {
            for channel in [g, r, b] {
                out.extend_from_slice(&encode_byte(self.scale(channel)));
            }
        }
        out.resize(out.len() + RESET_BYTES, 0);
        out
    }

    pub async fn write(&self, bus: &mut SpiBus) -> SensorResult<()> {
        bus.write(&self.encode()).await?;
        Ok(())
    }
}

/// Expand one colour byte, MSB first, into 24 SPI bits
fn encode_byte(value: u8) -> [u8; 3] {
    let mut bits = 0u32;
    for i in (0..8).rev() {
        let symbol = if value & (1 << i) != 0 { SYMBOL_ONE } else { SYMBOL_ZERO };
        bits = (bits << 3) | symbol;
    }
    let [_, hi, mid, lo] = bits.to_be_bytes();
    [hi, mid, lo]
}
