//! In-memory buses for driver tests.
//!
//! Each mock hands back the real bus type plus a cloneable handle the test
//! keeps to preload registers, script reads and inspect what was written.

use super::gpio::{AnalogInput, GpioBus, GpioError, GpioPin, PinProvider};
use super::i2c::{I2CBus, I2CError, I2cTransport};
use super::spi::{SpiBus, SpiError, SpiTransport};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// How a mock I2C device interprets the leading bytes of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// One register byte, auto-incrementing byte memory
    Reg8,
    /// Two register bytes (MSB first), auto-incrementing byte memory
    Reg16,
    /// One register byte addressing 16-bit big-endian words
    Word,
    /// No register pointer; reads come only from the scripted queue
    Command,
}

#[derive(Debug)]
struct MockDevice {
    mode: AddrMode,
    memory: HashMap<u16, u8>,
    words: HashMap<u8, [u8; 2]>,
    reads: VecDeque<Vec<u8>>,
    pointer: u16,
    writes: Vec<Vec<u8>>,
}

impl MockDevice {
    fn new(mode: AddrMode) -> Self {
        Self {
            mode,
            memory: HashMap::new(),
            words: HashMap::new(),
            reads: VecDeque::new(),
            pointer: 0,
            writes: Vec::new(),
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        self.writes.push(bytes.to_vec());
        match self.mode {
            AddrMode::Reg8 | AddrMode::Reg16 => {
                let header = if self.mode == AddrMode::Reg8 { 1 } else { 2 };
                if bytes.len() < header {
                    return;
                }
                self.pointer = if header == 1 {
                    bytes[0] as u16
                } else {
                    u16::from_be_bytes([bytes[0], bytes[1]])
                };
                for (i, b) in bytes[header..].iter().enumerate() {
                    self.memory.insert(self.pointer.wrapping_add(i as u16), *b);
                }
            }
            AddrMode::Word => {
                if let Some(&reg) = bytes.first() {
                    self.pointer = reg as u16;
                    if bytes.len() >= 3 {
                        self.words.insert(reg, [bytes[1], bytes[2]]);
                    }
                }
            }
            AddrMode::Command => {}
        }
    }

    fn read(&mut self, buf: &mut [u8]) {
        if let Some(scripted) = self.reads.pop_front() {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = scripted.get(i).copied().unwrap_or(0);
            }
            return;
        }
        match self.mode {
            AddrMode::Reg8 | AddrMode::Reg16 => {
                for (i, b) in buf.iter_mut().enumerate() {
                    let at = self.pointer.wrapping_add(i as u16);
                    *b = self.memory.get(&at).copied().unwrap_or(0);
                }
            }
            AddrMode::Word => {
                let word = self.words.get(&(self.pointer as u8)).copied().unwrap_or([0, 0]);
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = word.get(i).copied().unwrap_or(0);
                }
            }
            AddrMode::Command => buf.fill(0),
        }
    }
}

#[derive(Default)]
struct I2cState {
    devices: HashMap<u8, MockDevice>,
}

struct MockI2cTransport(Arc<Mutex<I2cState>>);

impl I2cTransport for MockI2cTransport {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), I2CError> {
        let mut state = self.0.lock().unwrap();
        let device = state.devices.get_mut(&address).ok_or(I2CError::Nack { address })?;
        device.write(bytes);
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), I2CError> {
        let mut state = self.0.lock().unwrap();
        let device = state.devices.get_mut(&address).ok_or(I2CError::Nack { address })?;
        device.read(buf);
        Ok(())
    }
}

/// Handle onto a mock I2C bus
#[derive(Clone)]
pub struct MockI2c(Arc<Mutex<I2cState>>);

impl MockI2c {
    pub fn new() -> (I2CBus, MockI2c) {
        let state = Arc::new(Mutex::new(I2cState::default()));
        let bus = I2CBus::with_transport(Box::new(MockI2cTransport(state.clone())));
        (bus, MockI2c(state))
    }

    fn with_device<R>(&self, address: u8, f: impl FnOnce(&mut MockDevice) -> R) -> R {
        let mut state = self.0.lock().unwrap();
        let device = state
            .devices
            .get_mut(&address)
            .unwrap_or_else(|| panic!("no mock device at {:#04x}", address));
        f(device)
    }

    pub fn add_device(&self, address: u8, mode: AddrMode) {
        self.0.lock().unwrap().devices.insert(address, MockDevice::new(mode));
    }

    pub fn remove_device(&self, address: u8) {
        self.0.lock().unwrap().devices.remove(&address);
    }

    pub fn set_reg(&self, address: u8, reg: u16, value: u8) {
        self.with_device(address, |d| {
            d.memory.insert(reg, value);
        });
    }

    pub fn set_regs(&self, address: u8, start: u16, values: &[u8]) {
        self.with_device(address, |d| {
            for (i, v) in values.iter().enumerate() {
                d.memory.insert(start + i as u16, *v);
            }
        });
    }

    pub fn reg(&self, address: u8, reg: u16) -> u8 {
        self.with_device(address, |d| d.memory.get(&reg).copied().unwrap_or(0))
    }

    pub fn set_word(&self, address: u8, reg: u8, value: u16) {
        self.with_device(address, |d| {
            d.words.insert(reg, value.to_be_bytes());
        });
    }

    pub fn word(&self, address: u8, reg: u8) -> u16 {
        self.with_device(address, |d| {
            u16::from_be_bytes(d.words.get(&reg).copied().unwrap_or([0, 0]))
        })
    }

    /// Queue a response returned by the next read, ahead of register memory
    pub fn queue_read(&self, address: u8, bytes: &[u8]) {
        self.with_device(address, |d| d.reads.push_back(bytes.to_vec()));
    }

    pub fn writes(&self, address: u8) -> Vec<Vec<u8>> {
        self.with_device(address, |d| d.writes.clone())
    }

    pub fn clear_writes(&self, address: u8) {
        self.with_device(address, |d| d.writes.clear());
    }
}

#[derive(Default)]
struct SpiState {
    memory: HashMap<u8, u8>,
    reads: VecDeque<Vec<u8>>,
    frames: Vec<Vec<u8>>,
}

struct MockSpiTransport(Arc<Mutex<SpiState>>);

impl SpiTransport for MockSpiTransport {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> Result<(), SpiError> {
        let mut state = self.0.lock().unwrap();
        state.frames.push(write.to_vec());
        let Some(&first) = write.first() else {
            return Ok(());
        };
        if first & 0x80 != 0 {
            let base = first & 0x7F;
            for (i, b) in write[1..].iter().enumerate() {
                state.memory.insert(base.wrapping_add(i as u8), *b);
            }
        }
        if !read.is_empty() {
            if let Some(scripted) = state.reads.pop_front() {
                for (i, b) in read.iter_mut().enumerate() {
                    *b = scripted.get(i).copied().unwrap_or(0);
                }
            } else {
                for (i, b) in read.iter_mut().enumerate() {
                    *b = state.memory.get(&first.wrapping_add(i as u8)).copied().unwrap_or(0);
                }
            }
        }
        Ok(())
    }
}

/// Handle onto a mock SPI device where bit 7 of the first byte marks a write
#[derive(Clone)]
pub struct MockSpi(Arc<Mutex<SpiState>>);

impl MockSpi {
    pub fn new() -> (SpiBus, MockSpi) {
        let state = Arc::new(Mutex::new(SpiState::default()));
        let bus = SpiBus::with_transport(Box::new(MockSpiTransport(state.clone())));
        (bus, MockSpi(state))
    }

    pub fn set_regs(&self, start: u8, values: &[u8]) {
        let mut state = self.0.lock().unwrap();
        for (i, v) in values.iter().enumerate() {
            state.memory.insert(start.wrapping_add(i as u8), *v);
        }
    }

    pub fn reg(&self, reg: u8) -> u8 {
        self.0.lock().unwrap().memory.get(&reg).copied().unwrap_or(0)
    }

    pub fn queue_read(&self, bytes: &[u8]) {
        self.0.lock().unwrap().reads.push_back(bytes.to_vec());
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().frames.clone()
    }

    pub fn clear_frames(&self) {
        self.0.lock().unwrap().frames.clear();
    }
}

#[derive(Default)]
struct LineState {
    level: bool,
    script: VecDeque<bool>,
    history: Vec<bool>,
}

#[derive(Default)]
struct GpioState {
    lines: HashMap<u32, LineState>,
    adc: HashMap<u32, VecDeque<u16>>,
    adc_bits: u8,
}

struct MockPin {
    line: u32,
    state: Arc<Mutex<GpioState>>,
}

impl GpioPin for MockPin {
    fn set_level(&mut self, high: bool) -> Result<(), GpioError> {
        let mut state = self.state.lock().unwrap();
        let line = state.lines.entry(self.line).or_default();
        line.level = high;
        line.history.push(high);
        Ok(())
    }

    fn is_high(&mut self) -> Result<bool, GpioError> {
        let mut state = self.state.lock().unwrap();
        let line = state.lines.entry(self.line).or_default();
        if let Some(level) = line.script.pop_front() {
            line.level = level;
        }
        Ok(line.level)
    }
}

struct MockAdc {
    channel: u32,
    bits: u8,
    state: Arc<Mutex<GpioState>>,
}

impl AnalogInput for MockAdc {
    fn read_raw(&mut self) -> Result<u16, GpioError> {
        let mut state = self.state.lock().unwrap();
        let queue = state.adc.entry(self.channel).or_default();
        // The last queued value sticks once the script runs out.
        match queue.len() {
            0 => Err(GpioError::Adc {
                channel: self.channel,
                reason: "no mock value".to_string(),
            }),
            1 => Ok(queue[0]),
            _ => Ok(queue.pop_front().unwrap_or_default()),
        }
    }

    fn resolution_bits(&self) -> u8 {
        self.bits
    }
}

struct MockProvider(Arc<Mutex<GpioState>>);

impl PinProvider for MockProvider {
    fn output(&mut self, line: u32, initial_high: bool) -> Result<Box<dyn GpioPin>, GpioError> {
        let mut pin = MockPin { line, state: self.0.clone() };
        pin.set_level(initial_high)?;
        Ok(Box::new(pin))
    }

    fn input(&mut self, line: u32) -> Result<Box<dyn GpioPin>, GpioError> {
        Ok(Box::new(MockPin { line, state: self.0.clone() }))
    }

    fn analog(&mut self, channel: u32) -> Result<Box<dyn AnalogInput>, GpioError> {
        let bits = self.0.lock().unwrap().adc_bits;
        Ok(Box::new(MockAdc { channel, bits, state: self.0.clone() }))
    }
}

/// Handle onto mock GPIO lines and ADC channels (12-bit unless changed)
#[derive(Clone)]
pub struct MockGpio(Arc<Mutex<GpioState>>);

impl MockGpio {
    pub fn new() -> (GpioBus, MockGpio) {
        let state = Arc::new(Mutex::new(GpioState {
            adc_bits: 12,
            ..GpioState::default()
        }));
        let bus = GpioBus::with_provider(Box::new(MockProvider(state.clone())));
        (bus, MockGpio(state))
    }

    pub fn set_adc_bits(&self, bits: u8) {
        self.0.lock().unwrap().adc_bits = bits;
    }

    pub fn set_level(&self, line: u32, high: bool) {
        self.0.lock().unwrap().lines.entry(line).or_default().level = high;
    }

    /// Levels returned by successive reads; the last one then sticks
    pub fn script(&self, line: u32, levels: &[bool]) {
        let mut state = self.0.lock().unwrap();
        state.lines.entry(line).or_default().script.extend(levels.iter().copied());
    }

    pub fn level(&self, line: u32) -> bool {
        self.0.lock().unwrap().lines.get(&line).map(|l| l.level).unwrap_or(false)
    }

    /// Every level written to `line`, in order
    pub fn history(&self, line: u32) -> Vec<bool> {
        self.0
            .lock()
            .unwrap()
            .lines
            .get(&line)
            .map(|l| l.history.clone())
            .unwrap_or_default()
    }

    pub fn set_adc(&self, channel: u32, values: &[u16]) {
        let mut state = self.0.lock().unwrap();
        let queue = state.adc.entry(channel).or_default();
        queue.clear();
        queue.extend(values.iter().copied());
    }
}
