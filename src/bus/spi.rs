use thiserror::Error;

#[cfg(target_os = "linux")]
use embedded_hal::spi::{Error as _, Operation, SpiDevice};
#[cfg(target_os = "linux")]
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
#[cfg(target_os = "linux")]
use linux_embedded_hal::SpidevDevice;

#[derive(Error, Debug)]
pub enum SpiError {
    #[error("failed to open SPI device '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error("SPI transfer failed: {0}")]
    Transfer(String),

    #[error("SPI is only supported on Linux")]
    Unsupported,
}

/// Chip-select framed SPI transport
pub trait SpiTransport: Send {
    /// Clock out `write`, then clock `read.len()` bytes in, inside one chip-select window
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> Result<(), SpiError>;

    fn write(&mut self, data: &[u8]) -> Result<(), SpiError> {
        self.transfer(data, &mut [])
    }
}

#[cfg(target_os = "linux")]
pub struct SpidevTransport {
    device: SpidevDevice,
}

#[cfg(target_os = "linux")]
impl SpidevTransport {
    pub fn open(path: &str, speed_hz: u32, mode: u8) -> Result<Self, SpiError> {
        let open_err = |reason: String| SpiError::Open { path: path.to_string(), reason };
        let mut device = SpidevDevice::open(path).map_err(|e| open_err(format!("{:?}", e)))?;
        let flags = match mode {
            1 => SpiModeFlags::SPI_MODE_1,
            2 => SpiModeFlags::SPI_MODE_2,
            3 => SpiModeFlags::SPI_MODE_3,
            _ => SpiModeFlags::SPI_MODE_0,
        };
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(flags)
            .build();
        device.configure(&options).map_err(|e| open_err(e.to_string()))?;
        Ok(Self { device })
    }
}

#[cfg(target_os = "linux")]
impl SpiTransport for SpidevTransport {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> Result<(), SpiError> {
        let result = if read.is_empty() {
            self.device.transaction(&mut [Operation::Write(write)])
        } else {
            self.device
                .transaction(&mut [Operation::Write(write), Operation::Read(read)])
        };
        result.map_err(|e| SpiError::Transfer(format!("{:?}", e.kind())))
    }
}

/// One SPI peripheral (one chip select line)
pub struct SpiBus {
    transport: Box<dyn SpiTransport>,
}

impl SpiBus {
    #[cfg(target_os = "linux")]
    pub fn new(path: &str, speed_hz: u32, mode: u8) -> Result<Self, SpiError> {
        Ok(Self::with_transport(Box::new(SpidevTransport::open(path, speed_hz, mode)?)))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn new(_path: &str, _speed_hz: u32, _mode: u8) -> Result<Self, SpiError> {
        Err(SpiError::Unsupported)
    }

    pub fn with_transport(transport: Box<dyn SpiTransport>) -> Self {
        Self { transport }
    }

    /// Send the register byte, then read `buf.len()` bytes
    pub async fn read_bytes(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), SpiError> {
        self.transport.transfer(&[reg], buf)
    }

    /// Send the register byte followed by `data`; callers apply any write flag to `reg`
    pub async fn write_bytes(&mut self, reg: u8, data: &[u8]) -> Result<(), SpiError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(reg);
        frame.extend_from_slice(data);
        self.transport.write(&frame)
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), SpiError> {
        self.transport.write(data)
    }
}
