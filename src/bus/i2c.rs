#[cfg(target_os = "linux")]
use i2cdev::core::I2CDevice;
#[cfg(target_os = "linux")]
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};
use thiserror::Error;

/// I2C bus error type
#[derive(Error, Debug)]
pub enum I2CError {
    #[error("transfer to {address:#04x} failed: {reason}")]
    Transfer { address: u8, reason: String },

    #[error("no device acknowledged address {address:#04x}")]
    Nack { address: u8 },

    #[error("I2C is only supported on Linux")]
    Unsupported,
}

/// Raw byte transport underneath an [`I2CBus`].
///
/// Every call is a complete bus transaction (start, address, payload, stop).
pub trait I2cTransport: Send {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), I2CError>;
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), I2CError>;

    fn write_read(&mut self, address: u8, bytes: &[u8], buf: &mut [u8]) -> Result<(), I2CError> {
        self.write(address, bytes)?;
        self.read(address, buf)
    }
}

/// Linux `/dev/i2c-N` character device
#[cfg(target_os = "linux")]
pub struct LinuxI2cTransport {
    device: LinuxI2CDevice,
    selected: Option<u8>,
}

#[cfg(target_os = "linux")]
impl LinuxI2cTransport {
    pub fn open(path: &str) -> Result<Self, I2CError> {
        let device = LinuxI2CDevice::new(path, 0).map_err(|e| to_transfer(0, e))?;
        Ok(Self { device, selected: None })
    }

    fn select(&mut self, address: u8) -> Result<(), I2CError> {
        if self.selected != Some(address) {
            self.device
                .set_slave_address(address as u16)
                .map_err(|e| to_transfer(address, e))?;
            self.selected = Some(address);
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn to_transfer(address: u8, e: LinuxI2CError) -> I2CError {
    I2CError::Transfer { address, reason: e.to_string() }
}

#[cfg(target_os = "linux")]
impl I2cTransport for LinuxI2cTransport {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), I2CError> {
        self.select(address)?;
        self.device.write(bytes).map_err(|e| to_transfer(address, e))
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), I2CError> {
        self.select(address)?;
        self.device.read(buf).map_err(|e| to_transfer(address, e))
    }
}

/// I2C bus with the register helpers the drivers share
pub struct I2CBus {
    transport: Box<dyn I2cTransport>,
}

impl I2CBus {
    #[cfg(target_os = "linux")]
    pub fn new(path: &str) -> Result<Self, I2CError> {
        Ok(Self::with_transport(Box::new(LinuxI2cTransport::open(path)?)))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn new(_path: &str) -> Result<Self, I2CError> {
        Err(I2CError::Unsupported)
    }

    pub fn with_transport(transport: Box<dyn I2cTransport>) -> Self {
        Self { transport }
    }

    pub async fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), I2CError> {
        self.transport.write(address, bytes)
    }

    pub async fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), I2CError> {
        self.transport.read(address, buf)
    }

    pub async fn write_read(&mut self, address: u8, bytes: &[u8], buf: &mut [u8]) -> Result<(), I2CError> {
        self.transport.write_read(address, bytes, buf)
    }

    /// True when something acknowledges `address`
    pub async fn probe(&mut self, address: u8) -> bool {
        let mut scratch = [0u8; 1];
        self.transport.read(address, &mut scratch).is_ok()
    }

    pub async fn read_bytes(&mut self, address: u8, reg: u8, buf: &mut [u8]) -> Result<(), I2CError> {
        self.transport.write_read(address, &[reg], buf)
    }

    pub async fn read_u8(&mut self, address: u8, reg: u8) -> Result<u8, I2CError> {
        let mut buf = [0u8; 1];
        self.read_bytes(address, reg, &mut buf).await?;
        Ok(buf[0])
    }

    pub async fn write_byte(&mut self, address: u8, reg: u8, byte: u8) -> Result<(), I2CError> {
        self.transport.write(address, &[reg, byte])
    }

    pub async fn write_bytes(&mut self, address: u8, reg: u8, data: &[u8]) -> Result<(), I2CError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(reg);
        frame.extend_from_slice(data);
        self.transport.write(address, &frame)
    }

    /// Register read for chips with 16-bit register addresses (sent MSB first)
    pub async fn read_bytes16(&mut self, address: u8, reg: u16, buf: &mut [u8]) -> Result<(), I2CError> {
        self.transport.write_read(address, &reg.to_be_bytes(), buf)
    }

    pub async fn write_bytes16(&mut self, address: u8, reg: u16, data: &[u8]) -> Result<(), I2CError> {
        let mut frame = Vec::with_capacity(data.len() + 2);
        frame.extend_from_slice(&reg.to_be_bytes());
        frame.extend_from_slice(data);
        self.transport.write(address, &frame)
    }
}
