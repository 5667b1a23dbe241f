//! Raw access to the microcontroller-backed Qwiic breakouts.
//!
//! These boards expose a tiny register file: write one register byte, then
//! read back a fixed-size block in a separate transaction.

use crate::bus::i2c::{I2CBus, I2CError};
use crate::errors::{SensorError, SensorResult};

pub const DEFAULT_ADDRESS: u8 = 0x30;

/// How a dual-mode breakout is attached: through its Qwiic microcontroller
/// or straight to host pins.
pub enum Wiring<N> {
    Qwiic(QwiicDevice),
    Native(N),
}

/// A configured GPIO line or ADC channel, claimed from the bus during init
pub struct NativeLine<T: ?Sized> {
    line: u32,
    handle: Option<Box<T>>,
}

impl<T: ?Sized> NativeLine<T> {
    pub fn new(line: u32) -> Self {
        Self { line, handle: None }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn attach(&mut self, handle: Box<T>) {
        self.handle = Some(handle);
    }

    /// Detach the handle, e.g. to hand it to a blocking thread. Put it back
    /// with [`NativeLine::attach`].
    pub fn take(&mut self, sensor: &str) -> SensorResult<Box<T>> {
        self.handle
            .take()
            .ok_or_else(|| SensorError::NotInitialized { sensor: sensor.to_string() })
    }

    pub fn get(&mut self, sensor: &str) -> SensorResult<&mut T> {
        self.handle
            .as_deref_mut()
            .ok_or_else(|| SensorError::NotInitialized { sensor: sensor.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QwiicDevice {
    address: u8,
}

impl QwiicDevice {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub async fn send_address(&self, bus: &mut I2CBus, reg: u8) -> Result<(), I2CError> {
        bus.write(self.address, &[reg]).await
    }

    pub async fn read_data(&self, bus: &mut I2CBus, buf: &mut [u8]) -> Result<(), I2CError> {
        bus.read(self.address, buf).await
    }

    pub async fn read_register(&self, bus: &mut I2CBus, reg: u8, buf: &mut [u8]) -> Result<(), I2CError> {
        self.send_address(bus, reg).await?;
        self.read_data(bus, buf).await
    }

    pub async fn send_data(&self, bus: &mut I2CBus, data: &[u8]) -> Result<(), I2CError> {
        bus.write(self.address, data).await
    }

    pub async fn is_present(&self, bus: &mut I2CBus) -> bool {
        bus.probe(self.address).await
    }

    /// Init-time presence check shared by the Qwiic drivers
    pub async fn ensure_present(&self, bus: &mut I2CBus, sensor: &str) -> SensorResult<()> {
        if self.is_present(bus).await {
            Ok(())
        } else {
            Err(SensorError::init(
                sensor,
                format!("no Qwiic board answering at {:#04x}", self.address),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{AddrMode, MockI2c};

    #[tokio::test]
    async fn read_register_writes_pointer_then_reads() {
        let (mut bus, mock) = MockI2c::new();
        mock.add_device(DEFAULT_ADDRESS, AddrMode::Reg8);
        mock.set_regs(DEFAULT_ADDRESS, 2, &[0xAB, 0xCD]);

        let dev = QwiicDevice::new(DEFAULT_ADDRESS);
        let mut buf = [0u8; 2];
        dev.read_register(&mut bus, 2, &mut buf).await.unwrap();
        assert_eq!(buf, [0xAB, 0xCD]);
        assert_eq!(mock.writes(DEFAULT_ADDRESS), vec![vec![2]]);
        assert!(dev.is_present(&mut bus).await);
    }

    #[test]
    fn native_line_is_unusable_until_attached() {
        let mut line: NativeLine<dyn crate::bus::gpio::GpioPin> = NativeLine::new(5);
        assert_eq!(line.line(), 5);
        assert!(matches!(line.get("pir0"), Err(SensorError::NotInitialized { .. })));
    }

    #[tokio::test]
    async fn missing_board_fails_init_check() {
        let (mut bus, _mock) = MockI2c::new();
        let dev = QwiicDevice::new(DEFAULT_ADDRESS);
        assert!(matches!(
            dev.ensure_present(&mut bus, "enc0").await,
            Err(SensorError::InitError { .. })
        ));
    }

    #[tokio::test]
    async fn missing_board_surfaces_a_nack() {
        let (mut bus, _mock) = MockI2c::new();
        let dev = QwiicDevice::new(0x31);
        let err = dev.send_data(&mut bus, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, I2CError::Nack { address: 0x31 }));
    }
}
