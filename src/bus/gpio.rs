use embedded_hal::digital::{Error as _, InputPin, OutputPin};
use std::time::{Duration, Instant};
use thiserror::Error;

#[cfg(target_os = "linux")]
use linux_embedded_hal::sysfs_gpio::Direction;
#[cfg(target_os = "linux")]
use linux_embedded_hal::SysfsPin;

#[derive(Error, Debug)]
pub enum GpioError {
    #[error("GPIO line {line} could not be claimed: {reason}")]
    Claim { line: u32, reason: String },

    #[error("GPIO pin access failed: {0}")]
    Pin(String),

    #[error("ADC channel {channel} read failed: {reason}")]
    Adc { channel: u32, reason: String },

    #[error("GPIO is only supported on Linux")]
    Unsupported,
}

/// A single digital line
pub trait GpioPin: Send {
    fn set_level(&mut self, high: bool) -> Result<(), GpioError>;
    fn is_high(&mut self) -> Result<bool, GpioError>;
}

/// Converter widths the drivers can scale, in bits
pub const ADC_WIDTHS: std::ops::RangeInclusive<u8> = 1..=16;

/// A single ADC channel returning raw counts
pub trait AnalogInput: Send {
    fn read_raw(&mut self) -> Result<u16, GpioError>;
    fn resolution_bits(&self) -> u8;
}

/// Hands out pins and ADC channels for one GPIO controller
pub trait PinProvider: Send {
    fn output(&mut self, line: u32, initial_high: bool) -> Result<Box<dyn GpioPin>, GpioError>;
    fn input(&mut self, line: u32) -> Result<Box<dyn GpioPin>, GpioError>;
    fn analog(&mut self, channel: u32) -> Result<Box<dyn AnalogInput>, GpioError>;
}

/// Adapter from any embedded-hal 1.0 pin to [`GpioPin`]
pub struct HalPin<P>(pub P);

impl<P> GpioPin for HalPin<P>
where
    P: OutputPin + InputPin + Send,
{
    fn set_level(&mut self, high: bool) -> Result<(), GpioError> {
        let result = if high { self.0.set_high() } else { self.0.set_low() };
        result.map_err(|e| GpioError::Pin(format!("{:?}", e.kind())))
    }

    fn is_high(&mut self) -> Result<bool, GpioError> {
        self.0
            .is_high()
            .map_err(|e| GpioError::Pin(format!("{:?}", e.kind())))
    }
}

/// Linux sysfs GPIO plus IIO ADC channels
#[cfg(target_os = "linux")]
pub struct SysfsPinProvider {
    adc_path: Option<String>,
    adc_bits: u8,
}

#[cfg(target_os = "linux")]
impl SysfsPinProvider {
    pub fn new(adc_path: Option<String>, adc_bits: u8) -> Self {
        Self { adc_path, adc_bits }
    }

    fn claim(line: u32, direction: Direction) -> Result<SysfsPin, GpioError> {
        let claim_err = |e: linux_embedded_hal::sysfs_gpio::Error| GpioError::Claim {
            line,
            reason: e.to_string(),
        };
        let pin = SysfsPin::new(line as u64);
        pin.export().map_err(claim_err)?;
        pin.set_direction(direction).map_err(claim_err)?;
        Ok(pin)
    }
}

#[cfg(target_os = "linux")]
impl PinProvider for SysfsPinProvider {
    fn output(&mut self, line: u32, initial_high: bool) -> Result<Box<dyn GpioPin>, GpioError> {
        let direction = if initial_high { Direction::High } else { Direction::Low };
        Ok(Box::new(HalPin(Self::claim(line, direction)?)))
    }

    fn input(&mut self, line: u32) -> Result<Box<dyn GpioPin>, GpioError> {
        Ok(Box::new(HalPin(Self::claim(line, Direction::In)?)))
    }

    fn analog(&mut self, channel: u32) -> Result<Box<dyn AnalogInput>, GpioError> {
        let base = self.adc_path.as_deref().ok_or_else(|| GpioError::Adc {
            channel,
            reason: "no adc_path configured for this bus".to_string(),
        })?;
        Ok(Box::new(IioChannel {
            channel,
            path: format!("{}/in_voltage{}_raw", base, channel),
            bits: self.adc_bits,
        }))
    }
}

/// Industrial-I/O sysfs ADC channel
pub struct IioChannel {
    channel: u32,
    path: String,
    bits: u8,
}

impl AnalogInput for IioChannel {
    fn read_raw(&mut self) -> Result<u16, GpioError> {
        let adc_err = |reason: String| GpioError::Adc { channel: self.channel, reason };
        let text = std::fs::read_to_string(&self.path).map_err(|e| adc_err(e.to_string()))?;
        text.trim()
            .parse::<u16>()
            .map_err(|e| adc_err(format!("'{}': {}", text.trim(), e)))
    }

    fn resolution_bits(&self) -> u8 {
        self.bits
    }
}

/// GPIO controller as seen by the drivers
pub struct GpioBus {
    provider: Box<dyn PinProvider>,
}

impl GpioBus {
    #[cfg(target_os = "linux")]
    pub fn sysfs(adc_path: Option<String>, adc_bits: u8) -> Result<Self, GpioError> {
        Ok(Self::with_provider(Box::new(SysfsPinProvider::new(adc_path, adc_bits))))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn sysfs(_adc_path: Option<String>, _adc_bits: u8) -> Result<Self, GpioError> {
        Err(GpioError::Unsupported)
    }

    pub fn with_provider(provider: Box<dyn PinProvider>) -> Self {
        Self { provider }
    }

    pub fn output(&mut self, line: u32, initial_high: bool) -> Result<Box<dyn GpioPin>, GpioError> {
        self.provider.output(line, initial_high)
    }

    pub fn input(&mut self, line: u32) -> Result<Box<dyn GpioPin>, GpioError> {
        self.provider.input(line)
    }

    pub fn analog(&mut self, channel: u32) -> Result<Box<dyn AnalogInput>, GpioError> {
        self.provider.analog(channel)
    }
}

/// Width of the next pulse at `level` on `pin`, busy-polling.
///
/// Returns `Duration::ZERO` when the pulse does not start and finish
/// within `timeout`.
pub fn pulse_width(pin: &mut dyn GpioPin, level: bool, timeout: Duration) -> Result<Duration, GpioError> {
    let start = Instant::now();
    while pin.is_high()? != level {
        if start.elapsed() > timeout {
            return Ok(Duration::ZERO);
        }
    }
    let rising = Instant::now();
    while pin.is_high()? == level {
        if start.elapsed() > timeout {
            return Ok(Duration::ZERO);
        }
    }
    Ok(rising.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockGpio;

    #[test]
    fn pulse_width_times_out_without_an_edge() {
        let (mut bus, gpio) = MockGpio::new();
        gpio.set_level(4, false);
        let mut pin = bus.input(4).unwrap();
        let width = pulse_width(pin.as_mut(), true, Duration::from_millis(5)).unwrap();
        assert_eq!(width, Duration::ZERO);
    }

    #[test]
    fn pulse_width_measures_a_scripted_pulse() {
        let (mut bus, gpio) = MockGpio::new();
        gpio.script(4, &[false, true, true, true, false]);
        let mut pin = bus.input(4).unwrap();
        let width = pulse_width(pin.as_mut(), true, Duration::from_millis(50)).unwrap();
        assert!(width < Duration::from_millis(50));
    }
}
