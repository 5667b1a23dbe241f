//! Hall effect breakouts, analog (field strength) and digital (magnet present),
//! each either on host pins or behind a Qwiic microcontroller.

use super::qwiic::{NativeLine, QwiicDevice, Wiring, DEFAULT_ADDRESS};
use super::{SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::gpio::{AnalogInput, GpioPin, ADC_WIDTHS};
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;

const READ_REG: u8 = 0;
/// Full-scale field of the sensing element
const FULL_SCALE_MT: f32 = 20.47;
/// Zero-field point of a 12-bit host ADC with 11 dB attenuation
const ZERO_FIELD_12BIT: f32 = 2710.0;

/// Native 12-bit ADCs are non-linear near the top, so the two halves of the
/// range are mapped separately around the measured zero-field count.
pub fn millitesla_12bit(raw: u16) -> f32 {
    let raw = raw as f32;
    if raw >= ZERO_FIELD_12BIT {
        (raw - ZERO_FIELD_12BIT) * FULL_SCALE_MT / (4095.0 - ZERO_FIELD_12BIT)
    } else {
        raw * FULL_SCALE_MT / ZERO_FIELD_12BIT - FULL_SCALE_MT
    }
}

/// None for an ADC width outside [`ADC_WIDTHS`]
pub fn millitesla_generic(raw: u16, bits: u8, vref: f32) -> Option<f32> {
    if !ADC_WIDTHS.contains(&bits) {
        return None;
    }
    let max = ((1u32 << bits) - 1) as f32;
    Some(FULL_SCALE_MT * (bits as f32 * (raw as f32 / max) / vref - 1.0))
}

/// The Qwiic board reports a 10-bit count against 5 V
pub fn millitesla_qwiic(raw: u16) -> f32 {
    FULL_SCALE_MT * (10.0 * (raw as f32 / 1023.0) / 5.0 - 1.0)
}

pub struct HallEffectAnalog {
    id: String,
    bus_id: String,
    wiring: Wiring<NativeLine<dyn AnalogInput>>,
    vref: f32,
}

impl HallEffectAnalog {
    pub fn new(id: String, bus_id: String, wiring: Wiring<NativeLine<dyn AnalogInput>>, vref: f32) -> Self {
        Self { id, bus_id, wiring, vref }
    }

    pub async fn begin(&mut self, bus: &mut Bus) -> SensorResult<()> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => dev.ensure_present(bus.i2c(&self.id)?, &self.id).await,
            Wiring::Native(channel) => {
                let adc = bus.gpio(&self.id)?.analog(channel.line())?;
                let bits = adc.resolution_bits();
                if !ADC_WIDTHS.contains(&bits) {
                    return Err(SensorError::ConfigError {
                        sensor: self.id.clone(),
                        reason: format!("unsupported ADC width of {} bits", bits),
                    });
                }
                channel.attach(adc);
                Ok(())
            }
        }
    }

    /// Raw ADC count
    pub async fn reading(&mut self, bus: &mut Bus) -> SensorResult<u16> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => {
                let mut data = [0u8; 2];
                dev.read_register(bus.i2c(&self.id)?, READ_REG, &mut data).await?;
                Ok(u16::from_le_bytes(data))
            }
            Wiring::Native(channel) => Ok(channel.get(&self.id)?.read_raw()?),
        }
    }

    pub async fn millitesla(&mut self, bus: &mut Bus) -> SensorResult<f32> {
        let raw = self.reading(bus).await?;
        self.convert(raw)
    }

    fn convert(&mut self, raw: u16) -> SensorResult<f32> {
        match &mut self.wiring {
            Wiring::Qwiic(_) => Ok(millitesla_qwiic(raw)),
            Wiring::Native(channel) => match channel.get(&self.id)?.resolution_bits() {
                12 => Ok(millitesla_12bit(raw)),
                bits => millitesla_generic(raw, bits, self.vref)
                    .ok_or_else(|| SensorError::data(&self.id, format!("unsupported ADC width of {} bits", bits))),
            },
        }
    }
}

#[async_trait]
impl SensorDriver for HallEffectAnalog {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        self.begin(bus).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let raw = self.reading(bus).await?;
        Ok(SensorDataFrame {
            analog_raw: Some(raw),
            magnetic_field_mt: Some(self.convert(raw)?),
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

pub struct HallEffectDigital {
    id: String,
    bus_id: String,
    wiring: Wiring<NativeLine<dyn GpioPin>>,
}

impl HallEffectDigital {
    pub fn new(id: String, bus_id: String, wiring: Wiring<NativeLine<dyn GpioPin>>) -> Self {
        Self { id, bus_id, wiring }
    }

    pub async fn begin(&mut self, bus: &mut Bus) -> SensorResult<()> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => dev.ensure_present(bus.i2c(&self.id)?, &self.id).await,
            Wiring::Native(line) => {
                let pin = bus.gpio(&self.id)?.input(line.line())?;
                line.attach(pin);
                Ok(())
            }
        }
    }

    /// True while a magnet is in range; the sensor output is active low
    pub async fn detected(&mut self, bus: &mut Bus) -> SensorResult<bool> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => {
                let mut data = [0u8; 2];
                dev.read_register(bus.i2c(&self.id)?, READ_REG, &mut data).await?;
                Ok(data[1] == 0)
            }
            Wiring::Native(line) => Ok(!line.get(&self.id)?.is_high()?),
        }
    }
}

#[async_trait]
impl SensorDriver for HallEffectDigital {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        self.begin(bus).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        Ok(SensorDataFrame {
            detected: Some(self.detected(bus).await?),
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

fn missing_pin(entry: &SensorEntry, pin: &str) -> SensorError {
    SensorError::ConfigError {
        sensor: entry.id.clone(),
        reason: format!("native wiring needs pins.{}", pin),
    }
}

pub static HALL_ANALOG_FACTORY: HallAnalogFactory = HallAnalogFactory;
pub static HALL_DIGITAL_FACTORY: HallDigitalFactory = HallDigitalFactory;

pub struct HallAnalogFactory;

impl SensorFactory for HallAnalogFactory {
    fn name(&self) -> &'static str {
        "hall_analog"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let wiring = if entry.pins.is_native() {
            let channel = entry.pins.analog.ok_or_else(|| missing_pin(entry, "analog"))?;
            Wiring::Native(NativeLine::new(channel))
        } else {
            Wiring::Qwiic(QwiicDevice::new(entry.address.unwrap_or(DEFAULT_ADDRESS)))
        };
        Ok(Box::new(HallEffectAnalog::new(
            entry.id.clone(),
            entry.bus.clone(),
            wiring,
            entry.vref.unwrap_or(3.3),
        )))
    }
}

pub struct HallDigitalFactory;

impl SensorFactory for HallDigitalFactory {
    fn name(&self) -> &'static str {
        "hall_digital"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let wiring = if entry.pins.is_native() {
            let line = entry.pins.signal.ok_or_else(|| missing_pin(entry, "signal"))?;
            Wiring::Native(NativeLine::new(line))
        } else {
            Wiring::Qwiic(QwiicDevice::new(entry.address.unwrap_or(DEFAULT_ADDRESS)))
        };
        Ok(Box::new(HallEffectDigital::new(entry.id.clone(), entry.bus.clone(), wiring)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{AddrMode, MockGpio, MockI2c};

    #[test]
    fn conversion_curves() {
        assert!(millitesla_12bit(2710).abs() < 1e-4);
        assert!((millitesla_12bit(4095) - 20.47).abs() < 1e-3);
        assert!((millitesla_12bit(0) + 20.47).abs() < 1e-3);
        assert!(millitesla_qwiic(512).abs() < 0.05);
        assert!((millitesla_qwiic(0) + 20.47).abs() < 1e-3);
    }

    #[tokio::test]
    async fn native_analog_uses_split_curve() {
        let (gpio, mock) = MockGpio::new();
        mock.set_adc(2, &[4095]);
        let mut bus = Bus::Gpio(gpio);
        let mut hall = HallEffectAnalog::new("hall0".into(), "gpio".into(), Wiring::Native(NativeLine::new(2)), 3.3);
        hall.init(&mut bus).await.unwrap();

        let frame = hall.read(&mut bus).await.unwrap();
        assert_eq!(frame.analog_raw, Some(4095));
        assert!((frame.magnetic_field_mt.unwrap() - 20.47).abs() < 1e-3);
    }

    #[tokio::test]
    async fn native_10bit_adc_uses_generic_formula() {
        let (gpio, mock) = MockGpio::new();
        mock.set_adc_bits(10);
        mock.set_adc(0, &[1023]);
        let mut bus = Bus::Gpio(gpio);
        let mut hall = HallEffectAnalog::new("hall0".into(), "gpio".into(), Wiring::Native(NativeLine::new(0)), 5.0);
        hall.init(&mut bus).await.unwrap();
        // 20.47 * (10 / 5 - 1)
        assert!((hall.millitesla(&mut bus).await.unwrap() - 20.47).abs() < 1e-3);
    }

    #[test]
    fn generic_formula_rejects_impossible_widths() {
        assert_eq!(millitesla_generic(0, 0, 3.3), None);
        assert_eq!(millitesla_generic(0, 32, 3.3), None);
        assert!(millitesla_generic(65535, 16, 3.3).is_some());
    }

    #[tokio::test]
    async fn zero_bit_adc_is_refused_at_init() {
        let (gpio, mock) = MockGpio::new();
        mock.set_adc_bits(0);
        let mut bus = Bus::Gpio(gpio);
        let mut hall = HallEffectAnalog::new("hall0".into(), "gpio".into(), Wiring::Native(NativeLine::new(0)), 3.3);
        assert!(matches!(
            hall.init(&mut bus).await,
            Err(SensorError::ConfigError { .. })
        ));
    }

    #[tokio::test]
    async fn qwiic_analog_reads_little_endian() {
        let (i2c, mock) = MockI2c::new();
        mock.add_device(DEFAULT_ADDRESS, AddrMode::Reg8);
        mock.set_regs(DEFAULT_ADDRESS, 0, &[0xFF, 0x03]);
        let mut bus = Bus::I2c(i2c);
        let mut hall = HallEffectAnalog::new(
            "hall0".into(),
            "i2c1".into(),
            Wiring::Qwiic(QwiicDevice::new(DEFAULT_ADDRESS)),
            3.3,
        );
        hall.init(&mut bus).await.unwrap();
        assert_eq!(hall.reading(&mut bus).await.unwrap(), 1023);
        assert!((hall.millitesla(&mut bus).await.unwrap() - 20.47).abs() < 1e-3);
    }

    #[tokio::test]
    async fn digital_is_active_low_in_both_modes() {
        let (gpio, mock) = MockGpio::new();
        let mut bus = Bus::Gpio(gpio);
        let mut hall = HallEffectDigital::new("mag0".into(), "gpio".into(), Wiring::Native(NativeLine::new(7)));
        hall.init(&mut bus).await.unwrap();
        mock.set_level(7, true);
        assert!(!hall.detected(&mut bus).await.unwrap());
        mock.set_level(7, false);
        assert!(hall.detected(&mut bus).await.unwrap());

        let (i2c, mock) = MockI2c::new();
        mock.add_device(DEFAULT_ADDRESS, AddrMode::Reg8);
        mock.set_regs(DEFAULT_ADDRESS, 0, &[0x00, 0x01]);
        let mut bus = Bus::I2c(i2c);
        let mut hall = HallEffectDigital::new(
            "mag0".into(),
            "i2c1".into(),
            Wiring::Qwiic(QwiicDevice::new(DEFAULT_ADDRESS)),
        );
        assert!(!hall.detected(&mut bus).await.unwrap());
        mock.set_reg(DEFAULT_ADDRESS, 1, 0x00);
        assert!(hall.detected(&mut bus).await.unwrap());
    }

    #[test]
    fn factory_picks_wiring_from_pins() {
        let entry = SensorEntry {
            id: "mag0".into(),
            driver: "hall_digital".into(),
            bus: "gpio".into(),
            pins: crate::config::PinConfig {
                analog: Some(1),
                ..Default::default()
            },
            ..SensorEntry::default()
        };
        assert!(matches!(
            HALL_DIGITAL_FACTORY.create(&entry),
            Err(SensorError::ConfigError { .. })
        ));
        assert!(HALL_ANALOG_FACTORY.create(&entry).is_ok());
    }
}
