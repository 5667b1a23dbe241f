//! Analog Devices AD8495 K-type thermocouple amplifier on a host ADC channel.

use super::qwiic::NativeLine;
use super::{SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::gpio::{AnalogInput, ADC_WIDTHS};
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;

/// 5 mV/°C
const VOLTS_PER_DEGREE: f32 = 0.005;
pub const DEFAULT_VREF: f32 = 3.3;

pub struct Ad8495 {
    id: String,
    bus_id: String,
    channel: NativeLine<dyn AnalogInput>,
    vref: f32,
    bits: u8,
    voltage_offset: f32,
    temperature_offset: f32,
    samples: u32,
}

impl Ad8495 {
    pub fn new(id: String, bus_id: String, channel: u32, vref: f32) -> Self {
        // The breakout's reference divider sits at 2.4 V on 3.3 V boards
        let voltage_offset = if (vref - 3.3).abs() < 1e-3 { 2.4 } else { 1.65 };
        Self {
            id,
            bus_id,
            channel: NativeLine::new(channel),
            vref,
            bits: 12,
            voltage_offset,
            temperature_offset: 0.0,
            samples: 1,
        }
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn attach(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let adc = bus.gpio(&self.id)?.analog(self.channel.line())?;
        let bits = adc.resolution_bits();
        if !ADC_WIDTHS.contains(&bits) {
            return Err(SensorError::ConfigError {
                sensor: self.id.clone(),
                reason: format!("unsupported ADC width of {} bits", bits),
            });
        }
        self.bits = bits;
        self.channel.attach(adc);
        Ok(())
    }

    /// Volts per ADC count
    pub fn precision(&self) -> f32 {
        self.vref / ((1u32 << self.bits) - 1) as f32
    }

    pub fn set_temperature_offset(&mut self, offset_c: f32) {
        self.temperature_offset = offset_c;
    }

    pub fn temperature_offset(&self) -> f32 {
        self.temperature_offset
    }

    pub fn set_voltage_offset(&mut self, volts: f32) {
        self.voltage_offset = volts;
    }

    pub fn voltage_offset(&self) -> f32 {
        self.voltage_offset
    }

    /// Mean of `samples` conversions, in volts
    pub fn read_voltage(&mut self, samples: u32) -> SensorResult<f32> {
        let samples = samples.max(1);
        let lsb = self.precision();
        let adc = self.channel.get(&self.id)?;
        let mut total = 0u64;
        for _ in 0..samples {
            total += adc.read_raw()? as u64;
        }
        Ok(total as f32 / samples as f32 * lsb)
    }

    pub fn temperature_c(&mut self, samples: u32) -> SensorResult<f32> {
        let volts = self.read_voltage(samples)?;
        Ok((volts - self.voltage_offset) / VOLTS_PER_DEGREE + self.temperature_offset)
    }

    pub fn temperature_f(&mut self, samples: u32) -> SensorResult<f32> {
        Ok(self.temperature_c(samples)? * 1.8 + 32.0)
    }

    /// Amplifier output swing for `temperature_c`, excluding the reference offset
    pub fn setpoint_voltage(&self, temperature_c: f32) -> f32 {
        temperature_c * VOLTS_PER_DEGREE
    }
}

#[async_trait]
impl SensorDriver for Ad8495 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        self.attach(bus)
    }

    async fn read(&mut self, _bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let volts = self.read_voltage(self.samples)?;
        Ok(SensorDataFrame {
            voltage: Some(volts),
            temperature: Some((volts - self.voltage_offset) / VOLTS_PER_DEGREE + self.temperature_offset),
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

pub static AD8495_FACTORY: Ad8495Factory = Ad8495Factory;

pub struct Ad8495Factory;

impl SensorFactory for Ad8495Factory {
    fn name(&self) -> &'static str {
        "ad8495"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let channel = entry.pins.analog.ok_or_else(|| SensorError::ConfigError {
            sensor: entry.id.clone(),
            reason: "pins.analog is required".to_string(),
        })?;
        let sensor = Ad8495::new(
            entry.id.clone(),
            entry.bus.clone(),
            channel,
            entry.vref.unwrap_or(DEFAULT_VREF),
        )
        .with_samples(entry.samples.unwrap_or(1));
        Ok(Box::new(sensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockGpio;
    use crate::config::PinConfig;

    #[test]
    fn reference_picks_default_offset() {
        assert_eq!(Ad8495::new("tc0".into(), "gpio".into(), 0, 3.3).voltage_offset(), 2.4);
        assert_eq!(Ad8495::new("tc0".into(), "gpio".into(), 0, 5.0).voltage_offset(), 1.65);
    }

    #[tokio::test]
    async fn averaged_reading_converts_to_celsius() {
        let (gpio, mock) = MockGpio::new();
        mock.set_adc(3, &[1770, 1780]);
        let mut bus = Bus::Gpio(gpio);

        // 4.095 V over 12 bits is exactly 1 mV per count
        let mut tc = Ad8495::new("tc0".into(), "gpio".into(), 3, 4.095).with_samples(2);
        tc.init(&mut bus).await.unwrap();
        assert!((tc.precision() - 0.001).abs() < 1e-7);

        let frame = tc.read(&mut bus).await.unwrap();
        assert!((frame.voltage.unwrap() - 1.775).abs() < 1e-4);
        assert!((frame.temperature.unwrap() - 25.0).abs() < 0.02);

        // The last scripted value (1.780 V) sticks
        tc.set_temperature_offset(-5.0);
        assert!((tc.temperature_c(1).unwrap() - 21.0).abs() < 0.02);
        assert!((tc.temperature_f(1).unwrap() - 69.8).abs() < 0.05);
    }

    #[tokio::test]
    async fn oversized_adc_width_is_refused() {
        let (gpio, mock) = MockGpio::new();
        mock.set_adc_bits(32);
        let mut bus = Bus::Gpio(gpio);
        let mut tc = Ad8495::new("tc0".into(), "gpio".into(), 3, 3.3);
        assert!(matches!(tc.init(&mut bus).await, Err(SensorError::ConfigError { .. })));
        assert_eq!(tc.precision(), 3.3 / 4095.0);
    }

    #[test]
    fn setpoint_is_five_millivolts_per_degree() {
        let tc = Ad8495::new("tc0".into(), "gpio".into(), 0, 3.3);
        assert!((tc.setpoint_voltage(100.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn read_before_init_is_an_error() {
        let mut tc = Ad8495::new("tc0".into(), "gpio".into(), 0, 3.3);
        assert!(matches!(tc.read_voltage(1), Err(SensorError::NotInitialized { .. })));
    }

    #[test]
    fn factory_requires_an_analog_pin() {
        let mut entry = SensorEntry {
            id: "tc0".into(),
            driver: "ad8495".into(),
            bus: "gpio".into(),
            ..SensorEntry::default()
        };
        assert!(matches!(
            AD8495_FACTORY.create(&entry),
            Err(SensorError::ConfigError { .. })
        ));
        entry.pins = PinConfig {
            analog: Some(0),
            ..PinConfig::default()
        };
        assert!(AD8495_FACTORY.create(&entry).is_ok());
    }
}
