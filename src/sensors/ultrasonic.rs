//! HC-SR04 ultrasonic ranger, driven from host trigger/echo pins or through
//! the Qwiic board that times the echo itself.

use super::qwiic::{NativeLine, QwiicDevice, Wiring, DEFAULT_ADDRESS};
use super::{SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::gpio::{pulse_width, GpioPin};
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

const TAKE_MEASURE_REG: u8 = 0;
const DISTANCE_REG: u8 = 1;
const DURATION_REG: u8 = 2;

const ECHO_TIMEOUT: Duration = Duration::from_millis(50);
/// Time the Qwiic board needs between a trigger command and a valid result
const QWIIC_MEASURE_TIME: Duration = Duration::from_millis(50);
/// Speed of sound in cm/µs
const SOUND_CM_PER_US: f32 = 0.034;

pub struct EchoPins {
    pub trigger: NativeLine<dyn GpioPin>,
    pub echo: NativeLine<dyn GpioPin>,
}

impl EchoPins {
    pub fn new(trigger: u32, echo: u32) -> Self {
        Self {
            trigger: NativeLine::new(trigger),
            echo: NativeLine::new(echo),
        }
    }
}

pub struct Ultrasonic {
    id: String,
    bus_id: String,
    wiring: Wiring<EchoPins>,
}

/// Pulse the trigger and busy-time the echo. Blocks for up to `ECHO_TIMEOUT`.
fn trigger_and_time(trigger: &mut dyn GpioPin, echo: &mut dyn GpioPin) -> SensorResult<Duration> {
    trigger.set_level(false)?;
    std::thread::sleep(Duration::from_micros(5));
    trigger.set_level(true)?;
    std::thread::sleep(Duration::from_micros(20));
    trigger.set_level(false)?;
    Ok(pulse_width(echo, true, ECHO_TIMEOUT)?)
}

/// Trigger one ping and time the echo. Zero means no echo within the timeout.
///
/// The timing runs on the blocking pool so other sensor tasks keep running.
async fn ping(id: &str, pins: &mut EchoPins) -> SensorResult<Duration> {
    let mut trigger = pins.trigger.take(id)?;
    let mut echo = match pins.echo.take(id) {
        Ok(echo) => echo,
        Err(e) => {
            pins.trigger.attach(trigger);
            return Err(e);
        }
    };
    let (trigger, echo, timed) = tokio::task::spawn_blocking(move || {
        let timed = trigger_and_time(trigger.as_mut(), echo.as_mut());
        (trigger, echo, timed)
    })
    .await
    .map_err(|e| SensorError::data(id, format!("echo timing task failed: {}", e)))?;
    pins.trigger.attach(trigger);
    pins.echo.attach(echo);
    timed
}

pub fn echo_to_cm(echo: Duration) -> f32 {
    echo.as_micros() as f32 * SOUND_CM_PER_US / 2.0
}

impl Ultrasonic {
    pub fn new(id: String, bus_id: String, wiring: Wiring<EchoPins>) -> Self {
        Self { id, bus_id, wiring }
    }

    pub async fn begin(&mut self, bus: &mut Bus) -> SensorResult<()> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => dev.ensure_present(bus.i2c(&self.id)?, &self.id).await,
            Wiring::Native(pins) => {
                let gpio = bus.gpio(&self.id)?;
                pins.trigger.attach(gpio.output(pins.trigger.line(), false)?);
                pins.echo.attach(gpio.input(pins.echo.line())?);
                Ok(())
            }
        }
    }

    /// Ask the Qwiic board to range. Native wiring pings on every read instead.
    pub async fn take_measure(&mut self, bus: &mut Bus) -> SensorResult<()> {
        match &self.wiring {
            Wiring::Qwiic(dev) => Ok(dev.send_address(bus.i2c(&self.id)?, TAKE_MEASURE_REG).await?),
            Wiring::Native(_) => Ok(()),
        }
    }

    /// Echo pulse width in microseconds
    pub async fn duration_us(&mut self, bus: &mut Bus) -> SensorResult<u32> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => Ok(read_u16_le(dev, bus, &self.id, DURATION_REG).await? as u32),
            Wiring::Native(pins) => Ok(ping(&self.id, pins).await?.as_micros() as u32),
        }
    }

    /// Distance in centimetres; 0 when nothing echoed back
    pub async fn distance_cm(&mut self, bus: &mut Bus) -> SensorResult<f32> {
        match &mut self.wiring {
            Wiring::Qwiic(dev) => Ok(read_u16_le(dev, bus, &self.id, DISTANCE_REG).await? as f32),
            Wiring::Native(pins) => Ok(echo_to_cm(ping(&self.id, pins).await?)),
        }
    }
}

async fn read_u16_le(dev: &QwiicDevice, bus: &mut Bus, id: &str, reg: u8) -> SensorResult<u16> {
    let mut data = [0u8; 2];
    dev.read_register(bus.i2c(id)?, reg, &mut data).await?;
    Ok(u16::from_le_bytes(data))
}

#[async_trait]
impl SensorDriver for Ultrasonic {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        self.begin(bus).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        if let Wiring::Qwiic(_) = self.wiring {
            self.take_measure(bus).await?;
            sleep(QWIIC_MEASURE_TIME).await;
        }
        let cm = self.distance_cm(bus).await?;
        Ok(SensorDataFrame {
            distance_mm: Some(cm * 10.0),
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

pub static ULTRASONIC_FACTORY: UltrasonicFactory = UltrasonicFactory;

pub struct UltrasonicFactory;

impl SensorFactory for UltrasonicFactory {
    fn name(&self) -> &'static str {
        "ultrasonic"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        let wiring = match (entry.pins.trigger, entry.pins.echo) {
            (Some(trigger), Some(echo)) => Wiring::Native(EchoPins::new(trigger, echo)),
            (None, None) if !entry.pins.is_native() => {
                Wiring::Qwiic(QwiicDevice::new(entry.address.unwrap_or(DEFAULT_ADDRESS)))
            }
            _ => {
                return Err(SensorError::ConfigError {
                    sensor: entry.id.clone(),
                    reason: "native wiring needs both pins.trigger and pins.echo".to_string(),
                })
            }
        };
        Ok(Box::new(Ultrasonic::new(entry.id.clone(), entry.bus.clone(), wiring)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{AddrMode, MockGpio, MockI2c};
    use crate::config::PinConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn echo_time_converts_to_centimetres() {
        assert!((echo_to_cm(Duration::from_micros(1000)) - 17.0).abs() < 1e-4);
        assert_eq!(echo_to_cm(Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn native_ping_pulses_trigger_and_times_echo() {
        let (gpio, mock) = MockGpio::new();
        mock.script(24, &[false, true, true, false]);
        let mut bus = Bus::Gpio(gpio);
        let mut sonar = Ultrasonic::new("sonar".into(), "gpio".into(), Wiring::Native(EchoPins::new(23, 24)));
        sonar.init(&mut bus).await.unwrap();

        let cm = sonar.distance_cm(&mut bus).await.unwrap();
        assert!(cm >= 0.0 && cm < 50.0 * 1000.0 * SOUND_CM_PER_US / 2.0);
        // Initial low from claiming the line, then low-high-low
        assert_eq!(mock.history(23), vec![false, false, true, false]);
    }

    #[tokio::test]
    async fn native_without_echo_reads_zero() {
        let (gpio, mock) = MockGpio::new();
        mock.set_level(24, false);
        let mut bus = Bus::Gpio(gpio);
        let mut sonar = Ultrasonic::new("sonar".into(), "gpio".into(), Wiring::Native(EchoPins::new(23, 24)));
        sonar.init(&mut bus).await.unwrap();

        let frame = sonar.read(&mut bus).await.unwrap();
        assert_eq!(frame.distance_mm, Some(0.0));
    }

    #[tokio::test]
    async fn waiting_for_an_echo_leaves_the_runtime_free() {
        let (gpio, mock) = MockGpio::new();
        mock.set_level(24, false);
        let mut bus = Bus::Gpio(gpio);
        let mut sonar = Ultrasonic::new("sonar".into(), "gpio".into(), Wiring::Native(EchoPins::new(23, 24)));
        sonar.init(&mut bus).await.unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(1)).await;
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        let frame = sonar.read(&mut bus).await.unwrap();
        ticker.abort();
        assert_eq!(frame.distance_mm, Some(0.0));
        // The echo timeout spans 50 ms; a pinned runtime would see no ticks
        assert!(ticks.load(Ordering::Relaxed) >= 5);

        // Pins are handed back after the timing thread finishes
        assert_eq!(sonar.read(&mut bus).await.unwrap().distance_mm, Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn qwiic_triggers_then_reads_distance_register() {
        let (i2c, mock) = MockI2c::new();
        mock.add_device(DEFAULT_ADDRESS, AddrMode::Command);
        let mut bus = Bus::I2c(i2c);
        let mut sonar = Ultrasonic::new(
            "sonar".into(),
            "i2c1".into(),
            Wiring::Qwiic(QwiicDevice::new(DEFAULT_ADDRESS)),
        );
        sonar.init(&mut bus).await.unwrap();

        mock.queue_read(DEFAULT_ADDRESS, &[0x2A, 0x01]);
        let frame = sonar.read(&mut bus).await.unwrap();
        assert_eq!(frame.distance_mm, Some(2980.0));
        assert_eq!(mock.writes(DEFAULT_ADDRESS), vec![vec![0], vec![1]]);

        mock.queue_read(DEFAULT_ADDRESS, &[0x10, 0x27]);
        assert_eq!(sonar.duration_us(&mut bus).await.unwrap(), 10_000);
    }

    #[test]
    fn factory_rejects_half_wired_native() {
        let entry = SensorEntry {
            id: "sonar".into(),
            driver: "ultrasonic".into(),
            bus: "gpio".into(),
            pins: PinConfig {
                trigger: Some(23),
                ..PinConfig::default()
            },
            ..SensorEntry::default()
        };
        assert!(matches!(
            ULTRASONIC_FACTORY.create(&entry),
            Err(SensorError::ConfigError { .. })
        ));
    }
}
