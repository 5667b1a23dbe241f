//! DRV8825 stepper motor driver on host GPIO.

use crate::bus::gpio::{GpioBus, GpioPin};
use crate::errors::{SensorError, SensorResult};
use std::time::Duration;

const RESET_PULSE: Duration = Duration::from_millis(1);
const DIRECTION_SETUP: Duration = Duration::from_micros(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    CounterClockwise = 0,
    Clockwise = 1,
}

/// GPIO lines wired to the driver. DIR and STEP are mandatory.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepperPins {
    pub dir: u32,
    pub step: u32,
    pub enable: Option<u32>,
    pub reset: Option<u32>,
    pub sleep: Option<u32>,
}

pub struct Drv8825 {
    id: String,
    dir: Box<dyn GpioPin>,
    step: Box<dyn GpioPin>,
    enable: Option<Box<dyn GpioPin>>,
    reset: Option<Box<dyn GpioPin>>,
    sleep: Option<Box<dyn GpioPin>>,
    direction: Direction,
    steps: u64,
    steps_per_rotation: u32,
    position: u32,
    pulse_length: Duration,
    enabled: bool,
    sleeping: bool,
}

impl Drv8825 {
    /// Claim the pins: DIR, STEP and EN start low, RST and SLP high, which
    /// leaves the driver enabled and awake.
    pub fn begin(id: &str, gpio: &mut GpioBus, pins: StepperPins) -> SensorResult<Self> {
        let dir = gpio.output(pins.dir, false)?;
        let step = gpio.output(pins.step, false)?;
        let enable = pins.enable.map(|line| gpio.output(line, false)).transpose()?;
        let reset = pins.reset.map(|line| gpio.output(line, true)).transpose()?;
        let sleep = pins.sleep.map(|line| gpio.output(line, true)).transpose()?;
        Ok(Self {
            id: id.to_string(),
            dir,
            step,
            enable,
            reset,
            sleep,
            direction: Direction::CounterClockwise,
            steps: 0,
            steps_per_rotation: 0,
            position: 0,
            pulse_length: Duration::ZERO,
            enabled: true,
            sleeping: false,
        })
    }

    pub fn set_steps_per_rotation(&mut self, steps: u32) {
        self.steps_per_rotation = steps;
    }

    pub fn steps_per_rotation(&self) -> u32 {
        self.steps_per_rotation
    }

    pub fn set_direction(&mut self, direction: Direction) -> SensorResult<()> {
        self.direction = direction;
        std::thread::sleep(DIRECTION_SETUP);
        self.dir.set_level(direction == Direction::Clockwise)?;
        std::thread::sleep(DIRECTION_SETUP);
        Ok(())
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// High time and low time of each STEP pulse; zero toggles as fast as
    /// the GPIO allows.
    pub fn set_step_pulse_length(&mut self, length: Duration) {
        self.pulse_length = length;
    }

    pub fn step_pulse_length(&self) -> Duration {
        self.pulse_length
    }

    /// One STEP pulse. Position only tracks once steps per rotation is set.
    pub fn step(&mut self) -> SensorResult<()> {
        self.step.set_level(true)?;
        if !self.pulse_length.is_zero() {
            std::thread::sleep(self.pulse_length);
        }
        self.step.set_level(false)?;
        if !self.pulse_length.is_zero() {
            std::thread::sleep(self.pulse_length);
        }

        self.steps += 1;
        let per_rotation = self.steps_per_rotation;
        if per_rotation > 0 {
            self.position = match self.direction {
                Direction::Clockwise => (self.position + 1) % per_rotation,
                Direction::CounterClockwise => (self.position + per_rotation - 1) % per_rotation,
            };
        }
        Ok(())
    }

    /// Replace the step counter, returning the old count
    pub fn reset_steps(&mut self, steps: u64) -> u64 {
        std::mem::replace(&mut self.steps, steps)
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn set_position(&mut self, position: u32) -> SensorResult<()> {
        if position >= self.steps_per_rotation {
            return Err(SensorError::invalid(
                &self.id,
                format!("position {} not below {} steps per rotation", position, self.steps_per_rotation),
            ));
        }
        self.position = position;
        Ok(())
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    /// EN is active low. Returns false when no EN pin is wired.
    pub fn enable(&mut self) -> SensorResult<bool> {
        let Some(pin) = self.enable.as_mut() else {
            return Ok(false);
        };
        pin.set_level(false)?;
        self.enabled = true;
        Ok(true)
    }

    pub fn disable(&mut self) -> SensorResult<bool> {
        let Some(pin) = self.enable.as_mut() else {
            return Ok(false);
        };
        pin.set_level(true)?;
        self.enabled = false;
        Ok(true)
    }

    /// Without an EN pin the driver is permanently enabled
    pub fn is_enabled(&self) -> bool {
        self.enable.is_none() || self.enabled
    }

    /// Pulse RST low for 1 ms
    pub fn reset(&mut self) -> SensorResult<bool> {
        let Some(pin) = self.reset.as_mut() else {
            return Ok(false);
        };
        pin.set_level(false)?;
        std::thread::sleep(RESET_PULSE);
        pin.set_level(true)?;
        Ok(true)
    }

    pub fn sleep(&mut self) -> SensorResult<bool> {
        let Some(pin) = self.sleep.as_mut() else {
            return Ok(false);
        };
        pin.set_level(false)?;
        self.sleeping = true;
        Ok(true)
    }

    pub fn wakeup(&mut self) -> SensorResult<bool> {
        let Some(pin) = self.sleep.as_mut() else {
            return Ok(false);
        };
        pin.set_level(true)?;
        self.sleeping = false;
        Ok(true)
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleep.is_some() && self.sleeping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockGpio;

    const DIR: u32 = 20;
    const STEP: u32 = 21;
    const EN: u32 = 16;
    const SLP: u32 = 19;
    const RST: u32 = 26;

    fn full_pins() -> StepperPins {
        StepperPins {
            dir: DIR,
            step: STEP,
            enable: Some(EN),
            reset: Some(RST),
            sleep: Some(SLP),
        }
    }

    #[test]
    fn begin_sets_initial_levels() {
        let (mut gpio, mock) = MockGpio::new();
        let motor = Drv8825::begin("stepper", &mut gpio, full_pins()).unwrap();
        assert!(!mock.level(DIR) && !mock.level(STEP) && !mock.level(EN));
        assert!(mock.level(RST) && mock.level(SLP));
        assert!(motor.is_enabled());
        assert!(!motor.is_sleeping());
    }

    #[test]
    fn position_wraps_in_both_directions() {
        let (mut gpio, mock) = MockGpio::new();
        let mut motor = Drv8825::begin("stepper", &mut gpio, full_pins()).unwrap();
        motor.set_steps_per_rotation(4);

        motor.step().unwrap();
        assert_eq!(motor.position(), 3);

        motor.set_direction(Direction::Clockwise).unwrap();
        assert!(mock.level(DIR));
        for _ in 0..3 {
            motor.step().unwrap();
        }
        assert_eq!(motor.position(), 2);
        assert_eq!(motor.steps(), 4);
        assert_eq!(mock.history(STEP), vec![false, true, false, true, false, true, false, true, false]);

        assert_eq!(motor.reset_steps(10), 4);
        assert_eq!(motor.steps(), 10);
        assert!(motor.set_position(4).is_err());
        motor.set_position(1).unwrap();
        assert_eq!(motor.position(), 1);
    }

    #[test]
    fn optional_pins_drive_state() {
        let (mut gpio, mock) = MockGpio::new();
        let mut motor = Drv8825::begin("stepper", &mut gpio, full_pins()).unwrap();

        assert!(motor.disable().unwrap());
        assert!(mock.level(EN));
        assert!(!motor.is_enabled());

        assert!(motor.sleep().unwrap());
        assert!(motor.is_sleeping());
        assert!(motor.wakeup().unwrap());
        assert!(!motor.is_sleeping());

        assert!(motor.reset().unwrap());
        assert_eq!(mock.history(RST), vec![true, false, true]);
    }

    #[test]
    fn missing_optional_pins_report_defaults() {
        let (mut gpio, _mock) = MockGpio::new();
        let pins = StepperPins {
            dir: DIR,
            step: STEP,
            ..StepperPins::default()
        };
        let mut motor = Drv8825::begin("stepper", &mut gpio, pins).unwrap();
        assert!(!motor.disable().unwrap());
        assert!(motor.is_enabled());
        assert!(!motor.sleep().unwrap());
        assert!(!motor.is_sleeping());
        assert!(!motor.reset().unwrap());
        // Position is not tracked until steps per rotation is known
        motor.step().unwrap();
        assert_eq!(motor.position(), 0);
        assert!(motor.set_position(0).is_err());
    }
}
