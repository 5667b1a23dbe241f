//! Bosch BME688 (and BME680) temperature, pressure, humidity and gas sensor.
//!
//! Measurements run in forced mode. The gas heater has ten profile slots;
//! `begin` fills nine of them with 200 °C .. 400 °C targets in 25 °C steps.

use super::{hypsometric_altitude, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::i2c::I2CBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const DEFAULT_ADDRESS: u8 = 0x76;
pub const ALT_ADDRESS: u8 = 0x77;
pub const SEA_LEVEL_HPA: f32 = 1013.25;

const RES_HEAT_VAL: u8 = 0x00;
const RES_HEAT_RANGE: u8 = 0x02;
const PRESS_MSB: u8 = 0x1F;
const TEMP_MSB: u8 = 0x22;
const HUM_MSB: u8 = 0x25;
const GAS_R_MSB: u8 = 0x2C;
const GAS_R_LSB: u8 = 0x2D;
const RES_HEAT_0: u8 = 0x5A;
const GAS_WAIT_0: u8 = 0x64;
const CTRL_GAS_1: u8 = 0x71;
const CTRL_HUM: u8 = 0x72;
const CTRL_MEAS: u8 = 0x74;
const CONFIG: u8 = 0x75;
const COEFF_1: u8 = 0x8A;
const CHIP_ID: u8 = 0xD0;
const COEFF_2: u8 = 0xE1;

const BME688_ID: u8 = 0x61;
const RUN_GAS: u8 = 0x20;
const HEAT_STAB: u8 = 0x10;
const GAS_VALID: u8 = 0x20;
const IIR_C15: u8 = 0x04;

pub const HEATER_START_C: u16 = 200;
pub const HEATER_STEP_C: u16 = 25;
pub const HEATER_PROFILES: u8 = 10;
/// Highest heater target accepted without opting in
pub const HEATER_SAFE_MAX_C: u16 = 425;
/// Hard limit regardless of the opt-in
pub const HEATER_ABSOLUTE_MAX_C: u16 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sleep = 0,
    Forced = 1,
    Parallel = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    Skip = 0,
    X1 = 1,
    X2 = 2,
    X4 = 3,
    X8 = 4,
    X16 = 5,
}

impl Oversampling {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Oversampling::Skip,
            1 => Oversampling::X1,
            2 => Oversampling::X2,
            3 => Oversampling::X4,
            4 => Oversampling::X8,
            5 => Oversampling::X16,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    pub t: [f64; 3],
    pub p: [f64; 10],
    pub h: [f64; 7],
    pub g: [f64; 3],
    pub res_heat_range: u8,
    pub res_heat_val: i8,
}

impl Calibration {
    /// `coeff1` spans 0x8A..=0xA0, `coeff2` spans 0xE1..=0xEE
    pub fn from_registers(coeff1: &[u8; 23], coeff2: &[u8; 14], heat_range: u8, heat_val: u8) -> Self {
        let c1_u16 = |i: usize| u16::from_le_bytes([coeff1[i], coeff1[i + 1]]) as f64;
        let c1_i16 = |i: usize| i16::from_le_bytes([coeff1[i], coeff1[i + 1]]) as f64;
        let c1_i8 = |i: usize| coeff1[i] as i8 as f64;
        let c2_i8 = |i: usize| coeff2[i] as i8 as f64;

        let h1 = ((coeff2[2] as u16) << 4) | (coeff2[1] & 0x0F) as u16;
        let h2 = ((coeff2[0] as u16) << 4) | (coeff2[1] >> 4) as u16;

        Self {
            t: [
                u16::from_le_bytes([coeff2[8], coeff2[9]]) as f64,
                c1_i16(0),
                c1_i8(2),
            ],
            p: [
                c1_u16(4),
                c1_i16(6),
                c1_i8(8),
                c1_i16(10),
                c1_i16(12),
                c1_i8(15),
                c1_i8(14),
                c1_i16(18),
                c1_i16(20),
                coeff1[22] as f64,
            ],
            h: [
                h1 as f64,
                h2 as f64,
                c2_i8(3),
                c2_i8(4),
                c2_i8(5),
                coeff2[6] as f64,
                c2_i8(7),
            ],
            g: [
                c2_i8(12),
                i16::from_le_bytes([coeff2[10], coeff2[11]]) as f64,
                c2_i8(13),
            ],
            res_heat_range: (heat_range & 0x30) >> 4,
            res_heat_val: heat_val as i8,
        }
    }

    /// Returns °C and t_fine
    pub fn temperature(&self, adc: u32) -> (f64, f64) {
        let [t1, t2, t3] = self.t;
        let adc = adc as f64;
        let var1 = (adc / 16384.0 - t1 / 1024.0) * t2;
        let var2 = (adc / 131072.0 - t1 / 8192.0).powi(2) * (t3 * 16.0);
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pa
    pub fn pressure(&self, adc: u32, t_fine: f64) -> f64 {
        let [p1, p2, p3, p4, p5, p6, p7, p8, p9, p10] = self.p;
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * (p6 / 131072.0);
        var2 += var1 * p5 * 2.0;
        var2 = var2 / 4.0 + p4 * 65536.0;
        var1 = (p3 * var1 * var1 / 16384.0 + p2 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * p1;
        if var1 == 0.0 {
            return 0.0;
        }
        let mut press = 1048576.0 - adc as f64;
        press = (press - var2 / 4096.0) * 6250.0 / var1;
        let var1 = p9 * press * press / 2147483648.0;
        let var2 = press * (p8 / 32768.0);
        let var3 = (press / 256.0).powi(3) * (p10 / 131072.0);
        press + (var1 + var2 + var3 + p7 * 128.0) / 16.0
    }

    /// %RH, clamped to 0..=100
    pub fn humidity(&self, adc: u16, t_fine: f64) -> f64 {
        let [h1, h2, h3, h4, h5, h6, h7] = self.h;
        let temp = t_fine / 5120.0;
        let var1 = adc as f64 - (h1 * 16.0 + (h3 / 2.0) * temp);
        let var2 = var1 * ((h2 / 262144.0) * (1.0 + (h4 / 16384.0) * temp + (h5 / 1048576.0) * temp * temp));
        let var3 = h6 / 16384.0;
        let var4 = h7 / 2097152.0;
        (var2 + (var3 + var4 * temp) * var2 * var2).clamp(0.0, 100.0)
    }

    /// Heater register value for `target_c` at the given ambient temperature
    pub fn res_heat(&self, target_c: u16, ambient_c: f64) -> u8 {
        let [g1, g2, g3] = self.g;
        let var1 = g1 / 16.0 + 49.0;
        let var2 = (g2 / 32768.0) * 0.0005 + 0.00235;
        let var3 = g3 / 1024.0;
        let var4 = var1 * (1.0 + var2 * target_c as f64);
        let var5 = var4 + var3 * ambient_c;
        let res = 3.4
            * (var5
                * (4.0 / (4.0 + self.res_heat_range as f64))
                * (1.0 / (1.0 + self.res_heat_val as f64 * 0.002))
                - 25.0);
        res.clamp(0.0, 255.0) as u8
    }
}

/// Ohm from the 10-bit gas ADC and its range
pub fn gas_resistance(adc: u16, range: u8) -> f32 {
    let var1 = (262144u32 >> (range & 0x0F)) as f64;
    let var2 = 4096.0 + (adc as f64 - 512.0) * 3.0;
    (1_000_000.0 * var1 / var2) as f32
}

fn raw20(data: &[u8]) -> u32 {
    ((data[0] as u32) << 12) | ((data[1] as u32) << 4) | ((data[2] as u32) >> 4)
}

fn heater_wait_ms(res_heat: u8) -> u64 {
    (0.25 * res_heat as f64 - 17.0).max(1.0) as u64
}

pub struct Bme688 {
    id: String,
    address: u8,
    bus_id: String,
    mode: Mode,
    temp_os: Oversampling,
    press_os: Oversampling,
    hum_os: Oversampling,
    sea_level_hpa: f32,
    allow_high_temps: bool,
    gas_profile: Option<u8>,
    calibration: Option<Calibration>,
    t_fine: f64,
}

impl Bme688 {
    pub fn new(id: String, address: u8, bus_id: String) -> Self {
        Self {
            id,
            address,
            bus_id,
            mode: Mode::Forced,
            temp_os: Oversampling::X1,
            press_os: Oversampling::X1,
            hum_os: Oversampling::X1,
            sea_level_hpa: SEA_LEVEL_HPA,
            allow_high_temps: false,
            gas_profile: None,
            calibration: None,
            t_fine: 0.0,
        }
    }

    /// Same oversampling on all three channels
    pub fn with_oversampling(mut self, mode: Mode, oss: Oversampling) -> Self {
        self.mode = mode;
        self.temp_os = oss;
        self.press_os = oss;
        self.hum_os = oss;
        self
    }

    pub fn with_gas_profile(mut self, profile: Option<u8>) -> Self {
        self.gas_profile = profile;
        self
    }

    pub fn set_sea_level_pressure(&mut self, hpa: f32) {
        self.sea_level_hpa = hpa;
    }

    pub async fn begin(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        bus.write_byte(self.address, CTRL_HUM, self.hum_os as u8).await?;
        bus.write_byte(self.address, CTRL_MEAS, self.ctrl_meas(self.mode)).await?;
        bus.write_byte(self.address, CONFIG, IIR_C15 << 2).await?;
        self.read_calibration(bus).await?;
        self.set_heat_profiles(bus).await?;

        if !self.is_connected(bus).await? {
            return Err(SensorError::init(&self.id, "no BME688 chip ID at 0xD0"));
        }
        Ok(())
    }

    fn ctrl_meas(&self, mode: Mode) -> u8 {
        ((self.temp_os as u8) << 5) | ((self.press_os as u8) << 2) | mode as u8
    }

    async fn read_calibration(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        let mut coeff1 = [0u8; 23];
        let mut coeff2 = [0u8; 14];
        bus.read_bytes(self.address, COEFF_1, &mut coeff1).await?;
        bus.read_bytes(self.address, COEFF_2, &mut coeff2).await?;
        let heat_range = bus.read_u8(self.address, RES_HEAT_RANGE).await?;
        let heat_val = bus.read_u8(self.address, RES_HEAT_VAL).await?;
        self.calibration = Some(Calibration::from_registers(&coeff1, &coeff2, heat_range, heat_val));
        Ok(())
    }

    /// Program heater profiles 0..=8 for the current ambient temperature
    async fn set_heat_profiles(&mut self, bus: &mut I2CBus) -> SensorResult<()> {
        let ambient = self.temperature(bus).await? as f64;
        for i in 0..9u8 {
            let res_heat = self
                .calibration()?
                .res_heat(HEATER_START_C + i as u16 * HEATER_STEP_C, ambient);
            // Multiplier bits left at 1x, 6-bit wait value
            let wait = (0.25 * res_heat as f64 - 22.0).clamp(0.0, 63.0) as u8;
            bus.write_byte(self.address, GAS_WAIT_0 + i, wait).await?;
            bus.write_byte(self.address, RES_HEAT_0 + i, res_heat).await?;
        }
        Ok(())
    }

    pub async fn is_connected(&self, bus: &mut I2CBus) -> SensorResult<bool> {
        if !bus.probe(self.address).await {
            return Ok(false);
        }
        let chip_id = bus.read_u8(self.address, CHIP_ID).await?;
        if chip_id != BME688_ID {
            debug!("[{}] unexpected chip ID {:#04x}", self.id, chip_id);
        }
        Ok(chip_id == BME688_ID)
    }

    pub fn set_temperature_oversampling(&mut self, oss: Oversampling) {
        self.temp_os = oss;
    }

    pub fn set_pressure_oversampling(&mut self, oss: Oversampling) {
        self.press_os = oss;
    }

    pub fn set_humidity_oversampling(&mut self, oss: Oversampling) {
        self.hum_os = oss;
    }

    /// Opt in to heater targets above the safe limit
    pub fn ignore_unsafe_temperature_warnings(&mut self, ignore: bool) {
        self.allow_high_temps = ignore;
        if ignore {
            warn!(
                "[{}] heater targets above {} °C shorten sensor life",
                self.id, HEATER_SAFE_MAX_C
            );
        }
    }

    /// Time one forced conversion takes with the current oversampling
    pub fn measurement_delay(&self) -> Duration {
        let os = |o: Oversampling| (1u64 << o as u8) * 2;
        Duration::from_millis(5 + os(self.temp_os) + os(self.press_os) + os(self.hum_os))
    }

    fn calibration(&self) -> SensorResult<&Calibration> {
        self.calibration
            .as_ref()
            .ok_or_else(|| SensorError::NotInitialized { sensor: self.id.clone() })
    }

    async fn trigger(&self, bus: &mut I2CBus) -> SensorResult<()> {
        bus.write_byte(self.address, CTRL_HUM, self.hum_os as u8).await?;
        bus.write_byte(self.address, CTRL_MEAS, self.ctrl_meas(Mode::Forced)).await?;
        sleep(self.measurement_delay()).await;
        Ok(())
    }

    /// °C
    pub async fn temperature(&mut self, bus: &mut I2CBus) -> SensorResult<f32> {
        self.trigger(bus).await?;
        let mut data = [0u8; 3];
        bus.read_bytes(self.address, TEMP_MSB, &mut data).await?;
        let (t, t_fine) = self.calibration()?.temperature(raw20(&data));
        self.t_fine = t_fine;
        Ok(t as f32)
    }

    /// Pa
    pub async fn pressure(&mut self, bus: &mut I2CBus) -> SensorResult<f32> {
        self.temperature(bus).await?;
        let mut data = [0u8; 3];
        bus.read_bytes(self.address, PRESS_MSB, &mut data).await?;
        Ok(self.calibration()?.pressure(raw20(&data), self.t_fine) as f32)
    }

    /// %RH
    pub async fn humidity(&mut self, bus: &mut I2CBus) -> SensorResult<f32> {
        self.temperature(bus).await?;
        let mut data = [0u8; 2];
        bus.read_bytes(self.address, HUM_MSB, &mut data).await?;
        Ok(self.calibration()?.humidity(u16::from_be_bytes(data), self.t_fine) as f32)
    }

    /// One forced conversion: (°C, hPa, %RH)
    pub async fn read_all(&mut self, bus: &mut I2CBus) -> SensorResult<(f32, f32, f32)> {
        self.trigger(bus).await?;
        let mut data = [0u8; 8];
        bus.read_bytes(self.address, PRESS_MSB, &mut data).await?;
        let cal = self.calibration()?;
        let (t, t_fine) = cal.temperature(raw20(&data[3..6]));
        let p = cal.pressure(raw20(&data[0..3]), t_fine) / 100.0;
        let h = cal.humidity(u16::from_be_bytes([data[6], data[7]]), t_fine);
        self.t_fine = t_fine;
        Ok((t as f32, p as f32, h as f32))
    }

    /// Run the heater with `profile` and return the gas resistance in Ohm
    pub async fn start_gas_measurement(&mut self, bus: &mut I2CBus, profile: u8, wait: Duration) -> SensorResult<f32> {
        bus.write_byte(self.address, CTRL_GAS_1, RUN_GAS | (profile & 0x0F)).await?;
        bus.write_byte(self.address, CTRL_MEAS, self.ctrl_meas(Mode::Forced)).await?;
        sleep(wait).await;

        let mut data = [0u8; 2];
        bus.read_bytes(self.address, GAS_R_MSB, &mut data).await?;
        let status = data[1];
        if status & (HEAT_STAB | GAS_VALID) != (HEAT_STAB | GAS_VALID) {
            return Err(SensorError::ReadError {
                sensor: self.id.clone(),
                reason: format!(
                    "gas measurement incomplete (status {:#04x}); heater target not reached within {:?}",
                    status, wait
                ),
            });
        }
        let adc = ((data[0] as u16) << 2) | (data[1] >> 6) as u16;
        Ok(gas_resistance(adc, status & 0x0F))
    }

    /// Gas resistance using one of the preset heater profiles
    pub async fn read_gas(&mut self, bus: &mut I2CBus, profile: u8) -> SensorResult<f32> {
        if profile >= HEATER_PROFILES {
            return Err(SensorError::invalid(&self.id, format!("heater profile {} out of 0..=9", profile)));
        }
        let ambient = self.t_fine / 5120.0;
        let res_heat = self
            .calibration()?
            .res_heat(HEATER_START_C + profile as u16 * HEATER_STEP_C, ambient);
        self.start_gas_measurement(bus, profile, Duration::from_millis(heater_wait_ms(res_heat)))
            .await
    }

    /// Gas resistance with the heater at an arbitrary target, using profile slot 0
    pub async fn read_gas_for_temperature(&mut self, bus: &mut I2CBus, target_c: u16) -> SensorResult<f32> {
        if target_c >= HEATER_ABSOLUTE_MAX_C {
            return Err(SensorError::invalid(
                &self.id,
                format!("heater target {} °C exceeds the {} °C limit", target_c, HEATER_ABSOLUTE_MAX_C),
            ));
        }
        if target_c > HEATER_SAFE_MAX_C && !self.allow_high_temps {
            return Err(SensorError::invalid(
                &self.id,
                format!(
                    "heater target {} °C above {} °C needs ignore_unsafe_temperature_warnings",
                    target_c, HEATER_SAFE_MAX_C
                ),
            ));
        }
        let ambient = self.t_fine / 5120.0;
        let res_heat = self.calibration()?.res_heat(target_c, ambient);
        let wait = heater_wait_ms(res_heat);
        bus.write_byte(self.address, CTRL_GAS_1, RUN_GAS).await?;
        bus.write_byte(self.address, GAS_WAIT_0, wait.min(63) as u8).await?;
        bus.write_byte(self.address, RES_HEAT_0, res_heat).await?;
        self.start_gas_measurement(bus, 0, Duration::from_millis(wait + 5)).await
    }
}

#[async_trait]
impl SensorDriver for Bme688 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let i2c = bus.i2c(&self.id)?;
        self.begin(i2c).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let i2c = bus.i2c(&self.id)?;
        let (temperature, pressure, humidity) = self.read_all(i2c).await?;
        let gas_resistance = match self.gas_profile {
            Some(profile) => Some(self.read_gas(i2c, profile).await?),
            None => None,
        };
        Ok(SensorDataFrame {
            temperature: Some(temperature),
            pressure: Some(pressure),
            humidity: Some(humidity),
            altitude: Some(hypsometric_altitude(pressure, temperature, self.sea_level_hpa)),
            gas_resistance,
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

pub static BME688_FACTORY: Bme688Factory = Bme688Factory;

pub struct Bme688Factory;

impl SensorFactory for Bme688Factory {
    fn name(&self) -> &'static str {
        "bme688"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        if let Some(profile) = entry.gas_profile {
            if profile >= HEATER_PROFILES {
                return Err(SensorError::ConfigError {
                    sensor: entry.id.clone(),
                    reason: format!("gas_profile {} out of 0..=9", profile),
                });
            }
        }
        let mut sensor = Bme688::new(
            entry.id.clone(),
            entry.address.unwrap_or(DEFAULT_ADDRESS),
            entry.bus.clone(),
        )
        .with_gas_profile(entry.gas_profile);
        if let Some(hpa) = entry.sea_level_hpa {
            sensor.set_sea_level_pressure(hpa);
        }
        Ok(Box::new(sensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{AddrMode, MockI2c};

    // t1 = 26000, t2 = 25600: adc 432384 lands exactly on 5 °C.
    // p1 = 62500 alone gives (2^20 - adc) / 10 Pa.
    // h2 = 1024 alone gives adc / 256 %RH.
    fn coefficients() -> ([u8; 23], [u8; 14]) {
        let mut c1 = [0u8; 23];
        c1[0..2].copy_from_slice(&25600i16.to_le_bytes());
        c1[4..6].copy_from_slice(&62500u16.to_le_bytes());
        let mut c2 = [0u8; 14];
        c2[0] = 0x40;
        c2[8..10].copy_from_slice(&26000u16.to_le_bytes());
        (c1, c2)
    }

    fn calibration() -> Calibration {
        let (c1, c2) = coefficients();
        Calibration::from_registers(&c1, &c2, 0, 0)
    }

    fn adc20(value: u32) -> [u8; 3] {
        [(value >> 12) as u8, (value >> 4) as u8, ((value & 0x0F) << 4) as u8]
    }

    fn mock_chip() -> (I2CBus, MockI2c) {
        let (bus, mock) = MockI2c::new();
        let (c1, c2) = coefficients();
        mock.add_device(DEFAULT_ADDRESS, AddrMode::Reg8);
        mock.set_reg(DEFAULT_ADDRESS, CHIP_ID as u16, BME688_ID);
        mock.set_regs(DEFAULT_ADDRESS, COEFF_1 as u16, &c1);
        mock.set_regs(DEFAULT_ADDRESS, COEFF_2 as u16, &c2);
        let mut burst = Vec::new();
        burst.extend_from_slice(&adc20(1048576 - 1_000_000));
        burst.extend_from_slice(&adc20(432384));
        burst.extend_from_slice(&12800u16.to_be_bytes());
        mock.set_regs(DEFAULT_ADDRESS, PRESS_MSB as u16, &burst);
        (bus, mock)
    }

    #[test]
    fn split_humidity_fields_are_unpacked() {
        let mut c2 = [0u8; 14];
        c2[0] = 0x12; // E1
        c2[1] = 0x34; // E2
        c2[2] = 0x56; // E3
        let cal = Calibration::from_registers(&[0u8; 23], &c2, 0x20, 0xFE);
        assert_eq!(cal.h[0], 0x564 as f64);
        assert_eq!(cal.h[1], 0x123 as f64);
        assert_eq!(cal.res_heat_range, 2);
        assert_eq!(cal.res_heat_val, -2);
    }

    #[test]
    fn compensation_matches_hand_values() {
        let cal = calibration();
        let (t, t_fine) = cal.temperature(432384);
        assert!((t - 5.0).abs() < 1e-9);
        let p = cal.pressure(1048576 - 1_000_000, t_fine);
        assert!((p - 100000.0).abs() < 1e-6, "p = {}", p);
        assert!((cal.humidity(12800, t_fine) - 50.0).abs() < 1e-9);
        assert_eq!(cal.humidity(u16::MAX, t_fine), 100.0);
    }

    #[test]
    fn heater_and_gas_conversions() {
        let cal = calibration();
        // 3.4 * (49 * (1 + 0.00235 * 300) - 25)
        assert_eq!(cal.res_heat(300, 0.0), 199);
        assert_eq!(gas_resistance(512, 4), 4_000_000.0);
    }

    #[test]
    fn delay_grows_with_oversampling() {
        let sensor = Bme688::new("env0".into(), DEFAULT_ADDRESS, "i2c1".into());
        assert_eq!(sensor.measurement_delay(), Duration::from_millis(17));
        let sensor = sensor.with_oversampling(Mode::Forced, Oversampling::X16);
        assert_eq!(sensor.measurement_delay(), Duration::from_millis(5 + 3 * 64));
        assert_eq!(Oversampling::from_raw(6), None);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_programs_heater_profiles() {
        let (mut bus, mock) = mock_chip();
        let mut sensor = Bme688::new("env0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.begin(&mut bus).await.unwrap();

        assert_eq!(mock.reg(DEFAULT_ADDRESS, CONFIG as u16), IIR_C15 << 2);
        assert_eq!(mock.reg(DEFAULT_ADDRESS, CTRL_MEAS as u16), (1 << 5) | (1 << 2) | 1);
        let ambient = 5.0;
        for i in 0..9u8 {
            let expected = calibration().res_heat(200 + i as u16 * 25, ambient);
            assert_eq!(mock.reg(DEFAULT_ADDRESS, (RES_HEAT_0 + i) as u16), expected);
        }
        assert_eq!(mock.reg(DEFAULT_ADDRESS, (RES_HEAT_0 + 9) as u16), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_rejects_foreign_chip() {
        let (mut bus, mock) = mock_chip();
        mock.set_reg(DEFAULT_ADDRESS, CHIP_ID as u16, 0x60);
        let mut sensor = Bme688::new("env0".into(), DEFAULT_ADDRESS, "i2c1".into());
        assert!(matches!(sensor.begin(&mut bus).await, Err(SensorError::InitError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn read_all_uses_one_burst() {
        let (mut bus, _mock) = mock_chip();
        let mut sensor = Bme688::new("env0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.begin(&mut bus).await.unwrap();
        let (t, p, h) = sensor.read_all(&mut bus).await.unwrap();
        assert!((t - 5.0).abs() < 1e-4);
        assert!((p - 1000.0).abs() < 1e-3);
        assert!((h - 50.0).abs() < 1e-3);
        assert!((sensor.pressure(&mut bus).await.unwrap() - 100000.0).abs() < 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn gas_read_checks_stability_flags() {
        let (mut bus, mock) = mock_chip();
        let mut sensor = Bme688::new("env0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.begin(&mut bus).await.unwrap();

        // adc 512, range 4, heater stable and gas valid
        mock.set_regs(DEFAULT_ADDRESS, GAS_R_MSB as u16, &[0x80, 0x34]);
        let ohms = sensor.read_gas(&mut bus, 2).await.unwrap();
        assert_eq!(ohms, 4_000_000.0);
        assert_eq!(mock.reg(DEFAULT_ADDRESS, CTRL_GAS_1 as u16), RUN_GAS | 2);

        mock.set_reg(DEFAULT_ADDRESS, GAS_R_LSB as u16, 0x04);
        assert!(matches!(
            sensor.read_gas(&mut bus, 2).await,
            Err(SensorError::ReadError { .. })
        ));
        assert!(matches!(
            sensor.read_gas(&mut bus, 10).await,
            Err(SensorError::InvalidArgument { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn hot_heater_targets_need_opt_in() {
        let (mut bus, mock) = mock_chip();
        let mut sensor = Bme688::new("env0".into(), DEFAULT_ADDRESS, "i2c1".into());
        sensor.begin(&mut bus).await.unwrap();
        mock.set_regs(DEFAULT_ADDRESS, GAS_R_MSB as u16, &[0x80, 0x34]);

        assert!(sensor.read_gas_for_temperature(&mut bus, 500).await.is_err());
        sensor.ignore_unsafe_temperature_warnings(true);
        assert!(sensor.read_gas_for_temperature(&mut bus, 500).await.is_ok());
        assert!(sensor.read_gas_for_temperature(&mut bus, 600).await.is_err());
    }
}
