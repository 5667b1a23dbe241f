//! Maxim DS3234 SPI real-time clock with 256 bytes of battery-backed SRAM.

use super::{ClockTime, SensorDataFrame, SensorDriver, SensorFactory};
use crate::bus::spi::SpiBus;
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

const REG_SECONDS: u8 = 0x00;
const REG_MINUTES: u8 = 0x01;
const REG_HOURS: u8 = 0x02;
const REG_DAY: u8 = 0x03;
const REG_DATE: u8 = 0x04;
const REG_MONTH: u8 = 0x05;
const REG_YEAR: u8 = 0x06;
const REG_A1SEC: u8 = 0x07;
const REG_A2MIN: u8 = 0x0B;
const REG_CONTROL: u8 = 0x0E;
const REG_STATUS: u8 = 0x0F;
const REG_TEMPM: u8 = 0x11;
const REG_SRAM_ADDRESS: u8 = 0x18;
const REG_SRAM_DATA: u8 = 0x19;

const WRITE_FLAG: u8 = 0x80;

const TWELVE_HOUR_MODE: u8 = 1 << 6;
const TWELVE_HOUR_PM: u8 = 1 << 5;
const CENTURY: u8 = 1 << 7;

const CONTROL_EOSC: u8 = 1 << 7;
const CONTROL_INTCN: u8 = 1 << 2;
const CONTROL_A1IE: u8 = 1 << 0;
const CONTROL_A2IE: u8 = 1 << 1;
const SQW_RATE_MASK: u8 = 0x18;

const ALARM_DONT_CARE: u8 = 1 << 7;
const ALARM_DAY: u8 = 1 << 6;
const STATUS_A1F: u8 = 1 << 0;
const STATUS_A2F: u8 = 1 << 1;

pub const DAY_NAMES: [&str; 7] = ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday"];
pub const DAY_LETTERS: [char; 7] = ['U', 'M', 'T', 'W', 'R', 'F', 'S'];

pub fn bcd_to_dec(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

pub fn dec_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// 24-hour clock to (1..=12, pm)
pub fn to_12_hour(hour: u8) -> (u8, bool) {
    match hour {
        0 => (12, false),
        1..=11 => (hour, false),
        12 => (12, true),
        _ => (hour - 12, true),
    }
}

pub fn to_24_hour(hour12: u8, pm: bool) -> u8 {
    match (hour12, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    }
}

/// UTC calendar time for a Unix timestamp
pub fn clock_from_unix(secs: u64) -> ClockTime {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;

    // Days-to-civil conversion over 400-year eras
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let date = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = (yoe + era * 400 + i64::from(month <= 2)) as u16;

    ClockTime {
        year,
        month,
        date,
        day: ((days + 4).rem_euclid(7) + 1) as u8,
        hour: (rem / 3600) as u8,
        minute: (rem / 60 % 60) as u8,
        second: (rem % 60) as u8,
    }
}

/// Square-wave output rates on the SQW/INT pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqwRate {
    Hz1 = 0,
    Hz1024 = 1,
    Hz4096 = 2,
    Hz8192 = 3,
}

/// Alarm day/date match field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmDay {
    /// Day of month, 1..=31
    Date(u8),
    /// Day of week, 1..=7
    Weekday(u8),
}

/// Fixed-size little-endian values that can live in the clock's SRAM
pub trait SramValue: Sized {
    const SIZE: usize;
    fn to_le(self) -> Vec<u8>;
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! sram_value {
    ($($t:ty),*) => {
        $(impl SramValue for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn to_le(self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }

            fn from_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(raw)
            }
        })*
    };
}

sram_value!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

pub struct Ds3234 {
    id: String,
    bus_id: String,
    /// Raw time registers from the last `update`, with mode bits stripped
    time: [u8; 7],
    twelve_hour: bool,
    pm: bool,
}

impl Ds3234 {
    pub fn new(id: String, bus_id: String) -> Self {
        Self {
            id,
            bus_id,
            time: [0; 7],
            twelve_hour: false,
            pm: false,
        }
    }

    pub async fn read_register(&self, spi: &mut SpiBus, reg: u8) -> SensorResult<u8> {
        let mut buf = [0u8; 1];
        spi.read_bytes(reg, &mut buf).await?;
        Ok(buf[0])
    }

    pub async fn write_register(&self, spi: &mut SpiBus, reg: u8, value: u8) -> SensorResult<()> {
        spi.write_bytes(reg | WRITE_FLAG, &[value]).await?;
        Ok(())
    }

    async fn write_block(&self, spi: &mut SpiBus, reg: u8, data: &[u8]) -> SensorResult<()> {
        spi.write_bytes(reg | WRITE_FLAG, data).await?;
        Ok(())
    }

    fn check(&self, field: &str, value: u8, range: std::ops::RangeInclusive<u8>) -> SensorResult<u8> {
        if range.contains(&value) {
            Ok(value)
        } else {
            Err(SensorError::invalid(
                &self.id,
                format!("{} {} outside {}..={}", field, value, range.start(), range.end()),
            ))
        }
    }

    fn encode_date(&self, t: &ClockTime, hours: u8) -> SensorResult<[u8; 7]> {
        Ok([
            dec_to_bcd(self.check("second", t.second, 0..=59)?),
            dec_to_bcd(self.check("minute", t.minute, 0..=59)?),
            hours,
            dec_to_bcd(self.check("day", t.day, 1..=7)?),
            dec_to_bcd(self.check("date", t.date, 1..=31)?),
            dec_to_bcd(self.check("month", t.month, 1..=12)?),
            dec_to_bcd((t.year % 100) as u8),
        ])
    }

    /// Write all seven time registers in 24-hour mode
    pub async fn set_time(&mut self, spi: &mut SpiBus, t: &ClockTime) -> SensorResult<()> {
        let hours = dec_to_bcd(self.check("hour", t.hour, 0..=23)?);
        let raw = self.encode_date(t, hours)?;
        self.write_block(spi, REG_SECONDS, &raw).await?;
        self.time = raw;
        self.twelve_hour = false;
        Ok(())
    }

    /// Write all seven time registers in 12-hour mode; `t.hour` is 0..=23
    pub async fn set_time_12h(&mut self, spi: &mut SpiBus, t: &ClockTime) -> SensorResult<()> {
        let (hour12, pm) = to_12_hour(self.check("hour", t.hour, 0..=23)?);
        let mut hours = dec_to_bcd(hour12) | TWELVE_HOUR_MODE;
        if pm {
            hours |= TWELVE_HOUR_PM;
        }
        let raw = self.encode_date(t, hours)?;
        self.write_block(spi, REG_SECONDS, &raw).await?;
        self.time = raw;
        self.time[2] &= 0x1F;
        self.twelve_hour = true;
        self.pm = pm;
        Ok(())
    }

    /// Raw BCD registers, seconds first
    pub async fn set_time_array(&mut self, spi: &mut SpiBus, raw: &[u8]) -> SensorResult<()> {
        if raw.len() != 7 {
            return Err(SensorError::invalid(
                &self.id,
                format!("time array needs 7 bytes, got {}", raw.len()),
            ));
        }
        self.write_block(spi, REG_SECONDS, raw).await?;
        let mut cached = [0u8; 7];
        cached.copy_from_slice(raw);
        self.cache_registers(cached);
        Ok(())
    }

    /// Set the clock from the host's UTC time, keeping the current hour mode
    pub async fn auto_time(&mut self, spi: &mut SpiBus) -> SensorResult<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SensorError::invalid(&self.id, e.to_string()))?;
        let t = clock_from_unix(now.as_secs());
        info!("[{}] setting clock to {:?}", self.id, t);
        if self.is_12hour(spi).await? {
            self.set_time_12h(spi, &t).await
        } else {
            self.set_time(spi, &t).await
        }
    }

    /// Refresh the cached time registers in one burst
    pub async fn update(&mut self, spi: &mut SpiBus) -> SensorResult<()> {
        let mut raw = [0u8; 7];
        spi.read_bytes(REG_SECONDS, &mut raw).await?;
        self.cache_registers(raw);
        Ok(())
    }

    /// Split the hour-mode flags and century bit off raw time registers
    fn cache_registers(&mut self, mut raw: [u8; 7]) {
        let hours = raw[2];
        self.twelve_hour = hours & TWELVE_HOUR_MODE != 0;
        if self.twelve_hour {
            self.pm = hours & TWELVE_HOUR_PM != 0;
            raw[2] &= 0x1F;
        } else {
            raw[2] &= 0x3F;
        }
        raw[5] &= !CENTURY;
        self.time = raw;
    }

    pub fn second(&self) -> u8 {
        bcd_to_dec(self.time[0])
    }

    pub fn minute(&self) -> u8 {
        bcd_to_dec(self.time[1])
    }

    /// As stored: 1..=12 in 12-hour mode, otherwise 0..=23
    pub fn hour(&self) -> u8 {
        bcd_to_dec(self.time[2])
    }

    pub fn day(&self) -> u8 {
        bcd_to_dec(self.time[3])
    }

    pub fn date(&self) -> u8 {
        bcd_to_dec(self.time[4])
    }

    pub fn month(&self) -> u8 {
        bcd_to_dec(self.time[5])
    }

    pub fn year(&self) -> u8 {
        bcd_to_dec(self.time[6])
    }

    pub fn day_name(&self) -> Option<&'static str> {
        DAY_NAMES.get(self.day().checked_sub(1)? as usize).copied()
    }

    pub fn day_letter(&self) -> Option<char> {
        DAY_LETTERS.get(self.day().checked_sub(1)? as usize).copied()
    }

    /// Cached time normalised to a 24-hour clock
    pub fn clock_time(&self) -> ClockTime {
        let hour = if self.twelve_hour {
            to_24_hour(self.hour(), self.pm)
        } else {
            self.hour()
        };
        ClockTime {
            year: 2000 + self.year() as u16,
            month: self.month(),
            date: self.date(),
            day: self.day(),
            hour,
            minute: self.minute(),
            second: self.second(),
        }
    }

    pub async fn read_second(&mut self, spi: &mut SpiBus) -> SensorResult<u8> {
        self.time[0] = self.read_register(spi, REG_SECONDS).await?;
        Ok(self.second())
    }

    pub async fn read_minute(&mut self, spi: &mut SpiBus) -> SensorResult<u8> {
        self.time[1] = self.read_register(spi, REG_MINUTES).await?;
        Ok(self.minute())
    }

    pub async fn read_hour(&mut self, spi: &mut SpiBus) -> SensorResult<u8> {
        let raw = self.read_register(spi, REG_HOURS).await?;
        self.twelve_hour = raw & TWELVE_HOUR_MODE != 0;
        self.time[2] = if self.twelve_hour {
            self.pm = raw & TWELVE_HOUR_PM != 0;
            raw & 0x1F
        } else {
            raw & 0x3F
        };
        Ok(self.hour())
    }

    pub async fn read_day(&mut self, spi: &mut SpiBus) -> SensorResult<u8> {
        self.time[3] = self.read_register(spi, REG_DAY).await?;
        Ok(self.day())
    }

    pub async fn read_date(&mut self, spi: &mut SpiBus) -> SensorResult<u8> {
        self.time[4] = self.read_register(spi, REG_DATE).await?;
        Ok(self.date())
    }

    pub async fn read_month(&mut self, spi: &mut SpiBus) -> SensorResult<u8> {
        self.time[5] = self.read_register(spi, REG_MONTH).await? & !CENTURY;
        Ok(self.month())
    }

    pub async fn read_year(&mut self, spi: &mut SpiBus) -> SensorResult<u8> {
        self.time[6] = self.read_register(spi, REG_YEAR).await?;
        Ok(self.year())
    }

    pub async fn set_second(&self, spi: &mut SpiBus, value: u8) -> SensorResult<()> {
        let value = self.check("second", value, 0..=59)?;
        self.write_register(spi, REG_SECONDS, dec_to_bcd(value)).await
    }

    pub async fn set_minute(&self, spi: &mut SpiBus, value: u8) -> SensorResult<()> {
        let value = self.check("minute", value, 0..=59)?;
        self.write_register(spi, REG_MINUTES, dec_to_bcd(value)).await
    }

    /// Writes a 24-hour value, which also switches the chip to 24-hour mode
    pub async fn set_hour(&self, spi: &mut SpiBus, value: u8) -> SensorResult<()> {
        let value = self.check("hour", value, 0..=23)?;
        self.write_register(spi, REG_HOURS, dec_to_bcd(value)).await
    }

    pub async fn set_day(&self, spi: &mut SpiBus, value: u8) -> SensorResult<()> {
        let value = self.check("day", value, 1..=7)?;
        self.write_register(spi, REG_DAY, dec_to_bcd(value)).await
    }

    pub async fn set_date(&self, spi: &mut SpiBus, value: u8) -> SensorResult<()> {
        let value = self.check("date", value, 1..=31)?;
        self.write_register(spi, REG_DATE, dec_to_bcd(value)).await
    }

    pub async fn set_month(&self, spi: &mut SpiBus, value: u8) -> SensorResult<()> {
        let value = self.check("month", value, 1..=12)?;
        self.write_register(spi, REG_MONTH, dec_to_bcd(value)).await
    }

    pub async fn set_year(&self, spi: &mut SpiBus, value: u8) -> SensorResult<()> {
        let value = self.check("year", value, 0..=99)?;
        self.write_register(spi, REG_YEAR, dec_to_bcd(value)).await
    }

    pub async fn is_12hour(&self, spi: &mut SpiBus) -> SensorResult<bool> {
        Ok(self.read_register(spi, REG_HOURS).await? & TWELVE_HOUR_MODE != 0)
    }

    pub async fn pm(&self, spi: &mut SpiBus) -> SensorResult<bool> {
        Ok(self.read_register(spi, REG_HOURS).await? & TWELVE_HOUR_PM != 0)
    }

    /// Convert the running hour register to 12-hour mode; no-op if already there
    pub async fn set_12hour(&self, spi: &mut SpiBus) -> SensorResult<()> {
        let raw = self.read_register(spi, REG_HOURS).await?;
        if raw & TWELVE_HOUR_MODE != 0 {
            return Ok(());
        }
        let (hour12, pm) = to_12_hour(bcd_to_dec(raw & 0x3F));
        let mut hours = dec_to_bcd(hour12) | TWELVE_HOUR_MODE;
        if pm {
            hours |= TWELVE_HOUR_PM;
        }
        self.write_register(spi, REG_HOURS, hours).await
    }

    /// Convert the running hour register to 24-hour mode; no-op if already there
    pub async fn set_24hour(&self, spi: &mut SpiBus) -> SensorResult<()> {
        let raw = self.read_register(spi, REG_HOURS).await?;
        if raw & TWELVE_HOUR_MODE == 0 {
            return Ok(());
        }
        let hour = to_24_hour(bcd_to_dec(raw & 0x1F), raw & TWELVE_HOUR_PM != 0);
        self.write_register(spi, REG_HOURS, dec_to_bcd(hour)).await
    }

    /// Start the oscillator (EOSC is active low)
    pub async fn enable_oscillator(&self, spi: &mut SpiBus) -> SensorResult<()> {
        let control = self.read_register(spi, REG_CONTROL).await?;
        self.write_register(spi, REG_CONTROL, control & !CONTROL_EOSC).await
    }

    pub async fn disable_oscillator(&self, spi: &mut SpiBus) -> SensorResult<()> {
        let control = self.read_register(spi, REG_CONTROL).await?;
        self.write_register(spi, REG_CONTROL, control | CONTROL_EOSC).await
    }

    fn alarm_field(&self, field: &str, value: Option<u8>, range: std::ops::RangeInclusive<u8>) -> SensorResult<u8> {
        match value {
            None => Ok(ALARM_DONT_CARE),
            Some(v) => Ok(dec_to_bcd(self.check(field, v, range)?)),
        }
    }

    fn alarm_day(&self, day: Option<AlarmDay>) -> SensorResult<u8> {
        match day {
            None => Ok(ALARM_DONT_CARE),
            Some(AlarmDay::Date(d)) => Ok(dec_to_bcd(self.check("alarm date", d, 1..=31)?)),
            Some(AlarmDay::Weekday(d)) => Ok(dec_to_bcd(self.check("alarm day", d, 1..=7)?) | ALARM_DAY),
        }
    }

    /// Alarm 1 fires when every `Some` field matches; `None` means don't care.
    /// Hours are 24-hour.
    pub async fn set_alarm1(
        &self,
        spi: &mut SpiBus,
        second: Option<u8>,
        minute: Option<u8>,
        hour: Option<u8>,
        day: Option<AlarmDay>,
    ) -> SensorResult<()> {
        let regs = [
            self.alarm_field("alarm second", second, 0..=59)?,
            self.alarm_field("alarm minute", minute, 0..=59)?,
            self.alarm_field("alarm hour", hour, 0..=23)?,
            self.alarm_day(day)?,
        ];
        self.write_block(spi, REG_A1SEC, &regs).await
    }

    /// Alarm 2 has minute resolution
    pub async fn set_alarm2(
        &self,
        spi: &mut SpiBus,
        minute: Option<u8>,
        hour: Option<u8>,
        day: Option<AlarmDay>,
    ) -> SensorResult<()> {
        let regs = [
            self.alarm_field("alarm minute", minute, 0..=59)?,
            self.alarm_field("alarm hour", hour, 0..=23)?,
            self.alarm_day(day)?,
        ];
        self.write_block(spi, REG_A2MIN, &regs).await
    }

    async fn alarm_flag(&self, spi: &mut SpiBus, flag: u8, clear: bool) -> SensorResult<bool> {
        let status = self.read_register(spi, REG_STATUS).await?;
        if status & flag == 0 {
            return Ok(false);
        }
        if clear {
            self.write_register(spi, REG_STATUS, status & !flag).await?;
        }
        Ok(true)
    }

    /// True if alarm 1 has fired, optionally clearing the flag
    pub async fn alarm1(&self, spi: &mut SpiBus, clear: bool) -> SensorResult<bool> {
        self.alarm_flag(spi, STATUS_A1F, clear).await
    }

    pub async fn alarm2(&self, spi: &mut SpiBus, clear: bool) -> SensorResult<bool> {
        self.alarm_flag(spi, STATUS_A2F, clear).await
    }

    /// Route alarms to the SQW/INT pin
    pub async fn enable_alarm_interrupt(&self, spi: &mut SpiBus, alarm1: bool, alarm2: bool) -> SensorResult<()> {
        let mut control = self.read_register(spi, REG_CONTROL).await? | CONTROL_INTCN;
        control = if alarm1 { control | CONTROL_A1IE } else { control & !CONTROL_A1IE };
        control = if alarm2 { control | CONTROL_A2IE } else { control & !CONTROL_A2IE };
        self.write_register(spi, REG_CONTROL, control).await
    }

    /// Square wave out on SQW/INT (clears INTCN)
    pub async fn write_sqw(&self, spi: &mut SpiBus, rate: SqwRate) -> SensorResult<()> {
        let control = self.read_register(spi, REG_CONTROL).await?;
        let control = (control & !(SQW_RATE_MASK | CONTROL_INTCN)) | ((rate as u8) << 3);
        self.write_register(spi, REG_CONTROL, control).await
    }

    /// Die temperature in °C, 0.25 °C resolution
    pub async fn temperature(&self, spi: &mut SpiBus) -> SensorResult<f32> {
        let mut raw = [0u8; 2];
        spi.read_bytes(REG_TEMPM, &mut raw).await?;
        Ok(raw[0] as i8 as f32 + (raw[1] >> 6) as f32 * 0.25)
    }

    pub async fn write_sram(&self, spi: &mut SpiBus, address: u8, value: u8) -> SensorResult<()> {
        self.write_register(spi, REG_SRAM_ADDRESS, address).await?;
        self.write_register(spi, REG_SRAM_DATA, value).await
    }

    /// Burst write; the SRAM address auto-increments and wraps at 0xFF
    pub async fn write_sram_buffer(&self, spi: &mut SpiBus, address: u8, data: &[u8]) -> SensorResult<()> {
        self.write_register(spi, REG_SRAM_ADDRESS, address).await?;
        self.write_block(spi, REG_SRAM_DATA, data).await
    }

    pub async fn write_sram_value<T: SramValue>(&self, spi: &mut SpiBus, address: u8, value: T) -> SensorResult<()> {
        self.write_sram_buffer(spi, address, &value.to_le()).await
    }

    pub async fn read_sram(&self, spi: &mut SpiBus, address: u8) -> SensorResult<u8> {
        self.write_register(spi, REG_SRAM_ADDRESS, address).await?;
        self.read_register(spi, REG_SRAM_DATA).await
    }

    pub async fn read_sram_buffer(&self, spi: &mut SpiBus, address: u8, buf: &mut [u8]) -> SensorResult<()> {
        self.write_register(spi, REG_SRAM_ADDRESS, address).await?;
        spi.read_bytes(REG_SRAM_DATA, buf).await?;
        Ok(())
    }

    pub async fn read_sram_value<T: SramValue>(&self, spi: &mut SpiBus, address: u8) -> SensorResult<T> {
        let mut buf = vec![0u8; T::SIZE];
        self.read_sram_buffer(spi, address, &mut buf).await?;
        Ok(T::from_le(&buf))
    }
}

#[async_trait]
impl SensorDriver for Ds3234 {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()> {
        let spi = bus.spi(&self.id)?;
        self.enable_oscillator(spi).await?;
        self.update(spi).await
    }

    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame> {
        let spi = bus.spi(&self.id)?;
        self.update(spi).await?;
        Ok(SensorDataFrame {
            clock: Some(self.clock_time()),
            temperature: Some(self.temperature(spi).await?),
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

pub static DS3234_FACTORY: Ds3234Factory = Ds3234Factory;

pub struct Ds3234Factory;

impl SensorFactory for Ds3234Factory {
    fn name(&self) -> &'static str {
        "ds3234"
    }

    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
        Ok(Box::new(Ds3234::new(entry.id.clone(), entry.bus.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockSpi;

    fn rtc() -> Ds3234 {
        Ds3234::new("rtc0".into(), "spi0".into())
    }

    fn sample_time() -> ClockTime {
        ClockTime {
            year: 2025,
            month: 9,
            date: 15,
            day: 2,
            hour: 18,
            minute: 45,
            second: 7,
        }
    }

    #[test]
    fn bcd_conversions() {
        assert_eq!(dec_to_bcd(59), 0x59);
        assert_eq!(bcd_to_dec(0x23), 23);
        assert_eq!(to_12_hour(0), (12, false));
        assert_eq!(to_12_hour(12), (12, true));
        assert_eq!(to_12_hour(23), (11, true));
        assert_eq!(to_24_hour(12, false), 0);
        assert_eq!(to_24_hour(12, true), 12);
        assert_eq!(to_24_hour(7, true), 19);
    }

    #[test]
    fn unix_time_to_calendar() {
        let epoch = clock_from_unix(0);
        assert_eq!((epoch.year, epoch.month, epoch.date, epoch.day), (1970, 1, 1, 5));

        // 2023-11-14 22:13:20 UTC, a Tuesday
        let t = clock_from_unix(1_700_000_000);
        assert_eq!((t.year, t.month, t.date, t.day), (2023, 11, 14, 3));
        assert_eq!((t.hour, t.minute, t.second), (22, 13, 20));

        // Leap day
        let leap = clock_from_unix(951_782_400);
        assert_eq!((leap.year, leap.month, leap.date), (2000, 2, 29));
    }

    #[tokio::test]
    async fn set_time_writes_bcd_burst() {
        let (mut spi, mock) = MockSpi::new();
        let mut rtc = rtc();
        rtc.set_time(&mut spi, &sample_time()).await.unwrap();
        assert_eq!(mock.frames()[0], vec![0x80, 0x07, 0x45, 0x18, 0x02, 0x15, 0x09, 0x25]);
    }

    #[tokio::test]
    async fn twelve_hour_time_reads_back_as_24_hour() {
        let (mut spi, mock) = MockSpi::new();
        let mut rtc = rtc();
        rtc.set_time_12h(&mut spi, &sample_time()).await.unwrap();
        assert_eq!(mock.reg(REG_HOURS), 0x06 | TWELVE_HOUR_MODE | TWELVE_HOUR_PM);

        let mut fresh = Ds3234::new("rtc0".into(), "spi0".into());
        fresh.update(&mut spi).await.unwrap();
        assert_eq!(fresh.hour(), 6);
        assert_eq!(fresh.clock_time(), sample_time());
        assert_eq!(fresh.day_name(), Some("Monday"));
        assert_eq!(fresh.day_letter(), Some('M'));
    }

    #[tokio::test]
    async fn setters_reject_out_of_range() {
        let (mut spi, mock) = MockSpi::new();
        let rtc = rtc();
        assert!(matches!(
            rtc.set_minute(&mut spi, 60).await,
            Err(SensorError::InvalidArgument { .. })
        ));
        assert!(rtc.set_day(&mut spi, 0).await.is_err());
        assert!(mock.frames().is_empty());
        let mut rtc = rtc;
        assert!(rtc.set_time_array(&mut spi, &[0; 6]).await.is_err());
    }

    #[tokio::test]
    async fn raw_time_array_refreshes_cached_getters() {
        let (mut spi, mock) = MockSpi::new();
        let mut rtc = rtc();
        rtc.set_time(&mut spi, &sample_time()).await.unwrap();

        // 11:30:00 PM, Friday 2026-01-02
        let raw = [0x00, 0x30, 0x11 | TWELVE_HOUR_MODE | TWELVE_HOUR_PM, 0x06, 0x02, 0x01, 0x26];
        rtc.set_time_array(&mut spi, &raw).await.unwrap();
        assert_eq!(mock.reg(REG_HOURS), raw[2]);
        assert_eq!((rtc.hour(), rtc.minute(), rtc.second()), (11, 30, 0));
        assert_eq!((rtc.date(), rtc.month()), (2, 1));
        assert_eq!(rtc.clock_time().hour, 23);
    }

    #[tokio::test]
    async fn hour_mode_switch_round_trips() {
        let (mut spi, mock) = MockSpi::new();
        mock.set_regs(REG_HOURS, &[0x00]);
        let rtc = rtc();

        rtc.set_12hour(&mut spi).await.unwrap();
        assert_eq!(mock.reg(REG_HOURS), 0x12 | TWELVE_HOUR_MODE);
        assert!(rtc.is_12hour(&mut spi).await.unwrap());
        assert!(!rtc.pm(&mut spi).await.unwrap());

        rtc.set_24hour(&mut spi).await.unwrap();
        assert_eq!(mock.reg(REG_HOURS), 0x00);
    }

    #[tokio::test]
    async fn alarm1_dont_care_and_weekday() {
        let (mut spi, mock) = MockSpi::new();
        let rtc = rtc();
        rtc.set_alarm1(&mut spi, Some(30), None, Some(7), Some(AlarmDay::Weekday(3)))
            .await
            .unwrap();
        assert_eq!(mock.frames()[0], vec![0x87, 0x30, 0x80, 0x07, 0x43]);
    }

    #[tokio::test]
    async fn alarm_flag_is_cleared_on_request() {
        let (mut spi, mock) = MockSpi::new();
        mock.set_regs(REG_STATUS, &[STATUS_A1F | 0x08]);
        let rtc = rtc();
        assert!(!rtc.alarm2(&mut spi, true).await.unwrap());
        assert!(rtc.alarm1(&mut spi, true).await.unwrap());
        assert_eq!(mock.reg(REG_STATUS), 0x08);
    }

    #[tokio::test]
    async fn sqw_and_interrupt_control_bits() {
        let (mut spi, mock) = MockSpi::new();
        mock.set_regs(REG_CONTROL, &[CONTROL_EOSC | CONTROL_INTCN]);
        let rtc = rtc();
        rtc.write_sqw(&mut spi, SqwRate::Hz4096).await.unwrap();
        assert_eq!(mock.reg(REG_CONTROL), CONTROL_EOSC | 0x10);

        rtc.enable_oscillator(&mut spi).await.unwrap();
        rtc.enable_alarm_interrupt(&mut spi, true, false).await.unwrap();
        assert_eq!(mock.reg(REG_CONTROL), 0x10 | CONTROL_INTCN | CONTROL_A1IE);
    }

    #[tokio::test]
    async fn die_temperature_quarter_degrees() {
        let (mut spi, mock) = MockSpi::new();
        let rtc = rtc();
        mock.set_regs(REG_TEMPM, &[0x19, 0xC0]);
        assert_eq!(rtc.temperature(&mut spi).await.unwrap(), 25.75);
        mock.set_regs(REG_TEMPM, &[0xFE, 0x40]);
        assert_eq!(rtc.temperature(&mut spi).await.unwrap(), -1.75);
    }

    #[tokio::test]
    async fn sram_typed_values() {
        let (mut spi, mock) = MockSpi::new();
        let rtc = rtc();
        rtc.write_sram_value(&mut spi, 0x10, -12345i32).await.unwrap();
        assert_eq!(mock.reg(REG_SRAM_ADDRESS), 0x10);
        let back: i32 = rtc.read_sram_value(&mut spi, 0x10).await.unwrap();
        assert_eq!(back, -12345);

        rtc.write_sram_value(&mut spi, 0x20, 1.5f64).await.unwrap();
        let back: f64 = rtc.read_sram_value(&mut spi, 0x20).await.unwrap();
        assert_eq!(back, 1.5);
    }
}
