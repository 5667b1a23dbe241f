use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::bus::Bus;
use crate::config::SensorEntry;
use crate::errors::{SensorError, SensorResult};

pub mod qwiic;

#[cfg(feature = "bme280")]
pub mod bme280;
#[cfg(feature = "bmp280")]
pub mod bmp280;
#[cfg(feature = "bmp388")]
pub mod bmp388;
#[cfg(feature = "bme688")]
pub mod bme688;
#[cfg(feature = "bmp180")]
pub mod bmp180;
#[cfg(feature = "shtc3")]
pub mod shtc3;
#[cfg(feature = "tmp117")]
pub mod tmp117;
#[cfg(feature = "ltr507")]
pub mod ltr507;
#[cfg(feature = "vl53l1x")]
pub mod vl53l1x;
#[cfg(feature = "ds3234")]
pub mod ds3234;
#[cfg(feature = "ad8495")]
pub mod ad8495;
#[cfg(feature = "hall_effect")]
pub mod hall_effect;
#[cfg(feature = "pir")]
pub mod pir;
#[cfg(feature = "obstacle")]
pub mod obstacle;
#[cfg(feature = "rotary_encoder")]
pub mod rotary_encoder;
#[cfg(feature = "ultrasonic")]
pub mod ultrasonic;
#[cfg(feature = "rfid")]
pub mod rfid;

/// One poll's worth of converted readings. Drivers fill what their chip measures.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDataFrame {
    /// °C
    pub temperature: Option<f32>,
    /// hPa
    pub pressure: Option<f32>,
    /// %RH
    pub humidity: Option<f32>,
    /// metres above the configured sea-level pressure
    pub altitude: Option<f32>,
    /// Ohm
    pub gas_resistance: Option<f32>,
    /// raw ambient-light counts
    pub light: Option<u16>,
    /// raw proximity counts
    pub proximity: Option<u16>,
    pub distance_mm: Option<f32>,
    pub magnetic_field_mt: Option<f32>,
    /// motion, magnet or obstacle present
    pub detected: Option<bool>,
    pub analog_raw: Option<u16>,
    /// volts at the sensor output
    pub voltage: Option<f32>,
    pub encoder: Option<EncoderReading>,
    pub rfid: Option<RfidTag>,
    pub clock: Option<ClockTime>,
}

/// Button/rotation event latched by the rotary encoder board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderEvent {
    Idle,
    Click,
    DoubleClick,
    LongPress,
    LongRelease,
    CounterClockwise,
    Clockwise,
}

impl EncoderEvent {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => EncoderEvent::Idle,
            1 => EncoderEvent::Click,
            2 => EncoderEvent::DoubleClick,
            3 => EncoderEvent::LongPress,
            4 => EncoderEvent::LongRelease,
            5 => EncoderEvent::CounterClockwise,
            6 => EncoderEvent::Clockwise,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderReading {
    pub count: i16,
    pub event: EncoderEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfidTag {
    pub id: u32,
    pub raw: u64,
}

/// Calendar time as kept by the RTC (24-hour, `year` is 2000-based full year)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockTime {
    pub year: u16,
    pub month: u8,
    pub date: u8,
    /// 1 = Sunday .. 7 = Saturday
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

#[async_trait]
pub trait SensorDriver: Send {
    async fn init(&mut self, bus: &mut Bus) -> SensorResult<()>;
    async fn read(&mut self, bus: &mut Bus) -> SensorResult<SensorDataFrame>;
    fn id(&self) -> &str;
    fn bus(&self) -> &str;
}

pub trait SensorFactory: Sync {
    fn name(&self) -> &'static str;
    fn create(&self, entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>>;
}

#[cfg(feature = "bme280")]
pub use self::bme280::BME280_FACTORY;
#[cfg(feature = "bmp280")]
pub use self::bmp280::BMP280_FACTORY;
#[cfg(feature = "bmp388")]
pub use self::bmp388::BMP388_FACTORY;
#[cfg(feature = "bme688")]
pub use self::bme688::BME688_FACTORY;
#[cfg(feature = "bmp180")]
pub use self::bmp180::BMP180_FACTORY;
#[cfg(feature = "shtc3")]
pub use self::shtc3::SHTC3_FACTORY;
#[cfg(feature = "tmp117")]
pub use self::tmp117::TMP117_FACTORY;
#[cfg(feature = "ltr507")]
pub use self::ltr507::LTR507_FACTORY;
#[cfg(feature = "vl53l1x")]
pub use self::vl53l1x::VL53L1X_FACTORY;
#[cfg(feature = "ds3234")]
pub use self::ds3234::DS3234_FACTORY;
#[cfg(feature = "ad8495")]
pub use self::ad8495::AD8495_FACTORY;
#[cfg(feature = "hall_effect")]
pub use self::hall_effect::{HALL_ANALOG_FACTORY, HALL_DIGITAL_FACTORY};
#[cfg(feature = "pir")]
pub use self::pir::PIR_FACTORY;
#[cfg(feature = "obstacle")]
pub use self::obstacle::OBSTACLE_FACTORY;
#[cfg(feature = "rotary_encoder")]
pub use self::rotary_encoder::ROTARY_ENCODER_FACTORY;
#[cfg(feature = "ultrasonic")]
pub use self::ultrasonic::ULTRASONIC_FACTORY;
#[cfg(feature = "rfid")]
pub use self::rfid::RFID_FACTORY;

pub static SENSOR_FACTORIES: &[&dyn SensorFactory] = &[
    #[cfg(feature = "bme280")]
    &BME280_FACTORY,
    #[cfg(feature = "bmp280")]
    &BMP280_FACTORY,
    #[cfg(feature = "bmp388")]
    &BMP388_FACTORY,
    #[cfg(feature = "bme688")]
    &BME688_FACTORY,
    #[cfg(feature = "bmp180")]
    &BMP180_FACTORY,
    #[cfg(feature = "shtc3")]
    &SHTC3_FACTORY,
    #[cfg(feature = "tmp117")]
    &TMP117_FACTORY,
    #[cfg(feature = "ltr507")]
    &LTR507_FACTORY,
    #[cfg(feature = "vl53l1x")]
    &VL53L1X_FACTORY,
    #[cfg(feature = "ds3234")]
    &DS3234_FACTORY,
    #[cfg(feature = "ad8495")]
    &AD8495_FACTORY,
    #[cfg(feature = "hall_effect")]
    &HALL_ANALOG_FACTORY,
    #[cfg(feature = "hall_effect")]
    &HALL_DIGITAL_FACTORY,
    #[cfg(feature = "pir")]
    &PIR_FACTORY,
    #[cfg(feature = "obstacle")]
    &OBSTACLE_FACTORY,
    #[cfg(feature = "rotary_encoder")]
    &ROTARY_ENCODER_FACTORY,
    #[cfg(feature = "ultrasonic")]
    &ULTRASONIC_FACTORY,
    #[cfg(feature = "rfid")]
    &RFID_FACTORY,
];

pub fn create_sensor_driver(entry: &SensorEntry) -> SensorResult<Box<dyn SensorDriver>> {
    SENSOR_FACTORIES
        .iter()
        .find(|f| f.name() == entry.driver)
        .ok_or_else(|| SensorError::UnsupportedDriver {
            driver: entry.driver.clone(),
        })?
        .create(entry)
}

/// Barometric altitude from the hypsometric formula, as used by the Bosch
/// pressure sensors that know their own temperature.
pub fn hypsometric_altitude(pressure_hpa: f32, temperature_c: f32, sea_level_hpa: f32) -> f32 {
    ((sea_level_hpa / pressure_hpa).powf(0.190223) - 1.0) * (temperature_c + 273.15) / 0.0065
}

/// International barometric formula (standard atmosphere)
pub fn isa_altitude(pressure_hpa: f32, sea_level_hpa: f32) -> f32 {
    44330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(0.1903))
}
