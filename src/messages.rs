use crate::errors::HubResult;
use crate::sensors::{ClockTime, EncoderEvent, SensorDataFrame};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Message schema version, bumped when a message layout changes
pub const SCHEMA_VERSION: u16 = 1;

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// Header metadata common to all sensor messages
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Header {
    /// Hub instance name
    pub device_id: String,
    /// Configured sensor id (e.g. "env0", "rtc")
    pub sensor_id: String,
    /// Per-sensor sequence number, starting at 1
    pub seq: u64,
    /// UTC timestamp in nanoseconds
    pub t_utc_ns: u64,
    /// Nanoseconds since the hub started, unaffected by wall-clock steps
    pub t_mono_ns: u64,
    pub schema_v: u16,
}

impl Header {
    /// Create a new header stamped with the current time
    pub fn new(device_id: &str, sensor_id: &str, seq: u64) -> Self {
        let t_utc_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self {
            device_id: device_id.to_string(),
            sensor_id: sensor_id.to_string(),
            seq,
            t_utc_ns,
            t_mono_ns: process_start().elapsed().as_nanos() as u64,
            schema_v: SCHEMA_VERSION,
        }
    }
}

/// Temperature, pressure, humidity and gas readings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnvironmentMessage {
    pub h: Header,
    /// °C
    pub temperature: Option<f32>,
    /// hPa
    pub pressure: Option<f32>,
    /// %RH
    pub humidity: Option<f32>,
    /// m
    pub altitude: Option<f32>,
    /// Ohm
    pub gas_resistance: Option<f32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LightMessage {
    pub h: Header,
    pub light: Option<u16>,
    pub proximity: Option<u16>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RangeMessage {
    pub h: Header,
    pub distance_mm: f32,
}

/// Motion, magnet and obstacle detectors
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PresenceMessage {
    pub h: Header,
    pub detected: Option<bool>,
    pub analog_raw: Option<u16>,
    pub magnetic_field_mt: Option<f32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EncoderMessage {
    pub h: Header,
    pub count: i16,
    pub event: EncoderEvent,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RfidMessage {
    pub h: Header,
    pub tag_id: u32,
    pub raw: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClockMessage {
    pub h: Header,
    pub time: ClockTime,
    /// Die temperature of the RTC, °C
    pub temperature: Option<f32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ThermocoupleMessage {
    pub h: Header,
    /// Amplifier output, V
    pub voltage: f32,
    /// Hot-junction temperature, °C
    pub temperature: Option<f32>,
}

/// Unified sensor message enum for the different breakout families
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorMessage {
    Environment(EnvironmentMessage),
    Light(LightMessage),
    Range(RangeMessage),
    Presence(PresenceMessage),
    Encoder(EncoderMessage),
    Rfid(RfidMessage),
    Clock(ClockMessage),
    Thermocouple(ThermocoupleMessage),
}

impl SensorMessage {
    /// Split one driver frame into typed messages.
    ///
    /// A temperature that comes with a clock or a thermocouple voltage
    /// belongs to that message and does not produce an environment message.
    pub fn from_frame(header: &Header, frame: &SensorDataFrame) -> Vec<SensorMessage> {
        let mut messages = Vec::new();
        let mut temperature = frame.temperature;

        if let Some(time) = frame.clock {
            messages.push(SensorMessage::Clock(ClockMessage {
                h: header.clone(),
                time,
                temperature: temperature.take(),
            }));
        }

        if let Some(voltage) = frame.voltage {
            messages.push(SensorMessage::Thermocouple(ThermocoupleMessage {
                h: header.clone(),
                voltage,
                temperature: temperature.take(),
            }));
        }

        if temperature.is_some()
            || frame.pressure.is_some()
            || frame.humidity.is_some()
            || frame.altitude.is_some()
            || frame.gas_resistance.is_some()
        {
            messages.push(SensorMessage::Environment(EnvironmentMessage {
                h: header.clone(),
                temperature,
                pressure: frame.pressure,
                humidity: frame.humidity,
                altitude: frame.altitude,
                gas_resistance: frame.gas_resistance,
            }));
        }

        if frame.light.is_some() || frame.proximity.is_some() {
            messages.push(SensorMessage::Light(LightMessage {
                h: header.clone(),
                light: frame.light,
                proximity: frame.proximity,
            }));
        }

        if let Some(distance_mm) = frame.distance_mm {
            messages.push(SensorMessage::Range(RangeMessage {
                h: header.clone(),
                distance_mm,
            }));
        }

        if frame.detected.is_some() || frame.analog_raw.is_some() || frame.magnetic_field_mt.is_some() {
            messages.push(SensorMessage::Presence(PresenceMessage {
                h: header.clone(),
                detected: frame.detected,
                analog_raw: frame.analog_raw,
                magnetic_field_mt: frame.magnetic_field_mt,
            }));
        }

        if let Some(encoder) = frame.encoder {
            messages.push(SensorMessage::Encoder(EncoderMessage {
                h: header.clone(),
                count: encoder.count,
                event: encoder.event,
            }));
        }

        if let Some(tag) = frame.rfid {
            messages.push(SensorMessage::Rfid(RfidMessage {
                h: header.clone(),
                tag_id: tag.id,
                raw: tag.raw,
            }));
        }

        messages
    }

    /// Get the header from any sensor message
    pub fn header(&self) -> &Header {
        match self {
            SensorMessage::Environment(msg) => &msg.h,
            SensorMessage::Light(msg) => &msg.h,
            SensorMessage::Range(msg) => &msg.h,
            SensorMessage::Presence(msg) => &msg.h,
            SensorMessage::Encoder(msg) => &msg.h,
            SensorMessage::Rfid(msg) => &msg.h,
            SensorMessage::Clock(msg) => &msg.h,
            SensorMessage::Thermocouple(msg) => &msg.h,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.header().sensor_id
    }

    /// Single-line JSON, as written to stdout by the hub binary
    pub fn to_json(&self) -> HubResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{EncoderReading, RfidTag};

    fn header() -> Header {
        Header::new("hub", "s0", 7)
    }

    #[test]
    fn header_is_stamped() {
        let h = header();
        assert_eq!(h.sensor_id, "s0");
        assert_eq!(h.seq, 7);
        assert_eq!(h.schema_v, SCHEMA_VERSION);
        assert!(h.t_utc_ns > 0);
    }

    #[test]
    fn environment_frame_becomes_one_message() {
        let frame = SensorDataFrame {
            temperature: Some(21.5),
            pressure: Some(1002.0),
            altitude: Some(94.0),
            ..SensorDataFrame::default()
        };
        let messages = SensorMessage::from_frame(&header(), &frame);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            SensorMessage::Environment(env) => {
                assert_eq!(env.temperature, Some(21.5));
                assert_eq!(env.humidity, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn clock_temperature_stays_with_the_clock() {
        let time = ClockTime { year: 2024, month: 2, date: 29, day: 5, hour: 12, minute: 0, second: 0 };
        let frame = SensorDataFrame {
            clock: Some(time),
            temperature: Some(24.25),
            ..SensorDataFrame::default()
        };
        let messages = SensorMessage::from_frame(&header(), &frame);
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], SensorMessage::Clock(c) if c.temperature == Some(24.25)));
    }

    #[test]
    fn mixed_frame_fans_out() {
        let frame = SensorDataFrame {
            light: Some(10),
            distance_mm: Some(120.0),
            detected: Some(true),
            encoder: Some(EncoderReading { count: 3, event: EncoderEvent::Click }),
            rfid: Some(RfidTag { id: 5, raw: 6 }),
            ..SensorDataFrame::default()
        };
        let kinds: Vec<_> = SensorMessage::from_frame(&header(), &frame)
            .iter()
            .map(|m| std::mem::discriminant(m))
            .collect();
        assert_eq!(kinds.len(), 5);
        assert!(SensorMessage::from_frame(&header(), &SensorDataFrame::default()).is_empty());
    }

    #[test]
    fn json_is_tagged_by_kind() {
        let msg = SensorMessage::Range(RangeMessage { h: header(), distance_mm: 42.0 });
        let json = msg.to_json().unwrap();
        assert!(json.starts_with("{\"kind\":\"range\""));
        assert!(!json.contains('\n'));
        let back: SensorMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn serde_failures_surface_as_hub_encode_errors() {
        let err: crate::errors::HubError = serde_json::from_str::<SensorMessage>("{\"kind\":").unwrap_err().into();
        assert!(matches!(err, crate::errors::HubError::EncodeError(_)));
        assert!(err.to_string().starts_with("Failed to encode reading"));
    }
}
