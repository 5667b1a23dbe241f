use crate::config::SensorConfig;
use crate::errors::HubError;
use crate::hub::ReadingHub;
use crate::messages::{Header, SensorMessage};
use crate::registry::SharedBus;
use crate::sensors::SensorDriver;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

pub const DEFAULT_FREQUENCY_HZ: u32 = 1;

fn period(frequency_hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / frequency_hz.max(1) as f64)
}

/// Poll one sensor at `frequency_hz` forever. A failed read is logged and
/// recorded, and the next period is tried as usual.
pub async fn poll_sensor(
    mut sensor: Box<dyn SensorDriver>,
    bus: SharedBus,
    hub: ReadingHub,
    device_id: String,
    frequency_hz: u32,
) {
    let sensor_id = sensor.id().to_string();
    let mut sequence_counter = 0u64;
    let mut ticker = interval(period(frequency_hz));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    hub.register(&sensor_id, frequency_hz).await;
    info!("[{}] Starting sensor task at {}Hz", sensor_id, frequency_hz);

    loop {
        ticker.tick().await;

        let mut bus_lock = bus.lock().await;
        let result = sensor.read(&mut bus_lock).await;
        drop(bus_lock);

        match result {
            Ok(frame) => {
                sequence_counter += 1;
                let header = Header::new(&device_id, &sensor_id, sequence_counter);
                for msg in SensorMessage::from_frame(&header, &frame) {
                    match hub.publish(msg).await {
                        Ok(_) | Err(HubError::NoSubscribers) => {}
                        Err(e) => warn!("[{}] Failed to publish: {}", sensor_id, e),
                    }
                }
            }
            Err(e) => {
                error!("[{}] Sensor read error: {}", sensor_id, e);
                hub.record_error(&sensor_id, &e.to_string()).await;
            }
        }
    }
}

pub fn spawn_sensor_tasks(
    sensors: Vec<Box<dyn SensorDriver>>,
    buses: &HashMap<String, SharedBus>,
    hub: &ReadingHub,
    sensor_config: &SensorConfig,
    device_id: &str,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(sensors.len());
    for sensor in sensors.into_iter() {
        let Some(bus) = buses.get(sensor.bus()).cloned() else {
            // The registry only hands out sensors whose bus exists
            error!("[{}] bus '{}' disappeared, sensor not scheduled", sensor.id(), sensor.bus());
            continue;
        };
        let frequency = sensor_config
            .sensors
            .iter()
            .find(|s| s.id == sensor.id())
            .and_then(|s| s.frequency)
            .unwrap_or(DEFAULT_FREQUENCY_HZ);
        handles.push(tokio::spawn(poll_sensor(
            sensor,
            bus,
            hub.clone(),
            device_id.to_string(),
            frequency,
        )));
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::bus::mock::{AddrMode, MockI2c};
    use crate::config::sensor_config::parse_sensor_config;
    use crate::sensors::create_sensor_driver;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[test]
    fn period_follows_frequency() {
        assert_eq!(period(1), Duration::from_secs(1));
        assert_eq!(period(4), Duration::from_millis(250));
        assert_eq!(period(0), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_do_not_stop_polling() {
        let (i2c, mock) = MockI2c::new();
        mock.add_device(0x30, AddrMode::Command);
        let bus: SharedBus = Arc::new(Mutex::new(Bus::I2c(i2c)));
        let cfg = parse_sensor_config("[[sensor]]\nid = \"pir0\"\ndriver = \"pir\"\nbus = \"i2c1\"\nfrequency = 2\n").unwrap();
        let mut sensor = create_sensor_driver(&cfg.sensors[0]).unwrap();
        sensor.init(&mut *bus.lock().await).await.unwrap();

        let hub = ReadingHub::new();
        let mut rx = hub.subscribe();
        let mut buses = HashMap::new();
        buses.insert("i2c1".to_string(), bus);
        mock.remove_device(0x30);
        let handles = spawn_sensor_tasks(vec![sensor], &buses, &hub, &cfg, "hub");
        assert_eq!(handles.len(), 1);

        // First poll fails against the missing board
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = hub.stats("pir0").await.unwrap();
        assert!(!stats.is_healthy);
        assert_eq!(stats.frequency_hz, 2);

        mock.add_device(0x30, AddrMode::Command);
        mock.queue_read(0x30, &[1]);
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.sensor_id(), "pir0");
        assert_eq!(msg.header().seq, 1);
        assert!(matches!(msg, SensorMessage::Presence(ref p) if p.detected == Some(true)));
    }
}
