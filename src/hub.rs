use crate::errors::{HubError, HubResult};
use crate::messages::SensorMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Buffer sized for a few seconds of every sensor at its poll rate
const CHANNEL_CAPACITY: usize = 1024;

/// Health of one sensor as seen by the hub
#[derive(Clone, Debug, PartialEq)]
pub struct SensorStats {
    pub is_active: bool,
    pub is_healthy: bool,
    pub frequency_hz: u32,
    pub messages_sent: u64,
    pub read_errors: u64,
    pub last_message_time_ns: u64,
    pub error_message: Option<String>,
}

impl Default for SensorStats {
    fn default() -> Self {
        Self {
            is_active: false,
            is_healthy: true,
            frequency_hz: 0,
            messages_sent: 0,
            read_errors: 0,
            last_message_time_ns: 0,
            error_message: None,
        }
    }
}

/// Fan-out point between the sensor tasks and whatever consumes readings
#[derive(Clone)]
pub struct ReadingHub {
    tx: broadcast::Sender<SensorMessage>,
    sensor_stats: Arc<RwLock<HashMap<String, SensorStats>>>,
}

impl Default for ReadingHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            sensor_stats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SensorMessage> {
        self.tx.subscribe()
    }

    /// Record a sensor before its first reading
    pub async fn register(&self, sensor_id: &str, frequency_hz: u32) {
        let mut stats = self.sensor_stats.write().await;
        let entry = stats.entry(sensor_id.to_string()).or_default();
        entry.is_active = true;
        entry.frequency_hz = frequency_hz;
    }

    /// Publish to every subscriber. Statistics are updated even when nobody
    /// is listening, which is reported as [`HubError::NoSubscribers`].
    pub async fn publish(&self, message: SensorMessage) -> HubResult<usize> {
        self.update_sensor_stats(message.sensor_id()).await;
        let sensor_id = message.sensor_id().to_string();
        match self.tx.send(message) {
            Ok(receivers) => Ok(receivers),
            Err(_) => {
                debug!("[hub] no subscribers for {}", sensor_id);
                Err(HubError::NoSubscribers)
            }
        }
    }

    async fn update_sensor_stats(&self, sensor_id: &str) {
        let mut stats = self.sensor_stats.write().await;
        let entry = stats.entry(sensor_id.to_string()).or_default();
        entry.is_active = true;
        entry.is_healthy = true;
        entry.error_message = None;
        entry.messages_sent += 1;
        entry.last_message_time_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
    }

    /// Mark a failed poll; the sensor stays active and is retried next period
    pub async fn record_error(&self, sensor_id: &str, error: &str) {
        let mut stats = self.sensor_stats.write().await;
        let entry = stats.entry(sensor_id.to_string()).or_default();
        entry.is_healthy = false;
        entry.read_errors += 1;
        entry.error_message = Some(error.to_string());
    }

    pub async fn stats(&self, sensor_id: &str) -> Option<SensorStats> {
        self.sensor_stats.read().await.get(sensor_id).cloned()
    }

    pub async fn all_stats(&self) -> HashMap<String, SensorStats> {
        self.sensor_stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Header, RangeMessage};

    fn range(sensor: &str) -> SensorMessage {
        SensorMessage::Range(RangeMessage {
            h: Header::new("hub", sensor, 1),
            distance_mm: 250.0,
        })
    }

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let hub = ReadingHub::new();
        let mut rx = hub.subscribe();
        let sent = range("tof0");
        assert_eq!(hub.publish(sent.clone()).await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), sent);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_still_counts() {
        let hub = ReadingHub::new();
        hub.register("tof0", 5).await;
        assert!(matches!(hub.publish(range("tof0")).await, Err(HubError::NoSubscribers)));

        let stats = hub.stats("tof0").await.unwrap();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.frequency_hz, 5);
        assert!(stats.is_active && stats.is_healthy);
    }

    #[tokio::test]
    async fn errors_mark_sensor_unhealthy_until_next_reading() {
        let hub = ReadingHub::new();
        let _rx = hub.subscribe();
        hub.record_error("tof0", "I2C NACK").await;
        let stats = hub.stats("tof0").await.unwrap();
        assert!(!stats.is_healthy);
        assert_eq!(stats.read_errors, 1);
        assert_eq!(stats.error_message.as_deref(), Some("I2C NACK"));

        hub.publish(range("tof0")).await.unwrap();
        let stats = hub.stats("tof0").await.unwrap();
        assert!(stats.is_healthy);
        assert_eq!(stats.read_errors, 1);
        assert!(hub.all_stats().await.contains_key("tof0"));
    }
}
