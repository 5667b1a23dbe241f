use crate::bus::gpio::GpioBus;
use crate::bus::i2c::I2CBus;
use crate::bus::serial::SerialBus;
use crate::bus::spi::SpiBus;
use crate::bus::{Bus, BusType};
use crate::config::{BusConfig, BusEntry, SensorConfig};
use crate::errors::{RegistryError, RegistryResult, SensorError};
use crate::sensors::{create_sensor_driver, SensorDriver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

const DEFAULT_SPI_HZ: u32 = 1_000_000;
const DEFAULT_BAUD: u32 = 9600;
const DEFAULT_ADC_BITS: u8 = 12;

pub type SharedBus = Arc<Mutex<Bus>>;

/// Open the device node behind one `[[bus]]` entry
pub fn open_bus(entry: &BusEntry) -> RegistryResult<Bus> {
    let open_err = |reason: String| RegistryError::BusOpenError {
        bus: entry.id.clone(),
        reason,
    };
    let bus = match entry.bus_type()? {
        BusType::I2C => Bus::I2c(I2CBus::new(&entry.path).map_err(|e| open_err(e.to_string()))?),
        BusType::Spi => Bus::Spi(
            SpiBus::new(&entry.path, entry.speed_hz.unwrap_or(DEFAULT_SPI_HZ), entry.mode.unwrap_or(0))
                .map_err(|e| open_err(e.to_string()))?,
        ),
        BusType::Serial => Bus::Serial(
            SerialBus::new_with_baud(&entry.path, entry.baud.unwrap_or(DEFAULT_BAUD))
                .map_err(|e| open_err(e.to_string()))?,
        ),
        BusType::Gpio => Bus::Gpio(
            GpioBus::sysfs(entry.adc_path.clone(), entry.adc_bits.unwrap_or(DEFAULT_ADC_BITS))
                .map_err(|e| open_err(e.to_string()))?,
        ),
    };
    info!("[registry] opened {} bus '{}' {}", bus.kind().as_str(), entry.id, entry.path);
    Ok(bus)
}

/// Create and initialise every configured sensor against already opened buses
pub async fn register_sensors(
    sensor_config: &SensorConfig,
    bus_map: &HashMap<String, SharedBus>,
) -> RegistryResult<Vec<Box<dyn SensorDriver>>> {
    let mut sensors: Vec<Box<dyn SensorDriver>> = Vec::new();
    info!("[registry] initializing {} sensors...", sensor_config.sensors.len());
    for s in sensor_config.sensors.iter() {
        let mut sensor = create_sensor_driver(s).map_err(RegistryError::DriverCreationError)?;
        info!("[registry] registering sensor: id={} driver={} bus={}", s.id, s.driver, s.bus);

        let bus_arc = bus_map.get(&s.bus).ok_or_else(|| {
            RegistryError::DriverCreationError(SensorError::BusNotFound { bus: s.bus.clone() })
        })?;
        let mut bus = bus_arc.lock().await;
        sensor.init(&mut bus).await.map_err(RegistryError::RegistrationError)?;
        sensors.push(sensor);
    }
    Ok(sensors)
}

pub async fn init_all(
    bus_config: &BusConfig,
    sensor_config: &SensorConfig,
) -> RegistryResult<(Vec<Box<dyn SensorDriver>>, HashMap<String, SharedBus>)> {
    let mut bus_map = HashMap::new();
    for b in bus_config.buses.iter() {
        bus_map.insert(b.id.clone(), Arc::new(Mutex::new(open_bus(b)?)));
    }
    let sensors = register_sensors(sensor_config, &bus_map).await?;
    Ok((sensors, bus_map))
}
