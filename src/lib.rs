//! Drivers for discrete breakout boards on I2C, SPI, UART and GPIO, plus a
//! small hub runtime that polls configured sensors and fans their readings
//! out to subscribers.

pub mod actuators;
pub mod bus;
pub mod config;
pub mod errors;
pub mod hub;
pub mod messages;
pub mod registry;
pub mod scheduler;
pub mod sensors;

use crate::config::{load_bus_config, load_sensor_config};
use crate::hub::ReadingHub;
use crate::registry::init_all;
use crate::scheduler::spawn_sensor_tasks;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_CONFIG_DIR: &str = "config";
pub const DEVICE_ID: &str = "breakout_hub";

/// Log to stderr so stdout stays clean for readings.
/// RUST_LOG=debug for verbose, RUST_LOG=warn for quiet operation.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// Load `buses.toml` and `sensors.toml` from `config_dir`, bring every
/// sensor up and start polling. Readings arrive on the returned hub.
pub async fn run_sensor_hub(config_dir: &str) -> Result<(ReadingHub, Vec<JoinHandle<()>>), String> {
    let bus_config = load_bus_config(&format!("{}/buses.toml", config_dir))?;
    let sensor_config = load_sensor_config(&format!("{}/sensors.toml", config_dir))?;
    info!(
        "[config] loaded {} bus(es) and {} sensor(s)",
        bus_config.buses.len(),
        sensor_config.sensors.len()
    );

    let (sensors, buses) = init_all(&bus_config, &sensor_config).await?;
    info!("[registry] sensors and buses initialized");

    let hub = ReadingHub::new();
    let handles = spawn_sensor_tasks(sensors, &buses, &hub, &sensor_config, DEVICE_ID);
    info!("[main] {} sensor task(s) launched", handles.len());
    Ok((hub, handles))
}
