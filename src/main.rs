use breakout_sensorhub::{init_tracing, run_sensor_hub, DEFAULT_CONFIG_DIR};
use std::io::Write;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_tracing();
    info!("[BreakoutSensorHub] starting up...");

    // Load configuration from CONFIG_PATH or default
    let config_dir = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string());
    let (hub, _tasks) = match run_sensor_hub(&config_dir).await {
        Ok(running) => running,
        Err(e) => {
            error!("[main] startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let mut rx = hub.subscribe();
    info!("[main] Ready, streaming readings as JSON lines");

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(msg) => match msg.to_json() {
                    Ok(line) => {
                        let mut out = std::io::stdout().lock();
                        if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                            // Reader went away
                            break;
                        }
                    }
                    Err(e) => warn!("[main] could not encode {}: {}", msg.sensor_id(), e),
                },
                Err(RecvError::Lagged(n)) => warn!("[main] output lagging, dropped {} reading(s)", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("[main] interrupted, shutting down");
                break;
            }
        }
    }
}
