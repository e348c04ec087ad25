//! Headless monitor binary: polls the monitored account and forwards every
//! detected deposit until interrupted.

use std::io;

use forwarder_domain::config::ForwardingConfig;
use forwarder_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use forwarder_monitor::{run_monitor, MonitorError};

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = ForwardingConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    init_telemetry(&telemetry_config)?;
    run_monitor(config).await
}
