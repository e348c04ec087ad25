use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use forwarder_domain::config::{ApiConfig, ConfigError, ForwardingConfig};
use forwarder_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
use forwarder_domain::ActivityRecorder;
use forwarder_monitor::{build_monitor, MonitorError};
use thiserror::Error;
use tracing::info;

use crate::{
    handlers::{
        clear_activity_handler, current_run_handler, list_activity_handler, metrics_handler,
        monitor_status_handler, multisig_status_handler, refresh_multisig_handler,
        set_signer_handler, start_monitor_handler, stop_monitor_handler,
    },
    state::AppState,
};

/// Boots the monitor in-process and serves the status API until shutdown.
pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;
    let forwarding = Arc::new(ForwardingConfig::load_from_env()?);

    let telemetry_config = TelemetryConfig::from_env("API");
    let telemetry = init_telemetry(&telemetry_config)?;

    let monitor = build_monitor(forwarding, ActivityRecorder::new())?;
    if config.autostart() {
        monitor.start().await;
    } else {
        info!("autostart disabled; waiting for POST /api/v1/monitor/start");
    }

    let state = AppState::new(monitor.clone(), telemetry);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .configure(routes)
    })
    .bind(config.api_bind_address())?
    .run();

    server.await?;
    monitor.stop().await;
    Ok(())
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/activity", web::get().to(list_activity_handler))
            .route("/activity", web::delete().to(clear_activity_handler))
            .route("/multisig", web::get().to(multisig_status_handler))
            .route("/multisig/refresh", web::post().to(refresh_multisig_handler))
            .route("/signer", web::put().to(set_signer_handler))
            .route("/run", web::get().to(current_run_handler))
            .route("/monitor", web::get().to(monitor_status_handler))
            .route("/monitor/start", web::post().to(start_monitor_handler))
            .route("/monitor/stop", web::post().to(stop_monitor_handler)),
    )
    .route("/metrics", web::get().to(metrics_handler));
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
