use actix_web::{web, HttpResponse};
use forwarder_monitor::MonitorSnapshot;
use metrics::counter;
use serde::Serialize;

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    /// Whether the call changed the poller's state.
    pub changed: bool,
    #[serde(flatten)]
    pub snapshot: MonitorSnapshot,
}

pub async fn monitor_status_handler(state: web::Data<AppState>) -> HttpResponse {
    counter!("api_requests_total", "endpoint" => "monitor").increment(1);
    HttpResponse::Ok().json(state.monitor().snapshot().await)
}

pub async fn start_monitor_handler(state: web::Data<AppState>) -> HttpResponse {
    counter!("api_requests_total", "endpoint" => "monitor_start").increment(1);
    let changed = state.monitor().start().await;
    HttpResponse::Ok().json(ControlResponse {
        changed,
        snapshot: state.monitor().snapshot().await,
    })
}

pub async fn stop_monitor_handler(state: web::Data<AppState>) -> HttpResponse {
    counter!("api_requests_total", "endpoint" => "monitor_stop").increment(1);
    let changed = state.monitor().stop().await;
    HttpResponse::Ok().json(ControlResponse {
        changed,
        snapshot: state.monitor().snapshot().await,
    })
}

pub async fn current_run_handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    counter!("api_requests_total", "endpoint" => "run").increment(1);
    let run = state
        .monitor()
        .current_run()
        .ok_or(ApiError::NotFound("forwarding run"))?;
    Ok(HttpResponse::Ok().json(run))
}
