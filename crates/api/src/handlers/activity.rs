use actix_web::{web, HttpResponse};
use forwarder_domain::model::LogEntry;
use metrics::counter;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub capacity: usize,
    /// Most recent first.
    pub entries: Vec<LogEntry>,
}

pub async fn list_activity_handler(state: web::Data<AppState>) -> HttpResponse {
    counter!("api_requests_total", "endpoint" => "activity").increment(1);
    let recorder = state.recorder();
    HttpResponse::Ok().json(ActivityResponse {
        capacity: recorder.capacity(),
        entries: recorder.list(),
    })
}

pub async fn clear_activity_handler(state: web::Data<AppState>) -> HttpResponse {
    counter!("api_requests_total", "endpoint" => "activity_clear").increment(1);
    state.recorder().clear();
    HttpResponse::NoContent().finish()
}
