use actix_web::{web::Data, HttpResponse};
use metrics::counter;

use crate::state::AppState;

pub async fn metrics_handler(state: Data<AppState>) -> HttpResponse {
    counter!("api_requests_total", "endpoint" => "metrics").increment(1);
    let body = state.telemetry().render_metrics();
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body)
}
