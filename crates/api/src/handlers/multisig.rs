use actix_web::{web, HttpResponse};
use forwarder_domain::model::MultisigStatus;
use forwarder_domain::LedgerAddress;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Serialize)]
pub struct MultisigResponse {
    #[serde(flatten)]
    pub status: MultisigStatus,
    pub external_address: Option<LedgerAddress>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetSignerRequest {
    pub address: String,
}

fn respond(state: &AppState, status: MultisigStatus) -> HttpResponse {
    HttpResponse::Ok().json(MultisigResponse {
        status,
        external_address: state.monitor().verifier().external_address(),
    })
}

pub async fn multisig_status_handler(
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    counter!("api_requests_total", "endpoint" => "multisig").increment(1);
    let status = state
        .monitor()
        .verifier()
        .status()
        .ok_or(ApiError::NotFound("multisig status"))?;
    Ok(respond(&state, status))
}

pub async fn refresh_multisig_handler(
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    counter!("api_requests_total", "endpoint" => "multisig_refresh").increment(1);
    let status = state.monitor().verifier().verify().await?;
    Ok(respond(&state, status))
}

pub async fn set_signer_handler(
    state: web::Data<AppState>,
    payload: web::Json<SetSignerRequest>,
) -> Result<HttpResponse, ApiError> {
    counter!("api_requests_total", "endpoint" => "signer").increment(1);
    let address = LedgerAddress::parse(&payload.address)?;
    let status = state
        .monitor()
        .verifier()
        .set_external_address(address)
        .await?;
    Ok(respond(&state, status))
}
