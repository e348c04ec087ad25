pub mod activity;
pub mod metrics;
pub mod monitor;
pub mod multisig;

pub use activity::{clear_activity_handler, list_activity_handler};
pub use metrics::metrics_handler;
pub use monitor::{
    current_run_handler, monitor_status_handler, start_monitor_handler, stop_monitor_handler,
};
pub use multisig::{multisig_status_handler, refresh_multisig_handler, set_signer_handler};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use forwarder_domain::{AddressError, LedgerError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Ledger(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
