// Payment error taxonomy and its HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::gateway::errors::GatewayApiError;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("fee is already settled")]
    AlreadySettled,
    #[error("invalid amount {requested}: must be positive and at most {payable}")]
    InvalidAmount { requested: Decimal, payable: Decimal },
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("ledger error: {0}")]
    Ledger(LedgerError),
}

impl PaymentError {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::NotFound(_) => "not_found",
            PaymentError::AlreadySettled => "already_settled",
            PaymentError::InvalidAmount { .. } => "invalid_amount",
            PaymentError::BadRequest(_) => "bad_request",
            PaymentError::Unauthorized(_) => "unauthorized",
            PaymentError::GatewayUnavailable(_) => "gateway_unavailable",
            PaymentError::Ledger(_) => "ledger_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::AlreadySettled
            | PaymentError::InvalidAmount { .. }
            | PaymentError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PaymentError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PaymentError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for PaymentError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::FeeNotFound(id) => PaymentError::NotFound(format!("fee {id}")),
            other => PaymentError::Ledger(other),
        }
    }
}

impl From<GatewayApiError> for PaymentError {
    fn from(e: GatewayApiError) -> Self {
        PaymentError::GatewayUnavailable(e.to_string())
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({ "error": self.code(), "message": self.to_string() }));
        (status, body).into_response()
    }
}
