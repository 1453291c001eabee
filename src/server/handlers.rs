// Route handlers. Errors render through PaymentError's IntoResponse.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::{CohortBilling, NewFee};
use crate::gateway::types::GatewayEvent;
use crate::ledger::model::SettlementOutcome;
use crate::payments::signature::SIGNATURE_HEADER;
use crate::payments::PaymentError;
use crate::server::AppState;

pub const SIMULATE_SECRET_HEADER: &str = "x-simulate-secret";

#[derive(Debug, Deserialize)]
pub struct InitiateBody {
    pub fee_id: Uuid,
    #[serde(default)]
    pub amount: Option<Decimal>,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct SimulateBody {
    pub reference: String,
    pub outcome: SettlementOutcome,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub async fn create_fee(
    State(state): State<AppState>,
    Json(body): Json<NewFee>,
) -> Result<impl IntoResponse, PaymentError> {
    let fee = state.billing.create_fee(body).await?;
    Ok((StatusCode::CREATED, Json(fee)))
}

pub async fn bill_cohort(
    State(state): State<AppState>,
    Json(body): Json<CohortBilling>,
) -> Result<impl IntoResponse, PaymentError> {
    let fees = state.billing.bill_cohort(body).await?;
    Ok((StatusCode::CREATED, Json(fees)))
}

pub async fn get_fee(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, PaymentError> {
    Ok(Json(state.billing.get_fee(id).await?))
}

pub async fn fee_transactions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, PaymentError> {
    Ok(Json(state.billing.fee_transactions(id).await?))
}

pub async fn student_fees(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, PaymentError> {
    Ok(Json(state.billing.fees_for_student(&student_id).await?))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, PaymentError> {
    Ok(Json(state.billing.transaction(&reference).await?))
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(body): Json<InitiateBody>,
) -> Result<impl IntoResponse, PaymentError> {
    let payment = state
        .initiator
        .initiate(body.fee_id, body.amount, &body.email)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// Raw body is passed through untouched so the signature covers the exact bytes
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, PaymentError> {
    let outcome = state
        .reconciler
        .reconcile(&body, header(&headers, SIGNATURE_HEADER))
        .await?;
    Ok(Json(json!({ "received": true, "outcome": outcome })))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, PaymentError> {
    let (outcome, transaction) = state.reconciler.verify_reference(&reference).await?;
    Ok(Json(json!({ "outcome": outcome, "transaction": transaction })))
}

/// Development-only: settle a reference without a gateway signature
pub async fn simulate_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SimulateBody>,
) -> Result<impl IntoResponse, PaymentError> {
    if !state.simulate.enabled() {
        return Err(PaymentError::NotFound("route".into()));
    }
    if !state.simulate.allows(header(&headers, SIMULATE_SECRET_HEADER)) {
        warn!(reference = %body.reference, "Simulated webhook rejected: bad secret");
        return Err(PaymentError::Unauthorized("simulate secret mismatch".into()));
    }

    let raw = json!({
        "event": match body.outcome {
            SettlementOutcome::Success => "charge.success",
            SettlementOutcome::Failed => "charge.failed",
        },
        "data": { "reference": &body.reference, "simulated": true },
    });
    let event = match body.outcome {
        SettlementOutcome::Success => GatewayEvent::ChargeSucceeded {
            reference: body.reference.clone(),
            amount_minor: None,
            raw,
        },
        SettlementOutcome::Failed => GatewayEvent::ChargeFailed {
            reference: body.reference.clone(),
            raw,
        },
    };
    info!(reference = %body.reference, outcome = ?body.outcome, "Applying simulated webhook");
    let outcome = state.reconciler.apply_event(event).await?;
    Ok(Json(json!({ "received": true, "outcome": outcome, "simulated": true })))
}
