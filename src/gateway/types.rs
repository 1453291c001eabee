// Gateway wire DTOs and typed webhook events
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::model::SettlementOutcome;

pub const EVENT_CHARGE_SUCCESS: &str = "charge.success";
pub const EVENT_CHARGE_FAILED: &str = "charge.failed";

/// Standard response envelope: { status, message, data }
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeChargeBody<'a> {
    pub email: &'a str,
    /// Minor currency units
    pub amount: i64,
    pub currency: &'a str,
    pub reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<&'a str>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeChargeData {
    pub authorization_url: String,
    pub reference: String,
}

/// Gateway-side charge status as reported by verify and by webhooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeStatus {
    Success,
    Failed,
    Abandoned,
    Reversed,
    /// Anything not yet decisive (`ongoing`, `pending`, `processing`, ...)
    InProgress(String),
}

impl From<&str> for ChargeStatus {
    fn from(s: &str) -> Self {
        match s {
            "success" => ChargeStatus::Success,
            "failed" => ChargeStatus::Failed,
            "abandoned" => ChargeStatus::Abandoned,
            "reversed" => ChargeStatus::Reversed,
            other => ChargeStatus::InProgress(other.to_string()),
        }
    }
}

impl ChargeStatus {
    /// Settlement outcome if the status is final
    pub fn outcome(&self) -> Option<SettlementOutcome> {
        match self {
            ChargeStatus::Success => Some(SettlementOutcome::Success),
            ChargeStatus::Failed | ChargeStatus::Abandoned | ChargeStatus::Reversed => {
                Some(SettlementOutcome::Failed)
            }
            ChargeStatus::InProgress(_) => None,
        }
    }
}

// Subset of the charge object read from verify responses and webhook data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChargeData {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Webhook envelope as delivered: { event, data }
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: ChargeData,
}

/// Verified webhook payload reduced to what the ledger acts on
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    ChargeSucceeded {
        reference: String,
        amount_minor: Option<i64>,
        raw: Value,
    },
    ChargeFailed {
        reference: String,
        raw: Value,
    },
    Unrecognized {
        raw: Value,
    },
}

impl GatewayEvent {
    /// Parse a raw webhook body. Never fails: anything outside the two
    /// charge events, or without a reference, is `Unrecognized`.
    pub fn parse(payload: &[u8]) -> Self {
        let raw: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(_) => {
                return GatewayEvent::Unrecognized {
                    raw: Value::String(String::from_utf8_lossy(payload).into_owned()),
                }
            }
        };
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> Self {
        let Ok(evt) = serde_json::from_value::<RawEvent>(raw.clone()) else {
            return GatewayEvent::Unrecognized { raw };
        };
        let Some(reference) = evt.data.reference.filter(|r| !r.is_empty()) else {
            return GatewayEvent::Unrecognized { raw };
        };
        let status = evt.data.status.as_deref().map(ChargeStatus::from);

        match evt.event.as_str() {
            EVENT_CHARGE_SUCCESS => match status {
                None | Some(ChargeStatus::Success) => GatewayEvent::ChargeSucceeded {
                    reference,
                    amount_minor: evt.data.amount,
                    raw,
                },
                Some(s) if s.outcome() == Some(SettlementOutcome::Failed) => {
                    GatewayEvent::ChargeFailed { reference, raw }
                }
                Some(_) => GatewayEvent::Unrecognized { raw },
            },
            EVENT_CHARGE_FAILED => GatewayEvent::ChargeFailed { reference, raw },
            _ => GatewayEvent::Unrecognized { raw },
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            GatewayEvent::ChargeSucceeded { reference, .. }
            | GatewayEvent::ChargeFailed { reference, .. } => Some(reference),
            GatewayEvent::Unrecognized { .. } => None,
        }
    }
}
