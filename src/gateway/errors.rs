// Gateway error types and retry classification

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Gateway REST error envelope: { status: false, message }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayErrorEnvelope {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum GatewayApiError {
    #[error("http error: {0}")]
    Http(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("gateway rejected request: status={status} message={message:?}")]
    Rejected { status: u16, message: Option<String> },
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
}

impl GatewayApiError {
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<GatewayErrorEnvelope>(body)
            .ok()
            .and_then(|env| env.message)
            .or_else(|| (!body.is_empty()).then(|| body.to_string()));
        GatewayApiError::Rejected { status, message }
    }

    /// Whether retrying the same request may succeed: connection failures,
    /// rate limiting and 5xx responses
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayApiError::Http(_) => true,
            GatewayApiError::Rejected { status, .. } => *status == 429 || (500..600).contains(status),
            GatewayApiError::Decode(_) | GatewayApiError::Precondition(_) => false,
        }
    }
}
