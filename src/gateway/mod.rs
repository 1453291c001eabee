// Payment gateway collaborator: hosted checkout and charge verification

pub mod errors;
pub mod rest;
pub mod types;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use self::errors::GatewayApiError;
use self::types::ChargeStatus;

/// Charge to open on the gateway's hosted page
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub email: String,
    /// Minor currency units
    pub amount_minor: i64,
    pub reference: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub checkout_url: String,
}

#[derive(Debug, Clone)]
pub struct ChargeVerification {
    pub status: ChargeStatus,
    pub amount_minor: Option<i64>,
    /// Charge object exactly as returned, kept for audit
    pub raw: Value,
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initialize_charge(&self, request: &ChargeRequest) -> Result<Checkout, GatewayApiError>;

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayApiError>;
}

/// Whether `amount` is expressible in minor units without rounding
pub fn fits_minor_units(amount: Decimal) -> bool {
    amount.normalize().scale() <= 2
}

/// Major units to the gateway's minor units (two decimal places).
/// `None` when the result does not fit an `i64`.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    amount.checked_mul(dec!(100))?.round().to_i64()
}

pub fn from_minor_units(amount_minor: i64) -> Decimal {
    Decimal::from(amount_minor) / dec!(100)
}
