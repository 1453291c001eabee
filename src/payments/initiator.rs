// Payment initiation: quote the payable balance, open a gateway checkout,
// record a pending transaction

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::gateway::{fits_minor_units, to_minor_units, ChargeRequest, GatewayClient};
use crate::ledger::model::{FeeStatus, Transaction};
use crate::ledger::LedgerStore;
use crate::payments::errors::PaymentError;
use crate::payments_counter_inc;

const REFERENCE_PREFIX: &str = "FEE";
const REFERENCE_SUFFIX_LEN: usize = 10;
const REFERENCE_ATTEMPTS: usize = 3;

/// Time-ordered prefix plus random suffix, e.g. `FEE-20240115093000123-K3J9X0QPZA`
pub fn generate_reference() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERENCE_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!(
        "{}-{}-{}",
        REFERENCE_PREFIX,
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        suffix
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiatedPayment {
    pub checkout_url: String,
    pub reference: String,
    pub amount: Decimal,
}

pub struct PaymentInitiator {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn GatewayClient>,
}

impl PaymentInitiator {
    pub fn new(ledger: Arc<dyn LedgerStore>, gateway: Arc<dyn GatewayClient>) -> Self {
        Self { ledger, gateway }
    }

    /// Open a checkout for `requested` (or the whole payable balance) against
    /// a fee. The pending transaction is only written once the gateway has
    /// accepted the charge.
    #[instrument(skip(self, email))]
    pub async fn initiate(
        &self,
        fee_id: Uuid,
        requested: Option<Decimal>,
        email: &str,
    ) -> Result<InitiatedPayment, PaymentError> {
        if email.trim().is_empty() {
            return Err(PaymentError::BadRequest("payer email is required".into()));
        }

        let fee = self
            .ledger
            .get_fee(fee_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("fee {fee_id}")))?;

        let mut quote = fee.clone();
        quote.refresh_late_fee(&self.ledger.calculator(), Utc::now())?;
        if quote.status == FeeStatus::Paid {
            return Err(PaymentError::AlreadySettled);
        }
        let payable = quote.payable_balance();

        let amount = requested.unwrap_or(payable);
        if amount <= Decimal::ZERO || amount > payable || !fits_minor_units(amount) {
            payments_counter_inc!("payments.initiate.rejected", "reason" => "invalid_amount");
            return Err(PaymentError::InvalidAmount {
                requested: amount,
                payable,
            });
        }
        let amount_minor = to_minor_units(amount).ok_or(PaymentError::InvalidAmount {
            requested: amount,
            payable,
        })?;

        let reference = self.fresh_reference().await?;

        let checkout = self
            .gateway
            .initialize_charge(&ChargeRequest {
                email: email.trim().to_string(),
                amount_minor,
                reference: reference.clone(),
                metadata: json!({
                    "fee_id": fee.id,
                    "student_id": fee.student_id,
                    "late_fee": quote.late_fee,
                }),
            })
            .await
            .map_err(|e| {
                warn!(reference = %reference, error = %e, "Gateway checkout initialization failed");
                payments_counter_inc!("payments.initiate.gateway_failed");
                PaymentError::from(e)
            })?;

        let transaction = Transaction::pending(&fee, reference, amount, Some(checkout.checkout_url.clone()));
        let transaction = self.ledger.create_transaction(transaction).await?;

        info!(
            reference = %transaction.reference,
            fee_id = %fee.id,
            student_id = %fee.student_id,
            amount = %amount,
            late_fee = %quote.late_fee,
            gateway = self.gateway.name(),
            "Payment initiated"
        );
        payments_counter_inc!("payments.initiate.created");

        Ok(InitiatedPayment {
            checkout_url: checkout.checkout_url,
            reference: transaction.reference,
            amount,
        })
    }

    async fn fresh_reference(&self) -> Result<String, PaymentError> {
        for _ in 0..REFERENCE_ATTEMPTS {
            let reference = generate_reference();
            if self.ledger.get_transaction(&reference).await?.is_none() {
                return Ok(reference);
            }
            warn!(reference = %reference, "Generated reference already in use; regenerating");
        }
        Err(PaymentError::Ledger(crate::ledger::LedgerError::Storage(
            "could not allocate a unique reference".into(),
        )))
    }
}
