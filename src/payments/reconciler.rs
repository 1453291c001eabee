// Webhook reconciliation: verified gateway outcomes applied to the ledger once

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::gateway::types::GatewayEvent;
use crate::gateway::{from_minor_units, GatewayClient};
use crate::ledger::model::{SettlementOutcome, Transaction};
use crate::ledger::{LedgerStore, Settlement};
use crate::payments::errors::PaymentError;
use crate::payments::events::{SettlementEvents, SettlementNotice};
use crate::payments::signature::SignatureVerifier;
use crate::payments_counter_inc;

/// How an event was classified. Every variant is acknowledged to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Pending transaction moved to success and the fee was credited
    Settled,
    /// Pending transaction moved to failed
    Failed,
    /// Transaction was already terminal
    Duplicate,
    /// No transaction carries the reference
    Foreign,
    /// Event type or shape the ledger does not act on
    Ignored,
    /// Gateway has not reached a final status yet (verify path only)
    StillPending,
}

pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn GatewayClient>,
    verifier: SignatureVerifier,
    events: Arc<SettlementEvents>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn GatewayClient>,
        verifier: SignatureVerifier,
        events: Arc<SettlementEvents>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            verifier,
            events,
        }
    }

    /// Authenticate a raw webhook body and apply it. The ledger is not read
    /// or written unless the signature checks out.
    #[instrument(skip(self, payload, signature), fields(payload_len = payload.len()))]
    pub async fn reconcile(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, PaymentError> {
        if let Err(e) = self.verifier.verify(payload, signature) {
            warn!(error = %e, "Rejected webhook with invalid signature");
            payments_counter_inc!("payments.webhook.rejected");
            return Err(PaymentError::Unauthorized(e.to_string()));
        }

        let event = GatewayEvent::parse(payload);
        debug!(reference = ?event.reference(), "Webhook signature verified");
        payments_counter_inc!("payments.webhook.received");
        self.apply_event(event).await
    }

    /// Apply an already-trusted event through the atomic settlement write
    pub async fn apply_event(&self, event: GatewayEvent) -> Result<ReconcileOutcome, PaymentError> {
        let (reference, outcome, amount_minor, raw) = match event {
            GatewayEvent::ChargeSucceeded {
                reference,
                amount_minor,
                raw,
            } => (reference, SettlementOutcome::Success, amount_minor, raw),
            GatewayEvent::ChargeFailed { reference, raw } => {
                (reference, SettlementOutcome::Failed, None, raw)
            }
            GatewayEvent::Unrecognized { raw } => {
                debug!(event = ?raw.get("event"), "Ignoring unrecognized gateway event");
                return Ok(ReconcileOutcome::Ignored);
            }
        };
        self.settle(&reference, outcome, amount_minor, raw).await
    }

    /// Fallback for lost or delayed webhooks: ask the gateway directly.
    /// Terminal transactions are answered from the ledger without a gateway call.
    #[instrument(skip(self))]
    pub async fn verify_reference(
        &self,
        reference: &str,
    ) -> Result<(ReconcileOutcome, Transaction), PaymentError> {
        let existing = self
            .ledger
            .get_transaction(reference)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {reference}")))?;
        if existing.status.is_terminal() {
            return Ok((ReconcileOutcome::Duplicate, existing));
        }

        let verification = self.gateway.verify_charge(reference).await?;
        let outcome = match verification.status.outcome() {
            Some(outcome) => {
                self.settle(reference, outcome, verification.amount_minor, verification.raw)
                    .await?
            }
            None => {
                info!(reference = %reference, status = ?verification.status, "Charge not final at gateway");
                ReconcileOutcome::StillPending
            }
        };

        let current = self
            .ledger
            .get_transaction(reference)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {reference}")))?;
        Ok((outcome, current))
    }

    async fn settle(
        &self,
        reference: &str,
        outcome: SettlementOutcome,
        amount_minor: Option<i64>,
        raw: Value,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let settlement = self
            .ledger
            .settle_transaction(reference, outcome, raw, Utc::now())
            .await?;

        let result = match settlement {
            Settlement::Applied { transaction, fee } => {
                if let Some(reported) = amount_minor.map(from_minor_units) {
                    if reported != transaction.amount {
                        warn!(
                            reference = %reference,
                            recorded = %transaction.amount,
                            reported = %reported,
                            "Gateway amount differs from recorded amount; crediting recorded amount"
                        );
                    }
                }
                info!(
                    reference = %reference,
                    fee_id = %fee.id,
                    amount = %transaction.amount,
                    amount_paid = %fee.amount_paid,
                    balance = %fee.balance,
                    status = ?fee.status,
                    "Payment settled"
                );
                self.events.publish(SettlementNotice::settled(&transaction, &fee));
                ReconcileOutcome::Settled
            }
            Settlement::Failed { transaction } => {
                info!(reference = %reference, fee_id = %transaction.fee_id, "Payment failed");
                self.events.publish(SettlementNotice::failed(&transaction));
                ReconcileOutcome::Failed
            }
            Settlement::Duplicate { transaction } => {
                info!(
                    reference = %reference,
                    status = ?transaction.status,
                    "Duplicate settlement event absorbed"
                );
                ReconcileOutcome::Duplicate
            }
            Settlement::UnknownReference => {
                warn!(reference = %reference, "Settlement event for unknown reference ignored");
                ReconcileOutcome::Foreign
            }
        };
        payments_counter_inc!("payments.webhook.processed", "outcome" => format!("{result:?}"));
        Ok(result)
    }
}
