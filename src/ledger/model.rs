// Fee and transaction records held by the ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::late_fee::LateFeeCalculator;
use crate::ledger::LedgerError;

/// Settlement state of a fee, derived from its balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStatus {
    Unpaid,
    Partial,
    Paid,
}

/// Lifecycle of one settlement attempt. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Outcome reported for a charge, either by a verified webhook or by the
/// gateway's verify endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Success,
    Failed,
}

/// A billing obligation owed by one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub id: Uuid,
    pub student_id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    pub amount: Decimal,
    pub due_date: Option<DateTime<Utc>>,
    pub amount_paid: Decimal,
    pub late_fee: Decimal,
    pub balance: Decimal,
    pub status: FeeStatus,
    /// References of every settlement attempt, oldest first
    pub transactions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fee {
    /// Caller validates `amount >= 0`.
    pub fn new(
        student_id: impl Into<String>,
        description: impl Into<String>,
        amount: Decimal,
        due_date: Option<DateTime<Utc>>,
        class_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let mut fee = Self {
            id: Uuid::new_v4(),
            student_id: student_id.into(),
            description: description.into(),
            class_id,
            amount,
            due_date,
            amount_paid: Decimal::ZERO,
            late_fee: Decimal::ZERO,
            balance: amount,
            status: FeeStatus::Unpaid,
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        fee.recompute();
        fee
    }

    /// Principal still owed, ignoring any accrued late fee
    pub fn outstanding_principal(&self) -> Decimal {
        self.amount - self.amount_paid
    }

    /// What a payer may settle right now: principal plus cached late fee
    /// minus what has already been paid
    pub fn payable_balance(&self) -> Decimal {
        (self.amount + self.late_fee - self.amount_paid).max(Decimal::ZERO)
    }

    /// Re-derive `balance` and `status` from amount, late fee and payments
    pub fn recompute(&mut self) {
        let total_due = self.amount + self.late_fee;
        self.balance = (total_due - self.amount_paid).max(Decimal::ZERO);
        self.status = if self.balance <= Decimal::ZERO {
            FeeStatus::Paid
        } else if self.amount_paid > Decimal::ZERO {
            FeeStatus::Partial
        } else {
            FeeStatus::Unpaid
        };
    }

    /// Late fee owed at `now`, checked so that `amount + late_fee` stays
    /// representable
    fn accrued_late_fee(
        &self,
        calculator: &LateFeeCalculator,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        calculator
            .compute(self.due_date, self.outstanding_principal(), now)
            .filter(|late_fee| self.amount.checked_add(*late_fee).is_some())
            .ok_or(LedgerError::AmountOverflow(self.id))
    }

    /// Refresh the cached late fee against the current outstanding principal.
    /// Paid fees are frozen. Returns whether anything changed; on error the
    /// fee is left as it was.
    pub fn refresh_late_fee(
        &mut self,
        calculator: &LateFeeCalculator,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        if self.status == FeeStatus::Paid {
            return Ok(false);
        }
        let late_fee = self.accrued_late_fee(calculator, now)?;
        if late_fee == self.late_fee {
            return Ok(false);
        }
        self.late_fee = late_fee;
        self.recompute();
        self.updated_at = now;
        Ok(true)
    }

    /// Apply a successful settlement of `amount`: late fee is recomputed on the
    /// pre-payment principal, then the payment is credited. On error the fee
    /// is left as it was.
    pub fn apply_payment(
        &mut self,
        amount: Decimal,
        calculator: &LateFeeCalculator,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let late_fee = self.accrued_late_fee(calculator, now)?;
        let amount_paid = self
            .amount_paid
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow(self.id))?;
        self.late_fee = late_fee;
        self.amount_paid = amount_paid;
        self.recompute();
        self.updated_at = now;
        Ok(())
    }
}

/// One attempt to settle part or all of a fee through the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub fee_id: Uuid,
    pub student_id: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn pending(fee: &Fee, reference: String, amount: Decimal, checkout_url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference,
            fee_id: fee.id,
            student_id: fee.student_id.clone(),
            amount,
            status: TransactionStatus::Pending,
            checkout_url,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move a pending transaction to its terminal state. Returns false, and
    /// leaves the record untouched, when it is already terminal.
    pub fn finish(
        &mut self,
        outcome: SettlementOutcome,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = match outcome {
            SettlementOutcome::Success => TransactionStatus::Success,
            SettlementOutcome::Failed => TransactionStatus::Failed,
        };
        self.gateway_response = Some(payload);
        self.updated_at = now;
        true
    }
}
