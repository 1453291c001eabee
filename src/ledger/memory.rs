// In-memory ledger store used for development and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::ledger::late_fee::LateFeeCalculator;
use crate::ledger::model::{Fee, SettlementOutcome, Transaction};
use crate::ledger::{apply_settlement, LedgerError, LedgerStore, Settlement};

#[derive(Default)]
struct Tables {
    fees: HashMap<Uuid, Fee>,
    transactions: HashMap<String, Transaction>,
}

/// Ledger held behind a single lock; every write takes it exclusively, which
/// makes each compound update atomic.
pub struct MemoryLedger {
    tables: Arc<RwLock<Tables>>,
    calculator: LateFeeCalculator,
}

impl MemoryLedger {
    pub fn new(calculator: LateFeeCalculator) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            calculator,
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(LateFeeCalculator::default())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    fn calculator(&self) -> LateFeeCalculator {
        self.calculator
    }

    async fn insert_fees(&self, fees: Vec<Fee>) -> Result<Vec<Fee>, LedgerError> {
        let mut tables = self.tables.write().await;
        for fee in &fees {
            tables.fees.insert(fee.id, fee.clone());
        }
        debug!(count = fees.len(), "Inserted fees");
        Ok(fees)
    }

    async fn get_fee(&self, id: Uuid) -> Result<Option<Fee>, LedgerError> {
        let tables = self.tables.read().await;
        Ok(tables.fees.get(&id).cloned())
    }

    async fn refresh_fee(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Fee>, LedgerError> {
        let mut tables = self.tables.write().await;
        let Some(fee) = tables.fees.get_mut(&id) else {
            return Ok(None);
        };
        fee.refresh_late_fee(&self.calculator, now)?;
        Ok(Some(fee.clone()))
    }

    async fn fees_for_student(&self, student_id: &str) -> Result<Vec<Fee>, LedgerError> {
        let tables = self.tables.read().await;
        let mut fees: Vec<Fee> = tables
            .fees
            .values()
            .filter(|f| f.student_id == student_id)
            .cloned()
            .collect();
        fees.sort_by_key(|f| f.created_at);
        Ok(fees)
    }

    async fn get_transaction(&self, reference: &str) -> Result<Option<Transaction>, LedgerError> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.get(reference).cloned())
    }

    async fn transactions_for_fee(&self, fee_id: Uuid) -> Result<Vec<Transaction>, LedgerError> {
        let tables = self.tables.read().await;
        let fee = tables.fees.get(&fee_id).ok_or(LedgerError::FeeNotFound(fee_id))?;
        Ok(fee
            .transactions
            .iter()
            .filter_map(|r| tables.transactions.get(r).cloned())
            .collect())
    }

    async fn create_transaction(&self, transaction: Transaction) -> Result<Transaction, LedgerError> {
        let mut tables = self.tables.write().await;
        if tables.transactions.contains_key(&transaction.reference) {
            return Err(LedgerError::DuplicateReference(transaction.reference));
        }
        let fee = tables
            .fees
            .get_mut(&transaction.fee_id)
            .ok_or(LedgerError::FeeNotFound(transaction.fee_id))?;
        fee.transactions.push(transaction.reference.clone());
        tables
            .transactions
            .insert(transaction.reference.clone(), transaction.clone());
        Ok(transaction)
    }

    async fn settle_transaction(
        &self,
        reference: &str,
        outcome: SettlementOutcome,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Settlement, LedgerError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        let Some(transaction) = tables.transactions.get_mut(reference) else {
            return Ok(Settlement::UnknownReference);
        };
        let fee = tables
            .fees
            .get_mut(&transaction.fee_id)
            .ok_or(LedgerError::FeeNotFound(transaction.fee_id))?;

        apply_settlement(transaction, fee, outcome, payload, &self.calculator, now)
    }
}
