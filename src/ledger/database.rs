//! Persistent ledger store backed by redb
//!
//! Fees and transactions are stored as JSON documents keyed by fee id and by
//! transaction reference. redb admits a single write transaction at a time,
//! so every compound update below is atomic and isolated.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::ledger::late_fee::LateFeeCalculator;
use crate::ledger::model::{Fee, SettlementOutcome, Transaction};
use crate::ledger::{apply_settlement, LedgerError, LedgerStore, Settlement};

/// Key: fee id (hyphenated uuid). Value: serialized `Fee`
const FEES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("fees");
/// Key: transaction reference. Value: serialized `Transaction`
const TRANSACTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for LedgerError {
                fn from(e: $ty) -> Self {
                    LedgerError::Storage(e.to_string())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    serde_json::Error,
);

#[derive(Clone)]
pub struct LedgerDatabase {
    db: Arc<Database>,
    calculator: LateFeeCalculator,
}

impl LedgerDatabase {
    /// Create a new database instance or open an existing one
    pub fn new<P: AsRef<Path>>(path: P, calculator: LateFeeCalculator) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _fees = write_txn.open_table(FEES_TABLE)?;
            let _transactions = write_txn.open_table(TRANSACTIONS_TABLE)?;
        }
        write_txn.commit()?;

        tracing::info!("Ledger database initialized with fees and transactions tables");

        Ok(Self {
            db: Arc::new(db),
            calculator,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, LedgerError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[async_trait]
impl LedgerStore for LedgerDatabase {
    fn calculator(&self) -> LateFeeCalculator {
        self.calculator
    }

    async fn insert_fees(&self, fees: Vec<Fee>) -> Result<Vec<Fee>, LedgerError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FEES_TABLE)?;
            for fee in &fees {
                let value = serde_json::to_vec(fee)?;
                table.insert(fee.id.to_string().as_str(), value.as_slice())?;
            }
        }
        write_txn.commit()?;
        tracing::debug!(count = fees.len(), "Inserted fees");
        Ok(fees)
    }

    async fn get_fee(&self, id: Uuid) -> Result<Option<Fee>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FEES_TABLE)?;
        let result = table.get(id.to_string().as_str())?;
        result.map(|v| decode(v.value())).transpose()
    }

    async fn refresh_fee(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Fee>, LedgerError> {
        let key = id.to_string();
        let write_txn = self.db.begin_write()?;
        let fee = {
            let mut table = write_txn.open_table(FEES_TABLE)?;
            let current = table.get(key.as_str())?.map(|v| v.value().to_vec());
            let Some(bytes) = current else {
                return Ok(None);
            };
            let mut fee: Fee = decode(&bytes)?;
            if fee.refresh_late_fee(&self.calculator, now)? {
                let value = serde_json::to_vec(&fee)?;
                table.insert(key.as_str(), value.as_slice())?;
            }
            fee
        };
        write_txn.commit()?;
        Ok(Some(fee))
    }

    async fn fees_for_student(&self, student_id: &str) -> Result<Vec<Fee>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FEES_TABLE)?;
        let mut fees = Vec::new();
        for entry in table.iter()? {
            let (_key, value) = entry?;
            let fee: Fee = decode(value.value())?;
            if fee.student_id == student_id {
                fees.push(fee);
            }
        }
        fees.sort_by_key(|f| f.created_at);
        Ok(fees)
    }

    async fn get_transaction(&self, reference: &str) -> Result<Option<Transaction>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS_TABLE)?;
        let result = table.get(reference)?;
        result.map(|v| decode(v.value())).transpose()
    }

    async fn transactions_for_fee(&self, fee_id: Uuid) -> Result<Vec<Transaction>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let fees = read_txn.open_table(FEES_TABLE)?;
        let fee: Fee = match fees.get(fee_id.to_string().as_str())? {
            Some(v) => decode(v.value())?,
            None => return Err(LedgerError::FeeNotFound(fee_id)),
        };

        let table = read_txn.open_table(TRANSACTIONS_TABLE)?;
        let mut transactions = Vec::with_capacity(fee.transactions.len());
        for reference in &fee.transactions {
            if let Some(v) = table.get(reference.as_str())? {
                transactions.push(decode(v.value())?);
            }
        }
        Ok(transactions)
    }

    async fn create_transaction(&self, transaction: Transaction) -> Result<Transaction, LedgerError> {
        let fee_key = transaction.fee_id.to_string();
        let write_txn = self.db.begin_write()?;
        {
            let mut transactions = write_txn.open_table(TRANSACTIONS_TABLE)?;
            if transactions.get(transaction.reference.as_str())?.is_some() {
                return Err(LedgerError::DuplicateReference(transaction.reference));
            }

            let mut fees = write_txn.open_table(FEES_TABLE)?;
            let current = fees.get(fee_key.as_str())?.map(|v| v.value().to_vec());
            let Some(bytes) = current else {
                return Err(LedgerError::FeeNotFound(transaction.fee_id));
            };
            let mut fee: Fee = decode(&bytes)?;
            fee.transactions.push(transaction.reference.clone());

            let fee_value = serde_json::to_vec(&fee)?;
            fees.insert(fee_key.as_str(), fee_value.as_slice())?;
            let tx_value = serde_json::to_vec(&transaction)?;
            transactions.insert(transaction.reference.as_str(), tx_value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(transaction)
    }

    async fn settle_transaction(
        &self,
        reference: &str,
        outcome: SettlementOutcome,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Settlement, LedgerError> {
        let write_txn = self.db.begin_write()?;
        let settlement = {
            let mut transactions = write_txn.open_table(TRANSACTIONS_TABLE)?;
            let current = transactions.get(reference)?.map(|v| v.value().to_vec());
            let Some(tx_bytes) = current else {
                return Ok(Settlement::UnknownReference);
            };
            let mut transaction: Transaction = decode(&tx_bytes)?;
            if transaction.status.is_terminal() {
                return Ok(Settlement::Duplicate { transaction });
            }

            let fee_key = transaction.fee_id.to_string();
            let mut fees = write_txn.open_table(FEES_TABLE)?;
            let current = fees.get(fee_key.as_str())?.map(|v| v.value().to_vec());
            let Some(fee_bytes) = current else {
                return Err(LedgerError::FeeNotFound(transaction.fee_id));
            };
            let mut fee: Fee = decode(&fee_bytes)?;

            let settlement = apply_settlement(
                &mut transaction,
                &mut fee,
                outcome,
                payload,
                &self.calculator,
                now,
            )?;

            let tx_value = serde_json::to_vec(&transaction)?;
            transactions.insert(reference, tx_value.as_slice())?;
            if matches!(settlement, Settlement::Applied { .. }) {
                let fee_value = serde_json::to_vec(&fee)?;
                fees.insert(fee_key.as_str(), fee_value.as_slice())?;
            }
            settlement
        };
        write_txn.commit()?;
        Ok(settlement)
    }
}
