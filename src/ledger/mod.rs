// Fee ledger: records, late-fee rule and the store contract

pub mod database;
pub mod late_fee;
pub mod memory;
pub mod model;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use self::late_fee::LateFeeCalculator;
use self::model::{Fee, SettlementOutcome, Transaction};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("fee not found: {0}")]
    FeeNotFound(Uuid),
    #[error("duplicate transaction reference: {0}")]
    DuplicateReference(String),
    #[error("amount arithmetic overflowed for fee {0}")]
    AmountOverflow(Uuid),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of the compound settlement write
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Pending transaction succeeded and the fee was credited
    Applied { transaction: Transaction, fee: Fee },
    /// Pending transaction failed; the fee is untouched
    Failed { transaction: Transaction },
    /// Transaction was already terminal; nothing was written
    Duplicate { transaction: Transaction },
    /// No transaction carries this reference
    UnknownReference,
}

/// Storage for fees and their transactions.
///
/// `settle_transaction` is the only write path for settlement. Implementations
/// must run its check-and-transition as one atomic unit so that concurrent or
/// repeated calls for a reference credit the fee at most once.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn calculator(&self) -> LateFeeCalculator;

    async fn insert_fees(&self, fees: Vec<Fee>) -> Result<Vec<Fee>, LedgerError>;

    async fn get_fee(&self, id: Uuid) -> Result<Option<Fee>, LedgerError>;

    /// Refresh and persist the cached late fee, returning the current record
    async fn refresh_fee(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Fee>, LedgerError>;

    async fn fees_for_student(&self, student_id: &str) -> Result<Vec<Fee>, LedgerError>;

    async fn get_transaction(&self, reference: &str) -> Result<Option<Transaction>, LedgerError>;

    async fn transactions_for_fee(&self, fee_id: Uuid) -> Result<Vec<Transaction>, LedgerError>;

    /// Persist a new pending transaction and link it to its fee. Fails with
    /// `DuplicateReference` if the reference is already taken.
    async fn create_transaction(&self, transaction: Transaction) -> Result<Transaction, LedgerError>;

    async fn settle_transaction(
        &self,
        reference: &str,
        outcome: SettlementOutcome,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Settlement, LedgerError>;
}

/// Transition shared by every store; runs inside the store's atomic section.
/// `fee` is only touched on success. On error neither record is modified.
pub(crate) fn apply_settlement(
    transaction: &mut Transaction,
    fee: &mut Fee,
    outcome: SettlementOutcome,
    payload: serde_json::Value,
    calculator: &LateFeeCalculator,
    now: DateTime<Utc>,
) -> Result<Settlement, LedgerError> {
    if transaction.status.is_terminal() {
        return Ok(Settlement::Duplicate {
            transaction: transaction.clone(),
        });
    }
    if outcome == SettlementOutcome::Success {
        fee.apply_payment(transaction.amount, calculator, now)?;
    }
    transaction.finish(outcome, payload, now);
    Ok(match outcome {
        SettlementOutcome::Success => Settlement::Applied {
            transaction: transaction.clone(),
            fee: fee.clone(),
        },
        SettlementOutcome::Failed => Settlement::Failed {
            transaction: transaction.clone(),
        },
    })
}

/// Conformance checks run against every store implementation
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use crate::ledger::model::{FeeStatus, TransactionStatus};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    async fn seed(store: &dyn LedgerStore, amount: Decimal) -> Fee {
        let fee = Fee::new("stu-42", "Term 1 tuition", amount, None, Some("jss1".into()));
        store.insert_fees(vec![fee]).await.unwrap().remove(0)
    }

    async fn pending(store: &dyn LedgerStore, fee: &Fee, reference: &str, amount: Decimal) -> Transaction {
        store
            .create_transaction(Transaction::pending(fee, reference.into(), amount, None))
            .await
            .unwrap()
    }

    pub async fn settles_once(store: Arc<dyn LedgerStore>) {
        let fee = seed(store.as_ref(), dec!(1000)).await;
        pending(store.as_ref(), &fee, "ref-once", dec!(400)).await;

        let first = store
            .settle_transaction("ref-once", SettlementOutcome::Success, json!({"n": 1}), Utc::now())
            .await
            .unwrap();
        let Settlement::Applied { fee: settled, transaction } = first else {
            panic!("expected applied settlement, got {first:?}");
        };
        assert_eq!(transaction.status, TransactionStatus::Success);
        assert_eq!(settled.amount_paid, dec!(400));
        assert_eq!(settled.balance, dec!(600));
        assert_eq!(settled.status, FeeStatus::Partial);

        let replay = store
            .settle_transaction("ref-once", SettlementOutcome::Success, json!({"n": 2}), Utc::now())
            .await
            .unwrap();
        assert!(matches!(replay, Settlement::Duplicate { .. }));

        let stored = store.get_fee(fee.id).await.unwrap().unwrap();
        assert_eq!(stored.amount_paid, dec!(400));
        assert_eq!(stored.balance, dec!(600));
        let tx = store.get_transaction("ref-once").await.unwrap().unwrap();
        assert_eq!(tx.gateway_response, Some(json!({"n": 1})));
    }

    pub async fn concurrent_settlements_credit_once(store: Arc<dyn LedgerStore>) {
        let fee = seed(store.as_ref(), dec!(1000)).await;
        pending(store.as_ref(), &fee, "ref-race", dec!(250)).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .settle_transaction("ref-race", SettlementOutcome::Success, json!({"n": i}), Utc::now())
                    .await
                    .unwrap()
            }));
        }
        let mut applied = 0;
        for h in handles {
            if matches!(h.await.unwrap(), Settlement::Applied { .. }) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);

        let stored = store.get_fee(fee.id).await.unwrap().unwrap();
        assert_eq!(stored.amount_paid, dec!(250));
    }

    pub async fn failure_leaves_fee_untouched(store: Arc<dyn LedgerStore>) {
        let fee = seed(store.as_ref(), dec!(1000)).await;
        pending(store.as_ref(), &fee, "ref-fail", dec!(1000)).await;

        let res = store
            .settle_transaction("ref-fail", SettlementOutcome::Failed, json!({}), Utc::now())
            .await
            .unwrap();
        assert!(matches!(res, Settlement::Failed { .. }));

        // a late success for the same reference is absorbed
        let res = store
            .settle_transaction("ref-fail", SettlementOutcome::Success, json!({}), Utc::now())
            .await
            .unwrap();
        assert!(matches!(res, Settlement::Duplicate { .. }));

        let stored = store.get_fee(fee.id).await.unwrap().unwrap();
        assert_eq!(stored.amount_paid, Decimal::ZERO);
        assert_eq!(stored.status, FeeStatus::Unpaid);
    }

    pub async fn unknown_reference_is_reported(store: Arc<dyn LedgerStore>) {
        let res = store
            .settle_transaction("ref-nobody", SettlementOutcome::Success, json!({}), Utc::now())
            .await
            .unwrap();
        assert_eq!(res, Settlement::UnknownReference);
    }

    pub async fn references_are_unique(store: Arc<dyn LedgerStore>) {
        let fee = seed(store.as_ref(), dec!(1000)).await;
        pending(store.as_ref(), &fee, "ref-dup", dec!(10)).await;
        let err = store
            .create_transaction(Transaction::pending(&fee, "ref-dup".into(), dec!(20), None))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReference(r) if r == "ref-dup"));

        let linked = store.transactions_for_fee(fee.id).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].amount, dec!(10));
    }

    pub async fn transaction_requires_fee(store: Arc<dyn LedgerStore>) {
        let orphan = Fee::new("stu-0", "never stored", dec!(10), None, None);
        let err = store
            .create_transaction(Transaction::pending(&orphan, "ref-orphan".into(), dec!(10), None))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::FeeNotFound(id) if id == orphan.id));
        assert!(store.get_transaction("ref-orphan").await.unwrap().is_none());
    }

    pub async fn lists_fees_by_student(store: Arc<dyn LedgerStore>) {
        seed(store.as_ref(), dec!(100)).await;
        seed(store.as_ref(), dec!(200)).await;
        let other = Fee::new("stu-7", "Bus", dec!(50), None, None);
        store.insert_fees(vec![other]).await.unwrap();

        let fees = store.fees_for_student("stu-42").await.unwrap();
        assert_eq!(fees.len(), 2);
        assert!(fees.iter().all(|f| f.student_id == "stu-42"));
    }

    pub async fn refresh_persists_late_fee(store: Arc<dyn LedgerStore>) {
        let now = Utc::now();
        let fee = Fee::new("stu-9", "Term 2", dec!(1000), Some(now - chrono::Duration::days(8)), None);
        let fee = store.insert_fees(vec![fee]).await.unwrap().remove(0);

        let refreshed = store.refresh_fee(fee.id, now).await.unwrap().unwrap();
        assert_eq!(refreshed.late_fee, dec!(100));
        assert_eq!(refreshed.balance, dec!(1100));

        let stored = store.get_fee(fee.id).await.unwrap().unwrap();
        assert_eq!(stored.late_fee, dec!(100));
        assert!(store.refresh_fee(Uuid::new_v4(), now).await.unwrap().is_none());
    }

    pub async fn overflow_leaves_records_untouched(store: Arc<dyn LedgerStore>) {
        let now = Utc::now();
        let huge = Fee::new("stu-7", "Endowment", Decimal::MAX, Some(now - chrono::Duration::days(7000)), None);
        let huge = store.insert_fees(vec![huge]).await.unwrap().remove(0);
        let err = store.refresh_fee(huge.id, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::AmountOverflow(id) if id == huge.id));
        assert_eq!(store.get_fee(huge.id).await.unwrap().unwrap(), huge);

        let mut fee = Fee::new("stu-7", "Term 1", dec!(1000), None, None);
        fee.amount_paid = Decimal::MAX - dec!(5);
        fee.recompute();
        let fee = store.insert_fees(vec![fee]).await.unwrap().remove(0);
        pending(store.as_ref(), &fee, "ref-overflow", dec!(10)).await;

        let err = store
            .settle_transaction("ref-overflow", SettlementOutcome::Success, json!({}), now)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AmountOverflow(_)));
        assert_eq!(store.get_fee(fee.id).await.unwrap().unwrap(), fee);
        let tx = store.get_transaction("ref-overflow").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.gateway_response.is_none());
    }
}
