// Billing: fee creation (single and per cohort) and the refreshed read side

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::gateway::fits_minor_units;
use crate::ledger::model::{Fee, Transaction};
use crate::ledger::LedgerStore;
use crate::payments::PaymentError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewFee {
    pub student_id: String,
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohortBilling {
    pub class_id: String,
    pub student_ids: Vec<String>,
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

/// Largest principal a single fee may carry
pub const MAX_FEE_AMOUNT: Decimal = dec!(1000000000000);

pub struct BillingService {
    ledger: Arc<dyn LedgerStore>,
}

fn validate(description: &str, amount: Decimal) -> Result<(), PaymentError> {
    if description.trim().is_empty() {
        return Err(PaymentError::BadRequest("description is required".into()));
    }
    if amount < Decimal::ZERO {
        return Err(PaymentError::BadRequest(format!("fee amount {amount} is negative")));
    }
    if amount > MAX_FEE_AMOUNT {
        return Err(PaymentError::BadRequest(format!(
            "fee amount {amount} exceeds the maximum of {MAX_FEE_AMOUNT}"
        )));
    }
    // A fee finer than the minor unit could never be settled in full
    if !fits_minor_units(amount) {
        return Err(PaymentError::BadRequest(format!(
            "fee amount {amount} has more than two decimal places"
        )));
    }
    Ok(())
}

impl BillingService {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn create_fee(&self, req: NewFee) -> Result<Fee, PaymentError> {
        validate(&req.description, req.amount)?;
        if req.student_id.trim().is_empty() {
            return Err(PaymentError::BadRequest("student_id is required".into()));
        }
        let fee = Fee::new(
            req.student_id.trim(),
            req.description.trim(),
            req.amount,
            req.due_date,
            req.class_id,
        );
        let fee = self.ledger.insert_fees(vec![fee]).await?.remove(0);
        info!(fee_id = %fee.id, student_id = %fee.student_id, amount = %fee.amount, "Fee created");
        Ok(fee)
    }

    /// One fee per distinct student, all written together
    pub async fn bill_cohort(&self, req: CohortBilling) -> Result<Vec<Fee>, PaymentError> {
        validate(&req.description, req.amount)?;

        let mut seen = HashSet::new();
        let fees: Vec<Fee> = req
            .student_ids
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && seen.insert(s.to_string()))
            .map(|student| {
                Fee::new(
                    student,
                    req.description.trim(),
                    req.amount,
                    req.due_date,
                    Some(req.class_id.clone()),
                )
            })
            .collect();
        if fees.is_empty() {
            return Err(PaymentError::BadRequest("no students to bill".into()));
        }

        let fees = self.ledger.insert_fees(fees).await?;
        info!(class_id = %req.class_id, count = fees.len(), "Cohort billed");
        Ok(fees)
    }

    /// Current view of a fee with its late fee brought up to date
    pub async fn get_fee(&self, id: Uuid) -> Result<Fee, PaymentError> {
        self.ledger
            .refresh_fee(id, Utc::now())
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("fee {id}")))
    }

    pub async fn fees_for_student(&self, student_id: &str) -> Result<Vec<Fee>, PaymentError> {
        let now = Utc::now();
        let mut fees = Vec::new();
        for fee in self.ledger.fees_for_student(student_id).await? {
            if let Some(fresh) = self.ledger.refresh_fee(fee.id, now).await? {
                fees.push(fresh);
            }
        }
        fees.sort_by_key(|f| f.created_at);
        Ok(fees)
    }

    pub async fn fee_transactions(&self, id: Uuid) -> Result<Vec<Transaction>, PaymentError> {
        Ok(self.ledger.transactions_for_fee(id).await?)
    }

    pub async fn transaction(&self, reference: &str) -> Result<Transaction, PaymentError> {
        self.ledger
            .get_transaction(reference)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {reference}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::model::FeeStatus;
    use crate::ledger::LedgerError;
    use chrono::Duration;

    fn service() -> BillingService {
        BillingService::new(Arc::new(MemoryLedger::default()))
    }

    fn new_fee(student: &str, amount: Decimal, due_date: Option<DateTime<Utc>>) -> NewFee {
        NewFee {
            student_id: student.into(),
            description: "Term 1 tuition".into(),
            amount,
            due_date,
            class_id: None,
        }
    }

    #[tokio::test]
    async fn creates_unpaid_fee() {
        let svc = service();
        let fee = svc.create_fee(new_fee("stu-1", dec!(1000), None)).await.unwrap();
        assert_eq!(fee.status, FeeStatus::Unpaid);
        assert_eq!(fee.balance, dec!(1000));
        assert_eq!(svc.get_fee(fee.id).await.unwrap().id, fee.id);
    }

    #[tokio::test]
    async fn zero_amount_fee_is_paid_on_creation() {
        let fee = service().create_fee(new_fee("stu-1", dec!(0), None)).await.unwrap();
        assert_eq!(fee.status, FeeStatus::Paid);
    }

    #[tokio::test]
    async fn rejects_negative_amount_and_blank_fields() {
        let svc = service();
        let err = svc.create_fee(new_fee("stu-1", dec!(-1), None)).await.unwrap_err();
        assert!(matches!(err, PaymentError::BadRequest(_)));
        let err = svc.create_fee(new_fee(" ", dec!(10), None)).await.unwrap_err();
        assert!(matches!(err, PaymentError::BadRequest(_)));
    }

    #[tokio::test]
    async fn rejects_amounts_finer_than_minor_unit() {
        let svc = service();
        let err = svc.create_fee(new_fee("stu-1", dec!(100.005), None)).await.unwrap_err();
        assert!(matches!(err, PaymentError::BadRequest(_)));

        let fee = svc.create_fee(new_fee("stu-1", dec!(100.500), None)).await.unwrap();
        assert_eq!(fee.amount, dec!(100.5));
    }

    #[tokio::test]
    async fn rejects_amounts_above_maximum() {
        let svc = service();
        let err = svc.create_fee(new_fee("stu-1", Decimal::MAX, None)).await.unwrap_err();
        assert!(matches!(err, PaymentError::BadRequest(_)));

        let err = svc
            .bill_cohort(CohortBilling {
                class_id: "jss1".into(),
                student_ids: vec!["a".into()],
                description: "Bus levy".into(),
                amount: MAX_FEE_AMOUNT + dec!(0.01),
                due_date: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::BadRequest(_)));

        let due = Some(Utc::now() - Duration::days(7000));
        let fee = svc.create_fee(new_fee("stu-1", MAX_FEE_AMOUNT, due)).await.unwrap();
        assert!(svc.get_fee(fee.id).await.unwrap().late_fee > Decimal::ZERO);
    }

    #[tokio::test]
    async fn overflowing_stored_fee_reads_as_error() {
        let ledger = Arc::new(MemoryLedger::default());
        let svc = BillingService::new(ledger.clone());
        let fee = Fee::new("stu-1", "Endowment", Decimal::MAX, Some(Utc::now() - Duration::days(7000)), None);
        let id = ledger.insert_fees(vec![fee]).await.unwrap()[0].id;

        let err = svc.get_fee(id).await.unwrap_err();
        assert!(matches!(err, PaymentError::Ledger(LedgerError::AmountOverflow(_))));
        assert!(svc.fees_for_student("stu-1").await.is_err());
    }

    #[tokio::test]
    async fn cohort_billing_dedupes_students() {
        let svc = service();
        let fees = svc
            .bill_cohort(CohortBilling {
                class_id: "jss1".into(),
                student_ids: vec!["a".into(), "b".into(), "a".into(), "".into()],
                description: "Bus levy".into(),
                amount: dec!(50),
                due_date: None,
            })
            .await
            .unwrap();
        assert_eq!(fees.len(), 2);
        assert!(fees.iter().all(|f| f.class_id.as_deref() == Some("jss1")));

        let err = svc
            .bill_cohort(CohortBilling {
                class_id: "jss1".into(),
                student_ids: vec![],
                description: "Bus levy".into(),
                amount: dec!(50),
                due_date: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::BadRequest(_)));
    }

    #[tokio::test]
    async fn reads_refresh_late_fee() {
        let svc = service();
        let due = Utc::now() - Duration::days(10);
        let fee = svc.create_fee(new_fee("stu-2", dec!(1000), Some(due))).await.unwrap();
        assert_eq!(fee.late_fee, dec!(0));

        let fresh = svc.get_fee(fee.id).await.unwrap();
        assert_eq!(fresh.late_fee, dec!(100));
        assert_eq!(fresh.balance, dec!(1100));

        let listed = svc.fees_for_student("stu-2").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].late_fee, dec!(100));
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let svc = service();
        assert!(matches!(svc.get_fee(Uuid::new_v4()).await, Err(PaymentError::NotFound(_))));
        assert!(matches!(svc.transaction("nope").await, Err(PaymentError::NotFound(_))));
        assert!(matches!(
            svc.fee_transactions(Uuid::new_v4()).await,
            Err(PaymentError::NotFound(_))
        ));
    }
}
