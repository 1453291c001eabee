// Settlement broadcast for best-effort downstream side effects (receipts)

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::model::{Fee, FeeStatus, Transaction, TransactionStatus};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Published after a transaction reaches a terminal state
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementNotice {
    pub reference: String,
    pub fee_id: Uuid,
    pub student_id: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
    /// Fee state after settlement; absent for failed charges
    pub fee_balance: Option<Decimal>,
    pub fee_status: Option<FeeStatus>,
}

impl SettlementNotice {
    pub fn settled(transaction: &Transaction, fee: &Fee) -> Self {
        Self {
            reference: transaction.reference.clone(),
            fee_id: fee.id,
            student_id: transaction.student_id.clone(),
            amount: transaction.amount,
            status: transaction.status,
            fee_balance: Some(fee.balance),
            fee_status: Some(fee.status),
        }
    }

    pub fn failed(transaction: &Transaction) -> Self {
        Self {
            reference: transaction.reference.clone(),
            fee_id: transaction.fee_id,
            student_id: transaction.student_id.clone(),
            amount: transaction.amount,
            status: transaction.status,
            fee_balance: None,
            fee_status: None,
        }
    }
}

/// Fan-out of settlement notices. Publishing never fails the caller: with no
/// subscribers the notice is dropped.
pub struct SettlementEvents {
    tx: broadcast::Sender<SettlementNotice>,
}

impl SettlementEvents {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettlementNotice> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notice: SettlementNotice) -> usize {
        let reference = notice.reference.clone();
        match self.tx.send(notice) {
            Ok(count) => {
                debug!(reference = %reference, receivers = count, "Published settlement notice");
                count
            }
            Err(_) => {
                debug!(reference = %reference, "No subscribers for settlement notice");
                0
            }
        }
    }
}

impl Default for SettlementEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume notices and emit payer receipts until the channel closes.
/// Stands in for outbound notification delivery, which lives elsewhere.
pub async fn run_receipt_notifier(mut rx: broadcast::Receiver<SettlementNotice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => match notice.status {
                TransactionStatus::Success => info!(
                    reference = %notice.reference,
                    student_id = %notice.student_id,
                    amount = %notice.amount,
                    balance = ?notice.fee_balance,
                    "Payment receipt issued"
                ),
                _ => info!(
                    reference = %notice.reference,
                    student_id = %notice.student_id,
                    "Payment failure notice issued"
                ),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Receipt notifier lagged; notices dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn notice(reference: &str) -> SettlementNotice {
        SettlementNotice {
            reference: reference.into(),
            fee_id: Uuid::new_v4(),
            student_id: "stu-1".into(),
            amount: dec!(100),
            status: TransactionStatus::Success,
            fee_balance: Some(dec!(0)),
            fee_status: Some(FeeStatus::Paid),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_notices() {
        let events = SettlementEvents::new();
        let mut rx = events.subscribe();
        assert_eq!(events.publish(notice("FEE-1")), 1);
        let got = rx.recv().await.unwrap();
        assert_eq!(got.reference, "FEE-1");
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_harmless() {
        let events = SettlementEvents::new();
        assert_eq!(events.publish(notice("FEE-2")), 0);
    }

    #[tokio::test]
    async fn notifier_stops_when_channel_closes() {
        let events = SettlementEvents::new();
        let rx = events.subscribe();
        events.publish(notice("FEE-3"));
        drop(events);
        tokio::time::timeout(std::time::Duration::from_secs(1), run_receipt_notifier(rx))
            .await
            .expect("notifier should exit once the sender is gone");
    }
}
