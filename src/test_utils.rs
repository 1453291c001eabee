// Shared fixtures: a scripted gateway and webhook body builders

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::gateway::errors::GatewayApiError;
use crate::gateway::types::ChargeStatus;
use crate::gateway::{ChargeRequest, ChargeVerification, Checkout, GatewayClient};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_fee_ledger";

/// In-process gateway. Records initialize calls and answers verify from a
/// per-reference script (unscripted references report `ongoing`).
#[derive(Default)]
pub struct MockGateway {
    initialized: Mutex<Vec<ChargeRequest>>,
    verify_script: Mutex<HashMap<String, (ChargeStatus, Option<i64>)>>,
    verify_calls: AtomicUsize,
    fail_initialize: AtomicBool,
    fail_verify: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn fail_verify(&self, fail: bool) {
        self.fail_verify.store(fail, Ordering::SeqCst);
    }

    pub fn set_verify_status(&self, reference: &str, status: ChargeStatus, amount_minor: Option<i64>) {
        self.verify_script
            .lock()
            .unwrap()
            .insert(reference.to_string(), (status, amount_minor));
    }

    pub fn initialized(&self) -> Vec<ChargeRequest> {
        self.initialized.lock().unwrap().clone()
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn initialize_charge(&self, request: &ChargeRequest) -> Result<Checkout, GatewayApiError> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(GatewayApiError::Http("connection refused".into()));
        }
        self.initialized.lock().unwrap().push(request.clone());
        Ok(Checkout {
            checkout_url: format!("https://checkout.test/{}", request.reference),
        })
    }

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayApiError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(GatewayApiError::Rejected {
                status: 503,
                message: Some("maintenance".into()),
            });
        }
        let (status, amount_minor) = self
            .verify_script
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or((ChargeStatus::InProgress("ongoing".into()), None));
        Ok(ChargeVerification {
            raw: json!({"reference": reference, "status": format!("{status:?}").to_lowercase()}),
            status,
            amount_minor,
        })
    }
}

/// Webhook body as the gateway would deliver it
pub fn charge_event(event: &str, reference: &str, amount_minor: Option<i64>) -> Vec<u8> {
    let status = if event == "charge.success" { "success" } else { "failed" };
    let mut data = json!({
        "reference": reference,
        "status": status,
        "currency": "NGN",
        "customer": {"email": "parent@example.com"},
    });
    if let Some(amount) = amount_minor {
        data["amount"] = json!(amount);
    }
    serde_json::to_vec(&json!({"event": event, "data": data})).unwrap()
}
