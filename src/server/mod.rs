// HTTP surface: billing reads/writes, payment initiation, gateway webhooks

mod handlers;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::billing::BillingService;
use crate::gateway::rest::GatewayRestClient;
use crate::gateway::GatewayClient;
use crate::ledger::database::LedgerDatabase;
use crate::ledger::late_fee::LateFeeCalculator;
use crate::ledger::memory::MemoryLedger;
use crate::ledger::LedgerStore;
use crate::payments::events::SettlementEvents;
use crate::payments::signature::SignatureVerifier;
use crate::payments::{PaymentInitiator, Reconciler};
use crate::settings::{Config, Environment};

/// Access rule for the development-only simulate endpoint
#[derive(Clone, Debug, Default)]
pub struct SimulateGate {
    secret: Option<String>,
}

impl SimulateGate {
    pub fn new(environment: Environment, secret: &str) -> Self {
        let secret = (environment == Environment::Development && !secret.is_empty())
            .then(|| secret.to_string());
        Self { secret }
    }

    pub fn enabled(&self) -> bool {
        self.secret.is_some()
    }

    fn allows(&self, provided: Option<&str>) -> bool {
        match (&self.secret, provided) {
            (Some(expected), Some(got)) => constant_time_eq(expected.as_bytes(), got.as_bytes()),
            _ => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    pub initiator: Arc<PaymentInitiator>,
    pub reconciler: Arc<Reconciler>,
    pub events: Arc<SettlementEvents>,
    pub simulate: SimulateGate,
}

impl AppState {
    /// Wire stores and gateway from configuration
    pub fn try_new(cfg: &Config) -> Result<Self> {
        let calculator = LateFeeCalculator::new(cfg.ledger.late_fee_weekly_rate);
        let ledger: Arc<dyn LedgerStore> = if cfg.ledger.db_path.is_empty() {
            info!("LEDGER_DB_PATH not set; using in-memory ledger");
            Arc::new(MemoryLedger::new(calculator))
        } else {
            info!(path = %cfg.ledger.db_path, "Opening ledger database");
            Arc::new(
                LedgerDatabase::new(&cfg.ledger.db_path, calculator)
                    .with_context(|| format!("opening ledger database at {}", cfg.ledger.db_path))?,
            )
        };
        let gateway: Arc<dyn GatewayClient> = Arc::new(
            GatewayRestClient::new(&cfg.gateway).context("building gateway client")?,
        );
        Ok(Self::from_parts(
            ledger,
            gateway,
            SignatureVerifier::new(cfg.gateway.effective_webhook_secret()),
            SimulateGate::new(cfg.environment, &cfg.simulate_secret),
        ))
    }

    pub fn from_parts(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn GatewayClient>,
        verifier: SignatureVerifier,
        simulate: SimulateGate,
    ) -> Self {
        let events = Arc::new(SettlementEvents::new());
        Self {
            billing: Arc::new(BillingService::new(ledger.clone())),
            initiator: Arc::new(PaymentInitiator::new(ledger.clone(), gateway.clone())),
            reconciler: Arc::new(Reconciler::new(ledger, gateway, verifier, events.clone())),
            events,
            simulate,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/fees", post(handlers::create_fee))
        .route("/fees/bulk", post(handlers::bill_cohort))
        .route("/fees/:id", get(handlers::get_fee))
        .route("/fees/:id/transactions", get(handlers::fee_transactions))
        .route("/students/:student_id/fees", get(handlers::student_fees))
        .route("/payments/initiate", post(handlers::initiate_payment))
        .route("/payments/webhook", post(handlers::gateway_webhook))
        .route("/payments/simulate-webhook", post(handlers::simulate_webhook))
        .route("/payments/verify/:reference", get(handlers::verify_payment))
        .route("/payments/:reference", get(handlers::get_transaction))
        .with_state(state)
}

pub async fn run_server(port: u16, state: AppState) -> Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting fee ledger HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_gate_requires_development_and_secret() {
        assert!(!SimulateGate::new(Environment::Production, "s3cret").enabled());
        assert!(!SimulateGate::new(Environment::Development, "").enabled());

        let gate = SimulateGate::new(Environment::Development, "s3cret");
        assert!(gate.enabled());
        assert!(gate.allows(Some("s3cret")));
        assert!(!gate.allows(Some("s3cret ")));
        assert!(!gate.allows(None));
    }

    #[test]
    fn in_memory_state_from_default_config() {
        let mut cfg = Config::default();
        cfg.gateway.secret_key = "sk_test_x".into();
        let state = AppState::try_new(&cfg).unwrap();
        assert!(!state.simulate.enabled());
    }
}
