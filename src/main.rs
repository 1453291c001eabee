mod billing;
mod gateway;
mod ledger;
mod payments;
mod server;
mod settings;
#[cfg(test)]
mod test_utils;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::payments::events::run_receipt_notifier;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration from config.toml and environment
    let cfg = settings::Config::load();

    if cfg.gateway.secret_key.is_empty() {
        tracing::error!("GATEWAY_SECRET_KEY not set; exiting");
        return Ok(());
    }
    if cfg.gateway.webhook_secret.is_empty() {
        tracing::warn!("GATEWAY_WEBHOOK_SECRET not set; verifying webhooks with the gateway secret key");
    }
    tracing::info!(
        environment = ?cfg.environment,
        gateway = %cfg.gateway.base_url,
        late_fee_weekly_rate = %cfg.ledger.late_fee_weekly_rate,
        "Starting fee ledger"
    );

    let state = AppState::try_new(&cfg)?;
    if state.simulate.enabled() {
        tracing::warn!("Simulated webhook endpoint is enabled");
    }

    // Receipts run off the settlement path; a failure here never affects the ledger
    let receipts = state.events.subscribe();
    tokio::spawn(run_receipt_notifier(receipts));

    server::run_server(cfg.server_port, state).await
}
