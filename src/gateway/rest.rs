// Gateway REST client
// Implements hosted-checkout initialization and charge verification with
// bearer auth, JSON bodies and jittered retry on transient failures.

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::gateway::errors::GatewayApiError;
use crate::gateway::types::{ApiEnvelope, ChargeData, ChargeStatus, InitializeChargeBody, InitializeChargeData};
use crate::gateway::{ChargeRequest, ChargeVerification, Checkout, GatewayClient};
use crate::payments_histogram_observe_ms;
use crate::settings::GatewaySettings;

#[derive(Clone)]
pub struct GatewayRestClient {
    http: Client,
    secret_key: String,
    base_url: String,
    currency: String,
    callback_url: Option<String>,
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl GatewayRestClient {
    pub fn new(cfg: &GatewaySettings) -> Result<Self, GatewayApiError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| GatewayApiError::Http(e.to_string()))?;

        Ok(Self {
            http,
            secret_key: cfg.secret_key.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            currency: cfg.currency.to_ascii_uppercase(),
            callback_url: if cfg.callback_url.is_empty() { None } else { Some(cfg.callback_url.clone()) },
            max_retries: cfg.max_retries,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        })
    }

    async fn read_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, GatewayApiError> {
        let status = resp.status();
        let text = resp.text().await.map_err(|e| GatewayApiError::Decode(e.to_string()))?;
        if !status.is_success() {
            return Err(GatewayApiError::from_response(status.as_u16(), &text));
        }
        let env: ApiEnvelope<T> =
            serde_json::from_str(&text).map_err(|e| GatewayApiError::Decode(e.to_string()))?;
        match (env.status, env.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(GatewayApiError::Rejected {
                status: StatusCode::OK.as_u16(),
                message: env.message,
            }),
        }
    }

    async fn with_retries<F, Fut, T>(&self, desc: &str, max_retries: u32, mut op: F) -> Result<T, GatewayApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayApiError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => {
                    payments_histogram_observe_ms!(
                        "gateway.request.latency_ms",
                        started.elapsed().as_millis() as u64,
                        "op" => desc,
                        "attempts" => attempt + 1
                    );
                    return Ok(v);
                }
                Err(e) => {
                    if !e.is_transient() || attempt >= max_retries {
                        return Err(e);
                    }

                    // Exponential backoff with full jitter
                    let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
                    let cap = exp.min(self.max_delay_ms.max(self.base_delay_ms));
                    let mut rng = SmallRng::from_entropy();
                    let delay_ms = if cap > self.base_delay_ms {
                        rng.gen_range(self.base_delay_ms..=cap)
                    } else {
                        self.base_delay_ms
                    };

                    warn!(
                        target: "gateway",
                        desc = %desc,
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        error = %e,
                        next_delay_ms = delay_ms,
                        "retrying transient gateway error"
                    );

                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl GatewayClient for GatewayRestClient {
    fn name(&self) -> &'static str {
        "rest"
    }

    // POST /transaction/initialize
    // The reference doubles as the gateway's idempotency key, so retrying
    // the same body cannot open a second charge.
    #[instrument(skip(self, request), fields(method = "POST", path = "/transaction/initialize", reference = %request.reference))]
    async fn initialize_charge(&self, request: &ChargeRequest) -> Result<Checkout, GatewayApiError> {
        if request.amount_minor <= 0 {
            return Err(GatewayApiError::Precondition("amount must be positive minor units"));
        }

        let body = InitializeChargeBody {
            email: &request.email,
            amount: request.amount_minor,
            currency: &self.currency,
            reference: &request.reference,
            callback_url: self.callback_url.as_deref(),
            metadata: request.metadata.clone(),
        };

        info!(
            target: "gateway",
            method = "POST",
            path = "/transaction/initialize",
            amount_minor = request.amount_minor,
            currency = %self.currency,
            reference = %request.reference,
            "gateway request"
        );

        let url = format!("{}/transaction/initialize", self.base_url);
        let data: InitializeChargeData = self
            .with_retries("initialize_charge", self.max_retries, || {
                let req = self.http.post(&url).bearer_auth(&self.secret_key).json(&body);
                async move {
                    let resp = req.send().await.map_err(|e| GatewayApiError::Http(e.to_string()))?;
                    Self::read_envelope(resp).await
                }
            })
            .await?;

        if data.reference != request.reference {
            warn!(
                target: "gateway",
                sent = %request.reference,
                returned = %data.reference,
                "gateway echoed a different reference"
            );
        }

        Ok(Checkout {
            checkout_url: data.authorization_url,
        })
    }

    // GET /transaction/verify/{reference}
    #[instrument(skip(self), fields(method = "GET", path = "/transaction/verify/{reference}"))]
    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayApiError> {
        info!(
            target: "gateway",
            method = "GET",
            path = "/transaction/verify/{reference}",
            reference = %reference,
            "gateway request"
        );

        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        // Keep verify lightweight: single retry only
        let raw: Value = self
            .with_retries("verify_charge", 1, || {
                let req = self.http.get(&url).bearer_auth(&self.secret_key);
                async move {
                    let resp = req.send().await.map_err(|e| GatewayApiError::Http(e.to_string()))?;
                    Self::read_envelope(resp).await
                }
            })
            .await?;

        let data: ChargeData =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayApiError::Decode(e.to_string()))?;

        if let Some(returned) = data.reference.as_deref().filter(|r| *r != reference) {
            warn!(
                target: "gateway",
                sent = %reference,
                returned = %returned,
                "gateway verified a different reference"
            );
        }

        Ok(ChargeVerification {
            status: ChargeStatus::from(data.status.as_deref().unwrap_or("")),
            amount_minor: data.amount,
            raw,
        })
    }
}
