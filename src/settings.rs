use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::ledger::late_fee::DEFAULT_WEEKLY_RATE;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GatewaySettings {
    pub secret_key: String,
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub callback_url: String,
    /// HMAC key for webhook signatures; the secret key when empty
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            base_url: default_gateway_base_url(),
            callback_url: String::new(),
            webhook_secret: String::new(),
            currency: default_currency(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl GatewaySettings {
    pub fn effective_webhook_secret(&self) -> &str {
        if self.webhook_secret.is_empty() {
            &self.secret_key
        } else {
            &self.webhook_secret
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LedgerSettings {
    /// redb file; the in-memory store is used when empty
    #[serde(default)]
    pub db_path: String,
    #[serde(default = "default_weekly_rate")]
    pub late_fee_weekly_rate: Decimal,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            db_path: String::new(),
            late_fee_weekly_rate: default_weekly_rate(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    pub server_port: u16,
    #[serde(default)]
    pub environment: Environment,
    /// Shared secret for the development-only simulate-webhook endpoint
    #[serde(default)]
    pub simulate_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            ledger: LedgerSettings::default(),
            server_port: 8080,
            environment: Environment::default(),
            simulate_secret: String::new(),
        }
    }
}

impl Config {
    /// Load from config.toml (if present) and environment variables.
    /// Environment variables override file values.
    /// Supported env keys: GATEWAY_SECRET_KEY, GATEWAY_BASE_URL, GATEWAY_CALLBACK_URL,
    /// GATEWAY_WEBHOOK_SECRET, GATEWAY_CURRENCY, GATEWAY_REQUEST_TIMEOUT,
    /// GATEWAY_MAX_RETRIES, LEDGER_DB_PATH, LATE_FEE_WEEKLY_RATE, SERVER_PORT,
    /// APP_ENV, SIMULATE_WEBHOOK_SECRET
    pub fn load() -> Self {
        let mut cfg = Self::from_file("config.toml");
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    fn from_file(path: &str) -> Self {
        // Defaults + file only if it exists
        let base: Config = Default::default();
        let mut fig = Figment::from(Serialized::defaults(base));
        if std::path::Path::new(path).exists() {
            fig = fig.merge(Toml::file(path));
        }
        match fig.extract() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "ignoring unreadable config file");
                Config::default()
            }
        }
    }

    /// Overlay values from an environment lookup
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("GATEWAY_SECRET_KEY") {
            self.gateway.secret_key = v;
        }
        if let Some(v) = var("GATEWAY_BASE_URL") {
            self.gateway.base_url = v;
        }
        if let Some(v) = var("GATEWAY_CALLBACK_URL") {
            self.gateway.callback_url = v;
        }
        if let Some(v) = var("GATEWAY_WEBHOOK_SECRET") {
            self.gateway.webhook_secret = v;
        }
        if let Some(v) = var("GATEWAY_CURRENCY") {
            self.gateway.currency = v;
        }
        if let Some(v) = var("GATEWAY_REQUEST_TIMEOUT") {
            self.gateway.request_timeout = parse_duration_env(&v, self.gateway.request_timeout);
        }
        if let Some(v) = var("GATEWAY_MAX_RETRIES") {
            self.gateway.max_retries = v.parse().unwrap_or(self.gateway.max_retries);
        }
        if let Some(v) = var("LEDGER_DB_PATH") {
            self.ledger.db_path = v;
        }
        if let Some(v) = var("LATE_FEE_WEEKLY_RATE") {
            self.ledger.late_fee_weekly_rate = v.parse().unwrap_or(self.ledger.late_fee_weekly_rate);
        }
        if let Some(v) = var("SERVER_PORT") {
            self.server_port = v.parse().unwrap_or(self.server_port);
        }
        if let Some(v) = var("APP_ENV") {
            self.environment = v.parse().unwrap_or(self.environment);
        }
        if let Some(v) = var("SIMULATE_WEBHOOK_SECRET") {
            self.simulate_secret = v;
        }
    }
}

fn parse_duration_env(value: &str, current: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(current)
}

fn default_gateway_base_url() -> String {
    "https://api.paystack.co".to_string()
}

fn default_currency() -> String {
    "NGN".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_retries() -> u32 {
    2
}

fn default_weekly_rate() -> Decimal {
    DEFAULT_WEEKLY_RATE
}
