pub mod flutterwave;
pub mod intasend;
pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::PayoutDestination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Flutterwave,
    Intasend,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Flutterwave => "flutterwave",
            ProviderKind::Intasend => "intasend",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flutterwave" => Some(ProviderKind::Flutterwave),
            "intasend" => Some(ProviderKind::Intasend),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network failure, timeout, 429 or 5xx. Safe to retry.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// 4xx: the provider understood and refused. Retrying will not help.
    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unsupported by provider: {0}")]
    Unsupported(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    pub redirect_url: String,
    pub cancel_url: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkout {
    pub checkout_url: String,
    pub provider_invoice_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    Successful,
    Failed,
    Pending,
    Refunded,
}

/// Authoritative state as returned by a provider's status endpoint.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub status: ReportedStatus,
    pub amount: Option<i64>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutRequest {
    pub destination: PayoutDestination,
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    pub metadata: serde_json::Value,
}

/// Provider-agnostic view of an inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub event_type: String,
    pub reference: String,
    pub status: ReportedStatus,
    pub provider_payment_id: Option<String>,
    pub amount: Option<i64>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Checks the shared-secret proof on an inbound webhook.
    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> bool;

    fn parse_webhook(&self, body: &[u8]) -> anyhow::Result<WebhookEvent>;

    async fn create_checkout(&self, req: &CheckoutRequest) -> Result<Checkout, ProviderError>;

    async fn check_status(&self, provider_payment_id: &str) -> Result<ProviderStatus, ProviderError>;

    async fn refund(&self, provider_payment_id: &str, amount: i64, reason: &str) -> Result<(), ProviderError>;

    async fn create_payout(&self, req: &PayoutRequest) -> Result<String, ProviderError>;
}

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
    checkout: ProviderKind,
    payout: ProviderKind,
}

impl ProviderRegistry {
    pub fn new(checkout: ProviderKind, payout: ProviderKind) -> Self {
        Self {
            providers: HashMap::new(),
            checkout,
            payout,
        }
    }

    pub fn with(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn PaymentProvider>, AppError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("provider {} is not configured", kind.as_str())))
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn PaymentProvider>> {
        ProviderKind::parse(name).and_then(|kind| self.providers.get(&kind).cloned())
    }

    pub fn checkout(&self) -> Result<Arc<dyn PaymentProvider>, AppError> {
        self.get(self.checkout)
    }

    pub fn payout(&self) -> Result<Arc<dyn PaymentProvider>, AppError> {
        self.get(self.payout)
    }
}

/// Sends a request and classifies the outcome for retry purposes.
pub(crate) async fn send_json(
    req: reqwest::RequestBuilder,
    provider: &str,
) -> Result<serde_json::Value, ProviderError> {
    let resp = req
        .send()
        .await
        .map_err(|e| ProviderError::Transient(format!("{provider}: {e}")))?;

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::Transient(format!("{provider} returned {status}: {body}")));
    }
    if status.is_client_error() {
        return Err(ProviderError::Rejected {
            status: status.as_u16(),
            message: body,
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| ProviderError::InvalidResponse(format!("{provider}: {e}")))
}

/// Amounts arrive as numbers or numeric strings depending on provider.
pub(crate) fn json_amount(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(|a| a.round() as i64),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().map(|a| a.round() as i64),
        _ => None,
    }
}

pub(crate) fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
