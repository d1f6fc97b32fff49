//! Scripted in-process provider for local runs and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use axum::http::HeaderMap;

use super::{
    json_amount, json_id, Checkout, CheckoutRequest, PaymentProvider, PayoutRequest, ProviderError,
    ProviderKind, ProviderStatus, ReportedStatus, WebhookEvent,
};

pub const MOCK_SIGNATURE_HEADER: &str = "x-mock-signature";

pub struct MockProvider {
    kind: ProviderKind,
    secret: String,
    status: Mutex<ReportedStatus>,
    fail_checkout: AtomicBool,
    fail_refund: AtomicBool,
    payout_script: Mutex<VecDeque<Result<String, ProviderError>>>,
    pub checkout_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub refunds: Mutex<Vec<(String, i64)>>,
    pub payouts: Mutex<Vec<PayoutRequest>>,
}

impl MockProvider {
    pub fn new(kind: ProviderKind, secret: &str) -> Self {
        Self {
            kind,
            secret: secret.to_string(),
            status: Mutex::new(ReportedStatus::Successful),
            fail_checkout: AtomicBool::new(false),
            fail_refund: AtomicBool::new(false),
            payout_script: Mutex::new(VecDeque::new()),
            checkout_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            refunds: Mutex::new(vec![]),
            payouts: Mutex::new(vec![]),
        }
    }

    /// What `check_status` reports from now on.
    pub fn set_status(&self, status: ReportedStatus) {
        if let Ok(mut s) = self.status.lock() {
            *s = status;
        }
    }

    pub fn fail_checkout(&self, fail: bool) {
        self.fail_checkout.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refund(&self, fail: bool) {
        self.fail_refund.store(fail, Ordering::SeqCst);
    }

    /// Queue payout outcomes; once drained every payout succeeds.
    pub fn script_payouts(&self, outcomes: Vec<Result<String, ProviderError>>) {
        if let Ok(mut script) = self.payout_script.lock() {
            script.extend(outcomes);
        }
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Attempts made, including failed ones.
    pub fn payout_count(&self) -> usize {
        self.payouts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn verify_webhook(&self, headers: &HeaderMap, _body: &[u8]) -> bool {
        headers
            .get(MOCK_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| !self.secret.is_empty() && v == self.secret)
            .unwrap_or(false)
    }

    /// `{"event": .., "reference": .., "status": "successful|failed|pending|refunded", "id": .., "amount": ..}`
    fn parse_webhook(&self, body: &[u8]) -> anyhow::Result<WebhookEvent> {
        let payload: serde_json::Value = serde_json::from_slice(body).context("invalid mock webhook body")?;
        let status = match payload["status"].as_str().unwrap_or("") {
            "successful" => ReportedStatus::Successful,
            "failed" => ReportedStatus::Failed,
            "refunded" => ReportedStatus::Refunded,
            _ => ReportedStatus::Pending,
        };
        Ok(WebhookEvent {
            event_type: payload["event"].as_str().unwrap_or("mock.event").to_string(),
            reference: payload["reference"]
                .as_str()
                .context("mock webhook without reference")?
                .to_string(),
            status,
            provider_payment_id: json_id(&payload["id"]),
            amount: json_amount(&payload["amount"]),
        })
    }

    async fn create_checkout(&self, req: &CheckoutRequest) -> Result<Checkout, ProviderError> {
        self.checkout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("mock checkout unavailable".to_string()));
        }
        Ok(Checkout {
            checkout_url: format!("https://pay.mock/checkout/{}", req.reference),
            provider_invoice_id: Some(format!("inv-{}", req.reference)),
        })
    }

    async fn check_status(&self, _provider_payment_id: &str) -> Result<ProviderStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .status
            .lock()
            .map(|s| *s)
            .map_err(|_| ProviderError::Transient("mock poisoned".to_string()))?;
        Ok(ProviderStatus {
            status,
            amount: None,
            reference: None,
        })
    }

    async fn refund(&self, provider_payment_id: &str, amount: i64, _reason: &str) -> Result<(), ProviderError> {
        // a real provider call suspends; let concurrent callers interleave
        tokio::task::yield_now().await;
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                status: 422,
                message: "mock refund declined".to_string(),
            });
        }
        if let Ok(mut refunds) = self.refunds.lock() {
            refunds.push((provider_payment_id.to_string(), amount));
        }
        Ok(())
    }

    async fn create_payout(&self, req: &PayoutRequest) -> Result<String, ProviderError> {
        if let Ok(mut payouts) = self.payouts.lock() {
            payouts.push(req.clone());
        }
        let scripted = self.payout_script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(outcome) => outcome,
            None => Ok(format!("po-{}", req.reference)),
        }
    }
}
