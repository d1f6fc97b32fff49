use anyhow::Context;
use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::Engine;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use super::{
    http_client, json_amount, json_id, send_json, Checkout, CheckoutRequest, PaymentProvider,
    PayoutRequest, ProviderError, ProviderKind, ProviderStatus, ReportedStatus, WebhookEvent,
};
use crate::models::PayoutDestination;
use crate::services::reference;

const BASE_URL: &str = "https://api.flutterwave.com";

pub struct FlutterwaveProvider {
    secret_key: String,
    webhook_hash: String,
    client: reqwest::Client,
}

impl FlutterwaveProvider {
    pub fn new(secret_key: String, webhook_hash: String, timeout_secs: u64) -> Self {
        Self {
            secret_key,
            webhook_hash,
            client: http_client(timeout_secs),
        }
    }
}

fn map_status(s: &str) -> ReportedStatus {
    match s.to_ascii_lowercase().as_str() {
        "successful" | "success" => ReportedStatus::Successful,
        "failed" | "cancelled" => ReportedStatus::Failed,
        _ => ReportedStatus::Pending,
    }
}

/// `flutterwave-signature` is base64(HMAC-SHA256(secret hash, raw body)).
fn validate_flutterwave_signature(secret_hash: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };

    let mut mac = match Hmac::<Sha256>::new_from_slice(secret_hash.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn parse_flutterwave_event(body: &[u8]) -> anyhow::Result<WebhookEvent> {
    let payload: serde_json::Value =
        serde_json::from_slice(body).context("invalid Flutterwave webhook body")?;

    let event_type = payload["event"]
        .as_str()
        .or_else(|| payload["event.type"].as_str())
        .unwrap_or("unknown")
        .to_string();
    let data = &payload["data"];

    if event_type.starts_with("refund") {
        let transaction_id = json_id(&data["tx_id"])
            .or_else(|| json_id(&data["transaction_id"]))
            .context("refund event without a transaction id")?;
        return Ok(WebhookEvent {
            event_type,
            reference: reference::refund_reference(&transaction_id),
            status: ReportedStatus::Refunded,
            provider_payment_id: Some(transaction_id),
            amount: json_amount(&data["amount_refunded"]),
        });
    }

    let reference = data["tx_ref"]
        .as_str()
        .or_else(|| data["reference"].as_str())
        .context("webhook without tx_ref")?
        .to_string();

    Ok(WebhookEvent {
        event_type,
        reference,
        status: map_status(data["status"].as_str().unwrap_or("")),
        provider_payment_id: json_id(&data["id"]),
        amount: json_amount(&data["amount"]),
    })
}

#[async_trait]
impl PaymentProvider for FlutterwaveProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Flutterwave
    }

    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        if self.webhook_hash.is_empty() {
            tracing::warn!("FLUTTERWAVE_WEBHOOK_HASH not configured, rejecting webhook");
            return false;
        }

        if let Some(signature) = headers.get("flutterwave-signature").and_then(|v| v.to_str().ok()) {
            return validate_flutterwave_signature(&self.webhook_hash, signature, body);
        }

        headers
            .get("verif-hash")
            .and_then(|v| v.to_str().ok())
            .map(|v| constant_time_eq(v.as_bytes(), self.webhook_hash.as_bytes()))
            .unwrap_or(false)
    }

    fn parse_webhook(&self, body: &[u8]) -> anyhow::Result<WebhookEvent> {
        parse_flutterwave_event(body)
    }

    async fn create_checkout(&self, req: &CheckoutRequest) -> Result<Checkout, ProviderError> {
        let body = json!({
            "tx_ref": req.reference,
            "amount": req.amount,
            "currency": req.currency,
            "redirect_url": req.redirect_url,
            "meta": {
                "cancel_url": req.cancel_url,
                "context": req.metadata,
            },
        });

        let data = send_json(
            self.client
                .post(format!("{BASE_URL}/v3/payments"))
                .bearer_auth(&self.secret_key)
                .json(&body),
            "flutterwave",
        )
        .await?;

        let checkout_url = data["data"]["link"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse("missing data.link".to_string()))?;

        Ok(Checkout {
            checkout_url: checkout_url.to_string(),
            provider_invoice_id: None,
        })
    }

    async fn check_status(&self, provider_payment_id: &str) -> Result<ProviderStatus, ProviderError> {
        let data = send_json(
            self.client
                .get(format!("{BASE_URL}/v3/transactions/{provider_payment_id}/verify"))
                .bearer_auth(&self.secret_key),
            "flutterwave",
        )
        .await?;

        let tx = &data["data"];
        Ok(ProviderStatus {
            status: map_status(tx["status"].as_str().unwrap_or("")),
            amount: json_amount(&tx["amount"]),
            reference: tx["tx_ref"].as_str().map(|s| s.to_string()),
        })
    }

    async fn refund(&self, provider_payment_id: &str, amount: i64, reason: &str) -> Result<(), ProviderError> {
        send_json(
            self.client
                .post(format!("{BASE_URL}/v3/transactions/{provider_payment_id}/refund"))
                .bearer_auth(&self.secret_key)
                .json(&json!({ "amount": amount, "comments": reason })),
            "flutterwave",
        )
        .await?;
        Ok(())
    }

    async fn create_payout(&self, req: &PayoutRequest) -> Result<String, ProviderError> {
        let (account_bank, account_number, beneficiary_name) = match &req.destination {
            PayoutDestination::MpesaPhone { phone } => ("MPS", phone.clone(), None),
            PayoutDestination::Bank {
                bank_code,
                account_number,
                account_name,
            } => (bank_code.as_str(), account_number.clone(), Some(account_name.clone())),
            other => {
                return Err(ProviderError::Unsupported(format!(
                    "flutterwave cannot pay out to {}",
                    other.method()
                )))
            }
        };

        let data = send_json(
            self.client
                .post(format!("{BASE_URL}/v3/transfers"))
                .bearer_auth(&self.secret_key)
                .json(&json!({
                    "account_bank": account_bank,
                    "account_number": account_number,
                    "beneficiary_name": beneficiary_name,
                    "amount": req.amount,
                    "currency": req.currency,
                    "narration": format!("Payout {}", req.reference),
                    "reference": req.reference,
                    "meta": req.metadata,
                })),
            "flutterwave",
        )
        .await?;

        json_id(&data["data"]["id"])
            .ok_or_else(|| ProviderError::InvalidResponse("missing transfer id".to_string()))
    }
}
