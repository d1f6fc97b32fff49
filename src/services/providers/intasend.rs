use anyhow::Context;
use async_trait::async_trait;
use axum::http::HeaderMap;
use constant_time_eq::constant_time_eq;
use serde_json::json;

use super::{
    http_client, json_amount, json_id, send_json, Checkout, CheckoutRequest, PaymentProvider,
    PayoutRequest, ProviderError, ProviderKind, ProviderStatus, ReportedStatus, WebhookEvent,
};
use crate::models::PayoutDestination;
use crate::services::reference;

const BASE_URL: &str = "https://payment.intasend.com";

pub struct IntasendProvider {
    secret_key: String,
    webhook_challenge: String,
    client: reqwest::Client,
}

impl IntasendProvider {
    pub fn new(secret_key: String, webhook_challenge: String, timeout_secs: u64) -> Self {
        Self {
            secret_key,
            webhook_challenge,
            client: http_client(timeout_secs),
        }
    }
}

fn map_state(s: &str) -> ReportedStatus {
    match s.to_ascii_uppercase().as_str() {
        "COMPLETE" | "COMPLETED" => ReportedStatus::Successful,
        "FAILED" | "CANCELLED" => ReportedStatus::Failed,
        _ => ReportedStatus::Pending,
    }
}

/// Collection events carry our `api_ref`; chargeback (refund) events only
/// carry the provider's `invoice_id`.
pub fn parse_intasend_event(body: &[u8]) -> anyhow::Result<WebhookEvent> {
    let payload: serde_json::Value =
        serde_json::from_slice(body).context("invalid IntaSend webhook body")?;

    let invoice_id = json_id(&payload["invoice_id"]).or_else(|| json_id(&payload["invoice"]));
    let api_ref = payload["api_ref"].as_str().filter(|s| !s.is_empty());

    match api_ref {
        Some(api_ref) => {
            let state = payload["state"].as_str().unwrap_or("");
            Ok(WebhookEvent {
                event_type: format!("invoice.{}", state.to_ascii_lowercase()),
                reference: api_ref.to_string(),
                status: map_state(state),
                provider_payment_id: invoice_id,
                amount: json_amount(&payload["value"]),
            })
        }
        None => {
            let invoice_id = invoice_id.context("webhook without api_ref or invoice_id")?;
            let status = payload["status"]
                .as_str()
                .or_else(|| payload["state"].as_str())
                .unwrap_or("");
            let reported = match status.to_ascii_uppercase().as_str() {
                "COMPLETE" | "COMPLETED" | "APPROVED" | "REFUNDED" => ReportedStatus::Refunded,
                "FAILED" | "DECLINED" => ReportedStatus::Failed,
                _ => ReportedStatus::Pending,
            };
            Ok(WebhookEvent {
                event_type: format!("chargeback.{}", status.to_ascii_lowercase()),
                reference: reference::refund_reference(&invoice_id),
                status: reported,
                provider_payment_id: Some(invoice_id),
                amount: json_amount(&payload["amount"]),
            })
        }
    }
}

#[async_trait]
impl PaymentProvider for IntasendProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Intasend
    }

    /// IntaSend echoes the configured challenge in the JSON body; some proxies
    /// forward it as a header instead.
    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        if self.webhook_challenge.is_empty() {
            tracing::warn!("INTASEND_WEBHOOK_CHALLENGE not configured, rejecting webhook");
            return false;
        }

        let from_body = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v["challenge"].as_str().map(|s| s.to_string()));
        let from_header = headers
            .get("x-intasend-challenge")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        from_body
            .or(from_header)
            .map(|c| constant_time_eq(c.as_bytes(), self.webhook_challenge.as_bytes()))
            .unwrap_or(false)
    }

    fn parse_webhook(&self, body: &[u8]) -> anyhow::Result<WebhookEvent> {
        parse_intasend_event(body)
    }

    async fn create_checkout(&self, req: &CheckoutRequest) -> Result<Checkout, ProviderError> {
        let data = send_json(
            self.client
                .post(format!("{BASE_URL}/api/v1/checkout/"))
                .bearer_auth(&self.secret_key)
                .json(&json!({
                    "amount": req.amount,
                    "currency": req.currency,
                    "api_ref": req.reference,
                    "redirect_url": req.redirect_url,
                    "extra": { "cancel_url": req.cancel_url, "context": req.metadata },
                })),
            "intasend",
        )
        .await?;

        let checkout_url = data["url"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse("missing checkout url".to_string()))?;

        Ok(Checkout {
            checkout_url: checkout_url.to_string(),
            provider_invoice_id: json_id(&data["id"]),
        })
    }

    async fn check_status(&self, provider_payment_id: &str) -> Result<ProviderStatus, ProviderError> {
        let data = send_json(
            self.client
                .post(format!("{BASE_URL}/api/v1/payment/status/"))
                .bearer_auth(&self.secret_key)
                .json(&json!({ "invoice_id": provider_payment_id })),
            "intasend",
        )
        .await?;

        let invoice = &data["invoice"];
        Ok(ProviderStatus {
            status: map_state(invoice["state"].as_str().unwrap_or("")),
            amount: json_amount(&invoice["value"]),
            reference: invoice["api_ref"].as_str().map(|s| s.to_string()),
        })
    }

    async fn refund(&self, provider_payment_id: &str, amount: i64, reason: &str) -> Result<(), ProviderError> {
        send_json(
            self.client
                .post(format!("{BASE_URL}/api/v1/chargebacks/"))
                .bearer_auth(&self.secret_key)
                .json(&json!({
                    "invoice": provider_payment_id,
                    "amount": amount,
                    "reason": "OTHER",
                    "reason_details": reason,
                })),
            "intasend",
        )
        .await?;
        Ok(())
    }

    async fn create_payout(&self, req: &PayoutRequest) -> Result<String, ProviderError> {
        let narrative = format!("Payout {}", req.reference);
        let (channel, transaction) = match &req.destination {
            PayoutDestination::MpesaPhone { phone } => (
                "MPESA-B2C",
                json!({ "account": phone, "amount": req.amount, "narrative": narrative }),
            ),
            PayoutDestination::MpesaTill { till_number } => (
                "MPESA-B2B",
                json!({
                    "account": till_number,
                    "account_type": "TillNumber",
                    "amount": req.amount,
                    "narrative": narrative,
                }),
            ),
            PayoutDestination::MpesaPaybill {
                paybill_number,
                account_number,
            } => (
                "MPESA-B2B",
                json!({
                    "account": paybill_number,
                    "account_type": "PayBill",
                    "account_reference": account_number,
                    "amount": req.amount,
                    "narrative": narrative,
                }),
            ),
            PayoutDestination::Bank {
                bank_code,
                account_number,
                account_name,
            } => (
                "PESALINK",
                json!({
                    "account": account_number,
                    "bank_code": bank_code,
                    "name": account_name,
                    "amount": req.amount,
                    "narrative": narrative,
                }),
            ),
        };

        let data = send_json(
            self.client
                .post(format!("{BASE_URL}/api/v1/send-money/initiate/"))
                .bearer_auth(&self.secret_key)
                .json(&json!({
                    "provider": channel,
                    "currency": req.currency,
                    "requires_approval": "NO",
                    "transactions": [transaction],
                    "callback_url": null,
                    "extra": { "reference": req.reference, "context": req.metadata },
                })),
            "intasend",
        )
        .await?;

        json_id(&data["tracking_id"])
            .ok_or_else(|| ProviderError::InvalidResponse("missing tracking_id".to_string()))
    }
}
