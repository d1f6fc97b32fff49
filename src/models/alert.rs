use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub id: i64,
    pub kind: String,
    pub subject: String,
    pub message: String,
    pub created_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertKind {
    PayoutFailed,
    PayoutDestinationMissing,
    ProviderStatusMismatch,
    PaymentForTerminalBooking,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::PayoutFailed => "payout_failed",
            AlertKind::PayoutDestinationMissing => "payout_destination_missing",
            AlertKind::ProviderStatusMismatch => "provider_status_mismatch",
            AlertKind::PaymentForTerminalBooking => "payment_for_terminal_booking",
        }
    }
}

/// Row in the durable idempotency ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookLog {
    pub tx_ref: String,
    pub event_type: String,
    pub received_at: String,
}
