use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::subscription::Plan;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub payment_type: PaymentType,
    pub booking_id: Option<String>,
    pub business_id: String,
    pub subscription_id: Option<String>,
    pub plan: Option<Plan>,
    pub amount: i64,
    pub fee: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider: String,
    pub tx_ref: String,
    pub checkout_url: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_payout_id: Option<String>,
    pub payout_status: PayoutStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Payment {
    /// Amount owed to the business once the platform fee is withheld.
    pub fn payout_amount(&self) -> i64 {
        (self.amount - self.fee).max(0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Booking,
    Cancellation,
    Subscription,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Booking => "booking",
            PaymentType::Cancellation => "cancellation",
            PaymentType::Subscription => "subscription",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "booking" => Some(PaymentType::Booking),
            "cancellation" => Some(PaymentType::Cancellation),
            "subscription" => Some(PaymentType::Subscription),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// PENDING -> SUCCESS | FAILED, SUCCESS -> REFUNDED. Nothing else.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Success)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Success, PaymentStatus::Refunded)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    None,
    Paid,
    Failed,
    Skipped,
    /// Claimed by an operator retry that has not finished yet.
    Retrying,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::None => "none",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
            PayoutStatus::Skipped => "skipped",
            PayoutStatus::Retrying => "retrying",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paid" => PayoutStatus::Paid,
            "failed" => PayoutStatus::Failed,
            "skipped" => PayoutStatus::Skipped,
            "retrying" => PayoutStatus::Retrying,
            _ => PayoutStatus::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_payment_transitions() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Success));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Success.can_transition_to(PaymentStatus::Refunded));
    }

    #[test]
    fn test_terminal_payments_are_immutable() {
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Success));
        assert!(!PaymentStatus::Refunded.can_transition_to(PaymentStatus::Success));
        assert!(!PaymentStatus::Success.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Refunded));
    }
}
