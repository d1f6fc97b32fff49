use chrono::NaiveDateTime;

/// Dispatch class of an external reference, decided purely by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Booking,
    Subscription,
    Cancellation,
    Refund,
    Unknown,
}

impl ReferenceKind {
    pub fn classify(reference: &str) -> Self {
        if reference.starts_with("booking-") {
            ReferenceKind::Booking
        } else if reference.starts_with("subscription-") {
            ReferenceKind::Subscription
        } else if reference.starts_with("cancellation-") {
            ReferenceKind::Cancellation
        } else if reference.starts_with("refund-") {
            ReferenceKind::Refund
        } else {
            ReferenceKind::Unknown
        }
    }
}

// Timestamps keep each attempt's reference unique.
pub fn booking_tx_ref(booking_id: &str, now: &NaiveDateTime) -> String {
    format!("booking-{booking_id}-{}", now.and_utc().timestamp_millis())
}

pub fn cancellation_tx_ref(booking_id: &str, now: &NaiveDateTime) -> String {
    format!("cancellation-{booking_id}-{}", now.and_utc().timestamp_millis())
}

pub fn subscription_tx_ref(subscription_payment_id: &str) -> String {
    format!("subscription-{subscription_payment_id}")
}

pub fn refund_reference(provider_payment_id: &str) -> String {
    format!("refund-{provider_payment_id}")
}

/// Ledger key claimed before a cancellation refunds a payment. Never sent to
/// a provider.
pub fn cancel_refund_claim(payment_id: &str) -> String {
    format!("cancel-refund-{payment_id}")
}

pub fn payout_reference(payment_id: &str) -> String {
    format!("payout-{payment_id}")
}
