//! Routes a verified provider event to the payment it settles.
//!
//! Order matters: classify, drop non-terminal noise, claim the reference in
//! the ledger, and only then touch payments. A duplicate delivery stops at
//! the ledger and never reaches a side effect.

use chrono::NaiveDateTime;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::PaymentType;
use crate::services::ledger::{self, LedgerOutcome};
use crate::services::payments::{self, Settlement};
use crate::services::providers::{ReportedStatus, WebhookEvent};
use crate::services::reference::ReferenceKind;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Processed,
    Duplicate,
    Ignored(&'static str),
    /// Accepted but processing failed; still acknowledged to the provider.
    Failed(String),
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Processed => "processed",
            Disposition::Duplicate => "duplicate",
            Disposition::Ignored(_) => "ignored",
            Disposition::Failed(_) => "failed",
        }
    }
}

pub async fn handle_event(state: &AppState, event: WebhookEvent, now: NaiveDateTime) -> Disposition {
    let kind = ReferenceKind::classify(&event.reference);

    let skip = match (kind, event.status) {
        (ReferenceKind::Unknown, _) => Some("unknown reference"),
        (_, ReportedStatus::Pending) => Some("non-terminal status"),
        (ReferenceKind::Refund, status) if status != ReportedStatus::Refunded => Some("refund event without refund status"),
        (ReferenceKind::Refund, _) => None,
        (_, ReportedStatus::Refunded) => Some("refund status on a charge reference"),
        _ => None,
    };
    if let Some(reason) = skip {
        tracing::info!(reference = %event.reference, event_type = %event.event_type, reason, "webhook ignored");
        return Disposition::Ignored(reason);
    }

    match ledger::record_once(state, &event.reference, &event.event_type) {
        Ok(LedgerOutcome::Accepted) => {}
        Ok(LedgerOutcome::Duplicate) => return Disposition::Duplicate,
        Err(e) => {
            tracing::error!(reference = %event.reference, error = %e, "webhook ledger write failed");
            return Disposition::Failed(e.to_string());
        }
    }

    let result = match kind {
        ReferenceKind::Refund => payments::apply_refund_event(state, event.provider_payment_id.as_deref(), now),
        _ => dispatch_charge(state, kind, &event, now).await,
    };

    match result {
        Ok(Settlement::Ignored) => Disposition::Ignored("no matching payment"),
        Ok(settlement) => {
            tracing::info!(reference = %event.reference, ?settlement, "webhook processed");
            Disposition::Processed
        }
        Err(e) => {
            tracing::error!(reference = %event.reference, error = %e, "webhook processing failed");
            Disposition::Failed(e.to_string())
        }
    }
}

async fn dispatch_charge(
    state: &AppState,
    kind: ReferenceKind,
    event: &WebhookEvent,
    now: NaiveDateTime,
) -> Result<Settlement, AppError> {
    let payment = {
        let db = state.conn()?;
        queries::get_payment_by_tx_ref(&db, &event.reference)?
    };

    let Some(payment) = payment else {
        tracing::warn!(reference = %event.reference, "no payment for reference");
        return Ok(Settlement::Ignored);
    };

    let expected = match kind {
        ReferenceKind::Booking => PaymentType::Booking,
        ReferenceKind::Cancellation => PaymentType::Cancellation,
        _ => PaymentType::Subscription,
    };
    if payment.payment_type != expected {
        tracing::warn!(
            reference = %event.reference,
            payment_type = payment.payment_type.as_str(),
            "reference prefix does not match payment type"
        );
        return Ok(Settlement::Ignored);
    }

    payments::settle(state, payment, event, now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, PaymentStatus, PayoutStatus, Plan, Subscription};
    use crate::services::testing::*;
    use std::sync::atomic::Ordering;

    fn event(reference: &str, status: ReportedStatus, id: Option<&str>) -> WebhookEvent {
        WebhookEvent {
            event_type: "charge.completed".to_string(),
            reference: reference.to_string(),
            status,
            provider_payment_id: id.map(str::to_string),
            amount: None,
        }
    }

    fn now() -> NaiveDateTime {
        dt("2025-06-10 12:00")
    }

    #[tokio::test]
    async fn test_duplicate_success_pays_out_once() {
        let (state, mock) = test_state();
        insert_booking(&state, "b-1", "2025-06-16 10:00", BookingStatus::Confirmed);
        insert_payment(&state, "b-1", PaymentType::Booking, PaymentStatus::Pending, 5000, "booking-b-1-1");

        let first = handle_event(&state, event("booking-b-1-1", ReportedStatus::Successful, Some("INV-9")), now()).await;
        let second = handle_event(&state, event("booking-b-1-1", ReportedStatus::Successful, Some("INV-9")), now()).await;

        assert_eq!(first, Disposition::Processed);
        assert_eq!(second, Disposition::Duplicate);

        let payment = payment_by_ref(&state, "booking-b-1-1");
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.provider_payment_id.as_deref(), Some("INV-9"));
        assert_eq!(payment.payout_status, PayoutStatus::Paid);
        assert_eq!(mock.payout_count(), 1);
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), 1);

        // booking still live; payment success does not change it
        assert_eq!(booking_status(&state, "b-1"), BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_background_payout_runs_after_acknowledgement() {
        let (mut state, mock) = test_state();
        state.config.payout_in_background = true;
        insert_booking(&state, "b-1", "2025-06-16 10:00", BookingStatus::Confirmed);
        insert_payment(&state, "b-1", PaymentType::Booking, PaymentStatus::Pending, 5000, "booking-b-1-1");

        let outcome = handle_event(&state, event("booking-b-1-1", ReportedStatus::Successful, Some("INV-9")), now()).await;
        assert_eq!(outcome, Disposition::Processed);
        assert_eq!(payment_by_ref(&state, "booking-b-1-1").status, PaymentStatus::Success);

        let mut payout_status = PayoutStatus::None;
        for _ in 0..100 {
            payout_status = payment_by_ref(&state, "booking-b-1-1").payout_status;
            if payout_status != PayoutStatus::None {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(payout_status, PayoutStatus::Paid);
        assert_eq!(mock.payout_count(), 1);
    }

    #[tokio::test]
    async fn test_unverified_success_fails_payment() {
        let (state, mock) = test_state();
        mock.set_status(ReportedStatus::Failed);
        insert_booking(&state, "b-1", "2025-06-16 10:00", BookingStatus::Confirmed);
        insert_payment(&state, "b-1", PaymentType::Booking, PaymentStatus::Pending, 5000, "booking-b-1-1");

        let outcome = handle_event(&state, event("booking-b-1-1", ReportedStatus::Successful, Some("INV-9")), now()).await;

        assert_eq!(outcome, Disposition::Processed);
        assert_eq!(payment_by_ref(&state, "booking-b-1-1").status, PaymentStatus::Failed);
        assert_eq!(mock.payout_count(), 0);
        let db = state.conn().unwrap();
        assert_eq!(queries::list_alerts(&db, Some("provider_status_mismatch"), 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fee_payment_cancels_booking() {
        let (state, _mock) = test_state();
        insert_booking(&state, "b-1", "2025-06-16 10:00", BookingStatus::Confirmed);
        insert_payment(&state, "b-1", PaymentType::Cancellation, PaymentStatus::Pending, 500, "cancellation-b-1-1");

        let outcome = handle_event(&state, event("cancellation-b-1-1", ReportedStatus::Successful, Some("INV-c")), now()).await;

        assert_eq!(outcome, Disposition::Processed);
        assert_eq!(booking_status(&state, "b-1"), BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_terminal_payment_is_not_revived() {
        let (state, mock) = test_state();
        insert_booking(&state, "b-1", "2025-06-16 10:00", BookingStatus::Confirmed);
        insert_payment(&state, "b-1", PaymentType::Booking, PaymentStatus::Failed, 5000, "booking-b-1-1");

        let outcome = handle_event(&state, event("booking-b-1-1", ReportedStatus::Successful, Some("INV-9")), now()).await;

        assert_eq!(outcome, Disposition::Processed);
        assert_eq!(payment_by_ref(&state, "booking-b-1-1").status, PaymentStatus::Failed);
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_noise_is_ignored_without_ledger_entry() {
        let (state, _mock) = test_state();

        let unknown = handle_event(&state, event("order-77", ReportedStatus::Successful, None), now()).await;
        let pending = handle_event(&state, event("booking-b-1-1", ReportedStatus::Pending, None), now()).await;

        assert!(matches!(unknown, Disposition::Ignored(_)));
        assert!(matches!(pending, Disposition::Ignored(_)));
        let db = state.conn().unwrap();
        assert_eq!(queries::count_webhook_log(&db, "order-77").unwrap(), 0);
        assert_eq!(queries::count_webhook_log(&db, "booking-b-1-1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refund_event_marks_refunded() {
        let (state, _mock) = test_state();
        insert_booking(&state, "b-1", "2025-06-16 10:00", BookingStatus::Confirmed);
        insert_payment(&state, "b-1", PaymentType::Booking, PaymentStatus::Success, 5000, "booking-b-1-1");

        let outcome = handle_event(
            &state,
            event("refund-INV-booking-b-1-1", ReportedStatus::Refunded, Some("INV-booking-b-1-1")),
            now(),
        )
        .await;

        assert_eq!(outcome, Disposition::Processed);
        assert_eq!(payment_by_ref(&state, "booking-b-1-1").status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_subscription_payment_extends_period() {
        let (state, _mock) = test_state();
        {
            let db = state.conn().unwrap();
            queries::create_subscription(
                &db,
                &Subscription {
                    id: "sub-1".to_string(),
                    business_id: "biz-1".to_string(),
                    plan: Plan::BasicMonthly,
                    start_date: dt("2025-05-15 00:00"),
                    end_date: Some(dt("2025-06-15 00:00")),
                    is_active: true,
                },
            )
            .unwrap();
            let mut payment = insert_payment_row("subscription-pay-1");
            payment.subscription_id = Some("sub-1".to_string());
            payment.plan = Some(Plan::BasicMonthly);
            queries::create_payment(&db, &payment).unwrap();
        }

        let outcome = handle_event(&state, event("subscription-pay-1", ReportedStatus::Successful, Some("INV-s")), now()).await;

        assert_eq!(outcome, Disposition::Processed);
        let db = state.conn().unwrap();
        let sub = queries::get_subscription(&db, "sub-1").unwrap().unwrap();
        assert_eq!(sub.end_date, Some(dt("2025-07-15 00:00")));
    }

    fn insert_payment_row(tx_ref: &str) -> crate::models::Payment {
        crate::models::Payment {
            id: "pay-sub".to_string(),
            payment_type: PaymentType::Subscription,
            booking_id: None,
            business_id: "biz-1".to_string(),
            subscription_id: None,
            plan: None,
            amount: 1000,
            fee: 0,
            currency: "KES".to_string(),
            status: PaymentStatus::Pending,
            provider: "intasend".to_string(),
            tx_ref: tx_ref.to_string(),
            checkout_url: None,
            provider_payment_id: None,
            provider_payout_id: None,
            payout_status: PayoutStatus::None,
            created_at: now(),
            updated_at: now(),
        }
    }
}
