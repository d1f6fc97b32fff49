//! Booking lifecycle. PENDING, CONFIRMED and RESCHEDULED are live states;
//! COMPLETED, CANCELLED and NO_SHOW are terminal and final.
//!
//! Every write re-checks the terminal guard in SQL, so a cancel racing a
//! webhook fails closed instead of overwriting.

use chrono::{Duration, NaiveDateTime};
use serde_json::json;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Actor, AlertKind, Booking, BookingStatus, Capability, Payment, PaymentStatus, PaymentType,
};
use crate::services::providers::ProviderKind;
use crate::services::ledger::{self, LedgerOutcome};
use crate::services::{access, alerts, fees, payments, reference};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled {
        booking: Booking,
        refunded: Option<Payment>,
    },
    AlreadyCancelled {
        booking: Booking,
    },
    /// Late cancellation: the fee has to be paid before the booking is
    /// cancelled.
    RequiresAction {
        booking: Booking,
        payment: Payment,
        checkout_url: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RescheduleRequest {
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub duration_minutes: Option<i64>,
}

fn load(state: &AppState, booking_id: &str) -> Result<Booking, AppError> {
    let db = state.conn()?;
    queries::get_booking_by_id(&db, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))
}

fn reject_terminal(booking: &Booking) -> Result<(), AppError> {
    if booking.status.is_terminal() {
        return Err(AppError::InvalidStateTransition(format!(
            "booking {} is already {}",
            booking.id,
            booking.status.as_str()
        )));
    }
    Ok(())
}

/// After a guarded update reports no change, tell the caller what it lost to.
fn lost_race(state: &AppState, booking_id: &str) -> AppError {
    match load(state, booking_id) {
        Ok(current) => AppError::InvalidStateTransition(format!(
            "booking {booking_id} is already {}",
            current.status.as_str()
        )),
        Err(e) => e,
    }
}

pub fn get_booking(state: &AppState, booking_id: &str, actor: &Actor) -> Result<(Booking, Vec<Payment>), AppError> {
    let booking = load(state, booking_id)?;
    access::authorize_booking(actor, &booking, Capability::ViewBooking)?;
    let db = state.conn()?;
    let payments = queries::list_payments_for_booking(&db, booking_id)?;
    Ok((booking, payments))
}

/// Reserves a slot for the calling customer, snapshotting the business's
/// cancellation policy and the service price onto the booking.
pub fn create_booking(
    state: &AppState,
    actor: &Actor,
    service_id: &str,
    staff_id: Option<String>,
    start_time: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    if !access::can(actor.role, Capability::CreateBooking) {
        return Err(AppError::Forbidden(format!("{:?} may not create bookings", actor.role)));
    }
    if start_time <= now {
        return Err(AppError::DeadlinePassed("start time must be in the future".to_string()));
    }

    let db = state.conn()?;
    let service = queries::get_service(&db, service_id)?
        .ok_or_else(|| AppError::NotFound(format!("service {service_id}")))?;
    let business = queries::get_business(&db, &service.business_id)?
        .ok_or_else(|| AppError::NotFound(format!("business {}", service.business_id)))?;

    let end_time = start_time + Duration::minutes(service.duration_minutes);
    let clashes = queries::find_overlapping_bookings(&db, &business.id, &service.id, &start_time, &end_time, None)?;
    if !clashes.is_empty() {
        return Err(AppError::SlotUnavailable(format!(
            "{} is already booked at {start_time}",
            service.name
        )));
    }

    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        customer_id: actor.id.clone(),
        business_id: business.id,
        service_id: service.id,
        staff_id,
        start_time,
        end_time,
        status: BookingStatus::Pending,
        price: service.price,
        cancellation_deadline_minutes: business.cancellation_deadline_minutes,
        late_cancellation_fee: business.late_cancellation_fee,
        cancel_reason: None,
        completed_at: None,
        no_show_at: None,
        acted_by: None,
        created_at: now,
        updated_at: now,
    };
    queries::create_booking(&db, &booking)?;

    tracing::info!(booking_id = %booking.id, start = %booking.start_time, "booking created");
    Ok(booking)
}

/// Refund-first cancellation. On time, a paid booking is refunded in full
/// before it is cancelled; a failed refund leaves the booking untouched.
/// Late, the fee is charged through a checkout and the booking is only
/// cancelled once that payment succeeds.
pub async fn cancel_booking(
    state: &AppState,
    booking_id: &str,
    actor: &Actor,
    reason: Option<String>,
    now: NaiveDateTime,
) -> Result<CancelOutcome, AppError> {
    let booking = load(state, booking_id)?;
    access::authorize_booking(actor, &booking, Capability::CancelBooking)?;

    match booking.status {
        BookingStatus::Completed | BookingStatus::NoShow => {
            return Err(AppError::InvalidStateTransition(format!(
                "booking {} is already {}",
                booking.id,
                booking.status.as_str()
            )));
        }
        BookingStatus::Cancelled => return Ok(CancelOutcome::AlreadyCancelled { booking }),
        _ => {}
    }

    let late = fees::is_late(now, booking.start_time, booking.cancellation_deadline_minutes);
    if late {
        cancel_late(state, booking, actor, reason, now).await
    } else {
        cancel_on_time(state, booking, actor, reason, now).await
    }
}

async fn cancel_on_time(
    state: &AppState,
    booking: Booking,
    actor: &Actor,
    reason: Option<String>,
    now: NaiveDateTime,
) -> Result<CancelOutcome, AppError> {
    let paid = {
        let db = state.conn()?;
        queries::get_latest_booking_payment(&db, &booking.id, PaymentType::Booking, PaymentStatus::Success)?
    };

    let refunded = match paid {
        Some(payment) => {
            let provider_payment_id = payment.provider_payment_id.clone().ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("paid payment {} has no provider id", payment.id))
            })?;
            let amount = fees::refund_owed(payment.amount, false, booking.late_cancellation_fee);
            let provider = state.providers.get(provider_kind(&payment)?)?;

            let claim = reference::cancel_refund_claim(&payment.id);
            if ledger::record_once(state, &claim, "booking.cancel_refund")? == LedgerOutcome::Duplicate {
                return Err(AppError::InvalidStateTransition(format!(
                    "a refund for booking {} is already in progress",
                    booking.id
                )));
            }

            if let Err(e) = provider
                .refund(&provider_payment_id, amount, reason.as_deref().unwrap_or("booking cancelled"))
                .await
            {
                tracing::warn!(booking_id = %booking.id, error = %e, "refund failed, booking left as is");
                ledger::release(state, &claim)?;
                return Err(AppError::Provider(e));
            }

            tracing::info!(booking_id = %booking.id, tx_ref = %payment.tx_ref, amount, "refund issued");
            Some(payment)
        }
        None => None,
    };

    let cancelled = {
        let db = state.conn()?;
        let tx = db.unchecked_transaction()?;
        if let Some(payment) = &refunded {
            queries::transition_payment(
                &tx,
                &payment.id,
                PaymentStatus::Success,
                PaymentStatus::Refunded,
                None,
                &now,
            )?;
        }
        let cancelled = queries::mark_booking_cancelled(&tx, &booking.id, reason.as_deref(), Some(&actor.id), &now)?;
        tx.commit()?;
        cancelled
    };

    if !cancelled {
        // the refund went through, so the payment stays REFUNDED regardless
        return Err(lost_race(state, &booking.id));
    }

    let db = state.conn()?;
    let refunded = match refunded {
        Some(p) => queries::get_payment_by_id(&db, &p.id)?,
        None => None,
    };
    let booking = queries::get_booking_by_id(&db, &booking.id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {}", booking.id)))?;

    tracing::info!(booking_id = %booking.id, refunded = refunded.is_some(), "booking cancelled");
    Ok(CancelOutcome::Cancelled { booking, refunded })
}

async fn cancel_late(
    state: &AppState,
    booking: Booking,
    actor: &Actor,
    reason: Option<String>,
    now: NaiveDateTime,
) -> Result<CancelOutcome, AppError> {
    let fee = fees::fee_owed(true, booking.late_cancellation_fee);

    {
        let db = state.conn()?;
        let pending = queries::get_latest_booking_payment(
            &db,
            &booking.id,
            PaymentType::Cancellation,
            PaymentStatus::Pending,
        )?;
        if let Some(payment) = pending {
            return match payment.checkout_url.clone() {
                Some(checkout_url) => Ok(CancelOutcome::RequiresAction {
                    booking,
                    payment,
                    checkout_url,
                }),
                None => Err(AppError::InvalidStateTransition(
                    "a cancellation fee payment is already in progress".to_string(),
                )),
            };
        }
        if let Some(reason) = reason.as_deref() {
            queries::set_cancel_reason(&db, &booking.id, reason)?;
        }
    }

    if fee == 0 {
        return cancel_without_fee(state, booking, actor, now);
    }

    let provider = state.providers.checkout()?;
    let payment = payments::new_booking_payment(state, &booking, PaymentType::Cancellation, fee, provider.kind(), now);
    let metadata = json!({ "booking_id": booking.id, "business_id": booking.business_id, "kind": "late_cancellation_fee" });
    let (payment, checkout) = payments::open_checkout(state, provider.as_ref(), payment, metadata).await?;

    tracing::info!(booking_id = %booking.id, fee, tx_ref = %payment.tx_ref, "late cancellation fee requested");
    Ok(CancelOutcome::RequiresAction {
        booking,
        payment,
        checkout_url: checkout.checkout_url,
    })
}

/// Late, but the business charges nothing: a zero-amount CANCELLATION
/// payment is recorded as settled and the booking cancelled in one step.
fn cancel_without_fee(
    state: &AppState,
    booking: Booking,
    actor: &Actor,
    now: NaiveDateTime,
) -> Result<CancelOutcome, AppError> {
    let provider = state.providers.checkout()?;
    let mut payment = payments::new_booking_payment(state, &booking, PaymentType::Cancellation, 0, provider.kind(), now);
    payment.status = PaymentStatus::Success;

    let db = state.conn()?;
    let tx = db.unchecked_transaction()?;
    queries::create_payment(&tx, &payment)?;
    let cancelled = queries::mark_booking_cancelled(&tx, &booking.id, None, Some(&actor.id), &now)?;
    if !cancelled {
        drop(tx);
        drop(db);
        return Err(lost_race(state, &booking.id));
    }
    tx.commit()?;

    let booking = queries::get_booking_by_id(&db, &booking.id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {}", booking.id)))?;
    Ok(CancelOutcome::Cancelled { booking, refunded: None })
}

/// Side effect of a late-cancellation fee reaching SUCCESS.
pub fn cancel_after_fee_paid(
    state: &AppState,
    booking_id: &str,
    payment: &Payment,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    let cancelled = {
        let db = state.conn()?;
        queries::mark_booking_cancelled(&db, booking_id, None, None, &now)?
    };
    if cancelled {
        tracing::info!(booking_id = %booking_id, tx_ref = %payment.tx_ref, "booking cancelled after fee payment");
        return Ok(());
    }

    let current = load(state, booking_id)?;
    if current.status != BookingStatus::Cancelled {
        alerts::raise(
            state,
            AlertKind::PaymentForTerminalBooking,
            &payment.id,
            &format!(
                "cancellation fee {} paid for booking {} which is {}",
                payment.tx_ref,
                booking_id,
                current.status.as_str()
            ),
        );
    }
    Ok(())
}

pub fn reschedule_booking(
    state: &AppState,
    booking_id: &str,
    actor: &Actor,
    req: RescheduleRequest,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let booking = load(state, booking_id)?;
    access::authorize_booking(actor, &booking, Capability::RescheduleBooking)?;
    reject_terminal(&booking)?;

    let start = req
        .start_time
        .ok_or_else(|| AppError::Validation("startTime is required".to_string()))?;
    let end = match (req.end_time, req.duration_minutes) {
        (Some(end), _) => end,
        (None, Some(minutes)) if minutes > 0 => start + Duration::minutes(minutes),
        (None, Some(_)) => return Err(AppError::Validation("durationMinutes must be positive".to_string())),
        (None, None) => start + booking.duration(),
    };

    if start <= now {
        return Err(AppError::DeadlinePassed("new start time must be in the future".to_string()));
    }
    if end <= start {
        return Err(AppError::Validation("end time must be after start time".to_string()));
    }

    let db = state.conn()?;
    let clashes = queries::find_overlapping_bookings(
        &db,
        &booking.business_id,
        &booking.service_id,
        &start,
        &end,
        Some(&booking.id),
    )?;
    if !clashes.is_empty() {
        return Err(AppError::SlotUnavailable(format!("slot starting {start} is taken")));
    }

    if !queries::reschedule_booking(&db, &booking.id, &start, &end, &now)? {
        drop(db);
        return Err(lost_race(state, booking_id));
    }

    tracing::info!(booking_id = %booking.id, start = %start, end = %end, "booking rescheduled");
    queries::get_booking_by_id(&db, &booking.id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {}", booking.id)))
}

pub fn complete_booking(state: &AppState, booking_id: &str, actor: &Actor, now: NaiveDateTime) -> Result<Booking, AppError> {
    finish(state, booking_id, actor, Capability::CompleteBooking, now)
}

pub fn mark_no_show(state: &AppState, booking_id: &str, actor: &Actor, now: NaiveDateTime) -> Result<Booking, AppError> {
    finish(state, booking_id, actor, Capability::MarkNoShow, now)
}

fn finish(
    state: &AppState,
    booking_id: &str,
    actor: &Actor,
    capability: Capability,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let booking = load(state, booking_id)?;
    access::authorize_booking(actor, &booking, capability)?;
    reject_terminal(&booking)?;

    let db = state.conn()?;
    let updated = match capability {
        Capability::MarkNoShow => queries::mark_booking_no_show(&db, booking_id, &actor.id, &now)?,
        _ => queries::mark_booking_completed(&db, booking_id, &actor.id, &now)?,
    };
    if !updated {
        drop(db);
        return Err(lost_race(state, booking_id));
    }

    tracing::info!(booking_id = %booking_id, action = ?capability, staff = %actor.id, "booking closed");
    queries::get_booking_by_id(&db, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))
}

fn provider_kind(payment: &Payment) -> Result<ProviderKind, AppError> {
    ProviderKind::parse(&payment.provider).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("payment {} has unknown provider {}", payment.id, payment.provider))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::*;

    // booking start used throughout: T = 2025-06-16 10:00
    const T: &str = "2025-06-16 10:00";

    #[tokio::test]
    async fn test_on_time_cancel_refunds_then_cancels() {
        let (state, mock) = test_state();
        insert_booking(&state, "b-1", T, BookingStatus::Confirmed);
        insert_payment(&state, "b-1", PaymentType::Booking, PaymentStatus::Success, 5000, "booking-b-1-1");

        let outcome = cancel_booking(&state, "b-1", &customer(), None, dt("2025-06-16 07:00"))
            .await
            .unwrap();

        match outcome {
            CancelOutcome::Cancelled { booking, refunded } => {
                assert_eq!(booking.status, BookingStatus::Cancelled);
                assert_eq!(refunded.unwrap().status, PaymentStatus::Refunded);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*mock.refunds.lock().unwrap(), vec![("INV-booking-b-1-1".to_string(), 5000)]);
    }

    #[tokio::test]
    async fn test_failed_refund_leaves_booking_live() {
        let (state, mock) = test_state();
        mock.fail_refund(true);
        insert_booking(&state, "b-1", T, BookingStatus::Confirmed);
        insert_payment(&state, "b-1", PaymentType::Booking, PaymentStatus::Success, 5000, "booking-b-1-1");

        let err = cancel_booking(&state, "b-1", &customer(), None, dt("2025-06-16 07:00"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "PROVIDER_ERROR");
        assert_eq!(booking_status(&state, "b-1"), BookingStatus::Confirmed);
        assert_eq!(payment_by_ref(&state, "booking-b-1-1").status, PaymentStatus::Success);

        // the refund claim was handed back, so a later cancel still refunds
        mock.fail_refund(false);
        let outcome = cancel_booking(&state, "b-1", &customer(), None, dt("2025-06-16 07:30"))
            .await
            .unwrap();
        assert!(matches!(outcome, CancelOutcome::Cancelled { refunded: Some(_), .. }));
        assert_eq!(mock.refund_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_on_time_cancels_refund_once() {
        let (state, mock) = test_state();
        insert_booking(&state, "b-1", T, BookingStatus::Confirmed);
        insert_payment(&state, "b-1", PaymentType::Booking, PaymentStatus::Success, 5000, "booking-b-1-1");
        let now = dt("2025-06-16 07:00");

        let (cust, stf) = (customer(), staff());
        let (a, b) = tokio::join!(
            cancel_booking(&state, "b-1", &cust, None, now),
            cancel_booking(&state, "b-1", &stf, None, now)
        );

        let outcomes = [a, b];
        let cancelled = outcomes
            .iter()
            .filter(|r| matches!(r, Ok(CancelOutcome::Cancelled { .. })))
            .count();
        let refused = outcomes
            .iter()
            .filter(|r| matches!(r, Err(e) if e.code() == "INVALID_STATE_TRANSITION"))
            .count();
        assert_eq!(cancelled, 1);
        assert_eq!(refused, 1);
        assert_eq!(mock.refund_count(), 1);
        assert_eq!(booking_status(&state, "b-1"), BookingStatus::Cancelled);
        assert_eq!(payment_by_ref(&state, "booking-b-1-1").status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_on_time_cancel_without_payment() {
        let (state, mock) = test_state();
        insert_booking(&state, "b-1", T, BookingStatus::Pending);

        let outcome = cancel_booking(&state, "b-1", &staff(), Some("closed".to_string()), dt("2025-06-15 10:00"))
            .await
            .unwrap();

        assert!(matches!(outcome, CancelOutcome::Cancelled { refunded: None, .. }));
        assert_eq!(mock.refund_count(), 0);
    }

    #[tokio::test]
    async fn test_late_cancel_requires_fee_checkout() {
        let (state, mock) = test_state();
        insert_booking(&state, "b-1", T, BookingStatus::Confirmed);

        let outcome = cancel_booking(&state, "b-1", &customer(), Some("sick".to_string()), dt("2025-06-16 09:00"))
            .await
            .unwrap();

        let CancelOutcome::RequiresAction { payment, checkout_url, .. } = outcome else {
            panic!("late cancel should require action");
        };
        assert_eq!(payment.amount, 500);
        assert_eq!(payment.payment_type, PaymentType::Cancellation);
        assert!(payment.tx_ref.starts_with("cancellation-b-1-"));
        assert!(checkout_url.contains(&payment.tx_ref));
        assert_eq!(booking_status(&state, "b-1"), BookingStatus::Confirmed);
        assert_eq!(mock.checkout_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // asking again hands back the same checkout
        let again = cancel_booking(&state, "b-1", &customer(), None, dt("2025-06-16 09:05"))
            .await
            .unwrap();
        let CancelOutcome::RequiresAction { payment: second, .. } = again else {
            panic!("still requires action");
        };
        assert_eq!(second.id, payment.id);
        assert_eq!(mock.checkout_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_checkout_failure_removes_pending_fee() {
        let (state, mock) = test_state();
        mock.fail_checkout(true);
        insert_booking(&state, "b-1", T, BookingStatus::Confirmed);

        let err = cancel_booking(&state, "b-1", &customer(), None, dt("2025-06-16 09:00"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "PROVIDER_ERROR");
        let db = state.conn().unwrap();
        assert!(queries::list_payments_for_booking(&db, "b-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_terminal_bookings() {
        let (state, _mock) = test_state();
        insert_booking(&state, "b-done", T, BookingStatus::Completed);
        insert_booking(&state, "b-gone", T, BookingStatus::Cancelled);
        let now = dt("2025-06-15 10:00");

        let err = cancel_booking(&state, "b-done", &customer(), None, now).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");

        let outcome = cancel_booking(&state, "b-gone", &customer(), None, now).await.unwrap();
        assert!(matches!(outcome, CancelOutcome::AlreadyCancelled { .. }));
    }

    #[tokio::test]
    async fn test_terminal_states_are_immutable() {
        let (state, mock) = test_state();
        let now = dt("2025-06-15 10:00");
        let terminal = [BookingStatus::Completed, BookingStatus::Cancelled, BookingStatus::NoShow];

        for (i, status) in terminal.into_iter().enumerate() {
            let id = format!("b-{i}");
            let start = format!("2025-06-16 {:02}:00", 10 + 2 * i);
            insert_booking(&state, &id, &start, status);
            let before = load(&state, &id).unwrap();

            let cancel = cancel_booking(&state, &id, &staff(), None, now).await;
            if status == BookingStatus::Cancelled {
                assert!(matches!(cancel, Ok(CancelOutcome::AlreadyCancelled { .. })));
            } else {
                assert_eq!(cancel.unwrap_err().code(), "INVALID_STATE_TRANSITION", "cancel on {status:?}");
            }

            let moved = RescheduleRequest {
                start_time: Some(dt("2025-06-20 10:00")),
                ..Default::default()
            };
            let results = [
                ("reschedule", reschedule_booking(&state, &id, &staff(), moved, now)),
                ("complete", complete_booking(&state, &id, &staff(), now)),
                ("no-show", mark_no_show(&state, &id, &staff(), now)),
            ];
            for (op, result) in results {
                let err = result.unwrap_err();
                assert_eq!(err.code(), "INVALID_STATE_TRANSITION", "{op} on {status:?}");
            }

            let after = load(&state, &id).unwrap();
            assert_eq!(after.status, before.status);
            assert_eq!(after.start_time, before.start_time);
            assert_eq!(after.end_time, before.end_time);
            assert_eq!(after.updated_at, before.updated_at);
            assert_eq!(after.acted_by, before.acted_by);
        }
        assert_eq!(mock.refund_count(), 0);
    }

    #[test]
    fn test_reschedule_rules() {
        let (state, _mock) = test_state();
        insert_booking(&state, "b-1", T, BookingStatus::Confirmed);
        insert_booking(&state, "b-2", "2025-06-16 12:00", BookingStatus::Confirmed);
        let now = dt("2025-06-15 10:00");
        let at = |s: &str| RescheduleRequest {
            start_time: Some(dt(s)),
            ..Default::default()
        };

        let err = reschedule_booking(&state, "b-1", &customer(), at("2025-06-16 11:30"), now).unwrap_err();
        assert_eq!(err.code(), "SLOT_UNAVAILABLE");

        let err = reschedule_booking(&state, "b-1", &customer(), at("2025-06-14 10:00"), now).unwrap_err();
        assert_eq!(err.code(), "DEADLINE_PASSED");

        let bad_end = RescheduleRequest {
            start_time: Some(dt("2025-06-17 10:00")),
            end_time: Some(dt("2025-06-17 09:00")),
            duration_minutes: None,
        };
        let err = reschedule_booking(&state, "b-1", &customer(), bad_end, now).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let moved = reschedule_booking(&state, "b-1", &customer(), at("2025-06-17 10:00"), now).unwrap();
        assert_eq!(moved.status, BookingStatus::Rescheduled);
        assert_eq!(moved.end_time, dt("2025-06-17 11:00"));
    }

    #[test]
    fn test_complete_and_no_show_are_exclusive() {
        let (state, _mock) = test_state();
        insert_booking(&state, "b-1", T, BookingStatus::Confirmed);
        let now = dt("2025-06-16 11:00");

        let done = complete_booking(&state, "b-1", &staff(), now).unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
        assert_eq!(done.acted_by.as_deref(), Some("staff-1"));
        assert_eq!(done.completed_at, Some(now));

        let err = mark_no_show(&state, "b-1", &staff(), now).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
        let err = reschedule_booking(
            &state,
            "b-1",
            &staff(),
            RescheduleRequest {
                start_time: Some(dt("2025-06-20 10:00")),
                ..Default::default()
            },
            now,
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[test]
    fn test_customers_cannot_complete() {
        let (state, _mock) = test_state();
        insert_booking(&state, "b-1", T, BookingStatus::Confirmed);

        let err = complete_booking(&state, "b-1", &customer(), dt("2025-06-16 11:00")).unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_create_booking_guards_slot() {
        let (state, _mock) = test_state();
        let now = dt("2025-06-10 08:00");

        let first = create_booking(&state, &customer(), "svc-1", None, dt(T), now).unwrap();
        assert_eq!(first.price, 5000);
        assert_eq!(first.late_cancellation_fee, 500);
        assert_eq!(first.end_time, dt("2025-06-16 11:00"));

        let err = create_booking(&state, &customer(), "svc-1", None, dt("2025-06-16 10:30"), now).unwrap_err();
        assert_eq!(err.code(), "SLOT_UNAVAILABLE");
    }

    #[test]
    fn test_fee_paid_for_completed_booking_alerts() {
        let (state, _mock) = test_state();
        insert_booking(&state, "b-1", T, BookingStatus::Completed);
        let fee = insert_payment(&state, "b-1", PaymentType::Cancellation, PaymentStatus::Success, 500, "cancellation-b-1-1");

        cancel_after_fee_paid(&state, "b-1", &fee, dt("2025-06-16 11:00")).unwrap();

        assert_eq!(booking_status(&state, "b-1"), BookingStatus::Completed);
        let db = state.conn().unwrap();
        let alerts = queries::list_alerts(&db, Some("payment_for_terminal_booking"), 10).unwrap();
        assert_eq!(alerts.len(), 1);
    }
}
