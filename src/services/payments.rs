//! Payment lifecycle: checkout creation, settlement from provider events and
//! the side effects a settled payment triggers.
//!
//! Every status change is a compare-and-set on the current status, so two
//! racing deliveries of the same outcome can never both win.

use std::time::Duration;

use chrono::NaiveDateTime;
use serde_json::json;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Actor, AlertKind, Booking, BookingStatus, Capability, Payment, PaymentStatus, PaymentType,
    PayoutStatus,
};
use crate::services::providers::{
    Checkout, CheckoutRequest, PaymentProvider, ProviderKind, ProviderStatus, ReportedStatus,
    WebhookEvent,
};
use crate::services::{access, alerts, booking, payout, reference, subscription};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Succeeded,
    Failed,
    /// The payment was already terminal; nothing changed.
    AlreadySettled(PaymentStatus),
    Ignored,
}

// ── Checkout ──

/// Builds a PENDING payment for a booking. Only the booking charge itself
/// carries the platform fee.
pub fn new_booking_payment(
    state: &AppState,
    booking: &Booking,
    payment_type: PaymentType,
    amount: i64,
    provider: ProviderKind,
    now: NaiveDateTime,
) -> Payment {
    let tx_ref = match payment_type {
        PaymentType::Cancellation => reference::cancellation_tx_ref(&booking.id, &now),
        _ => reference::booking_tx_ref(&booking.id, &now),
    };
    let fee = match payment_type {
        PaymentType::Booking => amount * state.config.platform_fee_percent / 100,
        _ => 0,
    };

    Payment {
        id: uuid::Uuid::new_v4().to_string(),
        payment_type,
        booking_id: Some(booking.id.clone()),
        business_id: booking.business_id.clone(),
        subscription_id: None,
        plan: None,
        amount,
        fee,
        currency: state.config.currency.clone(),
        status: PaymentStatus::Pending,
        provider: provider.as_str().to_string(),
        tx_ref,
        checkout_url: None,
        provider_payment_id: None,
        provider_payout_id: None,
        payout_status: PayoutStatus::None,
        created_at: now,
        updated_at: now,
    }
}

/// Persists the payment, then asks the provider for a hosted checkout. If the
/// provider call fails the row is removed again so no orphan PENDING payment
/// blocks the next attempt.
pub async fn open_checkout(
    state: &AppState,
    provider: &dyn PaymentProvider,
    mut payment: Payment,
    metadata: serde_json::Value,
) -> Result<(Payment, Checkout), AppError> {
    {
        let db = state.conn()?;
        queries::create_payment(&db, &payment).map_err(|e| {
            if queries::is_unique_violation(&e) {
                AppError::InvalidStateTransition("a payment is already in progress".to_string())
            } else {
                AppError::from(e)
            }
        })?;
    }

    let base = state.config.public_base_url.trim_end_matches('/');
    let req = CheckoutRequest {
        amount: payment.amount,
        currency: payment.currency.clone(),
        reference: payment.tx_ref.clone(),
        redirect_url: format!("{base}/payments/{}/complete", payment.tx_ref),
        cancel_url: format!("{base}/payments/{}/cancelled", payment.tx_ref),
        metadata,
    };

    let checkout = match provider.create_checkout(&req).await {
        Ok(checkout) => checkout,
        Err(e) => {
            tracing::warn!(tx_ref = %payment.tx_ref, error = %e, "checkout creation failed, discarding payment");
            let db = state.conn()?;
            queries::delete_payment(&db, &payment.id)?;
            return Err(AppError::Provider(e));
        }
    };

    {
        let db = state.conn()?;
        queries::set_checkout_url(&db, &payment.id, &checkout.checkout_url)?;
    }
    payment.checkout_url = Some(checkout.checkout_url.clone());

    tracing::info!(
        tx_ref = %payment.tx_ref,
        payment_type = payment.payment_type.as_str(),
        amount = payment.amount,
        invoice = ?checkout.provider_invoice_id,
        "checkout created"
    );
    Ok((payment, checkout))
}

/// Checkout for the booking charge. An unfinished checkout is handed back
/// instead of opening a second one.
pub async fn start_booking_checkout(
    state: &AppState,
    booking_id: &str,
    actor: &Actor,
    now: NaiveDateTime,
) -> Result<Payment, AppError> {
    let (booking, paid, pending) = {
        let db = state.conn()?;
        let booking = queries::get_booking_by_id(&db, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        let paid = queries::get_latest_booking_payment(&db, booking_id, PaymentType::Booking, PaymentStatus::Success)?;
        let pending = queries::get_latest_booking_payment(&db, booking_id, PaymentType::Booking, PaymentStatus::Pending)?;
        (booking, paid, pending)
    };

    access::authorize_booking(actor, &booking, Capability::StartCheckout)?;

    if booking.status.is_terminal() {
        return Err(AppError::InvalidStateTransition(format!(
            "booking is {}",
            booking.status.as_str()
        )));
    }
    if paid.is_some() {
        return Err(AppError::InvalidStateTransition("booking is already paid".to_string()));
    }
    if let Some(pending) = pending {
        if pending.checkout_url.is_some() {
            return Ok(pending);
        }
        return Err(AppError::InvalidStateTransition("a payment is already in progress".to_string()));
    }

    let provider = state.providers.checkout()?;
    let payment = new_booking_payment(state, &booking, PaymentType::Booking, booking.price, provider.kind(), now);
    let metadata = json!({ "booking_id": booking.id, "business_id": booking.business_id });
    let (payment, _) = open_checkout(state, provider.as_ref(), payment, metadata).await?;
    Ok(payment)
}

// ── Settlement ──

/// Applies a provider-reported outcome to a PENDING payment. Success is only
/// committed after the provider confirms it out of band.
pub async fn settle(
    state: &AppState,
    payment: Payment,
    event: &WebhookEvent,
    now: NaiveDateTime,
) -> Result<Settlement, AppError> {
    if payment.status != PaymentStatus::Pending {
        tracing::info!(
            tx_ref = %payment.tx_ref,
            status = payment.status.as_str(),
            "payment already settled, ignoring event"
        );
        return Ok(Settlement::AlreadySettled(payment.status));
    }

    match event.status {
        ReportedStatus::Successful => {
            if verify_success(state, &payment, event).await {
                commit_success(state, payment, event.provider_payment_id.as_deref(), now).await
            } else {
                commit_failure(state, &payment, event.provider_payment_id.as_deref(), now)
            }
        }
        ReportedStatus::Failed => commit_failure(state, &payment, event.provider_payment_id.as_deref(), now),
        ReportedStatus::Pending | ReportedStatus::Refunded => Ok(Settlement::Ignored),
    }
}

/// Returns why a provider's own status does not back up a reported success.
pub fn status_mismatch(payment: &Payment, status: &ProviderStatus) -> Option<String> {
    if status.status != ReportedStatus::Successful {
        return Some(format!("provider reports {:?} for a successful event", status.status));
    }
    if let Some(reference) = status.reference.as_deref() {
        if reference != payment.tx_ref {
            return Some(format!("provider reference {reference} does not match {}", payment.tx_ref));
        }
    }
    if let Some(amount) = status.amount {
        if amount < payment.amount {
            return Some(format!("provider amount {amount} is below expected {}", payment.amount));
        }
    }
    None
}

async fn verify_success(state: &AppState, payment: &Payment, event: &WebhookEvent) -> bool {
    // nothing was charged, nothing to confirm
    if payment.payment_type == PaymentType::Cancellation && payment.amount == 0 {
        return true;
    }

    let Some(provider_payment_id) = event
        .provider_payment_id
        .as_deref()
        .or(payment.provider_payment_id.as_deref())
    else {
        tracing::warn!(tx_ref = %payment.tx_ref, "success event without provider payment id");
        return false;
    };

    let provider = match ProviderKind::parse(&payment.provider).map(|kind| state.providers.get(kind)) {
        Some(Ok(provider)) => provider,
        _ => {
            tracing::warn!(tx_ref = %payment.tx_ref, provider = %payment.provider, "no provider to verify against");
            return false;
        }
    };

    let timeout = Duration::from_secs(state.config.verify_timeout_secs);
    match tokio::time::timeout(timeout, provider.check_status(provider_payment_id)).await {
        Err(_) => {
            tracing::warn!(tx_ref = %payment.tx_ref, "provider verification timed out");
            false
        }
        Ok(Err(e)) => {
            tracing::warn!(tx_ref = %payment.tx_ref, error = %e, "provider verification failed");
            false
        }
        Ok(Ok(status)) => match status_mismatch(payment, &status) {
            Some(reason) => {
                alerts::raise(state, AlertKind::ProviderStatusMismatch, &payment.tx_ref, &reason);
                false
            }
            None => true,
        },
    }
}

fn commit_failure(
    state: &AppState,
    payment: &Payment,
    provider_payment_id: Option<&str>,
    now: NaiveDateTime,
) -> Result<Settlement, AppError> {
    let db = state.conn()?;
    let moved = queries::transition_payment(
        &db,
        &payment.id,
        PaymentStatus::Pending,
        PaymentStatus::Failed,
        provider_payment_id,
        &now,
    )?;
    if !moved {
        return already_settled(&db, &payment.id);
    }
    tracing::info!(tx_ref = %payment.tx_ref, "payment failed");
    Ok(Settlement::Failed)
}

async fn commit_success(
    state: &AppState,
    payment: Payment,
    provider_payment_id: Option<&str>,
    now: NaiveDateTime,
) -> Result<Settlement, AppError> {
    let settled = {
        let db = state.conn()?;
        let moved = queries::transition_payment(
            &db,
            &payment.id,
            PaymentStatus::Pending,
            PaymentStatus::Success,
            provider_payment_id,
            &now,
        )?;
        if !moved {
            return already_settled(&db, &payment.id);
        }
        queries::get_payment_by_id(&db, &payment.id)?
            .ok_or_else(|| AppError::NotFound(format!("payment {}", payment.id)))?
    };

    tracing::info!(
        tx_ref = %settled.tx_ref,
        payment_type = settled.payment_type.as_str(),
        amount = settled.amount,
        "payment succeeded"
    );
    apply_success_effects(state, &settled, now).await?;
    Ok(Settlement::Succeeded)
}

fn already_settled(db: &rusqlite::Connection, payment_id: &str) -> Result<Settlement, AppError> {
    let current = queries::get_payment_by_id(db, payment_id)?
        .map(|p| p.status)
        .unwrap_or(PaymentStatus::Failed);
    Ok(Settlement::AlreadySettled(current))
}

/// Runs the payout off the webhook request; failures still escalate
/// through operator alerts.
fn spawn_payout(state: &AppState, payment: &Payment, now: NaiveDateTime) {
    let state = state.clone();
    let payment = payment.clone();
    tokio::spawn(async move {
        if let Err(e) = payout::execute_payout(&state, &payment, now).await {
            tracing::error!(payment_id = %payment.id, error = %e, "background payout failed");
        }
    });
}

/// Runs exactly once per payment, right after its PENDING -> SUCCESS move.
async fn apply_success_effects(state: &AppState, payment: &Payment, now: NaiveDateTime) -> Result<(), AppError> {
    match payment.payment_type {
        PaymentType::Booking => {
            let booking = match payment.booking_id.as_deref() {
                Some(id) => {
                    let db = state.conn()?;
                    queries::get_booking_by_id(&db, id)?
                }
                None => None,
            };

            match booking {
                Some(b) if b.status == BookingStatus::Cancelled => {
                    alerts::raise(
                        state,
                        AlertKind::PaymentForTerminalBooking,
                        &payment.id,
                        &format!("payment {} settled for cancelled booking {}", payment.tx_ref, b.id),
                    );
                    let db = state.conn()?;
                    queries::record_payout_result(&db, &payment.id, PayoutStatus::Skipped, None, &now)?;
                }
                _ if state.config.payout_in_background => spawn_payout(state, payment, now),
                _ => {
                    payout::execute_payout(state, payment, now).await?;
                }
            }
        }
        PaymentType::Subscription => {
            let (Some(subscription_id), Some(plan)) = (payment.subscription_id.as_deref(), payment.plan) else {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "subscription payment {} without subscription or plan",
                    payment.id
                )));
            };
            subscription::extend(state, subscription_id, plan, now)?;
        }
        PaymentType::Cancellation => {
            let Some(booking_id) = payment.booking_id.as_deref() else {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "cancellation payment {} without booking",
                    payment.id
                )));
            };
            booking::cancel_after_fee_paid(state, booking_id, payment, now)?;
        }
    }
    Ok(())
}

// ── Refunds ──

/// Provider-initiated refund notice. Moves SUCCESS -> REFUNDED; anything
/// else is left alone.
pub fn apply_refund_event(
    state: &AppState,
    provider_payment_id: Option<&str>,
    now: NaiveDateTime,
) -> Result<Settlement, AppError> {
    let Some(provider_payment_id) = provider_payment_id else {
        return Ok(Settlement::Ignored);
    };

    let db = state.conn()?;
    let Some(payment) = queries::get_payment_by_provider_payment_id(&db, provider_payment_id)? else {
        tracing::warn!(provider_payment_id = %provider_payment_id, "refund for unknown payment");
        return Ok(Settlement::Ignored);
    };

    if payment.status != PaymentStatus::Success {
        return Ok(Settlement::AlreadySettled(payment.status));
    }

    let moved = queries::transition_payment(
        &db,
        &payment.id,
        PaymentStatus::Success,
        PaymentStatus::Refunded,
        None,
        &now,
    )?;
    if !moved {
        return already_settled(&db, &payment.id);
    }
    tracing::info!(tx_ref = %payment.tx_ref, "payment refunded by provider");
    Ok(Settlement::Succeeded)
}
