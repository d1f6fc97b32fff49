use chrono::{Months, NaiveDateTime};
use serde_json::json;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Actor, Capability, Payment, PaymentStatus, PaymentType, PayoutStatus, Plan};
use crate::services::{access, payments, reference};
use crate::services::providers::Checkout;
use crate::state::AppState;

/// New period end: one month (or one year for annual plans) past the later
/// of `now` and the current end, so early renewals stack and lapsed ones
/// restart from today.
pub fn extended_end_date(current_end: Option<NaiveDateTime>, plan: Plan, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let base = match current_end {
        Some(end) if end > now => end,
        _ => now,
    };
    let months = if plan.is_annual() { 12 } else { 1 };
    base.checked_add_months(Months::new(months))
}

/// Applies one successful subscription payment. Callers guarantee this runs
/// once per payment event.
pub fn extend(state: &AppState, subscription_id: &str, plan: Plan, now: NaiveDateTime) -> Result<NaiveDateTime, AppError> {
    let db = state.conn()?;
    let sub = queries::get_subscription(&db, subscription_id)?
        .ok_or_else(|| AppError::NotFound(format!("subscription {subscription_id}")))?;

    let new_end = extended_end_date(sub.end_date, plan, now)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("subscription end date overflow")))?;

    queries::extend_subscription_period(&db, subscription_id, plan, &new_end)?;

    tracing::info!(
        subscription_id = %subscription_id,
        plan = plan.as_str(),
        end_date = %new_end,
        "subscription extended"
    );
    Ok(new_end)
}

pub async fn start_checkout(
    state: &AppState,
    subscription_id: &str,
    plan: Plan,
    actor: &Actor,
    now: NaiveDateTime,
) -> Result<(Payment, Checkout), AppError> {
    let sub = {
        let db = state.conn()?;
        queries::get_subscription(&db, subscription_id)?
            .ok_or_else(|| AppError::NotFound(format!("subscription {subscription_id}")))?
    };
    access::authorize_business(actor, &sub.business_id, Capability::ManageSubscription)?;

    let provider = state.providers.checkout()?;
    let id = uuid::Uuid::new_v4().to_string();
    let payment = Payment {
        tx_ref: reference::subscription_tx_ref(&id),
        id,
        payment_type: PaymentType::Subscription,
        booking_id: None,
        business_id: sub.business_id.clone(),
        subscription_id: Some(sub.id.clone()),
        plan: Some(plan),
        amount: plan.price(),
        fee: 0,
        currency: state.config.currency.clone(),
        status: PaymentStatus::Pending,
        provider: provider.kind().as_str().to_string(),
        checkout_url: None,
        provider_payment_id: None,
        provider_payout_id: None,
        payout_status: PayoutStatus::None,
        created_at: now,
        updated_at: now,
    };

    payments::open_checkout(
        state,
        provider.as_ref(),
        payment,
        json!({ "subscription_id": sub.id, "plan": plan.as_str() }),
    )
    .await
}
