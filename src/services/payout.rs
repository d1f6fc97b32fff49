use std::time::Duration;

use chrono::NaiveDateTime;
use serde_json::json;

use crate::config::AppConfig;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{AlertKind, Payment, PaymentStatus, PayoutStatus};
use crate::services::alerts;
use crate::services::providers::{PaymentProvider, PayoutRequest, ProviderError};
use crate::services::reference;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.payout_max_attempts.max(1),
            base_delay: Duration::from_millis(config.payout_base_delay_ms),
        }
    }

    /// `base * 2^attempt`, attempt counted from zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayoutFailure {
    #[error("payout rejected: {0}")]
    Rejected(ProviderError),

    #[error("payout failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ProviderError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Paid(String),
    Failed,
    Skipped,
}

/// Retries transient failures with exponential backoff. A 4xx-class
/// rejection stops immediately.
pub async fn payout_with_retry(
    provider: &dyn PaymentProvider,
    policy: &RetryPolicy,
    req: &PayoutRequest,
) -> Result<String, PayoutFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match provider.create_payout(req).await {
            Ok(payout_id) => {
                tracing::info!(reference = %req.reference, payout_id = %payout_id, attempt, "payout accepted");
                return Ok(payout_id);
            }
            Err(e) if !e.is_retryable() => {
                tracing::warn!(reference = %req.reference, error = %e, "payout rejected, not retrying");
                return Err(PayoutFailure::Rejected(e));
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(PayoutFailure::Exhausted { attempts: attempt, last: e });
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    reference = %req.reference,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "payout failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Pays the business its share of a settled payment. Failure never touches
/// the payment's SUCCESS status; it is recorded on the payout fields and
/// escalated to operators.
pub async fn execute_payout(state: &AppState, payment: &Payment, now: NaiveDateTime) -> Result<PayoutOutcome, AppError> {
    let amount = payment.payout_amount();
    if amount == 0 {
        let db = state.conn()?;
        queries::record_payout_result(&db, &payment.id, PayoutStatus::Skipped, None, &now)?;
        return Ok(PayoutOutcome::Skipped);
    }

    let destination = {
        let db = state.conn()?;
        queries::get_payout_destination(&db, &payment.business_id)?
    };

    let Some(destination) = destination else {
        alerts::raise(
            state,
            AlertKind::PayoutDestinationMissing,
            &payment.id,
            &format!("business {} has no usable payout settings", payment.business_id),
        );
        let db = state.conn()?;
        queries::record_payout_result(&db, &payment.id, PayoutStatus::Failed, None, &now)?;
        return Ok(PayoutOutcome::Failed);
    };

    let provider = state.providers.payout()?;
    let req = PayoutRequest {
        destination,
        amount,
        currency: payment.currency.clone(),
        reference: reference::payout_reference(&payment.id),
        metadata: json!({
            "payment_id": payment.id,
            "business_id": payment.business_id,
            "tx_ref": payment.tx_ref,
        }),
    };

    let policy = RetryPolicy::from_config(&state.config);
    match payout_with_retry(provider.as_ref(), &policy, &req).await {
        Ok(payout_id) => {
            let db = state.conn()?;
            queries::record_payout_result(&db, &payment.id, PayoutStatus::Paid, Some(&payout_id), &now)?;
            Ok(PayoutOutcome::Paid(payout_id))
        }
        Err(failure) => {
            alerts::raise(
                state,
                AlertKind::PayoutFailed,
                &payment.id,
                &format!("payout of {amount} {} for business {}: {failure}", payment.currency, payment.business_id),
            );
            let db = state.conn()?;
            queries::record_payout_result(&db, &payment.id, PayoutStatus::Failed, None, &now)?;
            Ok(PayoutOutcome::Failed)
        }
    }
}

/// Operator-triggered retry for a settled payment whose payout failed.
/// The payout is claimed with a guarded update first, so concurrent retries
/// cannot both reach the provider.
pub async fn retry_payout(state: &AppState, payment_id: &str, now: NaiveDateTime) -> Result<PayoutOutcome, AppError> {
    let payment = {
        let db = state.conn()?;
        let payment = queries::get_payment_by_id(&db, payment_id)?
            .ok_or_else(|| AppError::NotFound(format!("payment {payment_id}")))?;

        if !queries::claim_payout_retry(&db, payment_id, &now)? {
            return Err(AppError::InvalidStateTransition(format!(
                "payment {payment_id} is {} with payout {}",
                payment.status.as_str(),
                payment.payout_status.as_str()
            )));
        }
        payment
    };

    tracing::info!(payment_id = %payment_id, "retrying payout on operator request");
    match execute_payout(state, &payment, now).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            // hand the claim back so the retry can be attempted again
            let db = state.conn()?;
            queries::record_payout_result(&db, payment_id, PayoutStatus::Failed, None, &now)?;
            Err(e)
        }
    }
}
