use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::OperatorAlert;
use crate::services::ledger::{self, LedgerOutcome};
use crate::services::payout::{self, PayoutOutcome};
use crate::state::AppState;

use super::now;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || !constant_time_eq(token.as_bytes(), expected_token.as_bytes()) {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// GET /api/admin/alerts
#[derive(Deserialize)]
pub struct AlertsQuery {
    pub kind: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<Vec<OperatorAlert>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let db = state.conn()?;
    let alerts = queries::list_alerts(&db, params.kind.as_deref(), limit)?;
    Ok(Json(alerts))
}

// POST /api/admin/payouts/:payment_id/retry
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_payout_id: Option<String>,
}

/// Requires an `Idempotency-Key`, scoped to the payment. A replayed key is
/// acknowledged without touching the provider again; a key whose request
/// was refused is released so it can be replayed.
pub async fn retry_payout(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RetryResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Validation("Idempotency-Key header is required".to_string()))?;

    let ledger_key = format!("admin-{payment_id}-{key}");
    if ledger::record_once(&state, &ledger_key, "admin.payout_retry")? == LedgerOutcome::Duplicate {
        return Ok(Json(RetryResponse {
            status: "duplicate",
            provider_payout_id: None,
        }));
    }

    let outcome = match payout::retry_payout(&state, &payment_id, now()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            ledger::release(&state, &ledger_key)?;
            return Err(e);
        }
    };

    let response = match outcome {
        PayoutOutcome::Paid(id) => RetryResponse {
            status: "paid",
            provider_payout_id: Some(id),
        },
        PayoutOutcome::Failed => RetryResponse {
            status: "failed",
            provider_payout_id: None,
        },
        PayoutOutcome::Skipped => RetryResponse {
            status: "skipped",
            provider_payout_id: None,
        },
    };
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_check_auth() {
        let mut headers = HeaderMap::new();
        assert!(check_auth(&headers, "secret").is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        assert!(check_auth(&headers, "secret").is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer secre"));
        assert!(check_auth(&headers, "secret").is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer secret2"));
        assert!(check_auth(&headers, "secret").is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(check_auth(&headers, "secret").is_ok());
        assert!(check_auth(&headers, "").is_err());
    }
}
