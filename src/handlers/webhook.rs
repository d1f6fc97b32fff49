use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::reconcile;
use crate::state::AppState;

/// Every verified delivery is acknowledged with 200, including duplicates,
/// no-ops and internal failures. Only a bad signature gets a 400.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider) = state.providers.by_name(&provider_name) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown provider" }))).into_response();
    };

    if !provider.verify_webhook(&headers, &body) {
        tracing::warn!(provider = %provider_name, "webhook signature verification failed");
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid signature" }))).into_response();
    }

    let event = match provider.parse_webhook(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(provider = %provider_name, error = %e, "unparseable webhook acknowledged");
            return (StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response();
        }
    };

    tracing::info!(
        provider = %provider_name,
        event_type = %event.event_type,
        reference = %event.reference,
        status = ?event.status,
        "webhook received"
    );

    let disposition = reconcile::handle_event(&state, event, super::now()).await;
    (StatusCode::OK, Json(json!({ "status": disposition.as_str() }))).into_response()
}
