use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::Plan;
use crate::services::subscription;
use crate::state::AppState;

use super::bookings::CheckoutResponse;
use super::{actor_from_headers, now};

#[derive(Deserialize)]
pub struct SubscriptionCheckoutRequest {
    pub plan: Plan,
}

// POST /api/subscriptions/:id/checkout
pub async fn start_checkout(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SubscriptionCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let (payment, _) = subscription::start_checkout(&state, &id, req.plan, &actor, now()).await?;
    Ok(Json(payment.into()))
}
