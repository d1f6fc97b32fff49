pub mod admin;
pub mod bookings;
pub mod health;
pub mod subscriptions;
pub mod webhook;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use chrono::NaiveDateTime;

use crate::errors::AppError;
use crate::models::{Actor, Role};
use crate::state::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_BUSINESS_HEADER: &str = "x-actor-business";

/// Identity is established upstream; the gateway forwards it in headers.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let id = header(ACTOR_ID_HEADER).ok_or(AppError::Unauthorized)?;
    let role = header(ACTOR_ROLE_HEADER)
        .as_deref()
        .and_then(Role::parse)
        .ok_or(AppError::Unauthorized)?;

    Ok(Actor {
        id,
        role,
        business_id: header(ACTOR_BUSINESS_HEADER),
    })
}

pub(crate) fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhooks/:provider", post(webhook::payment_webhook))
        .route("/api/bookings", post(bookings::create_booking))
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/checkout", post(bookings::start_checkout))
        .route("/api/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/api/bookings/:id/reschedule", post(bookings::reschedule_booking))
        .route("/api/bookings/:id/complete", post(bookings::complete_booking))
        .route("/api/bookings/:id/no-show", post(bookings::mark_no_show))
        .route(
            "/api/subscriptions/:id/checkout",
            post(subscriptions::start_checkout),
        )
        .route("/api/admin/alerts", get(admin::get_alerts))
        .route(
            "/api/admin/payouts/:payment_id/retry",
            post(admin::retry_payout),
        )
        .with_state(state)
}
