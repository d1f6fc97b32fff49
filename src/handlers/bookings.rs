use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{Booking, Payment};
use crate::services::booking::{self, CancelOutcome, RescheduleRequest};
use crate::services::payments;
use crate::state::AppState;

use super::{actor_from_headers, now};

// POST /api/bookings
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub service_id: String,
    pub staff_id: Option<String>,
    pub start_time: NaiveDateTime,
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let actor = actor_from_headers(&headers)?;
    let booking = booking::create_booking(&state, &actor, &req.service_id, req.staff_id, req.start_time, now())?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings/:id
#[derive(Serialize)]
pub struct BookingDetail {
    pub booking: Booking,
    pub payments: Vec<Payment>,
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BookingDetail>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let (booking, payments) = booking::get_booking(&state, &id, &actor)?;
    Ok(Json(BookingDetail { booking, payments }))
}

// POST /api/bookings/:id/checkout
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub payment: Payment,
    pub checkout_url: Option<String>,
    pub reference: String,
}

impl From<Payment> for CheckoutResponse {
    fn from(payment: Payment) -> Self {
        Self {
            checkout_url: payment.checkout_url.clone(),
            reference: payment.tx_ref.clone(),
            payment,
        }
    }
}

pub async fn start_checkout(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CheckoutResponse>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let payment = payments::start_booking_checkout(&state, &id, &actor, now()).await?;
    Ok(Json(payment.into()))
}

// POST /api/bookings/:id/cancel
#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub booking: Booking,
    pub requires_action: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// The fee payment when action is required, the refunded payment otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
}

impl From<CancelOutcome> for CancelResponse {
    fn from(outcome: CancelOutcome) -> Self {
        match outcome {
            CancelOutcome::Cancelled { booking, refunded } => Self {
                booking,
                requires_action: false,
                checkout_url: None,
                reference: None,
                payment: refunded,
            },
            CancelOutcome::AlreadyCancelled { booking } => Self {
                booking,
                requires_action: false,
                checkout_url: None,
                reference: None,
                payment: None,
            },
            CancelOutcome::RequiresAction {
                booking,
                payment,
                checkout_url,
            } => Self {
                booking,
                requires_action: true,
                checkout_url: Some(checkout_url),
                reference: Some(payment.tx_ref.clone()),
                payment: Some(payment),
            },
        }
    }
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<CancelResponse>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let reason = body.and_then(|Json(req)| req.reason);
    let outcome = booking::cancel_booking(&state, &id, &actor, reason, now()).await?;
    Ok(Json(outcome.into()))
}

// POST /api/bookings/:id/reschedule
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleBody {
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub duration_minutes: Option<i64>,
}

pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<Booking>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let req = RescheduleRequest {
        start_time: body.start_time,
        end_time: body.end_time,
        duration_minutes: body.duration_minutes,
    };
    let booking = booking::reschedule_booking(&state, &id, &actor, req, now())?;
    Ok(Json(booking))
}

// POST /api/bookings/:id/complete
pub async fn complete_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Booking>, AppError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(booking::complete_booking(&state, &id, &actor, now())?))
}

// POST /api/bookings/:id/no-show
pub async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Booking>, AppError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(booking::mark_no_show(&state, &id, &actor, now())?))
}
