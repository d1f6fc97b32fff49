//! Shared fixtures for service tests.

use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDateTime};

use crate::config::AppConfig;
use crate::db::{self, queries};
use crate::models::{
    Actor, Booking, BookingStatus, Business, Payment, PaymentStatus, PaymentType, PayoutDestination,
    PayoutStatus, Role, Service,
};
use crate::services::providers::mock::MockProvider;
use crate::services::providers::{ProviderKind, ProviderRegistry};
use crate::state::AppState;

pub fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

pub fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        public_base_url: "http://localhost:3000".to_string(),
        currency: "KES".to_string(),
        checkout_provider: "intasend".to_string(),
        payout_provider: "intasend".to_string(),
        flutterwave_secret_key: "".to_string(),
        flutterwave_webhook_hash: "".to_string(),
        intasend_secret_key: "".to_string(),
        intasend_webhook_challenge: "".to_string(),
        payout_max_attempts: 3,
        payout_base_delay_ms: 1,
        provider_timeout_secs: 5,
        verify_timeout_secs: 5,
        platform_fee_percent: 10,
        payout_in_background: false,
    }
}

/// State backed by an in-memory database, with a mock standing in for
/// IntaSend. Seeds business `biz-1` (deadline 120min, late fee 500) and
/// service `svc-1` (60min, 5000) with an M-Pesa payout destination.
pub fn test_state() -> (AppState, Arc<MockProvider>) {
    let conn = db::init_db(":memory:").unwrap();
    queries::create_business(
        &conn,
        &Business {
            id: "biz-1".to_string(),
            name: "Kinyozi".to_string(),
            cancellation_deadline_minutes: 120,
            late_cancellation_fee: 500,
        },
    )
    .unwrap();
    queries::create_service(
        &conn,
        &Service {
            id: "svc-1".to_string(),
            business_id: "biz-1".to_string(),
            name: "Haircut".to_string(),
            duration_minutes: 60,
            price: 5000,
        },
    )
    .unwrap();
    queries::upsert_payout_settings(
        &conn,
        "biz-1",
        &PayoutDestination::MpesaPhone {
            phone: "254700000000".to_string(),
        },
    )
    .unwrap();

    let mock = Arc::new(MockProvider::new(ProviderKind::Intasend, "mock-secret"));
    let providers = ProviderRegistry::new(ProviderKind::Intasend, ProviderKind::Intasend).with(mock.clone());
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config: test_config(),
        providers,
    };
    (state, mock)
}

pub fn customer() -> Actor {
    Actor {
        id: "cust-1".to_string(),
        role: Role::Customer,
        business_id: None,
    }
}

pub fn staff() -> Actor {
    Actor {
        id: "staff-1".to_string(),
        role: Role::Staff,
        business_id: Some("biz-1".to_string()),
    }
}

pub fn insert_booking(state: &AppState, id: &str, start: &str, status: BookingStatus) -> Booking {
    let start = dt(start);
    let booking = Booking {
        id: id.to_string(),
        customer_id: "cust-1".to_string(),
        business_id: "biz-1".to_string(),
        service_id: "svc-1".to_string(),
        staff_id: None,
        start_time: start,
        end_time: start + Duration::minutes(60),
        status,
        price: 5000,
        cancellation_deadline_minutes: 120,
        late_cancellation_fee: 500,
        cancel_reason: None,
        completed_at: None,
        no_show_at: None,
        acted_by: None,
        created_at: dt("2025-06-01 09:00"),
        updated_at: dt("2025-06-01 09:00"),
    };
    let db = state.conn().unwrap();
    queries::create_booking(&db, &booking).unwrap();
    booking
}

pub fn insert_payment(
    state: &AppState,
    booking_id: &str,
    payment_type: PaymentType,
    status: PaymentStatus,
    amount: i64,
    tx_ref: &str,
) -> Payment {
    let now = dt("2025-06-01 09:30");
    let payment = Payment {
        id: format!("pay-{tx_ref}"),
        payment_type,
        booking_id: Some(booking_id.to_string()),
        business_id: "biz-1".to_string(),
        subscription_id: None,
        plan: None,
        amount,
        fee: 0,
        currency: "KES".to_string(),
        status,
        provider: "intasend".to_string(),
        tx_ref: tx_ref.to_string(),
        checkout_url: Some(format!("https://pay.mock/checkout/{tx_ref}")),
        provider_payment_id: match status {
            PaymentStatus::Pending => None,
            _ => Some(format!("INV-{tx_ref}")),
        },
        provider_payout_id: None,
        payout_status: PayoutStatus::None,
        created_at: now,
        updated_at: now,
    };
    let db = state.conn().unwrap();
    queries::create_payment(&db, &payment).unwrap();
    payment
}

pub fn booking_status(state: &AppState, id: &str) -> BookingStatus {
    let db = state.conn().unwrap();
    queries::get_booking_by_id(&db, id).unwrap().unwrap().status
}

pub fn payment_by_ref(state: &AppState, tx_ref: &str) -> Payment {
    let db = state.conn().unwrap();
    queries::get_payment_by_tx_ref(&db, tx_ref).unwrap().unwrap()
}
