use anyhow::Context;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Booking, BookingStatus, Business, OperatorAlert, Payment, PaymentStatus, PaymentType,
    PayoutDestination, PayoutStatus, Plan, Service, Subscription,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).with_context(|| format!("bad timestamp: {s}"))
}

fn parse_opt_ts(s: Option<String>) -> anyhow::Result<Option<NaiveDateTime>> {
    s.as_deref().map(parse_ts).transpose()
}

/// True when the error came from a UNIQUE constraint, e.g. a second pending
/// payment racing the first one for the same booking.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ── Businesses & Services ──

pub fn create_business(conn: &Connection, business: &Business) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO businesses (id, name, cancellation_deadline_minutes, late_cancellation_fee)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            business.id,
            business.name,
            business.cancellation_deadline_minutes,
            business.late_cancellation_fee,
        ],
    )?;
    Ok(())
}

pub fn get_business(conn: &Connection, id: &str) -> anyhow::Result<Option<Business>> {
    let business = conn
        .query_row(
            "SELECT id, name, cancellation_deadline_minutes, late_cancellation_fee
             FROM businesses WHERE id = ?1",
            params![id],
            |row| {
                Ok(Business {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    cancellation_deadline_minutes: row.get(2)?,
                    late_cancellation_fee: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(business)
}

pub fn create_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, business_id, name, duration_minutes, price)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            service.id,
            service.business_id,
            service.name,
            service.duration_minutes,
            service.price,
        ],
    )?;
    Ok(())
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let service = conn
        .query_row(
            "SELECT id, business_id, name, duration_minutes, price FROM services WHERE id = ?1",
            params![id],
            |row| {
                Ok(Service {
                    id: row.get(0)?,
                    business_id: row.get(1)?,
                    name: row.get(2)?,
                    duration_minutes: row.get(3)?,
                    price: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(service)
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, customer_id, business_id, service_id, staff_id, start_time, end_time, status, price, \
     cancellation_deadline_minutes, late_cancellation_fee, cancel_reason, completed_at, no_show_at, acted_by, \
     created_at, updated_at";

const NON_TERMINAL: &str = "status NOT IN ('completed', 'cancelled', 'no_show')";

pub fn create_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        &format!("INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"),
        params![
            booking.id,
            booking.customer_id,
            booking.business_id,
            booking.service_id,
            booking.staff_id,
            format_ts(&booking.start_time),
            format_ts(&booking.end_time),
            booking.status.as_str(),
            booking.price,
            booking.cancellation_deadline_minutes,
            booking.late_cancellation_fee,
            booking.cancel_reason,
            booking.completed_at.as_ref().map(format_ts),
            booking.no_show_at.as_ref().map(format_ts),
            booking.acted_by,
            format_ts(&booking.created_at),
            format_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Non-terminal bookings for the same business and service whose
/// `[start, end)` interval intersects the given one.
pub fn find_overlapping_bookings(
    conn: &Connection,
    business_id: &str,
    service_id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
    exclude_id: Option<&str>,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE business_id = ?1 AND service_id = ?2 AND {NON_TERMINAL}
           AND start_time < ?4 AND end_time > ?3
           AND id != COALESCE(?5, '')
         ORDER BY start_time ASC"
    ))?;

    let rows = stmt.query_map(
        params![business_id, service_id, format_ts(start), format_ts(end), exclude_id],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Every booking mutation below only touches non-terminal rows. A `false`
/// return means the row is missing or a concurrent writer already moved it
/// to a terminal state.
pub fn mark_booking_cancelled(
    conn: &Connection,
    id: &str,
    reason: Option<&str>,
    acted_by: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        &format!(
            "UPDATE bookings SET status = 'cancelled', cancel_reason = COALESCE(?1, cancel_reason), acted_by = COALESCE(?2, acted_by), updated_at = ?3
             WHERE id = ?4 AND {NON_TERMINAL}"
        ),
        params![reason, acted_by, format_ts(now), id],
    )?;
    Ok(count > 0)
}

/// Stores the customer's reason while a late-cancellation fee is pending.
pub fn set_cancel_reason(conn: &Connection, id: &str, reason: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        &format!("UPDATE bookings SET cancel_reason = ?1 WHERE id = ?2 AND {NON_TERMINAL}"),
        params![reason, id],
    )?;
    Ok(count > 0)
}

pub fn reschedule_booking(
    conn: &Connection,
    id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        &format!(
            "UPDATE bookings SET status = 'rescheduled', start_time = ?1, end_time = ?2, updated_at = ?3
             WHERE id = ?4 AND {NON_TERMINAL}"
        ),
        params![format_ts(start), format_ts(end), format_ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn mark_booking_completed(
    conn: &Connection,
    id: &str,
    staff_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        &format!(
            "UPDATE bookings SET status = 'completed', completed_at = ?1, acted_by = ?2, updated_at = ?1
             WHERE id = ?3 AND {NON_TERMINAL}"
        ),
        params![format_ts(now), staff_id, id],
    )?;
    Ok(count > 0)
}

pub fn mark_booking_no_show(
    conn: &Connection,
    id: &str,
    staff_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        &format!(
            "UPDATE bookings SET status = 'no_show', no_show_at = ?1, acted_by = ?2, updated_at = ?1
             WHERE id = ?3 AND {NON_TERMINAL}"
        ),
        params![format_ts(now), staff_id, id],
    )?;
    Ok(count > 0)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let start_time: String = row.get(5)?;
    let end_time: String = row.get(6)?;
    let status_str: String = row.get(7)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(Booking {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        business_id: row.get(2)?,
        service_id: row.get(3)?,
        staff_id: row.get(4)?,
        start_time: parse_ts(&start_time)?,
        end_time: parse_ts(&end_time)?,
        status: BookingStatus::parse(&status_str)
            .with_context(|| format!("unknown booking status: {status_str}"))?,
        price: row.get(8)?,
        cancellation_deadline_minutes: row.get(9)?,
        late_cancellation_fee: row.get(10)?,
        cancel_reason: row.get(11)?,
        completed_at: parse_opt_ts(row.get(12)?)?,
        no_show_at: parse_opt_ts(row.get(13)?)?,
        acted_by: row.get(14)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Payments ──

const PAYMENT_COLUMNS: &str = "id, type, booking_id, business_id, subscription_id, plan, amount, fee, currency, status, \
     provider, tx_ref, checkout_url, provider_payment_id, provider_payout_id, payout_status, created_at, updated_at";

pub fn create_payment(conn: &Connection, payment: &Payment) -> anyhow::Result<()> {
    conn.execute(
        &format!("INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"),
        params![
            payment.id,
            payment.payment_type.as_str(),
            payment.booking_id,
            payment.business_id,
            payment.subscription_id,
            payment.plan.map(|p| p.as_str()),
            payment.amount,
            payment.fee,
            payment.currency,
            payment.status.as_str(),
            payment.provider,
            payment.tx_ref,
            payment.checkout_url,
            payment.provider_payment_id,
            payment.provider_payout_id,
            payment.payout_status.as_str(),
            format_ts(&payment.created_at),
            format_ts(&payment.updated_at),
        ],
    )?;
    Ok(())
}

pub fn delete_payment(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM payments WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

pub fn set_checkout_url(conn: &Connection, id: &str, url: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE payments SET checkout_url = ?1 WHERE id = ?2",
        params![url, id],
    )?;
    Ok(())
}

fn query_payment(
    conn: &Connection,
    filter: &str,
    param: &str,
) -> anyhow::Result<Option<Payment>> {
    let result = conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE {filter} ORDER BY created_at DESC, rowid DESC LIMIT 1"),
        params![param],
        |row| Ok(parse_payment_row(row)),
    );

    match result {
        Ok(payment) => Ok(Some(payment?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_payment_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Payment>> {
    query_payment(conn, "id = ?1", id)
}

pub fn get_payment_by_tx_ref(conn: &Connection, tx_ref: &str) -> anyhow::Result<Option<Payment>> {
    query_payment(conn, "tx_ref = ?1", tx_ref)
}

pub fn get_payment_by_provider_payment_id(
    conn: &Connection,
    provider_payment_id: &str,
) -> anyhow::Result<Option<Payment>> {
    query_payment(conn, "provider_payment_id = ?1", provider_payment_id)
}

/// Most recent payment of the given type and status for a booking.
pub fn get_latest_booking_payment(
    conn: &Connection,
    booking_id: &str,
    payment_type: PaymentType,
    status: PaymentStatus,
) -> anyhow::Result<Option<Payment>> {
    let result = conn.query_row(
        &format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE booking_id = ?1 AND type = ?2 AND status = ?3
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ),
        params![booking_id, payment_type.as_str(), status.as_str()],
        |row| Ok(parse_payment_row(row)),
    );

    match result {
        Ok(payment) => Ok(Some(payment?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_payments_for_booking(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = ?1 ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt.query_map(params![booking_id], |row| Ok(parse_payment_row(row)))?;

    let mut payments = vec![];
    for row in rows {
        payments.push(row??);
    }
    Ok(payments)
}

/// Compare-and-set on payment status. Returns `false` when the row was not in
/// `from` any more, i.e. someone else already settled it.
pub fn transition_payment(
    conn: &Connection,
    id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
    provider_payment_id: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    anyhow::ensure!(
        from.can_transition_to(to),
        "illegal payment transition {} -> {}",
        from.as_str(),
        to.as_str()
    );

    let count = conn.execute(
        "UPDATE payments SET status = ?1, provider_payment_id = COALESCE(?2, provider_payment_id), updated_at = ?3
         WHERE id = ?4 AND status = ?5",
        params![to.as_str(), provider_payment_id, format_ts(now), id, from.as_str()],
    )?;
    Ok(count > 0)
}

pub fn record_payout_result(
    conn: &Connection,
    id: &str,
    payout_status: PayoutStatus,
    provider_payout_id: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE payments SET payout_status = ?1, provider_payout_id = COALESCE(?2, provider_payout_id), updated_at = ?3
         WHERE id = ?4",
        params![payout_status.as_str(), provider_payout_id, format_ts(now), id],
    )?;
    Ok(())
}

/// Moves a settled payment's payout from `failed` to `retrying`. Only one
/// caller can win; `false` means someone else already claimed it.
pub fn claim_payout_retry(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE payments SET payout_status = 'retrying', updated_at = ?1
         WHERE id = ?2 AND status = 'success' AND payout_status = 'failed'",
        params![format_ts(now), id],
    )?;
    Ok(changed > 0)
}

fn parse_payment_row(row: &rusqlite::Row) -> anyhow::Result<Payment> {
    let type_str: String = row.get(1)?;
    let plan_str: Option<String> = row.get(5)?;
    let status_str: String = row.get(9)?;
    let payout_status: String = row.get(15)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;

    Ok(Payment {
        id: row.get(0)?,
        payment_type: PaymentType::parse(&type_str)
            .with_context(|| format!("unknown payment type: {type_str}"))?,
        booking_id: row.get(2)?,
        business_id: row.get(3)?,
        subscription_id: row.get(4)?,
        plan: plan_str.as_deref().and_then(Plan::parse),
        amount: row.get(6)?,
        fee: row.get(7)?,
        currency: row.get(8)?,
        status: PaymentStatus::parse(&status_str)
            .with_context(|| format!("unknown payment status: {status_str}"))?,
        provider: row.get(10)?,
        tx_ref: row.get(11)?,
        checkout_url: row.get(12)?,
        provider_payment_id: row.get(13)?,
        provider_payout_id: row.get(14)?,
        payout_status: PayoutStatus::parse(&payout_status),
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Subscriptions ──

pub fn create_subscription(conn: &Connection, sub: &Subscription) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO subscriptions (id, business_id, plan, start_date, end_date, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            sub.id,
            sub.business_id,
            sub.plan.as_str(),
            format_ts(&sub.start_date),
            sub.end_date.as_ref().map(format_ts),
            sub.is_active as i32,
        ],
    )?;
    Ok(())
}

pub fn get_subscription(conn: &Connection, id: &str) -> anyhow::Result<Option<Subscription>> {
    let result = conn
        .query_row(
            "SELECT id, business_id, plan, start_date, end_date, is_active FROM subscriptions WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i32>(5)? != 0,
                ))
            },
        )
        .optional()?;

    match result {
        Some((id, business_id, plan, start_date, end_date, is_active)) => Ok(Some(Subscription {
            id,
            business_id,
            plan: Plan::parse(&plan).with_context(|| format!("unknown plan: {plan}"))?,
            start_date: parse_ts(&start_date)?,
            end_date: parse_opt_ts(end_date)?,
            is_active,
        })),
        None => Ok(None),
    }
}

pub fn extend_subscription_period(
    conn: &Connection,
    id: &str,
    plan: Plan,
    end_date: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE subscriptions SET plan = ?1, end_date = ?2, is_active = 1 WHERE id = ?3",
        params![plan.as_str(), format_ts(end_date), id],
    )?;
    Ok(count > 0)
}

// ── Payout Settings ──

pub fn upsert_payout_settings(
    conn: &Connection,
    business_id: &str,
    destination: &PayoutDestination,
) -> anyhow::Result<()> {
    let (phone, till, paybill, account, bank_code, account_name) = match destination {
        PayoutDestination::MpesaPhone { phone } => (Some(phone), None, None, None, None, None),
        PayoutDestination::MpesaTill { till_number } => (None, Some(till_number), None, None, None, None),
        PayoutDestination::MpesaPaybill {
            paybill_number,
            account_number,
        } => (None, None, Some(paybill_number), Some(account_number), None, None),
        PayoutDestination::Bank {
            bank_code,
            account_number,
            account_name,
        } => (None, None, None, Some(account_number), Some(bank_code), Some(account_name)),
    };

    conn.execute(
        "INSERT INTO payout_settings (business_id, method, phone, till_number, paybill_number, account_number, bank_code, account_name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(business_id) DO UPDATE SET
           method = excluded.method,
           phone = excluded.phone,
           till_number = excluded.till_number,
           paybill_number = excluded.paybill_number,
           account_number = excluded.account_number,
           bank_code = excluded.bank_code,
           account_name = excluded.account_name",
        params![
            business_id,
            destination.method(),
            phone,
            till,
            paybill,
            account,
            bank_code,
            account_name,
        ],
    )?;
    Ok(())
}

pub fn get_payout_destination(
    conn: &Connection,
    business_id: &str,
) -> anyhow::Result<Option<PayoutDestination>> {
    let row = conn
        .query_row(
            "SELECT method, phone, till_number, paybill_number, account_number, bank_code, account_name
             FROM payout_settings WHERE business_id = ?1",
            params![business_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()?;

    Ok(row.and_then(|(method, phone, till, paybill, account, bank_code, account_name)| {
        PayoutDestination::from_parts(&method, phone, till, paybill, account, bank_code, account_name)
    }))
}

// ── Webhook Ledger ──

/// Atomic first-writer-wins insert keyed on `tx_ref`. Returns `false` when a
/// row already exists, without ever reading first.
pub fn try_record_webhook(conn: &Connection, tx_ref: &str, event_type: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO webhook_log (tx_ref, type) VALUES (?1, ?2)",
        params![tx_ref, event_type],
    )?;
    Ok(count > 0)
}

pub fn release_webhook(conn: &Connection, tx_ref: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM webhook_log WHERE tx_ref = ?1", params![tx_ref])?;
    Ok(())
}

pub fn count_webhook_log(conn: &Connection, tx_ref: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM webhook_log WHERE tx_ref = ?1",
        params![tx_ref],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ── Operator Alerts ──

pub fn insert_alert(conn: &Connection, kind: &str, subject: &str, message: &str) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO operator_alerts (kind, subject, message) VALUES (?1, ?2, ?3)",
        params![kind, subject, message],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_alerts(
    conn: &Connection,
    kind: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<OperatorAlert>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, subject, message, created_at FROM operator_alerts
         WHERE (?1 IS NULL OR kind = ?1)
         ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![kind, limit], |row| {
        Ok(OperatorAlert {
            id: row.get(0)?,
            kind: row.get(1)?,
            subject: row.get(2)?,
            message: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;

    let mut alerts = vec![];
    for row in rows {
        alerts.push(row?);
    }
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup_db() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn seed(conn: &Connection) {
        create_business(
            conn,
            &Business {
                id: "biz-1".to_string(),
                name: "Kinyozi".to_string(),
                cancellation_deadline_minutes: 120,
                late_cancellation_fee: 500,
            },
        )
        .unwrap();
        create_service(
            conn,
            &Service {
                id: "svc-1".to_string(),
                business_id: "biz-1".to_string(),
                name: "Haircut".to_string(),
                duration_minutes: 60,
                price: 5000,
            },
        )
        .unwrap();
    }

    fn booking(id: &str, start: &str, status: BookingStatus) -> Booking {
        let start = dt(start);
        Booking {
            id: id.to_string(),
            customer_id: "cust-1".to_string(),
            business_id: "biz-1".to_string(),
            service_id: "svc-1".to_string(),
            staff_id: None,
            start_time: start,
            end_time: start + chrono::Duration::minutes(60),
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
        }
    }

    #[test]
    fn test_webhook_ledger_rejects_duplicates() {
        let conn = setup_db();
        assert!(try_record_webhook(&conn, "booking-abc", "charge.completed").unwrap());
        assert!(!try_record_webhook(&conn, "booking-abc", "charge.completed").unwrap());
        assert_eq!(count_webhook_log(&conn, "booking-abc").unwrap(), 1);
    }

    #[test]
    fn test_booking_roundtrip() {
        let conn = setup_db();
        seed(&conn);
        create_booking(&conn, &booking("b-1", "2025-06-16 10:00", BookingStatus::Confirmed)).unwrap();

        let loaded = get_booking_by_id(&conn, "b-1").unwrap().unwrap();
        assert_eq!(loaded.status, BookingStatus::Confirmed);
        assert_eq!(loaded.end_time, dt("2025-06-16 11:00"));
        assert!(get_booking_by_id(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_terminal_booking_rows_are_not_updated() {
        let conn = setup_db();
        seed(&conn);
        create_booking(&conn, &booking("b-2", "2025-06-16 10:00", BookingStatus::Completed)).unwrap();

        let now = dt("2025-06-16 12:00");
        assert!(!mark_booking_cancelled(&conn, "b-2", Some("late"), None, &now).unwrap());
        assert!(!mark_booking_no_show(&conn, "b-2", "staff-1", &now).unwrap());
        assert_eq!(
            get_booking_by_id(&conn, "b-2").unwrap().unwrap().status,
            BookingStatus::Completed
        );
    }

    #[test]
    fn test_overlap_ignores_terminal_and_adjacent() {
        let conn = setup_db();
        seed(&conn);
        create_booking(&conn, &booking("b-3", "2025-06-16 10:00", BookingStatus::Confirmed)).unwrap();
        create_booking(&conn, &booking("b-4", "2025-06-16 12:00", BookingStatus::Cancelled)).unwrap();

        let hits = find_overlapping_bookings(
            &conn,
            "biz-1",
            "svc-1",
            &dt("2025-06-16 10:30"),
            &dt("2025-06-16 11:30"),
            None,
        )
        .unwrap();
        assert_eq!(hits.len(), 1);

        let adjacent = find_overlapping_bookings(
            &conn,
            "biz-1",
            "svc-1",
            &dt("2025-06-16 11:00"),
            &dt("2025-06-16 12:30"),
            None,
        )
        .unwrap();
        assert!(adjacent.is_empty());

        let excluding_self = find_overlapping_bookings(
            &conn,
            "biz-1",
            "svc-1",
            &dt("2025-06-16 10:30"),
            &dt("2025-06-16 11:30"),
            Some("b-3"),
        )
        .unwrap();
        assert!(excluding_self.is_empty());
    }

    #[test]
    fn test_payout_settings_roundtrip() {
        let conn = setup_db();
        seed(&conn);
        let dest = PayoutDestination::MpesaTill {
            till_number: "123456".to_string(),
        };
        upsert_payout_settings(&conn, "biz-1", &dest).unwrap();
        assert_eq!(get_payout_destination(&conn, "biz-1").unwrap(), Some(dest));
        assert!(get_payout_destination(&conn, "biz-2").unwrap().is_none());
    }
    fn pending_payment(id: &str, tx_ref: &str) -> Payment {
        Payment {
            id: id.to_string(),
            payment_type: PaymentType::Booking,
            booking_id: Some("b-5".to_string()),
            business_id: "biz-1".to_string(),
            subscription_id: None,
            plan: None,
            amount: 5000,
            fee: 0,
            currency: "KES".to_string(),
            status: PaymentStatus::Pending,
            provider: "intasend".to_string(),
            tx_ref: tx_ref.to_string(),
            checkout_url: None,
            provider_payment_id: None,
            provider_payout_id: None,
            payout_status: PayoutStatus::None,
            created_at: dt("2025-06-01 09:00"),
            updated_at: dt("2025-06-01 09:00"),
        }
    }

    #[test]
    fn test_one_pending_payment_per_booking() {
        let conn = setup_db();
        seed(&conn);
        create_booking(&conn, &booking("b-5", "2025-06-16 10:00", BookingStatus::Pending)).unwrap();
        create_payment(&conn, &pending_payment("p-1", "booking-b-5-1")).unwrap();

        let err = create_payment(&conn, &pending_payment("p-2", "booking-b-5-2")).unwrap_err();
        assert!(is_unique_violation(&err));

        let now = dt("2025-06-01 09:05");
        assert!(transition_payment(&conn, "p-1", PaymentStatus::Pending, PaymentStatus::Failed, None, &now).unwrap());
        create_payment(&conn, &pending_payment("p-2", "booking-b-5-2")).unwrap();
    }

    #[test]
    fn test_payment_transition_is_compare_and_set() {
        let conn = setup_db();
        seed(&conn);
        create_booking(&conn, &booking("b-5", "2025-06-16 10:00", BookingStatus::Pending)).unwrap();
        create_payment(&conn, &pending_payment("p-1", "booking-b-5-1")).unwrap();

        let now = dt("2025-06-01 09:05");
        assert!(transition_payment(&conn, "p-1", PaymentStatus::Pending, PaymentStatus::Success, Some("INV-1"), &now).unwrap());
        assert!(!transition_payment(&conn, "p-1", PaymentStatus::Pending, PaymentStatus::Failed, None, &now).unwrap());
        assert!(transition_payment(&conn, "p-1", PaymentStatus::Pending, PaymentStatus::Refunded, None, &now).is_err());

        let loaded = get_payment_by_provider_payment_id(&conn, "INV-1").unwrap().unwrap();
        assert_eq!(loaded.status, PaymentStatus::Success);
    }
}
