//! Late-cancellation arithmetic. No I/O.

use chrono::{Duration, NaiveDateTime};

/// A cancellation is late once `now` passes `start_time - deadline_minutes`.
pub fn is_late(now: NaiveDateTime, start_time: NaiveDateTime, deadline_minutes: i64) -> bool {
    now > start_time - Duration::minutes(deadline_minutes)
}

pub fn fee_owed(is_late: bool, configured_fee: i64) -> i64 {
    if is_late {
        configured_fee.max(0)
    } else {
        0
    }
}

pub fn refund_owed(payment_amount: i64, is_late: bool, configured_fee: i64) -> i64 {
    (payment_amount - fee_owed(is_late, configured_fee)).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_late_inside_deadline() {
        // T - 60min with a 120 minute deadline
        assert!(is_late(dt("2025-06-16 09:00"), dt("2025-06-16 10:00"), 120));
    }

    #[test]
    fn test_not_late_before_deadline() {
        assert!(!is_late(dt("2025-06-16 07:00"), dt("2025-06-16 10:00"), 120));
    }

    #[test]
    fn test_exactly_at_deadline_is_not_late() {
        assert!(!is_late(dt("2025-06-16 08:00"), dt("2025-06-16 10:00"), 120));
    }

    #[test]
    fn test_fee_and_refund() {
        assert_eq!(fee_owed(false, 500), 0);
        assert_eq!(fee_owed(true, 500), 500);
        assert_eq!(refund_owed(5000, false, 500), 5000);
        assert_eq!(refund_owed(5000, true, 500), 4500);
        assert_eq!(refund_owed(300, true, 500), 0);
    }

    proptest! {
        #[test]
        fn refund_is_never_negative(amount in 0i64..1_000_000, fee in 0i64..1_000_000, late in any::<bool>()) {
            prop_assert!(refund_owed(amount, late, fee) >= 0);
        }

        #[test]
        fn refund_is_non_increasing_in_fee(amount in 0i64..1_000_000, fee in 0i64..1_000_000, bump in 0i64..1_000, late in any::<bool>()) {
            prop_assert!(refund_owed(amount, late, fee + bump) <= refund_owed(amount, late, fee));
        }

        #[test]
        fn on_time_cancellations_owe_nothing(fee in 0i64..1_000_000) {
            prop_assert_eq!(fee_owed(false, fee), 0);
        }
    }
}
