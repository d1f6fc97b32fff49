pub mod actor;
pub mod alert;
pub mod booking;
pub mod payment;
pub mod payout;
pub mod subscription;

pub use actor::{Actor, Capability, Role};
pub use alert::{AlertKind, OperatorAlert, WebhookLog};
pub use booking::{Booking, BookingStatus, Business, Service, DEFAULT_CANCELLATION_DEADLINE_MINUTES};
pub use payment::{Payment, PaymentStatus, PaymentType, PayoutStatus};
pub use payout::PayoutDestination;
pub use subscription::{Plan, Subscription};
