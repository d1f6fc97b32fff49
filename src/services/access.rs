use crate::errors::AppError;
use crate::models::{Actor, Booking, Capability, Role};

pub fn can(role: Role, capability: Capability) -> bool {
    use Capability::*;

    match role {
        Role::Admin => true,
        _ if capability == ViewBooking => true,
        Role::Owner => matches!(
            capability,
            CancelBooking | RescheduleBooking | CompleteBooking | MarkNoShow | ManageSubscription
        ),
        Role::Staff => matches!(
            capability,
            CancelBooking | RescheduleBooking | CompleteBooking | MarkNoShow
        ),
        Role::Customer => matches!(
            capability,
            CreateBooking | CancelBooking | RescheduleBooking | StartCheckout
        ),
    }
}

/// Role check plus scope: customers act on their own bookings, staff and
/// owners on their business's bookings.
pub fn authorize_booking(actor: &Actor, booking: &Booking, capability: Capability) -> Result<(), AppError> {
    if !can(actor.role, capability) {
        return Err(AppError::Forbidden(format!("{:?} may not {:?}", actor.role, capability)));
    }

    let in_scope = match actor.role {
        Role::Admin => true,
        Role::Customer => booking.customer_id == actor.id,
        Role::Staff | Role::Owner => actor.business_id.as_deref() == Some(booking.business_id.as_str()),
    };

    if in_scope {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("booking {} is outside the caller's scope", booking.id)))
    }
}

pub fn authorize_business(actor: &Actor, business_id: &str, capability: Capability) -> Result<(), AppError> {
    if !can(actor.role, capability) {
        return Err(AppError::Forbidden(format!("{:?} may not {:?}", actor.role, capability)));
    }
    if actor.role == Role::Admin || actor.business_id.as_deref() == Some(business_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("business {business_id} is outside the caller's scope")))
    }
}
