use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::find_overlapping_bookings;
use super::EngineError;

pub(crate) fn validate_stay(check_in: Ms, check_out: Ms) -> Result<(), EngineError> {
    if check_in >= check_out {
        return Err(EngineError::InvalidInterval {
            check_in,
            check_out,
        });
    }
    if check_in < MIN_VALID_TIMESTAMP_MS || check_out > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if check_out - check_in > MAX_STAY_MS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_room(name: &str, price: f64, capacity: u32) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Invalid("room name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(EngineError::Invalid("price must be a non-negative number"));
    }
    if capacity == 0 {
        return Err(EngineError::Invalid("capacity must be at least 1"));
    }
    Ok(())
}

fn validate_booking(new: &NewBooking) -> Result<(), EngineError> {
    validate_stay(new.check_in, new.check_out)?;
    if new.guests == 0 {
        return Err(EngineError::Invalid("guest count must be at least 1"));
    }
    if let Some(price) = new.total_price
        && (!price.is_finite() || price < 0.0) {
            return Err(EngineError::Invalid("total price must be a non-negative number"));
        }
    if let Some(ref name) = new.guest_name
        && name.len() > MAX_GUEST_NAME_LEN {
            return Err(EngineError::LimitExceeded("guest name too long"));
        }
    Ok(())
}

/// Fail with `Conflict` if a blocking booking on this room overlaps `stay`.
/// `exclude` skips one booking, for re-checking a booking against its neighbours.
pub(crate) fn check_no_overlap(
    rs: &RoomState,
    stay: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let hits = find_overlapping_bookings(rs.room.id, stay.start, stay.end, rs.candidates(stay));
    if let Some(existing) = hits.into_iter().find(|b| Some(b.id) != exclude) {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        tracing::warn!(
            "booking on room {} [{}, {}) conflicts with {}",
            rs.room.id,
            stay.start,
            stay.end,
            existing.id
        );
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}

/// Validate a new booking against its room and turn it into a stored booking.
/// Caller holds the room's write lock, so the overlap check and the insert
/// that follows it see the same bookings.
pub(crate) fn admit_booking(rs: &RoomState, new: NewBooking) -> Result<Booking, EngineError> {
    validate_booking(&new)?;
    if new.guests > rs.room.capacity {
        return Err(EngineError::CapacityExceeded {
            capacity: rs.room.capacity,
            guests: new.guests,
        });
    }
    let stay = Span::new(new.check_in, new.check_out);
    if new.status.blocks_availability() {
        check_no_overlap(rs, &stay, None)?;
    }
    let total_price = new
        .total_price
        .unwrap_or_else(|| price_stay(&rs.room, &stay));
    Ok(Booking {
        id: new.id,
        room_id: rs.room.id,
        check_in: new.check_in,
        check_out: new.check_out,
        guests: new.guests,
        total_price,
        status: new.status,
        guest_name: new.guest_name,
    })
}

/// Nightly rate times nights, a partial night billed as a full one.
pub(crate) fn price_stay(room: &Room, stay: &Span) -> f64 {
    let nights = (stay.duration_ms() + DAY_MS - 1) / DAY_MS;
    nights as f64 * room.price
}
