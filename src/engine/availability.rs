use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Availability Algorithm ────────────────────────────────────────

/// Bookings on `room_id` that would collide with a stay `[check_in, check_out)`.
///
/// Cancelled (and malformed) bookings never collide. Overlap is strict, so a
/// guest may check in on the day the previous guest checks out. An empty
/// result means the room is free. The interval is not validated here.
pub fn find_overlapping_bookings<'a>(
    room_id: Ulid,
    check_in: Ms,
    check_out: Ms,
    bookings: &'a [Booking],
) -> Vec<&'a Booking> {
    let candidate = Span {
        start: check_in,
        end: check_out,
    };
    bookings
        .iter()
        .filter(|b| b.room_id == room_id && b.status.blocks_availability())
        .filter(|b| b.stay().overlaps(&candidate))
        .collect()
}

/// Rooms that can take `guests` people for `[check_in, check_out)`.
///
/// A room is out if any blocking booking on it overlaps the stay, or if it
/// sleeps fewer than `guests`. Result keeps catalog order.
pub fn find_available_rooms<'a>(
    check_in: Ms,
    check_out: Ms,
    guests: u32,
    rooms: &'a [Room],
    bookings: &[Booking],
) -> Result<Vec<&'a Room>, EngineError> {
    if check_in >= check_out {
        return Err(EngineError::InvalidInterval {
            check_in,
            check_out,
        });
    }
    if rooms.is_empty() {
        return Ok(Vec::new());
    }

    let candidate = Span::new(check_in, check_out);
    let blocked: HashSet<Ulid> = bookings
        .iter()
        .filter(|b| b.status.blocks_availability() && b.stay().overlaps(&candidate))
        .map(|b| b.room_id)
        .collect();

    Ok(rooms
        .iter()
        .filter(|r| !blocked.contains(&r.id) && r.capacity >= guests)
        .collect())
}
