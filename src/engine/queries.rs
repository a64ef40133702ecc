use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{find_available_rooms, find_overlapping_bookings};
use super::occupancy::{bucket_count, compute_occupancy};
use super::{Engine, EngineError, SharedRoomState};

/// Both ends inside the supported calendar, so window arithmetic cannot overflow.
fn check_range(start: Ms, end: Ms) -> Result<(), EngineError> {
    let valid = MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS;
    if !valid.contains(&start) || !valid.contains(&end) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

impl Engine {
    /// Room handles in id order, so snapshots are deterministic.
    fn sorted_room_states(&self) -> Vec<SharedRoomState> {
        let mut entries: Vec<(Ulid, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, rs)| rs).collect()
    }

    /// Copy the catalog and every booking out from under the room locks.
    pub async fn snapshot(&self) -> (Vec<Room>, Vec<Booking>) {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        let mut bookings = Vec::new();
        for rs in self.sorted_room_states() {
            let guard = rs.read().await;
            rooms.push(guard.room.clone());
            bookings.extend(guard.bookings.iter().cloned());
        }
        (rooms, bookings)
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for rs in self.sorted_room_states() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms
    }

    pub async fn get_room(&self, id: Ulid) -> Option<Room> {
        let rs = self.get_room_state(&id)?;
        let guard = rs.read().await;
        Some(guard.room.clone())
    }

    /// Bookings of one room ordered by check-in, or of every room when `room_id` is `None`.
    pub async fn get_bookings(&self, room_id: Option<Ulid>) -> Vec<Booking> {
        match room_id {
            Some(id) => match self.get_room_state(&id) {
                Some(rs) => rs.read().await.bookings.clone(),
                None => Vec::new(),
            },
            None => self.snapshot().await.1,
        }
    }

    pub async fn overlapping_bookings(
        &self,
        room_id: Ulid,
        check_in: Ms,
        check_out: Ms,
    ) -> Result<Vec<Booking>, EngineError> {
        if check_in >= check_out {
            return Err(EngineError::InvalidInterval {
                check_in,
                check_out,
            });
        }
        check_range(check_in, check_out)?;
        if check_out - check_in > MAX_AVAILABILITY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let Some(rs) = self.get_room_state(&room_id) else {
            return Ok(vec![]);
        };
        let guard = rs.read().await;
        let window = Span::new(check_in, check_out);
        Ok(
            find_overlapping_bookings(room_id, check_in, check_out, guard.candidates(&window))
                .into_iter()
                .cloned()
                .collect(),
        )
    }

    pub async fn available_rooms(
        &self,
        check_in: Ms,
        check_out: Ms,
        guests: u32,
    ) -> Result<Vec<Room>, EngineError> {
        check_range(check_in, check_out)?;
        if check_out - check_in > MAX_AVAILABILITY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let (rooms, bookings) = self.snapshot().await;
        let free = find_available_rooms(check_in, check_out, guests, &rooms, &bookings)?;
        Ok(free.into_iter().cloned().collect())
    }

    pub async fn occupancy(
        &self,
        period: Period,
        from: Ms,
        to: Ms,
        room_type: Option<&str>,
    ) -> Result<OccupancyReport, EngineError> {
        check_range(from, to)?;
        if to - from > MAX_REPORT_WINDOW_MS {
            return Err(EngineError::LimitExceeded("report window too wide"));
        }
        if bucket_count(period, from, to) > MAX_REPORT_BUCKETS {
            return Err(EngineError::LimitExceeded("too many report buckets"));
        }
        let (rooms, bookings) = self.snapshot().await;
        Ok(compute_occupancy(
            &rooms, &bookings, period, from, to, room_type,
        ))
    }
}
