use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{admit_booking, check_no_overlap, validate_room};
use super::{apply_to_room, Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_room(
        &self,
        id: Ulid,
        name: String,
        price: f64,
        capacity: u32,
    ) -> Result<Room, EngineError> {
        validate_room(&name, price, capacity)?;
        let _gate = self.catalog_gate.read().await;
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated {
            id,
            name: name.clone(),
            price,
            capacity,
        };
        self.wal_append(&event).await?;
        let room = Room {
            id,
            name,
            price,
            capacity,
        };
        self.rooms
            .insert(id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        tracing::debug!("room {id} created: {}", room.name);
        Ok(room)
    }

    pub async fn update_room(
        &self,
        id: Ulid,
        name: String,
        price: f64,
        capacity: u32,
    ) -> Result<Room, EngineError> {
        validate_room(&name, price, capacity)?;
        let mut guard = self.lock_room_write(id).await?;

        let event = Event::RoomUpdated {
            id,
            name,
            price,
            capacity,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.room.clone())
    }

    /// Rooms with pending, confirmed, approved or completed bookings stay.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.catalog_gate.read().await;
        let rs = self.get_room_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if guard.has_blocking_bookings() {
            return Err(EngineError::HasBookings(id));
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        for b in &guard.bookings {
            self.booking_to_room.remove(&b.id);
        }
        self.rooms.remove(&id);
        tracing::debug!("room {id} deleted");
        Ok(())
    }

    /// Insert a booking if its room is free for the stay. The overlap check and
    /// the WAL write happen under the room's write lock, so two concurrent
    /// requests for the same nights cannot both succeed.
    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        let mut guard = self.lock_room_write(new.room_id).await?;
        if self.booking_to_room.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        let booking = admit_booking(&guard, new)?;
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    /// Atomically create several bookings. All-or-nothing: if any booking is
    /// rejected, none are committed, and the batch is logged as one record so
    /// replay restores all of it or none. Bookings may span different rooms.
    pub async fn batch_create_bookings(
        &self,
        bookings: Vec<NewBooking>,
    ) -> Result<Vec<Booking>, EngineError> {
        if bookings.is_empty() {
            return Ok(Vec::new());
        }
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut seen = HashSet::new();
        for nb in &bookings {
            if !seen.insert(nb.id) || self.booking_to_room.contains_key(&nb.id) {
                return Err(EngineError::AlreadyExists(nb.id));
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut room_ids: Vec<Ulid> = bookings.iter().map(|b| b.room_id).collect();
        room_ids.sort();
        room_ids.dedup();

        let mut guards = Vec::with_capacity(room_ids.len());
        let mut guard_idx = HashMap::new();
        for rid in &room_ids {
            let guard = self.lock_room_write(*rid).await?;
            if guard.bookings.len() + bookings.len() > MAX_BOOKINGS_PER_ROOM {
                return Err(EngineError::LimitExceeded("too many bookings on room"));
            }
            guard_idx.insert(*rid, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate against current state, then against earlier
        // bookings of the same batch.
        let mut admitted: Vec<Booking> = Vec::with_capacity(bookings.len());
        for nb in bookings {
            let guard = &guards[guard_idx[&nb.room_id]];
            let booking = admit_booking(guard, nb)?;
            if booking.status.blocks_availability()
                && let Some(clash) = admitted.iter().find(|other| {
                    other.room_id == booking.room_id
                        && other.status.blocks_availability()
                        && other.stay().overlaps(&booking.stay())
                }) {
                    return Err(EngineError::Conflict(clash.id));
                }
            admitted.push(booking);
        }

        // Phase 2: one WAL record for the whole batch, then apply per room.
        let event = Event::BookingsCreated {
            bookings: admitted.clone(),
        };
        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            apply_to_room(guard, &event, &self.booking_to_room);
        }

        Ok(admitted)
    }

    /// Move a booking to a new status. Reviving a cancelled booking re-checks
    /// its stay against the room's other bookings.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        if !current.status.blocks_availability() && status.blocks_availability() {
            check_no_overlap(&guard, &current.stay(), Some(id))?;
        }

        let event = Event::BookingStatusChanged {
            id,
            room_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!("booking {id}: {} -> {status}", current.status);
        Ok(Booking { status, ..current })
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        if !guard.bookings.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingDeleted { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// Holds the catalog gate and every room's read lock until the rewrite is
    /// swapped in, so no mutation can land in the old file after the snapshot.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.catalog_gate.write().await;
        let mut room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort();

        let mut guards = Vec::with_capacity(room_ids.len());
        for id in &room_ids {
            if let Some(rs) = self.get_room_state(id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RoomCreated {
                id: guard.room.id,
                name: guard.room.name.clone(),
                price: guard.room.price,
                capacity: guard.room.capacity,
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
