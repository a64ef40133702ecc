use super::*;
use crate::limits::*;

const D: Ms = DAY_MS;
// 2024-03-01T00:00:00Z
const MAR_1: Ms = 1_709_251_200_000;

fn mar(day: i64) -> Ms {
    MAR_1 + (day - 1) * D
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomledger_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(path.with_extension("wal.tmp"));
    path
}

fn stay(room_id: Ulid, check_in: Ms, check_out: Ms) -> NewBooking {
    NewBooking {
        id: Ulid::new(),
        room_id,
        check_in,
        check_out,
        guests: 1,
        total_price: None,
        status: BookingStatus::Confirmed,
        guest_name: None,
    }
}

async fn engine_with_room(file: &str, name: &str, capacity: u32) -> (Engine, Ulid) {
    let engine = Engine::new(test_wal_path(file)).unwrap();
    let id = Ulid::new();
    engine
        .create_room(id, name.into(), 100.0, capacity)
        .await
        .unwrap();
    (engine, id)
}

// ── Rooms ────────────────────────────────────────────────

#[tokio::test]
async fn engine_create_and_list_rooms() {
    let engine = Engine::new(test_wal_path("create_rooms.wal")).unwrap();
    let a = Ulid::new();
    let b = Ulid::new();
    engine
        .create_room(a, "Standard Room A".into(), 80.0, 2)
        .await
        .unwrap();
    engine
        .create_room(b, "Deluxe Room B".into(), 140.0, 4)
        .await
        .unwrap();

    let rooms = engine.list_rooms().await;
    assert_eq!(rooms.len(), 2);
    assert!(rooms[0].id < rooms[1].id);
    assert_eq!(engine.get_room(b).await.unwrap().capacity, 4);
}

#[tokio::test]
async fn engine_duplicate_room_rejected() {
    let (engine, id) = engine_with_room("dup_room.wal", "Standard 1", 2).await;
    let result = engine.create_room(id, "Standard 1".into(), 80.0, 2).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn engine_invalid_room_rejected() {
    let engine = Engine::new(test_wal_path("invalid_room.wal")).unwrap();
    let result = engine.create_room(Ulid::new(), "Family".into(), 80.0, 0).await;
    assert!(matches!(result, Err(EngineError::Invalid(_))));
    assert!(engine.list_rooms().await.is_empty());
}

#[tokio::test]
async fn engine_update_room() {
    let (engine, id) = engine_with_room("update_room.wal", "Standard 1", 2).await;
    let room = engine
        .update_room(id, "Executive Suite 1".into(), 310.0, 3)
        .await
        .unwrap();
    assert_eq!(room.name, "Executive Suite 1");
    assert_eq!(engine.get_room(id).await.unwrap().price, 310.0);

    let missing = engine
        .update_room(Ulid::new(), "x".into(), 1.0, 1)
        .await;
    assert!(matches!(missing, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn engine_delete_room_with_bookings_fails() {
    let (engine, id) = engine_with_room("delete_busy_room.wal", "Standard 1", 2).await;
    let b = engine
        .create_booking(stay(id, mar(1), mar(3)))
        .await
        .unwrap();

    let result = engine.delete_room(id).await;
    assert!(matches!(result, Err(EngineError::HasBookings(_))));

    // Once the only booking is cancelled the room can go.
    engine
        .set_booking_status(b.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    engine.delete_room(id).await.unwrap();
    assert!(engine.get_room(id).await.is_none());
    assert!(engine.get_room_for_booking(&b.id).is_none());
}

// ── Bookings ─────────────────────────────────────────────

#[tokio::test]
async fn engine_booking_defaults_price_and_indexes() {
    let (engine, id) = engine_with_room("booking_price.wal", "Deluxe 4", 2).await;
    let b = engine
        .create_booking(stay(id, mar(1), mar(4)))
        .await
        .unwrap();
    assert_eq!(b.total_price, 300.0);
    assert_eq!(engine.get_room_for_booking(&b.id), Some(id));
    assert_eq!(engine.get_bookings(Some(id)).await, vec![b]);
}

#[tokio::test]
async fn engine_booking_conflict() {
    let (engine, id) = engine_with_room("booking_conflict.wal", "Standard 1", 2).await;
    let first = engine
        .create_booking(stay(id, mar(10), mar(15)))
        .await
        .unwrap();

    let result = engine.create_booking(stay(id, mar(12), mar(20))).await;
    assert!(matches!(result, Err(EngineError::Conflict(existing)) if existing == first.id));
    assert_eq!(engine.get_bookings(Some(id)).await.len(), 1);
}

#[tokio::test]
async fn engine_same_day_turnover_allowed() {
    let (engine, id) = engine_with_room("turnover.wal", "Standard 1", 2).await;
    engine
        .create_booking(stay(id, mar(10), mar(15)))
        .await
        .unwrap();
    engine
        .create_booking(stay(id, mar(15), mar(20)))
        .await
        .unwrap();
    engine
        .create_booking(stay(id, mar(5), mar(10)))
        .await
        .unwrap();

    let bookings = engine.get_bookings(Some(id)).await;
    let check_ins: Vec<Ms> = bookings.iter().map(|b| b.check_in).collect();
    assert_eq!(check_ins, vec![mar(5), mar(10), mar(15)]);
}

#[tokio::test]
async fn engine_cancelled_booking_does_not_block() {
    let (engine, id) = engine_with_room("cancelled_free.wal", "Standard 1", 2).await;
    let mut cancelled = stay(id, mar(1), mar(10));
    cancelled.status = BookingStatus::Cancelled;
    engine.create_booking(cancelled).await.unwrap();

    engine
        .create_booking(stay(id, mar(2), mar(4)))
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_capacity_exceeded() {
    let (engine, id) = engine_with_room("capacity.wal", "Standard 1", 2).await;
    let mut nb = stay(id, mar(1), mar(2));
    nb.guests = 3;
    let result = engine.create_booking(nb).await;
    assert!(matches!(
        result,
        Err(EngineError::CapacityExceeded {
            capacity: 2,
            guests: 3
        })
    ));
}

#[tokio::test]
async fn engine_booking_unknown_room() {
    let engine = Engine::new(test_wal_path("unknown_room.wal")).unwrap();
    let result = engine.create_booking(stay(Ulid::new(), mar(1), mar(2))).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn engine_duplicate_booking_id_rejected() {
    let (engine, id) = engine_with_room("dup_booking.wal", "Standard 1", 2).await;
    let nb = stay(id, mar(1), mar(2));
    engine.create_booking(nb.clone()).await.unwrap();
    let mut again = nb;
    again.check_in = mar(5);
    again.check_out = mar(6);
    let result = engine.create_booking(again).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn engine_reviving_cancelled_booking_rechecks_overlap() {
    let (engine, id) = engine_with_room("revive.wal", "Standard 1", 2).await;
    let first = engine
        .create_booking(stay(id, mar(1), mar(5)))
        .await
        .unwrap();
    engine
        .set_booking_status(first.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    let second = engine
        .create_booking(stay(id, mar(3), mar(6)))
        .await
        .unwrap();

    let result = engine
        .set_booking_status(first.id, BookingStatus::Confirmed)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(existing)) if existing == second.id));

    // Blocking to blocking never re-checks against itself.
    let approved = engine
        .set_booking_status(second.id, BookingStatus::Approved)
        .await
        .unwrap();
    assert_eq!(approved.status, BookingStatus::Approved);
}

#[tokio::test]
async fn engine_delete_booking_frees_room() {
    let (engine, id) = engine_with_room("delete_booking.wal", "Standard 1", 2).await;
    let b = engine
        .create_booking(stay(id, mar(1), mar(5)))
        .await
        .unwrap();
    assert_eq!(engine.delete_booking(b.id).await.unwrap(), id);
    assert!(engine.get_room_for_booking(&b.id).is_none());
    engine
        .create_booking(stay(id, mar(2), mar(3)))
        .await
        .unwrap();

    let missing = engine.delete_booking(b.id).await;
    assert!(matches!(missing, Err(EngineError::NotFound(_))));
}

// ── Batch ────────────────────────────────────────────────

#[tokio::test]
async fn engine_batch_bookings_across_rooms() {
    let engine = Engine::new(test_wal_path("batch_ok.wal")).unwrap();
    let a = Ulid::new();
    let b = Ulid::new();
    engine.create_room(a, "Standard A".into(), 80.0, 2).await.unwrap();
    engine.create_room(b, "Deluxe B".into(), 140.0, 2).await.unwrap();

    let created = engine
        .batch_create_bookings(vec![
            stay(a, mar(1), mar(3)),
            stay(b, mar(1), mar(3)),
            stay(a, mar(3), mar(5)),
        ])
        .await
        .unwrap();
    assert_eq!(created.len(), 3);
    assert_eq!(engine.get_bookings(None).await.len(), 3);
}

#[tokio::test]
async fn engine_batch_is_all_or_nothing() {
    let (engine, id) = engine_with_room("batch_rollback.wal", "Standard 1", 2).await;
    engine
        .create_booking(stay(id, mar(10), mar(12)))
        .await
        .unwrap();

    let result = engine
        .batch_create_bookings(vec![stay(id, mar(1), mar(3)), stay(id, mar(11), mar(13))])
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
    assert_eq!(engine.get_bookings(Some(id)).await.len(), 1);
}

#[tokio::test]
async fn engine_batch_rejects_intra_batch_overlap() {
    let (engine, id) = engine_with_room("batch_intra.wal", "Standard 1", 2).await;
    let first = stay(id, mar(1), mar(4));
    let first_id = first.id;
    let result = engine
        .batch_create_bookings(vec![first, stay(id, mar(3), mar(6))])
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(existing)) if existing == first_id));
    assert!(engine.get_bookings(Some(id)).await.is_empty());
}

#[tokio::test]
async fn engine_batch_rejects_duplicate_ids() {
    let (engine, id) = engine_with_room("batch_dup.wal", "Standard 1", 2).await;
    let nb = stay(id, mar(1), mar(2));
    let result = engine.batch_create_bookings(vec![nb.clone(), nb]).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn engine_batch_too_large() {
    let (engine, id) = engine_with_room("batch_large.wal", "Standard 1", 2).await;
    let batch: Vec<NewBooking> = (0..=MAX_BATCH_SIZE as i64)
        .map(|i| stay(id, mar(1) + i * D, mar(2) + i * D))
        .collect();
    let result = engine.batch_create_bookings(batch).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_concurrent_overlapping_bookings_one_wins() {
    let (engine, id) = engine_with_room("race.wal", "Standard 1", 2).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for offset in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(stay(id, mar(10) + offset * HOUR_MS, mar(12)))
                .await
        }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(engine.get_bookings(Some(id)).await.len(), 1);
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn engine_available_rooms_two_room_scenario() {
    let engine = Engine::new(test_wal_path("available.wal")).unwrap();
    let a = Ulid::new();
    let b = Ulid::new();
    engine
        .create_room(a, "Standard Room A".into(), 80.0, 2)
        .await
        .unwrap();
    engine
        .create_room(b, "Deluxe Room B".into(), 140.0, 4)
        .await
        .unwrap();
    engine
        .create_booking(stay(a, mar(1), mar(5)))
        .await
        .unwrap();

    let free = engine.available_rooms(mar(2), mar(4), 1).await.unwrap();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].id, b);

    let big_party = engine.available_rooms(mar(6), mar(7), 3).await.unwrap();
    assert_eq!(big_party.len(), 1);
    assert_eq!(big_party[0].id, b);

    let inverted = engine.available_rooms(mar(4), mar(2), 1).await;
    assert!(matches!(inverted, Err(EngineError::InvalidInterval { .. })));

    let too_wide = engine
        .available_rooms(mar(1), mar(1) + MAX_AVAILABILITY_WINDOW_MS + 1, 1)
        .await;
    assert!(matches!(too_wide, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn engine_overlapping_bookings_query() {
    let (engine, id) = engine_with_room("overlap_query.wal", "Standard 1", 2).await;
    let b = engine
        .create_booking(stay(id, mar(10), mar(15)))
        .await
        .unwrap();

    let hits = engine
        .overlapping_bookings(id, mar(12), mar(20))
        .await
        .unwrap();
    assert_eq!(hits, vec![b]);
    assert!(engine
        .overlapping_bookings(id, mar(15), mar(20))
        .await
        .unwrap()
        .is_empty());
    assert!(engine
        .overlapping_bookings(Ulid::new(), mar(1), mar(30))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn engine_occupancy_report() {
    let engine = Engine::new(test_wal_path("occupancy.wal")).unwrap();
    let a = Ulid::new();
    let b = Ulid::new();
    engine
        .create_room(a, "Standard Room A".into(), 80.0, 2)
        .await
        .unwrap();
    engine
        .create_room(b, "Deluxe Room B".into(), 140.0, 4)
        .await
        .unwrap();
    engine
        .create_booking(stay(a, mar(1), mar(3)))
        .await
        .unwrap();
    let mut pending = stay(b, mar(1), mar(3));
    pending.status = BookingStatus::Pending;
    engine.create_booking(pending).await.unwrap();

    let report = engine
        .occupancy(Period::Day, mar(1), mar(3), None)
        .await
        .unwrap();
    let rates: Vec<u32> = report.data.iter().map(|b| b.occupancy_rate).collect();
    assert_eq!(rates, vec![50, 50, 50]);
    assert_eq!(report.average_occupancy, 50);

    let deluxe = engine
        .occupancy(Period::Day, mar(1), mar(3), Some("deluxe"))
        .await
        .unwrap();
    assert!(deluxe.data.iter().all(|b| b.total_rooms == 1 && b.occupied_rooms == 0));

    let too_many = engine
        .occupancy(Period::Hour, mar(1), mar(1) + (MAX_REPORT_BUCKETS as i64) * HOUR_MS, None)
        .await;
    assert!(matches!(too_many, Err(EngineError::LimitExceeded(_))));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn engine_wal_replay() {
    let path = test_wal_path("replay.wal");
    let room = Ulid::new();
    let kept;
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine
            .create_room(room, "Family Suite".into(), 220.0, 5)
            .await
            .unwrap();
        engine
            .update_room(room, "Family Suite 2".into(), 240.0, 6)
            .await
            .unwrap();
        kept = engine
            .create_booking(stay(room, mar(1), mar(4)))
            .await
            .unwrap();
        let dropped = engine
            .create_booking(stay(room, mar(10), mar(12)))
            .await
            .unwrap();
        engine.delete_booking(dropped.id).await.unwrap();
        engine
            .set_booking_status(kept.id, BookingStatus::Completed)
            .await
            .unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let restored = engine.get_room(room).await.unwrap();
    assert_eq!(restored.name, "Family Suite 2");
    assert_eq!(restored.capacity, 6);
    let bookings = engine.get_bookings(Some(room)).await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].id, kept.id);
    assert_eq!(bookings[0].status, BookingStatus::Completed);
    assert_eq!(engine.get_room_for_booking(&kept.id), Some(room));
}

#[tokio::test]
async fn engine_replay_drops_deleted_room() {
    let path = test_wal_path("replay_deleted.wal");
    let room = Ulid::new();
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine
            .create_room(room, "Standard 9".into(), 80.0, 2)
            .await
            .unwrap();
        engine.delete_room(room).await.unwrap();
    }
    let engine = Engine::new(path).unwrap();
    assert!(engine.list_rooms().await.is_empty());
}

#[tokio::test]
async fn engine_compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let room = Ulid::new();
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine
            .create_room(room, "Standard 1".into(), 80.0, 2)
            .await
            .unwrap();
        for i in 0..10 {
            let b = engine
                .create_booking(stay(room, mar(1) + i * D, mar(2) + i * D))
                .await
                .unwrap();
            if i % 2 == 0 {
                engine.delete_booking(b.id).await.unwrap();
            }
        }
        assert_eq!(engine.wal_appends_since_compact().await, 16);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Writes after compaction land in the new file.
        engine
            .create_booking(stay(room, mar(20), mar(21)))
            .await
            .unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let bookings = engine.get_bookings(Some(room)).await;
    assert_eq!(bookings.len(), 6);
    assert!(bookings.windows(2).all(|w| w[0].check_in <= w[1].check_in));
}

#[tokio::test]
async fn engine_batch_logged_as_one_record() {
    let path = test_wal_path("batch_record.wal");
    let a = Ulid::new();
    let b = Ulid::new();
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_room(a, "Standard A".into(), 80.0, 2).await.unwrap();
        engine.create_room(b, "Deluxe B".into(), 140.0, 2).await.unwrap();
        engine
            .batch_create_bookings(vec![
                stay(a, mar(1), mar(3)),
                stay(b, mar(1), mar(3)),
                stay(a, mar(3), mar(5)),
            ])
            .await
            .unwrap();
        // Two rooms, then the whole batch as a single append.
        assert_eq!(engine.wal_appends_since_compact().await, 3);
    }

    let events = crate::wal::Wal::replay(&path).unwrap();
    assert_eq!(events.len(), 3);
    assert!(matches!(
        events.last(),
        Some(Event::BookingsCreated { bookings }) if bookings.len() == 3
    ));

    let engine = Engine::new(path).unwrap();
    let in_a = engine.get_bookings(Some(a)).await;
    assert_eq!(in_a.len(), 2);
    assert_eq!(engine.get_bookings(Some(b)).await.len(), 1);
    assert_eq!(engine.get_room_for_booking(&in_a[0].id), Some(a));
}

#[tokio::test]
async fn engine_booking_waiting_on_deleted_room_is_not_found() {
    let (engine, id) = engine_with_room("delete_race.wal", "Standard 1", 2).await;
    let engine = Arc::new(engine);

    // Hold the room so both the delete and the booking queue up behind us,
    // delete first.
    let rs = engine.get_room_state(&id).unwrap();
    let held = rs.write().await;

    let deleter = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.delete_room(id).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let nb = stay(id, mar(1), mar(3));
    let booking_id = nb.id;
    let booker = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_booking(nb).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    drop(held);

    assert!(deleter.await.unwrap().is_ok());
    assert!(matches!(
        booker.await.unwrap(),
        Err(EngineError::NotFound(room)) if room == id
    ));
    assert!(engine.get_room_for_booking(&booking_id).is_none());
    assert!(engine.get_bookings(None).await.is_empty());
    // RoomCreated and RoomDeleted only.
    assert_eq!(engine.wal_appends_since_compact().await, 2);
}

#[tokio::test]
async fn engine_queries_reject_out_of_range_timestamps() {
    let (engine, id) = engine_with_room("extreme_ts.wal", "Standard 1", 2).await;
    let lo: Ms = -9_000_000_000_000_000_000;
    let hi: Ms = 9_000_000_000_000_000_000;

    assert!(matches!(
        engine.available_rooms(lo, hi, 1).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.overlapping_bookings(id, lo, hi).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.occupancy(Period::Day, lo, hi, None).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.occupancy(Period::Month, i64::MIN, i64::MIN + 1, None).await,
        Err(EngineError::LimitExceeded(_))
    ));
}
