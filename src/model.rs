use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only time type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Strict overlap. Equivalent to: `self` starts inside `other`, `self` ends
    /// inside `other`, or `self` fully contains `other`. A stay ending on the
    /// day another starts does not overlap it.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Boundary-inclusive overlap against `other`'s closed range
    /// `[other.start, other.end - 1]`. Used by occupancy reporting, where a
    /// checkout at the very start of a bucket still marks the room occupied.
    pub fn overlaps_inclusive(&self, other: &Span) -> bool {
        self.start <= other.end - 1 && self.end >= other.start
    }
}

/// Room type, inferred from the room's display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomCategory {
    Standard,
    Deluxe,
    Executive,
    Family,
}

impl RoomCategory {
    pub const ALL: [RoomCategory; 4] = [
        RoomCategory::Standard,
        RoomCategory::Deluxe,
        RoomCategory::Executive,
        RoomCategory::Family,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            RoomCategory::Standard => "standard",
            RoomCategory::Deluxe => "deluxe",
            RoomCategory::Executive => "executive",
            RoomCategory::Family => "family",
        }
    }

    /// Every category whose keyword appears in `name`, case-insensitively.
    /// Tags are not exclusive: "Standard Deluxe Suite" carries two.
    pub fn tags(name: &str) -> Vec<RoomCategory> {
        let lower = name.to_lowercase();
        Self::ALL
            .into_iter()
            .filter(|c| lower.contains(c.keyword()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Approved,
    Completed,
    Cancelled,
    /// Absent or unrecognised status from upstream data.
    Unknown,
}

impl BookingStatus {
    /// Case-insensitive parse. Anything unrecognised becomes `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pending" => BookingStatus::Pending,
            "confirmed" => BookingStatus::Confirmed,
            "approved" => BookingStatus::Approved,
            "completed" => BookingStatus::Completed,
            "cancelled" | "canceled" => BookingStatus::Cancelled,
            _ => BookingStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Approved => "approved",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Unknown => "unknown",
        }
    }

    /// Whether a booking in this status keeps its room from being booked again.
    pub fn blocks_availability(self) -> bool {
        !matches!(self, BookingStatus::Cancelled | BookingStatus::Unknown)
    }

    pub fn counts_toward_occupancy(self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed | BookingStatus::Approved | BookingStatus::Completed
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    /// Nightly price.
    pub price: f64,
    /// Maximum number of guests.
    pub capacity: u32,
}

impl Room {
    pub fn categories(&self) -> Vec<RoomCategory> {
        RoomCategory::tags(&self.name)
    }

    /// Case-insensitive substring match on the display name.
    pub fn matches_type(&self, filter: &str) -> bool {
        self.name.to_lowercase().contains(&filter.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub check_in: Ms,
    pub check_out: Ms,
    pub guests: u32,
    pub total_price: f64,
    pub status: BookingStatus,
    pub guest_name: Option<String>,
}

impl Booking {
    /// The stay as a span. Not validated: callers reading foreign data may
    /// hand in inverted ranges, which then simply never overlap anything.
    pub fn stay(&self) -> Span {
        Span {
            start: self.check_in,
            end: self.check_out,
        }
    }
}

/// Input to booking creation. `total_price: None` prices the stay from the
/// room's nightly rate.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub check_in: Ms,
    pub check_out: Ms,
    pub guests: u32,
    pub total_price: Option<f64>,
    pub status: BookingStatus,
    pub guest_name: Option<String>,
}

/// Per-room state: the room itself plus its bookings, sorted by `check_in`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by check-in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.check_in, |b| b.check_in)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose stay could overlap `query`.
    /// Uses binary search to skip bookings checking in at or after `query.end`.
    pub fn candidates(&self, query: &Span) -> &[Booking] {
        let right_bound = self.bookings.partition_point(|b| b.check_in < query.end);
        &self.bookings[..right_bound]
    }

    pub fn has_blocking_bookings(&self) -> bool {
        self.bookings.iter().any(|b| b.status.blocks_availability())
    }
}

/// WAL record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: String,
        price: f64,
        capacity: u32,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
        price: f64,
        capacity: u32,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    /// A batch insert, possibly across rooms. One record, so replay sees
    /// every booking of the batch or none of them.
    BookingsCreated {
        bookings: Vec<Booking>,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
    },
    BookingDeleted {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Reporting types ──────────────────────────────────────────────

/// Bucket granularity for occupancy reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Hour,
    Day,
    Month,
}

impl Period {
    /// Granularity for a custom range: up to a day is hourly, up to 31 days
    /// daily, anything longer monthly.
    pub fn fit(from: Ms, to: Ms) -> Self {
        let width = to.saturating_sub(from);
        if width <= DAY_MS {
            Period::Hour
        } else if width <= 31 * DAY_MS {
            Period::Day
        } else {
            Period::Month
        }
    }

    /// Parse `hour`, `day`, `month` or `custom` (resolved through [`Period::fit`]).
    pub fn resolve(name: &str, from: Ms, to: Ms) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "hour" | "hourly" => Some(Period::Hour),
            "day" | "daily" => Some(Period::Day),
            "month" | "monthly" => Some(Period::Month),
            "custom" | "" => Some(Period::fit(from, to)),
            _ => None,
        }
    }
}

/// Occupied rooms per category, apportioned from the bucket total by each
/// category's share of the catalog. An estimate, not a per-room tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatedBreakdown {
    pub standard: f64,
    pub deluxe: f64,
    pub executive: f64,
    pub family: f64,
}

impl EstimatedBreakdown {
    pub fn get(&self, category: RoomCategory) -> f64 {
        match category {
            RoomCategory::Standard => self.standard,
            RoomCategory::Deluxe => self.deluxe,
            RoomCategory::Executive => self.executive,
            RoomCategory::Family => self.family,
        }
    }

    pub fn set(&mut self, category: RoomCategory, value: f64) {
        match category {
            RoomCategory::Standard => self.standard = value,
            RoomCategory::Deluxe => self.deluxe = value,
            RoomCategory::Executive => self.executive = value,
            RoomCategory::Family => self.family = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyBucket {
    pub label: String,
    pub start: Ms,
    /// Exclusive.
    pub end: Ms,
    pub occupied_rooms: u32,
    pub total_rooms: u32,
    pub occupancy_rate: u32,
    pub estimated_breakdown: EstimatedBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyReport {
    pub data: Vec<OccupancyBucket>,
    pub average_occupancy: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(check_in: Ms, check_out: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            check_in,
            check_out,
            guests: 1,
            total_price: 0.0,
            status: BookingStatus::Confirmed,
            guest_name: None,
        }
    }

    #[test]
    fn span_overlap_three_clauses() {
        let existing = Span::new(100, 200);
        // starts inside
        assert!(Span::new(150, 250).overlaps(&existing));
        // ends inside
        assert!(Span::new(50, 150).overlaps(&existing));
        // fully contains
        assert!(Span::new(50, 250).overlaps(&existing));
        // fully inside
        assert!(Span::new(120, 180).overlaps(&existing));
        // turnover on either side
        assert!(!Span::new(200, 300).overlaps(&existing));
        assert!(!Span::new(0, 100).overlaps(&existing));
    }

    #[test]
    fn span_overlap_symmetric() {
        let spans = [
            Span::new(0, 10),
            Span::new(5, 15),
            Span::new(10, 20),
            Span::new(0, 30),
            Span::new(25, 26),
        ];
        for a in &spans {
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn inclusive_overlap_counts_touching_checkout() {
        let bucket = Span::new(200, 300);
        // checkout exactly at bucket start
        assert!(Span::new(100, 200).overlaps_inclusive(&bucket));
        assert!(!Span::new(100, 200).overlaps(&bucket));
        // check-in at the last instant of the bucket
        assert!(Span::new(299, 400).overlaps_inclusive(&bucket));
        // check-in at bucket end belongs to the next bucket
        assert!(!Span::new(300, 400).overlaps_inclusive(&bucket));
        assert!(!Span::new(0, 199).overlaps_inclusive(&bucket));
    }

    #[test]
    fn category_tags_are_not_exclusive() {
        assert_eq!(
            RoomCategory::tags("Standard Deluxe Suite"),
            vec![RoomCategory::Standard, RoomCategory::Deluxe]
        );
        assert_eq!(RoomCategory::tags("FAMILY room"), vec![RoomCategory::Family]);
        assert!(RoomCategory::tags("Penthouse").is_empty());
    }

    #[test]
    fn status_parse_and_policy() {
        assert_eq!(BookingStatus::parse("Confirmed"), BookingStatus::Confirmed);
        assert_eq!(BookingStatus::parse(" approved "), BookingStatus::Approved);
        assert_eq!(BookingStatus::parse("canceled"), BookingStatus::Cancelled);
        assert_eq!(BookingStatus::parse(""), BookingStatus::Unknown);
        assert_eq!(BookingStatus::parse("on-hold"), BookingStatus::Unknown);

        assert!(BookingStatus::Pending.blocks_availability());
        assert!(!BookingStatus::Cancelled.blocks_availability());
        assert!(!BookingStatus::Unknown.blocks_availability());

        assert!(!BookingStatus::Pending.counts_toward_occupancy());
        assert!(BookingStatus::Approved.counts_toward_occupancy());
        assert!(BookingStatus::Completed.counts_toward_occupancy());
        assert!(!BookingStatus::Unknown.counts_toward_occupancy());
    }

    #[test]
    fn period_fit_thresholds() {
        assert_eq!(Period::fit(0, DAY_MS), Period::Hour);
        assert_eq!(Period::fit(0, DAY_MS + 1), Period::Day);
        assert_eq!(Period::fit(0, 31 * DAY_MS), Period::Day);
        assert_eq!(Period::fit(0, 31 * DAY_MS + 1), Period::Month);
        assert_eq!(Period::fit(i64::MIN, i64::MAX), Period::Month);
        assert_eq!(Period::resolve("custom", 0, 2 * DAY_MS), Some(Period::Day));
        assert_eq!(Period::resolve("MONTH", 0, 1), Some(Period::Month));
        assert_eq!(Period::resolve("week", 0, 1), None);
    }

    #[test]
    fn room_state_keeps_bookings_sorted() {
        let room = Room {
            id: Ulid::new(),
            name: "Standard 101".into(),
            price: 80.0,
            capacity: 2,
        };
        let mut rs = RoomState::new(room);
        rs.insert_booking(booking(300, 400));
        rs.insert_booking(booking(100, 200));
        rs.insert_booking(booking(200, 300));
        let starts: Vec<Ms> = rs.bookings.iter().map(|b| b.check_in).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn candidates_skip_future_bookings() {
        let room = Room {
            id: Ulid::new(),
            name: "Deluxe 201".into(),
            price: 120.0,
            capacity: 2,
        };
        let mut rs = RoomState::new(room);
        rs.insert_booking(booking(100, 200));
        rs.insert_booking(booking(450, 600));
        rs.insert_booking(booking(1000, 1100));
        let hits = rs.candidates(&Span::new(500, 800));
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|b| b.check_in < 800));
    }

    #[test]
    fn remove_missing_booking_returns_none() {
        let room = Room {
            id: Ulid::new(),
            name: "Family 3".into(),
            price: 150.0,
            capacity: 5,
        };
        let mut rs = RoomState::new(room);
        rs.insert_booking(booking(100, 200));
        assert!(rs.remove_booking(Ulid::new()).is_none());
        assert_eq!(rs.bookings.len(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking(1_000, 2_000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = OccupancyReport {
            data: vec![],
            average_occupancy: 42,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"data":[],"averageOccupancy":42}"#);
    }
}
