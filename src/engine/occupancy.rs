use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use ulid::Ulid;

use crate::model::*;

// ── Occupancy Aggregation ─────────────────────────────────────────

/// Time-bucketed occupancy over `[from, to]` (both ends inclusive).
///
/// Buckets are calendar-aligned in UTC, from the bucket containing `from`
/// through the bucket containing `to`. A booking occupies a bucket when
/// `check_in <= bucket_last && check_out >= bucket_start`, which is looser
/// than the strict overlap used for booking: a checkout at midnight still
/// marks the room occupied for that day. Only confirmed, approved and
/// completed bookings count.
///
/// `room_type` narrows the catalog by case-insensitive name match; `None`,
/// `""` and `"all"` mean no filter. Never fails: `to < from` gives an empty
/// series, an empty catalog gives zero rates.
pub fn compute_occupancy(
    rooms: &[Room],
    bookings: &[Booking],
    period: Period,
    from: Ms,
    to: Ms,
    room_type: Option<&str>,
) -> OccupancyReport {
    let filter = room_type
        .map(str::trim)
        .filter(|f| !f.is_empty() && !f.eq_ignore_ascii_case("all"));

    let catalog: Vec<&Room> = rooms
        .iter()
        .filter(|r| filter.is_none_or(|f| r.matches_type(f)))
        .collect();
    let total_rooms = catalog.len() as u32;
    let in_catalog: HashSet<Ulid> = catalog.iter().map(|r| r.id).collect();

    let mut rooms_by_type: HashMap<RoomCategory, u32> = HashMap::new();
    for room in &catalog {
        for category in room.categories() {
            *rooms_by_type.entry(category).or_default() += 1;
        }
    }

    let occupying: Vec<&Booking> = bookings
        .iter()
        .filter(|b| b.status.counts_toward_occupancy() && in_catalog.contains(&b.room_id))
        .collect();

    let data: Vec<OccupancyBucket> = bucket_spans(period, from, to)
        .into_iter()
        .map(|(span, label)| {
            let occupied: HashSet<Ulid> = occupying
                .iter()
                .filter(|b| b.stay().overlaps_inclusive(&span))
                .map(|b| b.room_id)
                .collect();
            let occupied_rooms = occupied.len() as u32;
            OccupancyBucket {
                label,
                start: span.start,
                end: span.end,
                occupied_rooms,
                total_rooms,
                occupancy_rate: occupancy_rate(occupied_rooms, total_rooms),
                estimated_breakdown: estimate_breakdown(occupied_rooms, total_rooms, &rooms_by_type),
            }
        })
        .collect();

    let average_occupancy = if data.is_empty() {
        0
    } else {
        let sum: u64 = data.iter().map(|b| b.occupancy_rate as u64).sum();
        (sum as f64 / data.len() as f64).round() as u32
    };

    OccupancyReport {
        data,
        average_occupancy,
    }
}

/// `round(occupied / total * 100)`, 0 for an empty catalog.
pub fn occupancy_rate(occupied: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let rate = (occupied as f64 / total as f64 * 100.0).round() as u32;
    rate.min(100)
}

/// Apportion `occupied` across categories by each category's share of the
/// catalog, capped at the category's own room count.
fn estimate_breakdown(
    occupied: u32,
    total: u32,
    rooms_by_type: &HashMap<RoomCategory, u32>,
) -> EstimatedBreakdown {
    let mut breakdown = EstimatedBreakdown::default();
    if total == 0 {
        return breakdown;
    }
    for category in RoomCategory::ALL {
        let in_type = rooms_by_type.get(&category).copied().unwrap_or(0) as f64;
        let estimate = occupied as f64 * (in_type / total as f64);
        breakdown.set(category, estimate.min(in_type));
    }
    breakdown
}

/// Number of buckets `compute_occupancy` would produce, without building them.
pub fn bucket_count(period: Period, from: Ms, to: Ms) -> usize {
    if to < from {
        return 0;
    }
    match period {
        Period::Hour => ((floor_to(to, HOUR_MS) - floor_to(from, HOUR_MS)) / HOUR_MS + 1) as usize,
        Period::Day => ((floor_to(to, DAY_MS) - floor_to(from, DAY_MS)) / DAY_MS + 1) as usize,
        Period::Month => match (utc(from), utc(to)) {
            (Some(a), Some(b)) => {
                let months = (b.year() - a.year()) as i64 * 12 + b.month() as i64 - a.month() as i64;
                (months + 1) as usize
            }
            _ => 0,
        },
    }
}

/// Bucket spans (end exclusive) with their display labels.
pub(crate) fn bucket_spans(period: Period, from: Ms, to: Ms) -> Vec<(Span, String)> {
    if to < from {
        return Vec::new();
    }
    match period {
        Period::Hour => fixed_buckets(from, to, HOUR_MS, "%-H:00"),
        Period::Day => fixed_buckets(from, to, DAY_MS, "%-m/%-d"),
        Period::Month => month_buckets(from, to),
    }
}

fn fixed_buckets(from: Ms, to: Ms, unit: Ms, label_fmt: &str) -> Vec<(Span, String)> {
    let mut out = Vec::new();
    let last = floor_to(to, unit);
    let mut start = floor_to(from, unit);
    while start <= last {
        let Some(dt) = utc(start) else { break };
        out.push((Span::new(start, start + unit), dt.format(label_fmt).to_string()));
        start += unit;
    }
    out
}

fn month_buckets(from: Ms, to: Ms) -> Vec<(Span, String)> {
    let (Some(first), Some(last)) = (utc(from), utc(to)) else {
        return Vec::new();
    };
    let Some(mut month) = NaiveDate::from_ymd_opt(first.year(), first.month(), 1) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    while (month.year(), month.month()) <= (last.year(), last.month()) {
        let Some(next) = month.checked_add_months(Months::new(1)) else { break };
        let start = midnight_ms(month);
        let end = midnight_ms(next);
        out.push((Span::new(start, end), month.format("%b %Y").to_string()));
        month = next;
    }
    out
}

fn floor_to(t: Ms, unit: Ms) -> Ms {
    t - t.rem_euclid(unit)
}

fn utc(t: Ms) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(t)
}

fn midnight_ms(date: NaiveDate) -> Ms {
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp_millis()
}
