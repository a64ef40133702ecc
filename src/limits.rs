use crate::model::{DAY_MS, Ms};

pub const MAX_ROOMS_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 50_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_GUEST_NAME_LEN: usize = 256;
pub const MAX_BATCH_SIZE: usize = 1_000;
pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single stay.
pub const MAX_STAY_MS: Ms = 366 * DAY_MS;
/// Widest availability query.
pub const MAX_AVAILABILITY_WINDOW_MS: Ms = 366 * DAY_MS;
/// Widest occupancy report range. Ten years of monthly buckets.
pub const MAX_REPORT_WINDOW_MS: Ms = 3_660 * DAY_MS;
/// Caps hourly and daily reports, which would otherwise grow with the range.
pub const MAX_REPORT_BUCKETS: usize = 5_000;
