//! Server-enforced bounds. Clients cannot request anything outside these.

use crate::model::Ms;

/// Earliest accepted timestamp.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// Latest accepted timestamp.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000; // 2100-01-01T00:00:00Z

/// A single reservation may not span more than 7 days.
pub const MAX_RANGE_DURATION_MS: Ms = 7 * 24 * 3_600_000;

/// Lock TTL applied when the client doesn't ask for one.
pub const DEFAULT_LOCK_TTL_MS: Ms = 5 * 60_000;
/// Requested TTLs are clamped here — no unbounded holds.
pub const MAX_LOCK_TTL_MS: Ms = 3_600_000;

/// Widest availability / free-window query.
pub const MAX_QUERY_WINDOW_MS: Ms = 90 * 24 * 3_600_000;

pub const MAX_ROOMS_PER_TENANT: usize = 4096;
pub const MAX_CLAIMS_PER_ROOM: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_IN_CLAUSE_IDS: usize = 256;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 120;
