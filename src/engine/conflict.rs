use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_range(range: &TimeRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.start >= range.end {
        return Err(EngineError::Validation("range start must be before end"));
    }
    if range.start < MIN_VALID_TIMESTAMP_MS || range.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if range.duration_ms() > MAX_RANGE_DURATION_MS {
        return Err(EngineError::LimitExceeded("range too wide"));
    }
    Ok(())
}

/// The authoritative overlap gate: any live claim (active lock or
/// confirmed booking) intersecting `range` is a conflict. Expired locks
/// are skipped here rather than mutated — the reaper or a lazy reader
/// retires them. Callers hold the room's write lock.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    range: &TimeRange,
    now: Ms,
) -> Result<(), EngineError> {
    for claim in rs.overlapping(range) {
        if claim.is_live(now) {
            return Err(EngineError::RoomUnavailable {
                room_id: rs.id,
                conflict: claim.id,
            });
        }
    }
    Ok(())
}
