use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{free_windows, room_is_free};
use super::conflict::{now_ms, validate_range};
use super::{Engine, EngineError};

impl Engine {
    /// Availability search: which of `candidates` are free for `range`?
    /// Empty `candidates` means the whole catalog. Unknown ids are
    /// skipped. This is a snapshot read and reserves nothing — acquire
    /// re-validates under the room lock.
    pub async fn free_rooms(
        &self,
        candidates: &[Ulid],
        query: TimeRange,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        validate_range(&query)?;
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        if candidates.len() > MAX_IN_CLAUSE_IDS {
            return Err(EngineError::LimitExceeded("too many room IDs"));
        }

        let room_ids: Vec<Ulid> = if candidates.is_empty() {
            self.rooms.iter().map(|e| *e.key()).collect()
        } else {
            candidates.to_vec()
        };

        let now = now_ms();
        let mut free = Vec::new();
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else {
                continue;
            };
            let guard = rs.read().await;
            if room_is_free(&guard, &query, now) {
                free.push(RoomInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    kind: guard.kind.clone(),
                    capacity: guard.capacity,
                    building: guard.building.clone(),
                });
            }
        }
        free.sort_by_key(|r| r.id);
        Ok(free)
    }

    /// The free sub-intervals of `query` for one room, optionally keeping
    /// only windows at least `min_duration_ms` wide.
    pub async fn free_windows_for_room(
        &self,
        room_id: Ulid,
        query: TimeRange,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<TimeRange>, EngineError> {
        validate_range(&query)?;
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::UnknownRoom(room_id))?;
        let guard = rs.read().await;

        let mut free = free_windows(&guard, &query, now_ms());
        if let Some(min_dur) = min_duration_ms {
            free.retain(|w| w.duration_ms() >= min_dur);
        }
        Ok(free)
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        let mut rooms = Vec::with_capacity(room_ids.len());
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else {
                continue;
            };
            let guard = rs.read().await;
            rooms.push(RoomInfo {
                id: guard.id,
                name: guard.name.clone(),
                kind: guard.kind.clone(),
                capacity: guard.capacity,
                building: guard.building.clone(),
            });
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    /// "My bookings" — everything the owner has confirmed, oldest first.
    pub async fn bookings_for_owner(&self, owner: &str) -> Vec<BookingInfo> {
        let ids = self.index.booking_ids_for_owner(owner);
        let mut bookings = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(room_id) = self.room_for_claim(&id) else {
                continue;
            };
            let Some(rs) = self.get_room(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            if let Some(claim) = guard.get_claim(id)
                && let ClaimKind::Booking { owner, created_at } = &claim.kind
            {
                bookings.push(BookingInfo {
                    id,
                    room_id,
                    range: claim.range,
                    owner: owner.clone(),
                    created_at: *created_at,
                });
            }
        }
        bookings.sort_by_key(|b| b.id);
        bookings
    }

    pub async fn bookings_for_room(&self, room_id: Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::UnknownRoom(room_id))?;
        let guard = rs.read().await;
        Ok(guard
            .claims
            .iter()
            .filter_map(|c| match &c.kind {
                ClaimKind::Booking { owner, created_at } => Some(BookingInfo {
                    id: c.id,
                    room_id,
                    range: c.range,
                    owner: owner.clone(),
                    created_at: *created_at,
                }),
                _ => None,
            })
            .collect())
    }

    /// A room's live locks. Expired-but-unreaped locks are filtered out —
    /// readers never see a stale lock as active.
    pub async fn locks_for_room(&self, room_id: Ulid) -> Result<Vec<LockInfo>, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::UnknownRoom(room_id))?;
        let guard = rs.read().await;
        let now = now_ms();
        Ok(guard
            .claims
            .iter()
            .filter(|c| c.is_live(now))
            .filter_map(|c| match &c.kind {
                ClaimKind::Lock {
                    owner,
                    created_at,
                    expires_at,
                } => Some(LockInfo {
                    id: c.id,
                    room_id,
                    range: c.range,
                    owner: owner.clone(),
                    created_at: *created_at,
                    expires_at: *expires_at,
                }),
                _ => None,
            })
            .collect())
    }
}
