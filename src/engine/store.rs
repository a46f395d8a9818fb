use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Secondary indexes over the per-room claim state: claim id → room id
/// (the only way release/confirm find their room), and owner → booking
/// ids (the "my bookings" listing). Rebuilt from the WAL through the same
/// apply path as live traffic.
pub struct ClaimIndex {
    claim_to_room: DashMap<Ulid, Ulid>,
    owner_bookings: DashMap<String, Vec<Ulid>>,
}

impl Default for ClaimIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimIndex {
    pub fn new() -> Self {
        Self {
            claim_to_room: DashMap::new(),
            owner_bookings: DashMap::new(),
        }
    }

    pub fn room_for_claim(&self, claim_id: &Ulid) -> Option<Ulid> {
        self.claim_to_room.get(claim_id).map(|e| *e.value())
    }

    pub fn contains_claim(&self, claim_id: &Ulid) -> bool {
        self.claim_to_room.contains_key(claim_id)
    }

    pub fn booking_ids_for_owner(&self, owner: &str) -> Vec<Ulid> {
        self.owner_bookings
            .get(owner)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn map_claim(&self, claim_id: Ulid, room_id: Ulid) {
        self.claim_to_room.insert(claim_id, room_id);
    }

    fn unmap_claim(&self, claim_id: &Ulid) {
        self.claim_to_room.remove(claim_id);
    }

    fn record_owner_booking(&self, owner: &str, booking_id: Ulid) {
        self.owner_bookings
            .entry(owner.to_string())
            .or_default()
            .push(booking_id);
    }
}

/// Apply an event to a RoomState (no locking — caller holds the room's
/// write lock, or is the sole owner during replay). The single place
/// events mutate claim state and indexes.
pub fn apply_to_room(rs: &mut RoomState, event: &Event, index: &ClaimIndex) {
    match event {
        Event::LockAcquired {
            id,
            room_id,
            range,
            owner,
            created_at,
            expires_at,
        } => {
            rs.insert_claim(Claim {
                id: *id,
                range: *range,
                kind: ClaimKind::Lock {
                    owner: owner.clone(),
                    created_at: *created_at,
                    expires_at: *expires_at,
                },
            });
            index.map_claim(*id, *room_id);
        }
        Event::LockReleased { id, .. } | Event::LockExpired { id, .. } => {
            rs.remove_claim(*id);
            index.unmap_claim(id);
        }
        Event::BookingConfirmed {
            id,
            room_id,
            range,
            owner,
            created_at,
            via_lock,
        } => {
            if let Some(lock_id) = via_lock {
                rs.remove_claim(*lock_id);
                index.unmap_claim(lock_id);
            }
            rs.insert_claim(Claim {
                id: *id,
                range: *range,
                kind: ClaimKind::Booking {
                    owner: owner.clone(),
                    created_at: *created_at,
                },
            });
            index.map_claim(*id, *room_id);
            index.record_owner_booking(owner, *id);
        }
        // Room registration is handled at the room-map level, not here
        Event::RoomRegistered { .. } => {}
    }
}
