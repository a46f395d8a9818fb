use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_range};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Catalog sync entry point for the (external) room-catalog
    /// collaborator. Rooms are never updated or deleted here.
    pub async fn register_room(
        &self,
        id: Ulid,
        name: Option<String>,
        kind: Option<String>,
        capacity: u32,
        building: Option<String>,
    ) -> Result<(), EngineError> {
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        for field in [&name, &kind, &building].into_iter().flatten() {
            if field.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("room field too long"));
            }
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomRegistered {
            id,
            name: name.clone(),
            kind: kind.clone(),
            capacity,
            building: building.clone(),
        };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, name, kind, capacity, building);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Place a time-boxed exclusive lock on `room_id` for `range`.
    ///
    /// The overlap check and the lock creation run under the room's write
    /// lock as one indivisible step: of any set of concurrent overlapping
    /// attempts on the same room, exactly one succeeds and the rest get
    /// `RoomUnavailable`. A prior availability query is never trusted.
    pub async fn acquire_lock(
        &self,
        id: Ulid,
        room_id: Ulid,
        range: TimeRange,
        owner: &str,
        ttl_ms: Option<Ms>,
    ) -> Result<LockInfo, EngineError> {
        validate_range(&range)?;
        if owner.is_empty() {
            return Err(EngineError::Validation("owner must not be empty"));
        }
        let ttl = match ttl_ms {
            Some(t) if t <= 0 => return Err(EngineError::Validation("ttl must be positive")),
            Some(t) => t.min(MAX_LOCK_TTL_MS),
            None => DEFAULT_LOCK_TTL_MS,
        };
        if self.index.contains_claim(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::UnknownRoom(room_id))?;
        let mut guard = rs.write().await;
        if guard.claims.len() >= MAX_CLAIMS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many claims on room"));
        }

        let now = now_ms();
        check_no_conflict(&guard, &range, now)?;

        let expires_at = now + ttl;
        let event = Event::LockAcquired {
            id,
            room_id,
            range,
            owner: owner.to_string(),
            created_at: now,
            expires_at,
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;

        Ok(LockInfo {
            id,
            room_id,
            range,
            owner: owner.to_string(),
            created_at: now,
            expires_at,
        })
    }

    /// Release an active lock, freeing the room+range immediately.
    /// Valid only for the lock's owner while the lock is still live.
    pub async fn release_lock(&self, id: Ulid, owner: &str) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_claim_write(&id).await?;

        let (live, is_lock, owner_matches) = {
            // Re-check under the lock — the claim may have been retired
            // between the index lookup and acquiring the guard.
            let claim = guard.get_claim(id).ok_or(EngineError::LockNotFound(id))?;
            (claim.is_live(now_ms()), claim.is_lock(), claim.owner() == owner)
        };
        if !is_lock {
            return Err(EngineError::LockNotFound(id));
        }
        if !owner_matches {
            return Err(EngineError::OwnerMismatch(id));
        }
        if !live {
            // Lazy expiry: retire it, then report the terminal state.
            let event = Event::LockExpired { id, room_id };
            self.persist_and_apply(room_id, &mut guard, &event).await?;
            return Err(EngineError::LockNotFound(id));
        }

        let event = Event::LockReleased { id, room_id };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(room_id)
    }

    /// Retire an active lock whose TTL has lapsed. Idempotent: unknown,
    /// already-terminal, or still-live locks are a no-op. Invoked by the
    /// reaper and lazily by readers; correctness never depends on it.
    pub async fn expire_lock(&self, id: Ulid) -> Result<bool, EngineError> {
        let Some(room_id) = self.room_for_claim(&id) else {
            return Ok(false);
        };
        let Some(rs) = self.get_room(&room_id) else {
            return Ok(false);
        };
        let mut guard = rs.write().await;

        let expired = match guard.get_claim(id) {
            Some(claim) => claim.is_lock() && !claim.is_live(now_ms()),
            None => false,
        };
        if !expired {
            return Ok(false);
        }

        let event = Event::LockExpired { id, room_id };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(true)
    }

    /// Atomically convert an active lock into a durable booking: one WAL
    /// record retires the lock and creates the booking, so the two
    /// transitions are visible together or not at all — including across
    /// crash and replay. Lock ids are single-use; a second confirm finds
    /// nothing.
    pub async fn confirm_booking(
        &self,
        booking_id: Ulid,
        lock_id: Ulid,
        owner: &str,
    ) -> Result<BookingInfo, EngineError> {
        if owner.is_empty() {
            return Err(EngineError::Validation("owner must not be empty"));
        }
        if self.index.contains_claim(&booking_id) {
            return Err(EngineError::AlreadyExists(booking_id));
        }

        let (room_id, mut guard) = self.resolve_claim_write(&lock_id).await?;

        let now = now_ms();
        let (range, live) = {
            let claim = guard
                .get_claim(lock_id)
                .ok_or(EngineError::LockNotFound(lock_id))?;
            if !claim.is_lock() {
                return Err(EngineError::LockNotFound(lock_id));
            }
            if claim.owner() != owner {
                // State untouched — a stranger's confirm must not even
                // trigger the lazy expiry write.
                return Err(EngineError::OwnerMismatch(lock_id));
            }
            (claim.range, claim.is_live(now))
        };

        if !live {
            let event = Event::LockExpired { id: lock_id, room_id };
            self.persist_and_apply(room_id, &mut guard, &event).await?;
            return Err(EngineError::LockExpired(lock_id));
        }

        let event = Event::BookingConfirmed {
            id: booking_id,
            room_id,
            range,
            owner: owner.to_string(),
            created_at: now,
            via_lock: Some(lock_id),
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;

        Ok(BookingInfo {
            id: booking_id,
            room_id,
            range,
            owner: owner.to_string(),
            created_at: now,
        })
    }

    /// Scan for active locks past their TTL. Rooms whose lock is briefly
    /// contended are skipped — the next sweep catches them.
    pub fn collect_expired_locks(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for claim in &guard.claims {
                    if let ClaimKind::Lock { expires_at, .. } = claim.kind
                        && expires_at <= now
                    {
                        expired.push((claim.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: the catalog plus every standing claim.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        for id in room_ids {
            let Some(rs) = self.get_room(&id) else {
                continue;
            };
            let guard = rs.read().await;

            events.push(Event::RoomRegistered {
                id: guard.id,
                name: guard.name.clone(),
                kind: guard.kind.clone(),
                capacity: guard.capacity,
                building: guard.building.clone(),
            });

            for claim in &guard.claims {
                match &claim.kind {
                    ClaimKind::Lock {
                        owner,
                        created_at,
                        expires_at,
                    } => events.push(Event::LockAcquired {
                        id: claim.id,
                        room_id: guard.id,
                        range: claim.range,
                        owner: owner.clone(),
                        created_at: *created_at,
                        expires_at: *expires_at,
                    }),
                    ClaimKind::Booking { owner, created_at } => {
                        events.push(Event::BookingConfirmed {
                            id: claim.id,
                            room_id: guard.id,
                            range: claim.range,
                            owner: owner.clone(),
                            created_at: *created_at,
                            via_lock: None,
                        })
                    }
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
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
