use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Ms,
    pub end: Ms,
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[allow(dead_code)]
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// What a claim on a room's timeline represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimKind {
    /// Time-boxed exclusive hold, pending confirmation.
    Lock {
        owner: String,
        created_at: Ms,
        expires_at: Ms,
    },
    /// Durable reservation produced by confirming a lock.
    Booking { owner: String, created_at: Ms },
}

/// One entry in a room's reservation set — an active lock or a confirmed
/// booking. Terminal locks (released/expired/confirmed) are removed from
/// the set; the WAL retains their history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: Ulid,
    pub range: TimeRange,
    pub kind: ClaimKind,
}

impl Claim {
    /// The single liveness predicate: every reader and writer consults
    /// this before trusting a lock, whether or not the reaper has run.
    pub fn is_live(&self, now: Ms) -> bool {
        match &self.kind {
            ClaimKind::Lock { expires_at, .. } => *expires_at > now,
            ClaimKind::Booking { .. } => true,
        }
    }

    pub fn is_lock(&self) -> bool {
        matches!(self.kind, ClaimKind::Lock { .. })
    }

    pub fn owner(&self) -> &str {
        match &self.kind {
            ClaimKind::Lock { owner, .. } | ClaimKind::Booking { owner, .. } => owner,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Room type from the catalog collaborator (e.g. "conference").
    pub kind: Option<String>,
    /// Seats — catalog metadata, not a concurrency limit.
    pub capacity: u32,
    pub building: Option<String>,
    /// Live claims (active locks + confirmed bookings), sorted by `range.start`.
    pub claims: Vec<Claim>,
}

impl RoomState {
    pub fn new(
        id: Ulid,
        name: Option<String>,
        kind: Option<String>,
        capacity: u32,
        building: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            capacity,
            building,
            claims: Vec::new(),
        }
    }

    /// Insert claim maintaining sort order by range.start.
    pub fn insert_claim(&mut self, claim: Claim) {
        let pos = self
            .claims
            .binary_search_by_key(&claim.range.start, |c| c.range.start)
            .unwrap_or_else(|e| e);
        self.claims.insert(pos, claim);
    }

    /// Remove claim by id.
    pub fn remove_claim(&mut self, id: Ulid) -> Option<Claim> {
        if let Some(pos) = self.claims.iter().position(|c| c.id == id) {
            Some(self.claims.remove(pos))
        } else {
            None
        }
    }

    pub fn get_claim(&self, id: Ulid) -> Option<&Claim> {
        self.claims.iter().find(|c| c.id == id)
    }

    /// Return only claims whose range overlaps the query window.
    /// Uses binary search to skip claims starting at or after `query.end`.
    pub fn overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &Claim> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self.claims.partition_point(|c| c.range.start < query.end);
        self.claims[..right_bound]
            .iter()
            .filter(move |c| c.range.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomRegistered {
        id: Ulid,
        name: Option<String>,
        kind: Option<String>,
        capacity: u32,
        building: Option<String>,
    },
    LockAcquired {
        id: Ulid,
        room_id: Ulid,
        range: TimeRange,
        owner: String,
        created_at: Ms,
        expires_at: Ms,
    },
    LockReleased {
        id: Ulid,
        room_id: Ulid,
    },
    LockExpired {
        id: Ulid,
        room_id: Ulid,
    },
    /// Retires `via_lock` (when present) and creates the booking in one
    /// record, so the two effects are durable together or not at all.
    /// `via_lock` is None only for compaction-rewritten standing bookings.
    BookingConfirmed {
        id: Ulid,
        room_id: Ulid,
        range: TimeRange,
        owner: String,
        created_at: Ms,
        via_lock: Option<Ulid>,
    },
}

impl Event {
    /// The room an event belongs to.
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomRegistered { id, .. } => *id,
            Event::LockAcquired { room_id, .. }
            | Event::LockReleased { room_id, .. }
            | Event::LockExpired { room_id, .. }
            | Event::BookingConfirmed { room_id, .. } => *room_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub capacity: u32,
    pub building: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub range: TimeRange,
    pub owner: String,
    pub created_at: Ms,
    pub expires_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub range: TimeRange,
    pub owner: String,
    pub created_at: Ms,
}
