use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input (inverted range, bad TTL, …). Never retried.
    Validation(&'static str),
    /// The room id is not in the catalog.
    UnknownRoom(Ulid),
    /// Expected contention outcome: an overlapping live claim exists.
    RoomUnavailable { room_id: Ulid, conflict: Ulid },
    /// Unknown lock id, or the id belongs to a retired lock.
    LockNotFound(Ulid),
    /// The lock's TTL lapsed before confirm — re-search and re-acquire.
    LockExpired(Ulid),
    /// Caller is not the principal that acquired the lock.
    OwnerMismatch(Ulid),
    /// Room/lock/booking ids are single-use.
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::UnknownRoom(id) => write!(f, "unknown room: {id}"),
            EngineError::RoomUnavailable { room_id, conflict } => {
                write!(f, "room {room_id} unavailable: conflicts with {conflict}")
            }
            EngineError::LockNotFound(id) => write!(f, "lock not found: {id}"),
            EngineError::LockExpired(id) => write!(f, "lock expired: {id}"),
            EngineError::OwnerMismatch(id) => write!(f, "owner mismatch for lock: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
