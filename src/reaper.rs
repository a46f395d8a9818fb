use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that periodically retires expired locks. Bounds how
/// long a stale lock stays visible to availability readers; the lazy
/// check in every reader/writer keeps correctness independent of this
/// task's cadence.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let expired = engine.collect_expired_locks(now);
        for (lock_id, _room_id) in expired {
            match engine.expire_lock(lock_id).await {
                Ok(true) => info!("reaped expired lock {lock_id}"),
                // Already confirmed/released by a racing caller — that's fine
                Ok(false) => {}
                Err(e) => tracing::debug!("reaper skip {lock_id}: {e}"),
            }
        }
    }
}

/// Background task that compacts the WAL once churn passes `threshold`
/// appends since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("vacancy_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_collects_and_expires_stale_locks() {
        let path = test_wal_path("reaper_collect.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let rid = Ulid::new();
        engine
            .register_room(rid, None, None, 1, None)
            .await
            .unwrap();

        let lock_id = Ulid::new();
        let grant = engine
            .acquire_lock(lock_id, rid, TimeRange::new(1000, 2000), "alice", Some(50))
            .await
            .unwrap();

        // Not yet expired
        assert!(engine.collect_expired_locks(grant.expires_at - 1).is_empty());

        // Past the TTL
        let expired = engine.collect_expired_locks(grant.expires_at);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0], (lock_id, rid));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(engine.expire_lock(lock_id).await.unwrap());

        // Idempotent: a second expire is a no-op
        assert!(!engine.expire_lock(lock_id).await.unwrap());
        assert!(engine.collect_expired_locks(i64::MAX - 1).is_empty());
    }
}
