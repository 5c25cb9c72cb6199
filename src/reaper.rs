use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::engine::now_ms;

/// Background task that periodically purges dead guest sessions (revoked at
/// check-out, or past their expiry).
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let dead = engine.collect_dead_sessions(now_ms());
        if dead.is_empty() {
            continue;
        }
        let count = dead.len();
        match engine.purge_sessions(dead).await {
            Ok(()) => info!(hotel = engine.hotel(), count, "reaped dead sessions"),
            Err(e) => tracing::warn!(hotel = engine.hotel(), "session reap failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(hotel = engine.hotel(), appends, "compacted WAL"),
            Err(e) => tracing::warn!(hotel = engine.hotel(), "compaction failed: {e}"),
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
        let dir = std::env::temp_dir().join("frontdesk_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_inputs_track_session_death() {
        let path = test_wal_path("reaper_collect.wal");
        let engine =
            Arc::new(Engine::new("grand", path, Arc::new(NotifyHub::new())).unwrap());

        engine.create_room("101").await.unwrap();
        let today = 20_240;
        let now: Ms = today as Ms * MS_PER_DAY;
        engine
            .register_booking(BookingState {
                id: Ulid::new(),
                status: BookingStatus::Confirmed,
                room_number: Some("101".into()),
                check_in: today,
                check_out: today + 2,
                paid_at: Some(now),
                checked_in_at: None,
                checked_out_at: None,
                created_at: now,
                party: vec![PartyMember {
                    id: Ulid::new(),
                    role: GuestRole::Primary,
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    email: None,
                    phone: None,
                }],
            })
            .await
            .unwrap();
        engine.check_in("101", today, now).await.unwrap();
        assert!(engine.collect_dead_sessions(now).is_empty());

        engine.check_out("101", now + MS_PER_DAY).await.unwrap();
        let dead = engine.collect_dead_sessions(now + MS_PER_DAY);
        assert_eq!(dead.len(), 1);

        engine.purge_sessions(dead).await.unwrap();
        assert!(engine.collect_dead_sessions(now + MS_PER_DAY).is_empty());
    }
}
