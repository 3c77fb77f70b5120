use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};

/// Compact once more than `threshold` appends have accumulated.
/// Returns whether a compaction ran.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return Ok(false);
    }
    debug!(appends, threshold, "compacting WAL");
    engine.compact_wal().await?;
    Ok(true)
}

/// Background task that periodically checks whether the WAL needs compacting.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    // tokio::time::interval panics on a zero period.
    let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = maybe_compact(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::notify::NotifyHub;
    use crate::wal::Wal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("appointly_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(path: PathBuf) -> Engine {
        Engine::new(path, EngineSettings::default(), Arc::new(NotifyHub::new())).unwrap()
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let path = test_wal_path("below_threshold.wal");
        let engine = engine(path);
        engine.register_provider(Ulid::new(), None).await.unwrap();

        assert!(!maybe_compact(&engine, 10).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn above_threshold_compacts_and_resets() {
        let path = test_wal_path("above_threshold.wal");
        let engine = engine(path.clone());
        for _ in 0..5 {
            engine.register_provider(Ulid::new(), None).await.unwrap();
        }

        assert!(maybe_compact(&engine, 3).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(Wal::replay(&path).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn background_task_compacts() {
        let path = test_wal_path("background.wal");
        let engine = Arc::new(engine(path));
        for _ in 0..3 {
            engine.register_provider(Ulid::new(), None).await.unwrap();
        }

        let task = tokio::spawn(run_compactor(engine.clone(), 1, Duration::from_millis(10)));
        let mut compacted = false;
        for _ in 0..100 {
            if engine.wal_appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert!(compacted, "compactor never ran");
    }
}
