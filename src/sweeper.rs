//! Background retention sweep for dedup records.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::{DedupStore, StoreError};

pub async fn sweep_once(
    store: &dyn DedupStore,
    retention: chrono::Duration,
) -> Result<u64, StoreError> {
    let removed = store.sweep_expired(retention).await?;
    info!(
        removed,
        retention_days = retention.num_days(),
        "swept expired dedup records"
    );
    Ok(removed)
}

/// Sweep at start-up and then every `every`, until `shutdown` fires.
/// Failures are logged and retried on the next interval.
pub async fn run_sweeper(
    store: Arc<dyn DedupStore>,
    retention: chrono::Duration,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if let Err(err) = sweep_once(store.as_ref(), retention).await {
            error!(?err, "retention sweep failed");
        }
    }
    info!("retention sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, SqliteDedupStore};
    use crate::model::Classification;
    use chrono::Utc;

    async fn setup_store() -> SqliteDedupStore {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteDedupStore::new(pool)
    }

    #[tokio::test]
    async fn sweeper_runs_immediately_and_stops_on_cancel() {
        let store = setup_store().await;
        db::mark_delivered_at(
            store.pool(),
            "old",
            None,
            Classification::NewThread,
            Utc::now() - chrono::Duration::days(30),
        )
        .await
        .unwrap();
        db::mark_delivered(store.pool(), "new", None, Classification::NewThread)
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(
            Arc::new(store.clone()),
            chrono::Duration::days(7),
            Duration::from_secs(3600),
            shutdown.clone(),
        ));

        for _ in 0..50 {
            if !db::has_delivered(store.pool(), "old").await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!db::has_delivered(store.pool(), "old").await.unwrap());
        assert!(db::has_delivered(store.pool(), "new").await.unwrap());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
