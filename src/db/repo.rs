use super::model::StoreError;
use crate::model::{Classification, DedupRecord, NotificationPreference};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/`, make sure the parent
/// directory exists and create the file on first use. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            if !q.split('&').any(|kv| kv.starts_with("mode=")) {
                rebuilt.push_str("&mode=rwc");
            }
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn has_delivered(pool: &Pool, message_id: &str) -> StoreResult<bool> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM delivered_messages WHERE message_id = ?",
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

#[instrument(skip_all)]
pub async fn mark_delivered(
    pool: &Pool,
    message_id: &str,
    conversation_id: Option<&str>,
    kind: Classification,
) -> StoreResult<()> {
    mark_delivered_at(pool, message_id, conversation_id, kind, Utc::now()).await
}

/// Upsert keyed by `message_id`. A repeated call keeps the first `sent_at`.
#[instrument(skip_all)]
pub async fn mark_delivered_at(
    pool: &Pool,
    message_id: &str,
    conversation_id: Option<&str>,
    kind: Classification,
    sent_at: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO delivered_messages (message_id, sent_at, conversation_id, notification_kind) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT(message_id) DO UPDATE SET \
             conversation_id = COALESCE(excluded.conversation_id, delivered_messages.conversation_id), \
             notification_kind = excluded.notification_kind",
    )
    .bind(message_id)
    .bind(sent_at.timestamp())
    .bind(conversation_id)
    .bind(kind.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete records whose `sent_at` is older than `now - retention`. Returns rows removed.
#[instrument(skip_all)]
pub async fn sweep_expired(pool: &Pool, retention: chrono::Duration) -> StoreResult<u64> {
    let cutoff = (Utc::now() - retention).timestamp();
    let res = sqlx::query("DELETE FROM delivered_messages WHERE sent_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn recent_records(pool: &Pool, limit: u32) -> StoreResult<Vec<DedupRecord>> {
    let rows = sqlx::query(
        "SELECT message_id, sent_at, conversation_id, notification_kind \
         FROM delivered_messages ORDER BY sent_at DESC, rowid DESC LIMIT ?",
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(dedup_record_from_row).collect()
}

fn dedup_record_from_row(row: &SqliteRow) -> StoreResult<DedupRecord> {
    let message_id: String = row.get("message_id");
    let sent_at: i64 = row.get("sent_at");
    let kind: String = row.get("notification_kind");
    let notification_kind = Classification::parse_kind(&kind).ok_or_else(|| {
        StoreError::Corrupt(format!("record {} has unknown kind {}", message_id, kind))
    })?;
    Ok(DedupRecord {
        sent_at: timestamp_to_utc(sent_at)?,
        conversation_id: row
            .try_get::<Option<String>, _>("conversation_id")
            .ok()
            .flatten(),
        notification_kind,
        message_id,
    })
}

#[instrument(skip_all)]
pub async fn count_delivered(pool: &Pool) -> StoreResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delivered_messages")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn notification_preference(
    pool: &Pool,
    user_id: &str,
) -> StoreResult<Option<NotificationPreference>> {
    let row = sqlx::query(
        "SELECT user_id, notify_new_thread, notify_new_message, notify_system, updated_at \
         FROM notification_preferences WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let flag = |col: &str| -> bool { row.get::<i64, _>(col) != 0 };
    Ok(Some(NotificationPreference {
        user_id: row.get("user_id"),
        notify_new_thread: flag("notify_new_thread"),
        notify_new_message: flag("notify_new_message"),
        notify_system: flag("notify_system"),
        updated_at: timestamp_to_utc(row.get("updated_at"))?,
    }))
}

#[instrument(skip_all)]
pub async fn upsert_notification_preference(
    pool: &Pool,
    pref: &NotificationPreference,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO notification_preferences \
             (user_id, notify_new_thread, notify_new_message, notify_system, updated_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET \
             notify_new_thread = excluded.notify_new_thread, \
             notify_new_message = excluded.notify_new_message, \
             notify_system = excluded.notify_system, \
             updated_at = excluded.updated_at",
    )
    .bind(&pref.user_id)
    .bind(pref.notify_new_thread as i64)
    .bind(pref.notify_new_message as i64)
    .bind(pref.notify_system as i64)
    .bind(pref.updated_at.timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

fn timestamp_to_utc(secs: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {} out of range", secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn mark_then_has_delivered() {
        let pool = setup_pool().await;
        assert!(!has_delivered(&pool, "msg-1").await.unwrap());
        mark_delivered(&pool, "msg-1", Some("conv-1"), Classification::NewThread)
            .await
            .unwrap();
        assert!(has_delivered(&pool, "msg-1").await.unwrap());
        assert!(!has_delivered(&pool, "msg-2").await.unwrap());
    }

    #[tokio::test]
    async fn mark_delivered_is_idempotent() {
        let pool = setup_pool().await;
        let first = Utc::now() - chrono::Duration::hours(1);
        mark_delivered_at(&pool, "msg-1", Some("conv-1"), Classification::NewThread, first)
            .await
            .unwrap();
        mark_delivered_at(&pool, "msg-1", None, Classification::NewThread, Utc::now())
            .await
            .unwrap();

        assert_eq!(count_delivered(&pool).await.unwrap(), 1);
        let records = recent_records(&pool, 10).await.unwrap();
        assert_eq!(records[0].sent_at.timestamp(), first.timestamp());
        assert_eq!(records[0].conversation_id.as_deref(), Some("conv-1"));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let pool = setup_pool().await;
        let now = Utc::now();
        mark_delivered_at(
            &pool,
            "old",
            None,
            Classification::NewMessage,
            now - chrono::Duration::days(8),
        )
        .await
        .unwrap();
        mark_delivered_at(
            &pool,
            "fresh",
            None,
            Classification::NewMessage,
            now - chrono::Duration::days(6),
        )
        .await
        .unwrap();

        let removed = sweep_expired(&pool, chrono::Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!has_delivered(&pool, "old").await.unwrap());
        assert!(has_delivered(&pool, "fresh").await.unwrap());
    }

    #[tokio::test]
    async fn recent_records_newest_first_and_limited() {
        let pool = setup_pool().await;
        let now = Utc::now();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            mark_delivered_at(
                &pool,
                id,
                None,
                Classification::NewMessage,
                now - chrono::Duration::minutes(10 - i as i64),
            )
            .await
            .unwrap();
        }
        let records = recent_records(&pool, 2).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn preference_roundtrip_and_absence() {
        let pool = setup_pool().await;
        assert!(notification_preference(&pool, "u1").await.unwrap().is_none());

        let pref = NotificationPreference {
            user_id: "u1".into(),
            notify_new_thread: true,
            notify_new_message: false,
            notify_system: true,
            updated_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        upsert_notification_preference(&pool, &pref).await.unwrap();
        let loaded = notification_preference(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(loaded, pref);
        assert!(!loaded.allows(Classification::NewMessage));
    }

    #[test]
    fn prepare_url_expands_and_keeps_memory() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        let td = tempfile::tempdir().unwrap();
        let db_path = td.path().join("nested").join("relay.db");
        let url = prepare_sqlite_url(&format!("sqlite://{}", db_path.display()));
        assert_eq!(url, format!("sqlite://{}?mode=rwc", db_path.display()));
        assert!(db_path.parent().unwrap().exists());
    }
}
