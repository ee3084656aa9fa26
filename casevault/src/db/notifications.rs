//! 通知キューのストレージ

use crate::common::error::{VaultError, VaultResult};
use crate::common::types::{Page, PageParams};
use crate::db::{parse_enum, parse_ts, parse_ts_opt, parse_uuid, ts, SqlFilter};
use crate::types::compliance::{Notification, NotificationKind, NotificationStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

const NOTIFICATION_COLUMNS: &str = "id, kind, recipient, subject, body, status, attempts, last_error,
    next_attempt_at, created_at, sent_at";

/// 通知一覧の検索条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationFilter {
    /// 状態
    pub status: Option<NotificationStatus>,
    /// 種類
    pub kind: Option<NotificationKind>,
    /// ページ番号
    pub page: Option<u32>,
    /// 1ページあたりの件数
    pub per_page: Option<u32>,
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> VaultError {
    move |e| VaultError::Database(format!("Failed to {}: {}", context, e))
}

/// 通知をキューに積む
pub async fn enqueue(
    pool: &SqlitePool,
    kind: NotificationKind,
    recipient: Option<&str>,
    subject: &str,
    body: &str,
) -> VaultResult<Notification> {
    let now = Utc::now();
    let notification = Notification {
        id: Uuid::new_v4(),
        kind,
        recipient: recipient.map(str::to_string),
        subject: subject.to_string(),
        body: body.to_string(),
        status: NotificationStatus::Pending,
        attempts: 0,
        last_error: None,
        next_attempt_at: now,
        created_at: now,
        sent_at: None,
    };

    sqlx::query(
        "INSERT INTO notifications (id, kind, recipient, subject, body, status, attempts,
            last_error, next_attempt_at, created_at, sent_at)
         VALUES (?, ?, ?, ?, ?, ?, 0, NULL, ?, ?, NULL)",
    )
    .bind(notification.id.to_string())
    .bind(kind.as_str())
    .bind(&notification.recipient)
    .bind(subject)
    .bind(body)
    .bind(notification.status.as_str())
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(pool)
    .await
    .map_err(db_err("enqueue notification"))?;

    Ok(notification)
}

/// 送信時刻を迎えた未送信の通知（古い順）
pub async fn due(pool: &SqlitePool, now: DateTime<Utc>, limit: i64) -> VaultResult<Vec<Notification>> {
    let sql = format!(
        "SELECT {} FROM notifications WHERE status = 'pending' AND next_attempt_at <= ?
         ORDER BY next_attempt_at, created_at LIMIT ?",
        NOTIFICATION_COLUMNS
    );
    let rows = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(ts(&now))
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(db_err("fetch due notifications"))?;
    rows.into_iter().map(Notification::try_from).collect()
}

/// 送信済みにする
pub async fn mark_sent(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    sqlx::query(
        "UPDATE notifications SET status = 'sent', attempts = attempts + 1, last_error = NULL, sent_at = ?
         WHERE id = ?",
    )
    .bind(ts(&Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("mark notification sent"))?;
    Ok(())
}

/// 送信失敗を記録する
///
/// `next_attempt_at`が`None`なら再試行を打ち切って`failed`にする。
pub async fn record_failure(
    pool: &SqlitePool,
    id: Uuid,
    error: &str,
    next_attempt_at: Option<DateTime<Utc>>,
) -> VaultResult<()> {
    let status = match next_attempt_at {
        Some(_) => NotificationStatus::Pending,
        None => NotificationStatus::Failed,
    };
    sqlx::query(
        "UPDATE notifications SET status = ?, attempts = attempts + 1, last_error = ?,
            next_attempt_at = COALESCE(?, next_attempt_at)
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(error)
    .bind(next_attempt_at.as_ref().map(ts))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("record notification failure"))?;
    Ok(())
}

/// 失敗した通知を再送待ちに戻す
pub async fn retry(pool: &SqlitePool, id: Uuid) -> VaultResult<Notification> {
    let current = get(pool, id).await?;
    if current.status != NotificationStatus::Failed {
        return Err(VaultError::InvalidTransition(format!(
            "notification is {}, only failed notifications can be retried",
            current.status
        )));
    }
    sqlx::query(
        "UPDATE notifications SET status = 'pending', attempts = 0, next_attempt_at = ?
         WHERE id = ? AND status = 'failed'",
    )
    .bind(ts(&Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("retry notification"))?;
    get(pool, id).await
}

/// 通知を取得
pub async fn get(pool: &SqlitePool, id: Uuid) -> VaultResult<Notification> {
    let sql = format!("SELECT {} FROM notifications WHERE id = ?", NOTIFICATION_COLUMNS);
    sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(db_err("get notification"))?
        .map(Notification::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("notification {}", id)))
}

/// 通知一覧（新しい順）
pub async fn list(pool: &SqlitePool, filter: &NotificationFilter) -> VaultResult<Page<Notification>> {
    let mut f = SqlFilter::default();
    f.eq("status", filter.status).eq("kind", filter.kind);
    let params = PageParams {
        page: filter.page,
        per_page: filter.per_page,
    };

    let count_sql = format!("SELECT COUNT(*) FROM notifications {}", f.where_clause());
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for val in f.binds() {
        count_query = count_query.bind(val.as_str());
    }
    let total = count_query
        .fetch_one(pool)
        .await
        .map_err(db_err("count notifications"))?;

    let sql = format!(
        "SELECT {} FROM notifications {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        NOTIFICATION_COLUMNS,
        f.where_clause()
    );
    let mut query = sqlx::query_as::<_, NotificationRow>(&sql);
    for val in f.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .map_err(db_err("list notifications"))?;

    let items = rows
        .into_iter()
        .map(Notification::try_from)
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(Page::new(items, total, &params))
}

/// 送信待ちの件数
pub async fn count_pending(pool: &SqlitePool) -> VaultResult<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE status = 'pending'")
        .fetch_one(pool)
        .await
        .map_err(db_err("count pending notifications"))
}

/// 指定日時より前に作成された送信済み・失敗の通知を削除する
pub async fn delete_finished_before(pool: &SqlitePool, cutoff: DateTime<Utc>) -> VaultResult<u64> {
    let result = sqlx::query(
        "DELETE FROM notifications WHERE status IN ('sent', 'failed') AND created_at < ?",
    )
    .bind(ts(&cutoff))
    .execute(pool)
    .await
    .map_err(db_err("delete old notifications"))?;
    Ok(result.rows_affected())
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: String,
    kind: String,
    recipient: Option<String>,
    subject: String,
    body: String,
    status: String,
    attempts: i64,
    last_error: Option<String>,
    next_attempt_at: String,
    created_at: String,
    sent_at: Option<String>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = VaultError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: parse_uuid(&row.id)?,
            kind: parse_enum("kind", &row.kind)?,
            recipient: row.recipient,
            subject: row.subject,
            body: row.body,
            status: parse_enum("status", &row.status)?,
            attempts: row.attempts,
            last_error: row.last_error,
            next_attempt_at: parse_ts(&row.next_attempt_at)?,
            created_at: parse_ts(&row.created_at)?,
            sent_at: parse_ts_opt(row.sent_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_enqueue_and_due() {
        let pool = crate::db::test_utils::test_db_pool().await;
        let n = enqueue(&pool, NotificationKind::Generic, Some("ops@example.org"), "hi", "body")
            .await
            .unwrap();

        let due_now = due(&pool, Utc::now() + Duration::seconds(1), 10).await.unwrap();
        assert_eq!(due_now.len(), 1);
        assert_eq!(due_now[0].id, n.id);
        assert!(due(&pool, Utc::now() - Duration::minutes(5), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(count_pending(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_backoff_then_give_up() {
        let pool = crate::db::test_utils::test_db_pool().await;
        let n = enqueue(&pool, NotificationKind::Generic, None, "s", "b").await.unwrap();

        let later = Utc::now() + Duration::minutes(10);
        record_failure(&pool, n.id, "timeout", Some(later)).await.unwrap();
        let stored = get(&pool, n.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.next_attempt_at, parse_ts(&ts(&later)).unwrap());
        assert!(due(&pool, Utc::now(), 10).await.unwrap().is_empty());

        record_failure(&pool, n.id, "timeout again", None).await.unwrap();
        let stored = get(&pool, n.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("timeout again"));

        let retried = retry(&pool, n.id).await.unwrap();
        assert_eq!(retried.status, NotificationStatus::Pending);
        assert_eq!(retried.attempts, 0);
        assert!(matches!(
            retry(&pool, n.id).await,
            Err(VaultError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_cleanup() {
        let pool = crate::db::test_utils::test_db_pool().await;
        let sent = enqueue(&pool, NotificationKind::Generic, None, "a", "b").await.unwrap();
        enqueue(&pool, NotificationKind::Generic, None, "c", "d").await.unwrap();
        mark_sent(&pool, sent.id).await.unwrap();

        let page = list(
            &pool,
            &NotificationFilter {
                status: Some(NotificationStatus::Sent),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.items[0].sent_at.is_some());

        let removed = delete_finished_before(&pool, Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(count_pending(&pool).await.unwrap(), 1);
    }
}
