//! 通知配信
//!
//! 通知キューから送信時刻を迎えたものを取り出し、`NotificationSink`で配信する。
//! 失敗時は`backoff_base * 2^attempts`後に再試行し、上限回数で`failed`にする。

use crate::common::error::{VaultError, VaultResult};
use crate::config::NotificationConfig;
use crate::db::notifications;
use crate::db::settings::{NotificationSettings, SettingsStorage};
use crate::types::compliance::Notification;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 1回のポーリングで処理する最大件数
const DISPATCH_BATCH_SIZE: i64 = 50;

/// 指数バックオフの指数の上限
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// 通知の配信先
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// 1件配信する
    async fn deliver(
        &self,
        notification: &Notification,
        settings: &NotificationSettings,
    ) -> VaultResult<()>;
}

/// Webhookに送るJSON
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    id: String,
    kind: &'a str,
    recipient: Option<&'a str>,
    sender: &'a str,
    subject: &'a str,
    body: &'a str,
    created_at: String,
}

/// JSONをPOSTするWebhook
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// 新しいWebhookSinkを作成
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(
        &self,
        notification: &Notification,
        settings: &NotificationSettings,
    ) -> VaultResult<()> {
        let payload = WebhookPayload {
            id: notification.id.to_string(),
            kind: notification.kind.as_str(),
            recipient: notification
                .recipient
                .as_deref()
                .or(settings.default_recipient.as_deref()),
            sender: &settings.sender_name,
            subject: &notification.subject,
            body: &notification.body,
            created_at: crate::db::ts(&notification.created_at),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| VaultError::ServiceUnavailable(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VaultError::ServiceUnavailable(format!(
                "Webhook returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

/// Webhook未設定時にログへ書き出すだけの配信先
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(
        &self,
        notification: &Notification,
        settings: &NotificationSettings,
    ) -> VaultResult<()> {
        info!(
            notification_id = %notification.id,
            kind = %notification.kind,
            recipient = notification
                .recipient
                .as_deref()
                .or(settings.default_recipient.as_deref())
                .unwrap_or(""),
            subject = %notification.subject,
            "Notification"
        );
        Ok(())
    }
}

/// 1回の配信処理の結果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// 送信済み
    pub sent: usize,
    /// 再試行待ちに戻した件数
    pub retried: usize,
    /// 再試行上限で失敗にした件数
    pub failed: usize,
}

/// 通知ディスパッチャ
#[derive(Clone)]
pub struct NotificationDispatcher {
    pool: SqlitePool,
    settings: SettingsStorage,
    config: NotificationConfig,
    client: reqwest::Client,
    sink_override: Option<Arc<dyn NotificationSink>>,
}

impl NotificationDispatcher {
    /// 新しいディスパッチャを作成
    pub fn new(pool: SqlitePool, config: NotificationConfig) -> VaultResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.webhook_timeout)
            .build()
            .map_err(|e| VaultError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            settings: SettingsStorage::new(pool.clone()),
            pool,
            config,
            client,
            sink_override: None,
        })
    }

    /// 設定に関係なく指定した配信先を使う
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink_override = Some(sink);
        self
    }

    /// `attempts`回失敗した後の待ち時間
    pub fn backoff(&self, attempts: i64) -> Duration {
        let exponent = u32::try_from(attempts.max(0))
            .unwrap_or(MAX_BACKOFF_EXPONENT)
            .min(MAX_BACKOFF_EXPONENT);
        self.config.backoff_base.saturating_mul(2u32.pow(exponent))
    }

    fn sink_for(&self, settings: &NotificationSettings) -> Arc<dyn NotificationSink> {
        if let Some(sink) = &self.sink_override {
            return sink.clone();
        }
        match settings.webhook_url.as_deref() {
            Some(url) => Arc::new(WebhookSink::new(self.client.clone(), url)),
            None => Arc::new(LogSink),
        }
    }

    /// 送信時刻を迎えた通知を配信する
    ///
    /// 通知が無効化されている場合はキューに残したまま何もしない。
    pub async fn dispatch_due(&self) -> VaultResult<DispatchSummary> {
        let settings = self.settings.notification_settings().await?;
        let mut summary = DispatchSummary::default();
        if !settings.enabled {
            debug!("Notifications disabled, skipping dispatch");
            return Ok(summary);
        }

        let now = Utc::now();
        let due = notifications::due(&self.pool, now, DISPATCH_BATCH_SIZE).await?;
        if due.is_empty() {
            return Ok(summary);
        }
        let sink = self.sink_for(&settings);

        for notification in due {
            match sink.deliver(&notification, &settings).await {
                Ok(()) => {
                    notifications::mark_sent(&self.pool, notification.id).await?;
                    crate::metrics::record_notification("sent");
                    summary.sent += 1;
                }
                Err(e) => {
                    let attempts = notification.attempts + 1;
                    if attempts >= i64::from(self.config.max_attempts) {
                        warn!(
                            notification_id = %notification.id,
                            attempts,
                            error = %e,
                            "Notification delivery failed permanently"
                        );
                        notifications::record_failure(&self.pool, notification.id, &e.to_string(), None)
                            .await?;
                        crate::metrics::record_notification("failed");
                        summary.failed += 1;
                    } else {
                        let delay = self.backoff(notification.attempts);
                        let next = now
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::days(1));
                        debug!(
                            notification_id = %notification.id,
                            attempts,
                            retry_in_secs = delay.as_secs(),
                            error = %e,
                            "Notification delivery failed, will retry"
                        );
                        notifications::record_failure(
                            &self.pool,
                            notification.id,
                            &e.to_string(),
                            Some(next),
                        )
                        .await?;
                        crate::metrics::record_notification("retry");
                        summary.retried += 1;
                    }
                }
            }
        }

        if summary != DispatchSummary::default() {
            info!(
                sent = summary.sent,
                retried = summary.retried,
                failed = summary.failed,
                "Notification dispatch finished"
            );
        }
        Ok(summary)
    }

    /// バックグラウンドで配信ループを開始
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.config.poll_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                interval_secs = self.config.poll_interval.as_secs(),
                "Notification dispatcher started"
            );
            loop {
                timer.tick().await;
                if let Err(e) = self.dispatch_due().await {
                    error!("Notification dispatch error: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::compliance::{NotificationKind, NotificationStatus};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(max_attempts: u32) -> NotificationConfig {
        NotificationConfig {
            poll_interval: Duration::from_secs(1),
            max_attempts,
            backoff_base: Duration::from_secs(60),
            webhook_timeout: Duration::from_secs(2),
        }
    }

    async fn with_webhook(pool: &SqlitePool, url: String) {
        SettingsStorage::new(pool.clone())
            .save_notification_settings(&NotificationSettings {
                webhook_url: Some(url),
                default_recipient: Some("lab@example.org".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_backoff_doubles() {
        let pool = crate::db::test_utils::test_db_pool().await;
        let d = NotificationDispatcher::new(pool, config(5)).unwrap();
        assert_eq!(d.backoff(0), Duration::from_secs(60));
        assert_eq!(d.backoff(1), Duration::from_secs(120));
        assert_eq!(d.backoff(3), Duration::from_secs(480));
        assert_eq!(d.backoff(1_000), d.backoff(MAX_BACKOFF_EXPONENT as i64));
    }

    #[tokio::test]
    async fn test_webhook_delivery_marks_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "kind": "case_escalated",
                "recipient": "lab@example.org",
                "subject": "Case escalated"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let pool = crate::db::test_utils::test_db_pool().await;
        with_webhook(&pool, format!("{}/hook", server.uri())).await;
        let n = notifications::enqueue(
            &pool,
            NotificationKind::CaseEscalated,
            None,
            "Case escalated",
            "CASE-2026-0001 is now high",
        )
        .await
        .unwrap();

        let dispatcher = NotificationDispatcher::new(pool.clone(), config(3)).unwrap();
        let summary = dispatcher.dispatch_due().await.unwrap();
        assert_eq!(summary.sent, 1);

        let stored = notifications::get(&pool, n.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_webhook_failure_backs_off_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let pool = crate::db::test_utils::test_db_pool().await;
        with_webhook(&pool, server.uri()).await;
        let n = notifications::enqueue(&pool, NotificationKind::Generic, None, "s", "b")
            .await
            .unwrap();

        let dispatcher = NotificationDispatcher::new(pool.clone(), config(2)).unwrap();
        let before = Utc::now();
        let first = dispatcher.dispatch_due().await.unwrap();
        assert_eq!(first.retried, 1);

        let stored = notifications::get(&pool, n.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
        assert!(stored.next_attempt_at >= before + chrono::Duration::seconds(59));
        assert!(stored.last_error.unwrap().contains("500"));

        // バックオフ中は配信対象にならない
        assert_eq!(dispatcher.dispatch_due().await.unwrap(), DispatchSummary::default());

        sqlx::query("UPDATE notifications SET next_attempt_at = ?")
            .bind(crate::db::ts(&Utc::now()))
            .execute(&pool)
            .await
            .unwrap();
        let second = dispatcher.dispatch_due().await.unwrap();
        assert_eq!(second.failed, 1);
        let stored = notifications::get(&pool, n.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert_eq!(stored.attempts, 2);
    }

    #[tokio::test]
    async fn test_disabled_notifications_stay_queued() {
        let pool = crate::db::test_utils::test_db_pool().await;
        SettingsStorage::new(pool.clone())
            .save_notification_settings(&NotificationSettings {
                enabled: false,
                ..Default::default()
            })
            .await
            .unwrap();
        notifications::enqueue(&pool, NotificationKind::Generic, None, "s", "b")
            .await
            .unwrap();

        let dispatcher = NotificationDispatcher::new(pool.clone(), config(3)).unwrap();
        assert_eq!(dispatcher.dispatch_due().await.unwrap(), DispatchSummary::default());
        assert_eq!(notifications::count_pending(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_log_sink_without_webhook() {
        let pool = crate::db::test_utils::test_db_pool().await;
        notifications::enqueue(&pool, NotificationKind::Generic, Some("a@example.org"), "s", "b")
            .await
            .unwrap();

        let dispatcher = NotificationDispatcher::new(pool.clone(), config(3)).unwrap();
        assert_eq!(dispatcher.dispatch_due().await.unwrap().sent, 1);
        assert_eq!(notifications::count_pending(&pool).await.unwrap(), 0);
    }
}
