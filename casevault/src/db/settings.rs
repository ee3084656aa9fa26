//! 設定テーブルのストレージ層
//!
//! SQLiteベースのキーバリュー設定を永続化

use crate::common::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

const KEY_NOTIFY_ENABLED: &str = "notifications.enabled";
const KEY_NOTIFY_WEBHOOK_URL: &str = "notifications.webhook_url";
const KEY_NOTIFY_DEFAULT_RECIPIENT: &str = "notifications.default_recipient";
const KEY_NOTIFY_SENDER_NAME: &str = "notifications.sender_name";

/// 通知設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// 通知を配信するか
    pub enabled: bool,
    /// WebhookのURL（未設定ならログ出力のみ）
    pub webhook_url: Option<String>,
    /// 宛先の既定値
    pub default_recipient: Option<String>,
    /// 差出人名
    pub sender_name: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            default_recipient: None,
            sender_name: "casevault".to_string(),
        }
    }
}

/// 設定ストレージ
#[derive(Clone)]
pub struct SettingsStorage {
    pool: SqlitePool,
}

impl SettingsStorage {
    /// 新しいストレージインスタンスを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 設定値を取得
    pub async fn get_setting(&self, key: &str) -> VaultResult<Option<String>> {
        let result = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to get setting: {}", e)))?;

        Ok(result)
    }

    /// 設定値を保存（INSERT OR REPLACE）
    pub async fn set_setting(&self, key: &str, value: &str) -> VaultResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to set setting: {}", e)))?;

        Ok(())
    }

    /// 設定値を削除
    pub async fn delete_setting(&self, key: &str) -> VaultResult<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to delete setting: {}", e)))?;
        Ok(())
    }

    /// 通知設定を取得（未保存の項目は既定値）
    pub async fn notification_settings(&self) -> VaultResult<NotificationSettings> {
        let defaults = NotificationSettings::default();
        Ok(NotificationSettings {
            enabled: self
                .get_setting(KEY_NOTIFY_ENABLED)
                .await?
                .map(|v| v == "true")
                .unwrap_or(defaults.enabled),
            webhook_url: self.get_setting(KEY_NOTIFY_WEBHOOK_URL).await?,
            default_recipient: self.get_setting(KEY_NOTIFY_DEFAULT_RECIPIENT).await?,
            sender_name: self
                .get_setting(KEY_NOTIFY_SENDER_NAME)
                .await?
                .unwrap_or(defaults.sender_name),
        })
    }

    /// 通知設定を保存
    pub async fn save_notification_settings(&self, s: &NotificationSettings) -> VaultResult<()> {
        self.set_setting(KEY_NOTIFY_ENABLED, if s.enabled { "true" } else { "false" })
            .await?;
        self.set_optional(KEY_NOTIFY_WEBHOOK_URL, s.webhook_url.as_deref())
            .await?;
        self.set_optional(KEY_NOTIFY_DEFAULT_RECIPIENT, s.default_recipient.as_deref())
            .await?;
        self.set_setting(KEY_NOTIFY_SENDER_NAME, &s.sender_name)
            .await
    }

    async fn set_optional(&self, key: &str, value: Option<&str>) -> VaultResult<()> {
        match value {
            Some(v) => self.set_setting(key, v).await,
            None => self.delete_setting(key).await,
        }
    }
}
