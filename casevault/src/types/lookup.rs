//! ルックアップ値・カレンダー予定

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

str_enum! {
    /// ルックアップのカテゴリ
    pub enum LookupCategory {
        /// 証拠種別
        EvidenceType => "evidence_type",
        /// 法的文書種別
        LegalInstrumentType => "legal_instrument_type",
        /// デバイス種別
        DeviceType => "device_type",
        /// 関係者の役割
        PartyRole => "party_role",
        /// カレンダー予定種別
        CalendarEventType => "calendar_event_type",
    }
}

/// ルックアップ値
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupValue {
    /// ID
    pub id: Uuid,
    /// カテゴリ
    pub category: LookupCategory,
    /// コード（カテゴリ内で一意）
    pub code: String,
    /// 表示名
    pub label: String,
    /// 表示順
    pub sort_order: i64,
    /// 有効フラグ
    pub active: bool,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

/// カレンダー予定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// ID
    pub id: Uuid,
    /// 事件ID
    pub case_id: Option<Uuid>,
    /// 件名
    pub title: String,
    /// 種別（ルックアップ calendar_event_type）
    pub event_type: String,
    /// 開始
    pub starts_at: DateTime<Utc>,
    /// 終了
    pub ends_at: DateTime<Utc>,
    /// 場所
    pub location: Option<String>,
    /// 備考
    pub notes: Option<String>,
    /// 作成者
    pub created_by: Option<Uuid>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

/// ルックアップコードの書式（小文字英数字とアンダースコア）
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= 64
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
