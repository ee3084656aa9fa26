//! 法的文書（令状等）と押収記録

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

str_enum! {
    /// 法的文書のステータス
    pub enum InstrumentStatus {
        /// 下書き
        Draft => "draft",
        /// 有効
        Active => "active",
        /// 執行済み
        Executed => "executed",
        /// 失効
        Expired => "expired",
        /// 取消
        Revoked => "revoked",
    }
}

impl InstrumentStatus {
    /// 指定ステータスへ遷移できるか
    pub fn can_transition_to(&self, next: InstrumentStatus) -> bool {
        use InstrumentStatus::*;
        matches!(
            (self, next),
            (Draft, Active) | (Draft, Revoked) | (Active, Executed) | (Active, Expired) | (Active, Revoked)
        )
    }

    /// 押収の根拠として参照できるか
    pub fn authorizes_seizure(&self) -> bool {
        !matches!(self, InstrumentStatus::Draft | InstrumentStatus::Revoked)
    }
}

/// 法的文書
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalInstrument {
    /// ID
    pub id: Uuid,
    /// 事件ID
    pub case_id: Uuid,
    /// 種別（ルックアップ legal_instrument_type）
    pub instrument_type: String,
    /// 文書番号
    pub reference_number: String,
    /// 発行機関
    pub issuing_authority: Option<String>,
    /// 発行日時
    pub issued_at: DateTime<Utc>,
    /// 有効期限
    pub expires_at: Option<DateTime<Utc>>,
    /// ステータス
    pub status: InstrumentStatus,
    /// 備考
    pub notes: Option<String>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

impl LegalInstrument {
    /// 日時が有効期間 [issued_at, expires_at] に含まれるか
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.issued_at && self.expires_at.map(|exp| at <= exp).unwrap_or(true)
    }
}

/// 押収記録
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seizure {
    /// ID
    pub id: Uuid,
    /// 事件ID
    pub case_id: Uuid,
    /// 根拠となる法的文書
    pub legal_instrument_id: Option<Uuid>,
    /// 押収日時
    pub seized_at: DateTime<Utc>,
    /// 押収場所
    pub location: String,
    /// 押収者
    pub seized_by: Option<String>,
    /// 説明
    pub description: Option<String>,
    /// 押収点数
    pub item_count: i64,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}
