//! 押収デバイスの型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

str_enum! {
    /// デバイスの処理状態
    pub enum DeviceStatus {
        /// 受領
        Received => "received",
        /// イメージング中
        Imaging => "imaging",
        /// イメージング完了
        Imaged => "imaged",
        /// 解析完了
        Analyzed => "analyzed",
        /// 返却済み（終端）
        Returned => "returned",
    }
}

impl DeviceStatus {
    fn stage(&self) -> u8 {
        match self {
            DeviceStatus::Received => 0,
            DeviceStatus::Imaging => 1,
            DeviceStatus::Imaged => 2,
            DeviceStatus::Analyzed => 3,
            DeviceStatus::Returned => 4,
        }
    }

    /// 指定ステータスへ遷移できるか
    ///
    /// 次の段階へのみ進める。返却済み以外からは直接返却できる。
    pub fn can_transition_to(&self, next: DeviceStatus) -> bool {
        if *self == DeviceStatus::Returned {
            return false;
        }
        next == DeviceStatus::Returned || next.stage() == self.stage() + 1
    }
}

/// デバイス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// デバイスID
    pub id: Uuid,
    /// 事件ID
    pub case_id: Option<Uuid>,
    /// 証拠ID
    pub evidence_id: Option<Uuid>,
    /// 種別（ルックアップ device_type）
    pub device_type: String,
    /// メーカー
    pub make: Option<String>,
    /// 機種
    pub model: Option<String>,
    /// シリアル番号
    pub serial_number: Option<String>,
    /// IMEI（15桁）
    pub imei: Option<String>,
    /// 記憶容量（GB）
    pub storage_capacity_gb: Option<i64>,
    /// 処理状態
    pub status: DeviceStatus,
    /// 備考
    pub notes: Option<String>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

/// IMEIが15桁の数字か
pub fn is_valid_imei(imei: &str) -> bool {
    imei.len() == 15 && imei.chars().all(|c| c.is_ascii_digit())
}
