//! 型定義モジュール
//!
//! ドメインエンティティと状態遷移の型定義を提供

/// 事件
pub mod case;
/// 証拠と保管履歴
pub mod evidence;
/// 押収デバイス
pub mod device;
/// 令状等の法的文書と押収記録
pub mod legal;
/// ルックアップ値・関係者・カレンダー
pub mod lookup;
/// 保持ポリシー・コンプライアンス・通知
pub mod compliance;

pub use case::{Case, CasePriority, CaseStatus, Party};
pub use compliance::{
    Notification, NotificationKind, NotificationStatus, RetentionJob, RetentionJobStatus,
    RetentionPolicy, RetentionTarget, RetentionTrigger, Severity, Violation, ViolationKind,
    ViolationStatus,
};
pub use device::{Device, DeviceStatus};
pub use evidence::{CustodyAction, CustodyEvent, CustodyStatus, Evidence};
pub use legal::{InstrumentStatus, LegalInstrument, Seizure};
pub use lookup::{CalendarEvent, LookupCategory, LookupValue};

/// 必須文字列を検証して前後の空白を除いた値を返す
pub(crate) fn required(field: &str, value: &str, max_len: usize) -> crate::common::error::CommonResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(crate::common::error::CommonError::Validation(format!(
            "{} is required",
            field
        )));
    }
    if trimmed.chars().count() > max_len {
        return Err(crate::common::error::CommonError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(trimmed.to_string())
}

/// 任意文字列の空白のみの値をNoneに寄せる
pub(crate) fn optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_trims_and_limits() {
        assert_eq!(required("title", "  Burglary ", 200).unwrap(), "Burglary");
        assert!(required("title", "   ", 200).is_err());
        assert!(required("title", &"x".repeat(201), 200).is_err());
    }

    #[test]
    fn test_optional_blank_is_none() {
        assert_eq!(optional(Some("  ".into())), None);
        assert_eq!(optional(Some(" a ".into())), Some("a".into()));
        assert_eq!(optional(None), None);
    }
}
