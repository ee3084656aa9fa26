//! 保持ポリシー・コンプライアンス違反・通知の型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

str_enum! {
    /// 保持ポリシーの対象
    pub enum RetentionTarget {
        /// 監査ログ（アーカイブDBへ移動）
        AuditLog => "audit_log",
        /// 送信済み・失敗した通知
        Notifications => "notifications",
        /// 解決済みの違反
        ResolvedViolations => "resolved_violations",
    }
}

str_enum! {
    /// 保持ジョブの状態
    pub enum RetentionJobStatus {
        /// 待機
        Pending => "pending",
        /// 実行中
        Running => "running",
        /// 完了
        Completed => "completed",
        /// 失敗
        Failed => "failed",
    }
}

str_enum! {
    /// 保持ジョブの起動契機
    pub enum RetentionTrigger {
        /// API経由
        Manual => "manual",
        /// スケジューラ
        Scheduled => "scheduled",
    }
}

/// 保持ポリシー
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// ID
    pub id: Uuid,
    /// 名前
    pub name: String,
    /// 対象
    pub target: RetentionTarget,
    /// 保持日数
    pub retention_days: i64,
    /// 有効フラグ
    pub enabled: bool,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

/// 保持ジョブ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionJob {
    /// ID
    pub id: Uuid,
    /// ポリシーID
    pub policy_id: Uuid,
    /// 状態
    pub status: RetentionJobStatus,
    /// 起動契機
    pub trigger: RetentionTrigger,
    /// 処理件数
    pub records_processed: i64,
    /// エラー内容
    pub error: Option<String>,
    /// 開始日時
    pub started_at: Option<DateTime<Utc>>,
    /// 終了日時
    pub finished_at: Option<DateTime<Utc>>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
}

str_enum! {
    /// 違反の種類
    pub enum ViolationKind {
        /// 監査チェーンの改ざん・欠落
        AuditChainIntegrity => "audit_chain_integrity",
        /// 保管履歴の不連続
        CustodyDiscontinuity => "custody_discontinuity",
        /// 持ち出し期限超過
        CustodyCheckoutOverdue => "custody_checkout_overdue",
        /// 事件SLA超過
        CaseSlaBreach => "case_sla_breach",
        /// 法的文書の有効期間外の押収
        SeizureOutsideAuthority => "seizure_outside_authority",
    }
}

str_enum! {
    /// 重大度
    pub enum Severity {
        /// 低
        Low => "low",
        /// 中
        Medium => "medium",
        /// 高
        High => "high",
        /// 重大
        Critical => "critical",
    }
}

str_enum! {
    /// 違反の対応状況
    pub enum ViolationStatus {
        /// 未対応
        Open => "open",
        /// 確認済み
        Acknowledged => "acknowledged",
        /// 解決済み
        Resolved => "resolved",
    }
}

impl ViolationKind {
    /// 種類ごとの既定の重大度
    pub fn default_severity(&self) -> Severity {
        match self {
            ViolationKind::AuditChainIntegrity => Severity::Critical,
            ViolationKind::CustodyDiscontinuity => Severity::High,
            ViolationKind::SeizureOutsideAuthority => Severity::High,
            ViolationKind::CustodyCheckoutOverdue => Severity::Medium,
            ViolationKind::CaseSlaBreach => Severity::Medium,
        }
    }

    /// 対象の種類
    pub fn subject_type(&self) -> &'static str {
        match self {
            ViolationKind::AuditChainIntegrity => "audit_log",
            ViolationKind::CustodyDiscontinuity | ViolationKind::CustodyCheckoutOverdue => {
                "evidence"
            }
            ViolationKind::CaseSlaBreach => "case",
            ViolationKind::SeizureOutsideAuthority => "seizure",
        }
    }
}

/// コンプライアンス違反
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// ID
    pub id: Uuid,
    /// 種類
    pub kind: ViolationKind,
    /// 重大度
    pub severity: Severity,
    /// 対象の種類
    pub subject_type: String,
    /// 対象ID
    pub subject_id: String,
    /// 説明
    pub description: String,
    /// 対応状況
    pub status: ViolationStatus,
    /// 検出日時
    pub detected_at: DateTime<Utc>,
    /// 確認日時
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// 解決日時
    pub resolved_at: Option<DateTime<Utc>>,
    /// 解決したユーザー
    pub resolved_by: Option<Uuid>,
}

/// コンプライアンスレポート
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// ID
    pub id: Uuid,
    /// 表題
    pub title: String,
    /// 対象期間の開始
    pub period_start: DateTime<Utc>,
    /// 対象期間の終了
    pub period_end: DateTime<Utc>,
    /// 生成日時
    pub generated_at: DateTime<Utc>,
    /// 生成したユーザー
    pub generated_by: Option<Uuid>,
    /// 生成時点でチェーンが正常だったか
    pub chain_valid: bool,
    /// 集計内容
    pub summary: serde_json::Value,
}

str_enum! {
    /// 通知の種類
    pub enum NotificationKind {
        /// 事件の自動エスカレーション
        CaseEscalated => "case_escalated",
        /// 違反の検出
        ViolationDetected => "violation_detected",
        /// 監査チェーンの異常
        ChainIntegrity => "chain_integrity",
        /// 保持ジョブの完了
        RetentionCompleted => "retention_completed",
        /// その他
        Generic => "generic",
    }
}

str_enum! {
    /// 通知の送信状態
    pub enum NotificationStatus {
        /// 送信待ち
        Pending => "pending",
        /// 送信済み
        Sent => "sent",
        /// 失敗（再試行上限）
        Failed => "failed",
    }
}

/// 通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// ID
    pub id: Uuid,
    /// 種類
    pub kind: NotificationKind,
    /// 宛先
    pub recipient: Option<String>,
    /// 件名
    pub subject: String,
    /// 本文
    pub body: String,
    /// 状態
    pub status: NotificationStatus,
    /// 試行回数
    pub attempts: i64,
    /// 直近のエラー
    pub last_error: Option<String>,
    /// 次回試行日時
    pub next_attempt_at: DateTime<Utc>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 送信日時
    pub sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_defaults() {
        assert_eq!(
            ViolationKind::AuditChainIntegrity.default_severity(),
            Severity::Critical
        );
        assert_eq!(ViolationKind::CaseSlaBreach.subject_type(), "case");
        assert_eq!(
            ViolationKind::CustodyCheckoutOverdue.subject_type(),
            "evidence"
        );
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(RetentionTarget::ResolvedViolations.as_str(), "resolved_violations");
        assert_eq!(
            "retention_completed".parse::<NotificationKind>().unwrap(),
            NotificationKind::RetentionCompleted
        );
        assert_eq!(
            serde_json::to_string(&RetentionJobStatus::Running).unwrap(),
            "\"running\""
        );
    }
}
