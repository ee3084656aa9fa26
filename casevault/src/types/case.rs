//! 事件の型定義と状態遷移

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

str_enum! {
    /// 事件ステータス
    pub enum CaseStatus {
        /// 受付済み
        Open => "open",
        /// 捜査中
        Active => "active",
        /// 保留
        OnHold => "on_hold",
        /// 終結
        Closed => "closed",
        /// アーカイブ済み（終端）
        Archived => "archived",
    }
}

impl CaseStatus {
    /// 指定ステータスへ遷移できるか
    pub fn can_transition_to(&self, next: CaseStatus) -> bool {
        use CaseStatus::*;
        matches!(
            (self, next),
            (Open, Active)
                | (Open, OnHold)
                | (Open, Closed)
                | (Active, OnHold)
                | (Active, Closed)
                | (OnHold, Active)
                | (OnHold, Closed)
                | (Closed, Active)
                | (Closed, Archived)
        )
    }

    /// SLA計測対象（未終結）か
    pub fn is_open(&self) -> bool {
        !matches!(self, CaseStatus::Closed | CaseStatus::Archived)
    }
}

str_enum! {
    /// 事件優先度
    pub enum CasePriority {
        /// 低
        Low => "low",
        /// 中
        Medium => "medium",
        /// 高
        High => "high",
        /// 緊急
        Critical => "critical",
    }
}

impl CasePriority {
    /// 並べ替え用の順位（大きいほど高い）
    pub fn rank(&self) -> i64 {
        match self {
            CasePriority::Low => 0,
            CasePriority::Medium => 1,
            CasePriority::High => 2,
            CasePriority::Critical => 3,
        }
    }

    /// 1段階引き上げた優先度（criticalで頭打ち）
    pub fn escalated(&self) -> CasePriority {
        match self {
            CasePriority::Low => CasePriority::Medium,
            CasePriority::Medium => CasePriority::High,
            CasePriority::High | CasePriority::Critical => CasePriority::Critical,
        }
    }
}

/// 事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    /// 事件ID
    pub id: Uuid,
    /// 事件番号（CASE-YYYY-NNNN）
    pub case_number: String,
    /// 件名
    pub title: String,
    /// 概要
    pub description: Option<String>,
    /// ステータス
    pub status: CaseStatus,
    /// 優先度
    pub priority: CasePriority,
    /// 主任捜査員
    pub lead_investigator_id: Option<Uuid>,
    /// 受付日時
    pub opened_at: DateTime<Utc>,
    /// 期限
    pub due_at: Option<DateTime<Utc>>,
    /// 終結日時
    pub closed_at: Option<DateTime<Utc>>,
    /// SLA超過による自動エスカレーション日時
    pub escalated_at: Option<DateTime<Utc>>,
    /// 作成者
    pub created_by: Option<Uuid>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

/// 事件番号を生成する
pub fn format_case_number(year: i32, seq: i64) -> String {
    format!("CASE-{:04}-{:04}", year, seq)
}

/// 事件番号の年
pub fn case_year(opened_at: &DateTime<Utc>) -> i32 {
    opened_at.year()
}

/// 事件番号から証拠番号を生成する（CASE-2026-0007 → EV-2026-0007-3）
pub fn format_evidence_number(case_number: &str, item_seq: i64) -> String {
    let stem = case_number.strip_prefix("CASE-").unwrap_or(case_number);
    format!("EV-{}-{}", stem, item_seq)
}

/// 事件関係者
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    /// 関係者ID
    pub id: Uuid,
    /// 事件ID
    pub case_id: Uuid,
    /// 氏名
    pub name: String,
    /// 役割（ルックアップ party_role）
    pub role: String,
    /// 連絡先
    pub contact: Option<String>,
    /// 備考
    pub notes: Option<String>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_transitions() {
        use CaseStatus::*;
        assert!(Open.can_transition_to(Active));
        assert!(Open.can_transition_to(Closed));
        assert!(Active.can_transition_to(OnHold));
        assert!(OnHold.can_transition_to(Active));
        assert!(Closed.can_transition_to(Active));
        assert!(Closed.can_transition_to(Archived));

        assert!(!Active.can_transition_to(Open));
        assert!(!Open.can_transition_to(Archived));
        assert!(!Active.can_transition_to(Archived));
        for next in CaseStatus::ALL {
            assert!(!Archived.can_transition_to(*next));
        }
    }

    #[test]
    fn test_same_status_is_not_a_transition() {
        for status in CaseStatus::ALL {
            assert!(!status.can_transition_to(*status));
        }
    }

    #[test]
    fn test_priority_escalation_caps_at_critical() {
        assert_eq!(CasePriority::Low.escalated(), CasePriority::Medium);
        assert_eq!(CasePriority::High.escalated(), CasePriority::Critical);
        assert_eq!(CasePriority::Critical.escalated(), CasePriority::Critical);
    }

    #[test]
    fn test_status_serde_matches_as_str() {
        let json = serde_json::to_string(&CaseStatus::OnHold).unwrap();
        assert_eq!(json, "\"on_hold\"");
        assert_eq!("on_hold".parse::<CaseStatus>().unwrap(), CaseStatus::OnHold);
        assert!("pending".parse::<CaseStatus>().is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(format_case_number(2026, 7), "CASE-2026-0007");
        assert_eq!(format_case_number(2026, 12345), "CASE-2026-12345");
        assert_eq!(format_evidence_number("CASE-2026-0007", 3), "EV-2026-0007-3");
    }
}
