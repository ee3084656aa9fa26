//! 証拠と保管履歴（Chain of Custody）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

str_enum! {
    /// 証拠の保管状態
    pub enum CustodyStatus {
        /// 保管庫内
        InStorage => "in_storage",
        /// 持ち出し中
        CheckedOut => "checked_out",
        /// 解析中
        InAnalysis => "in_analysis",
        /// 外部へ返却・移管済み（終端）
        TransferredOut => "transferred_out",
        /// 廃棄済み（終端）
        Disposed => "disposed",
    }
}

str_enum! {
    /// 保管履歴のアクション
    pub enum CustodyAction {
        /// 収集（最初のイベントのみ）
        Collected => "collected",
        /// 持ち出し
        CheckedOut => "checked_out",
        /// 返納
        CheckedIn => "checked_in",
        /// 保管者の変更
        Transferred => "transferred",
        /// 解析開始
        AnalysisStarted => "analysis_started",
        /// 解析完了
        AnalysisCompleted => "analysis_completed",
        /// 所有者への返却
        Returned => "returned",
        /// 廃棄
        Disposed => "disposed",
    }
}

impl CustodyAction {
    /// 受け取り側の保管者が必須か
    pub fn requires_to_holder(&self) -> bool {
        matches!(
            self,
            CustodyAction::CheckedOut | CustodyAction::Transferred | CustodyAction::Returned
        )
    }
}

impl CustodyStatus {
    /// アクション適用後の状態。許可されない場合はNone
    pub fn apply(&self, action: CustodyAction) -> Option<CustodyStatus> {
        use CustodyAction as A;
        use CustodyStatus as S;
        match (self, action) {
            (S::InStorage, A::CheckedOut) => Some(S::CheckedOut),
            (S::CheckedOut, A::CheckedIn) => Some(S::InStorage),
            (S::InStorage | S::CheckedOut, A::AnalysisStarted) => Some(S::InAnalysis),
            (S::InAnalysis, A::AnalysisCompleted) => Some(S::InStorage),
            (S::InStorage, A::Transferred) => Some(S::InStorage),
            (S::InStorage, A::Returned) => Some(S::TransferredOut),
            (S::InStorage | S::CheckedOut, A::Disposed) => Some(S::Disposed),
            _ => None,
        }
    }

    /// 終端状態か
    pub fn is_terminal(&self) -> bool {
        matches!(self, CustodyStatus::TransferredOut | CustodyStatus::Disposed)
    }
}

/// 証拠品
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// 証拠ID
    pub id: Uuid,
    /// 事件ID
    pub case_id: Uuid,
    /// 証拠番号
    pub evidence_number: String,
    /// 説明
    pub description: String,
    /// 種別（ルックアップ evidence_type）
    pub evidence_type: String,
    /// 収集日時
    pub collected_at: DateTime<Utc>,
    /// 収集者
    pub collected_by: String,
    /// 保管場所
    pub location: Option<String>,
    /// 現在の保管者
    pub current_holder: String,
    /// 保管状態
    pub custody_status: CustodyStatus,
    /// SHA-256（小文字16進）
    pub sha256: Option<String>,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
}

/// 保管履歴イベント
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyEvent {
    /// イベントID
    pub id: Uuid,
    /// 証拠ID
    pub evidence_id: Uuid,
    /// 連番（証拠ごとに1から）
    pub sequence: i64,
    /// アクション
    pub action: CustodyAction,
    /// 引き渡し元
    pub from_holder: Option<String>,
    /// 引き渡し先
    pub to_holder: Option<String>,
    /// 場所
    pub location: Option<String>,
    /// 発生日時
    pub occurred_at: DateTime<Utc>,
    /// 備考
    pub notes: Option<String>,
    /// 記録したユーザー
    pub recorded_by: Option<Uuid>,
    /// 記録日時
    pub created_at: DateTime<Utc>,
}

/// SHA-256ダイジェストを検証し小文字に正規化する
pub fn normalize_sha256(value: &str) -> Option<String> {
    let v = value.trim();
    if v.len() == 64 && v.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(v.to_ascii_lowercase())
    } else {
        None
    }
}

/// 保管の連続性に関する違反
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuityIssue {
    /// 問題のあるイベントの連番
    pub sequence: i64,
    /// 説明
    pub description: String,
}

/// 保管履歴の連続性を検査する
///
/// 連番が1から連続していること、各イベントの引き渡し元が直前の引き渡し先と一致すること、
/// 発生日時が逆行しないことを確認する。
pub fn check_continuity(events: &[CustodyEvent]) -> Vec<ContinuityIssue> {
    let mut issues = Vec::new();
    let mut prev: Option<&CustodyEvent> = None;
    for (idx, event) in events.iter().enumerate() {
        let expected_seq = idx as i64 + 1;
        if event.sequence != expected_seq {
            issues.push(ContinuityIssue {
                sequence: event.sequence,
                description: format!(
                    "expected sequence {}, found {}",
                    expected_seq, event.sequence
                ),
            });
        }
        match prev {
            None => {
                if event.action != CustodyAction::Collected {
                    issues.push(ContinuityIssue {
                        sequence: event.sequence,
                        description: format!("first event is '{}', not 'collected'", event.action),
                    });
                }
            }
            Some(p) => {
                let prev_holder = p.to_holder.as_deref().or(p.from_holder.as_deref());
                if event.from_holder.as_deref() != prev_holder {
                    issues.push(ContinuityIssue {
                        sequence: event.sequence,
                        description: format!(
                            "from_holder {:?} does not match previous holder {:?}",
                            event.from_holder, prev_holder
                        ),
                    });
                }
                if event.occurred_at < p.occurred_at {
                    issues.push(ContinuityIssue {
                        sequence: event.sequence,
                        description: "occurred_at precedes the previous event".to_string(),
                    });
                }
            }
        }
        prev = Some(event);
    }
    issues
}

/// イベント適用後の保管者
///
/// 引き渡し先がないアクション（返納・解析など）では保管者は変わらない。
pub fn holder_after(current_holder: &str, to_holder: Option<&str>) -> String {
    to_holder.unwrap_or(current_holder).to_string()
}
