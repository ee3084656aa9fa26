//! 期間レポートとダッシュボード

use crate::audit::hash_chain::verify_chain;
use crate::common::error::{VaultError, VaultResult};
use crate::db::audit_log::AuditLogStorage;
use crate::db::cases::CountRow;
use crate::db::{cases, compliance, evidence, notifications, retention};
use crate::types::compliance::{ComplianceReport, RetentionJob};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

/// レポート生成要求
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    /// 表題（省略時は期間から生成）
    pub title: Option<String>,
    /// 期間の開始
    pub from: DateTime<Utc>,
    /// 期間の終了（含まない）
    pub to: DateTime<Utc>,
}

fn counts_json(rows: &[CountRow]) -> serde_json::Value {
    rows.iter()
        .map(|r| (r.key.clone(), serde_json::Value::from(r.count)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

/// 期間 [from, to) のコンプライアンスレポートを生成して保存する
pub async fn generate_report(
    pool: &SqlitePool,
    storage: &AuditLogStorage,
    request: ReportRequest,
    generated_by: Option<Uuid>,
) -> VaultResult<ComplianceReport> {
    if request.to <= request.from {
        return Err(VaultError::validation("'to' must be after 'from'"));
    }
    let (from, to) = (request.from, request.to);

    let chain = verify_chain(storage).await?;
    let audit_by_action = storage.count_by_action_between(&from, &to).await?;
    let audit_total: i64 = audit_by_action.iter().map(|(_, c)| c).sum();
    let (violations_opened, violations_resolved) = compliance::count_between(pool, from, to).await?;
    let open_by_kind = compliance::count_open_by_kind(pool).await?;
    let case_window = cases::window_stats(pool, &from, &to).await?;
    let custody = evidence::count_events_between(pool, &from, &to).await?;

    let summary = serde_json::json!({
        "audit_activity": {
            "total": audit_total,
            "by_action": audit_by_action
                .iter()
                .map(|(action, count)| (action.clone(), serde_json::Value::from(*count)))
                .collect::<serde_json::Map<_, _>>(),
        },
        "chain_verification": {
            "valid": chain.valid,
            "entries_checked": chain.entries_checked,
            "message": chain.message,
            "verified_at": chain.verified_at,
        },
        "violations": {
            "opened": violations_opened,
            "resolved": violations_resolved,
            "open_by_kind": counts_json(&open_by_kind),
        },
        "cases": case_window,
        "custody_events": counts_json(&custody),
    });

    let report = ComplianceReport {
        id: Uuid::new_v4(),
        title: request
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| {
                format!(
                    "Compliance report {} to {}",
                    from.format("%Y-%m-%d"),
                    to.format("%Y-%m-%d")
                )
            }),
        period_start: from,
        period_end: to,
        generated_at: Utc::now(),
        generated_by,
        chain_valid: chain.valid,
        summary,
    };
    compliance::insert_report(pool, &report).await?;
    tracing::info!(report_id = %report.id, chain_valid = report.chain_valid, "Compliance report generated");
    Ok(report)
}

/// 最終検証の状況
#[derive(Debug, Clone, Serialize)]
pub struct LastVerification {
    /// 検証日時
    pub at: Option<DateTime<Utc>>,
    /// 結果
    pub valid: Option<bool>,
}

/// コンプライアンスダッシュボード
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceDashboard {
    /// 未解決の違反（重大度別）
    pub open_violations_by_severity: Vec<CountRow>,
    /// 最終チェーン検証
    pub last_verification: LastVerification,
    /// 事件数（ステータス別）
    pub cases_by_status: Vec<CountRow>,
    /// 送信待ちの通知数
    pub pending_notifications: i64,
    /// 最新の保持ジョブ
    pub last_retention_job: Option<RetentionJob>,
}

/// ダッシュボードを集計する
pub async fn dashboard(pool: &SqlitePool, storage: &AuditLogStorage) -> VaultResult<ComplianceDashboard> {
    let state = storage.chain_state().await?;
    Ok(ComplianceDashboard {
        open_violations_by_severity: compliance::count_open_by_severity(pool).await?,
        last_verification: LastVerification {
            at: state.last_verified_at,
            valid: state.last_verification_valid,
        },
        cases_by_status: cases::count_by_status(pool).await?,
        pending_notifications: notifications::count_pending(pool).await?,
        last_retention_job: retention::last_job(pool).await?,
    })
}
