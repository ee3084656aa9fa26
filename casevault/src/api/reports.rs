//! 事件レポートAPI

use crate::common::error::VaultError;
use crate::db::cases::{CaseWindowStats, CountRow};
use crate::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::AppError;

/// 既定の集計期間（日）
const DEFAULT_WINDOW_DAYS: i64 = 30;

/// 集計期間（省略時は直近30日）
#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    /// 期間の開始
    pub from: Option<DateTime<Utc>>,
    /// 期間の終了（含まない）
    pub to: Option<DateTime<Utc>>,
}

/// 事件レポート
#[derive(Debug, Serialize)]
pub struct CaseReport {
    /// 期間の開始
    pub from: DateTime<Utc>,
    /// 期間の終了
    pub to: DateTime<Utc>,
    /// ステータス別事件数
    pub cases_by_status: Vec<CountRow>,
    /// 優先度別事件数
    pub cases_by_priority: Vec<CountRow>,
    /// 期間内の受付・終結
    pub window: CaseWindowStats,
    /// 種類別証拠数
    pub evidence_by_type: Vec<CountRow>,
    /// ステータス別デバイス数
    pub devices_by_status: Vec<CountRow>,
}

/// GET /api/v1/reports/cases?from&to
pub async fn case_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<CaseReport>, AppError> {
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - Duration::days(DEFAULT_WINDOW_DAYS));
    if to <= from {
        return Err(VaultError::validation("'to' must be after 'from'").into());
    }

    let pool = &state.db_pool;
    Ok(Json(CaseReport {
        from,
        to,
        cases_by_status: crate::db::cases::count_by_status(pool).await?,
        cases_by_priority: crate::db::cases::count_by_priority(pool).await?,
        window: crate::db::cases::window_stats(pool, &from, &to).await?,
        evidence_by_type: crate::db::evidence::count_by_type(pool).await?,
        devices_by_status: crate::db::devices::count_by_status(pool).await?,
    }))
}
