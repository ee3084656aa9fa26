//! コンプライアンス違反とレポートのストレージ
//!
//! 未解決の違反は(kind, subject_id)で一意。部分UNIQUEインデックスで重複登録を防ぐ。

use crate::common::error::{VaultError, VaultResult};
use crate::common::types::{Page, PageParams};
use crate::db::cases::CountRow;
use crate::db::{parse_enum, parse_ts, parse_ts_opt, parse_uuid, parse_uuid_opt, ts, SqlFilter};
use crate::types::compliance::{
    ComplianceReport, Severity, Violation, ViolationKind, ViolationStatus,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

const VIOLATION_COLUMNS: &str = "id, kind, severity, subject_type, subject_id, description, status,
    detected_at, acknowledged_at, resolved_at, resolved_by";
const REPORT_COLUMNS: &str =
    "id, title, period_start, period_end, generated_at, generated_by, chain_valid, summary";

/// 違反一覧の検索条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViolationFilter {
    /// 対応状況
    pub status: Option<ViolationStatus>,
    /// 種類
    pub kind: Option<ViolationKind>,
    /// 重大度
    pub severity: Option<Severity>,
    /// ページ番号
    pub page: Option<u32>,
    /// 1ページあたりの件数
    pub per_page: Option<u32>,
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> VaultError {
    move |e| VaultError::Database(format!("Failed to {}: {}", context, e))
}

/// 違反を登録する
///
/// 同じ対象に未解決の違反が既にあれば何もせず`None`を返す。
pub async fn open_violation(
    pool: &SqlitePool,
    kind: ViolationKind,
    subject_id: &str,
    description: &str,
) -> VaultResult<Option<Violation>> {
    let violation = Violation {
        id: Uuid::new_v4(),
        kind,
        severity: kind.default_severity(),
        subject_type: kind.subject_type().to_string(),
        subject_id: subject_id.to_string(),
        description: description.to_string(),
        status: ViolationStatus::Open,
        detected_at: Utc::now(),
        acknowledged_at: None,
        resolved_at: None,
        resolved_by: None,
    };

    let result = sqlx::query(
        "INSERT OR IGNORE INTO compliance_violations
            (id, kind, severity, subject_type, subject_id, description, status, detected_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(violation.id.to_string())
    .bind(kind.as_str())
    .bind(violation.severity.as_str())
    .bind(&violation.subject_type)
    .bind(subject_id)
    .bind(description)
    .bind(violation.status.as_str())
    .bind(ts(&violation.detected_at))
    .execute(pool)
    .await
    .map_err(db_err("record violation"))?;

    Ok((result.rows_affected() == 1).then_some(violation))
}

/// 対象に未解決の違反があるか
pub async fn has_open(pool: &SqlitePool, kind: ViolationKind, subject_id: &str) -> VaultResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM compliance_violations
         WHERE kind = ? AND subject_id = ? AND status != 'resolved'",
    )
    .bind(kind.as_str())
    .bind(subject_id)
    .fetch_one(pool)
    .await
    .map_err(db_err("check open violation"))?;
    Ok(count > 0)
}

/// 違反一覧（検出日時の新しい順）
pub async fn list(pool: &SqlitePool, filter: &ViolationFilter) -> VaultResult<Page<Violation>> {
    let mut f = SqlFilter::default();
    f.eq("status", filter.status)
        .eq("kind", filter.kind)
        .eq("severity", filter.severity);
    let params = PageParams {
        page: filter.page,
        per_page: filter.per_page,
    };

    let count_sql = format!("SELECT COUNT(*) FROM compliance_violations {}", f.where_clause());
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for val in f.binds() {
        count_query = count_query.bind(val.as_str());
    }
    let total = count_query
        .fetch_one(pool)
        .await
        .map_err(db_err("count violations"))?;

    let sql = format!(
        "SELECT {} FROM compliance_violations {} ORDER BY detected_at DESC LIMIT ? OFFSET ?",
        VIOLATION_COLUMNS,
        f.where_clause()
    );
    let mut query = sqlx::query_as::<_, ViolationRow>(&sql);
    for val in f.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .map_err(db_err("list violations"))?;

    let items = rows
        .into_iter()
        .map(Violation::try_from)
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(Page::new(items, total, &params))
}

/// 違反を取得
pub async fn get(pool: &SqlitePool, id: Uuid) -> VaultResult<Violation> {
    let sql = format!("SELECT {} FROM compliance_violations WHERE id = ?", VIOLATION_COLUMNS);
    sqlx::query_as::<_, ViolationRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(db_err("get violation"))?
        .map(Violation::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("violation {}", id)))
}

/// 違反を確認済みにする（未対応のものだけ）
pub async fn acknowledge(pool: &SqlitePool, id: Uuid) -> VaultResult<Violation> {
    let mut violation = get(pool, id).await?;
    if violation.status != ViolationStatus::Open {
        return Err(VaultError::InvalidTransition(format!(
            "violation is {}, only open violations can be acknowledged",
            violation.status
        )));
    }
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE compliance_violations SET status = 'acknowledged', acknowledged_at = ?
         WHERE id = ? AND status = 'open'",
    )
    .bind(ts(&now))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("acknowledge violation"))?;
    if result.rows_affected() == 0 {
        return Err(VaultError::Conflict("violation was changed concurrently".to_string()));
    }

    violation.status = ViolationStatus::Acknowledged;
    violation.acknowledged_at = Some(now);
    Ok(violation)
}

/// 違反を解決済みにする
pub async fn resolve(pool: &SqlitePool, id: Uuid, resolved_by: Option<Uuid>) -> VaultResult<Violation> {
    let mut violation = get(pool, id).await?;
    if violation.status == ViolationStatus::Resolved {
        return Err(VaultError::InvalidTransition(
            "violation is already resolved".to_string(),
        ));
    }
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE compliance_violations SET status = 'resolved', resolved_at = ?, resolved_by = ?
         WHERE id = ? AND status != 'resolved'",
    )
    .bind(ts(&now))
    .bind(resolved_by.map(|u| u.to_string()))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("resolve violation"))?;
    if result.rows_affected() == 0 {
        return Err(VaultError::Conflict("violation was changed concurrently".to_string()));
    }

    violation.status = ViolationStatus::Resolved;
    violation.resolved_at = Some(now);
    violation.resolved_by = resolved_by;
    Ok(violation)
}

/// 指定日時より前に解決された違反を削除する
pub async fn delete_resolved_before(pool: &SqlitePool, cutoff: DateTime<Utc>) -> VaultResult<u64> {
    let result = sqlx::query(
        "DELETE FROM compliance_violations WHERE status = 'resolved' AND resolved_at < ?",
    )
    .bind(ts(&cutoff))
    .execute(pool)
    .await
    .map_err(db_err("delete resolved violations"))?;
    Ok(result.rows_affected())
}

/// 未解決の違反の重大度別件数
pub async fn count_open_by_severity(pool: &SqlitePool) -> VaultResult<Vec<CountRow>> {
    count_open_by(pool, "severity").await
}

/// 未解決の違反の種類別件数
pub async fn count_open_by_kind(pool: &SqlitePool) -> VaultResult<Vec<CountRow>> {
    count_open_by(pool, "kind").await
}

async fn count_open_by(pool: &SqlitePool, column: &str) -> VaultResult<Vec<CountRow>> {
    let sql = format!(
        "SELECT {col} AS key, COUNT(*) AS count FROM compliance_violations
         WHERE status != 'resolved' GROUP BY {col} ORDER BY {col}",
        col = column
    );
    sqlx::query_as::<_, CountRow>(&sql)
        .fetch_all(pool)
        .await
        .map_err(db_err("count open violations"))
}

/// 期間内に検出・解決された件数
pub async fn count_between(
    pool: &SqlitePool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> VaultResult<(i64, i64)> {
    let (opened, resolved): (i64, i64) = sqlx::query_as(
        "SELECT
            COALESCE(SUM(CASE WHEN detected_at >= ?1 AND detected_at < ?2 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN resolved_at >= ?1 AND resolved_at < ?2 THEN 1 ELSE 0 END), 0)
         FROM compliance_violations",
    )
    .bind(ts(&from))
    .bind(ts(&to))
    .fetch_one(pool)
    .await
    .map_err(db_err("count violations in window"))?;
    Ok((opened, resolved))
}

/// レポートを保存
pub async fn insert_report(pool: &SqlitePool, report: &ComplianceReport) -> VaultResult<()> {
    sqlx::query(
        "INSERT INTO compliance_reports
            (id, title, period_start, period_end, generated_at, generated_by, chain_valid, summary)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(report.id.to_string())
    .bind(&report.title)
    .bind(ts(&report.period_start))
    .bind(ts(&report.period_end))
    .bind(ts(&report.generated_at))
    .bind(report.generated_by.map(|u| u.to_string()))
    .bind(report.chain_valid as i64)
    .bind(report.summary.to_string())
    .execute(pool)
    .await
    .map_err(db_err("save compliance report"))?;
    Ok(())
}

/// レポート一覧（生成日時の新しい順）
pub async fn list_reports(pool: &SqlitePool, params: &PageParams) -> VaultResult<Page<ComplianceReport>> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM compliance_reports")
        .fetch_one(pool)
        .await
        .map_err(db_err("count compliance reports"))?;

    let sql = format!(
        "SELECT {} FROM compliance_reports ORDER BY generated_at DESC LIMIT ? OFFSET ?",
        REPORT_COLUMNS
    );
    let rows = sqlx::query_as::<_, ReportRow>(&sql)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .map_err(db_err("list compliance reports"))?;

    let items = rows
        .into_iter()
        .map(ComplianceReport::try_from)
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(Page::new(items, total, params))
}

/// レポートを取得
pub async fn get_report(pool: &SqlitePool, id: Uuid) -> VaultResult<ComplianceReport> {
    let sql = format!("SELECT {} FROM compliance_reports WHERE id = ?", REPORT_COLUMNS);
    sqlx::query_as::<_, ReportRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(db_err("get compliance report"))?
        .map(ComplianceReport::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("compliance report {}", id)))
}

#[derive(sqlx::FromRow)]
struct ViolationRow {
    id: String,
    kind: String,
    severity: String,
    subject_type: String,
    subject_id: String,
    description: String,
    status: String,
    detected_at: String,
    acknowledged_at: Option<String>,
    resolved_at: Option<String>,
    resolved_by: Option<String>,
}

impl TryFrom<ViolationRow> for Violation {
    type Error = VaultError;

    fn try_from(row: ViolationRow) -> Result<Self, Self::Error> {
        Ok(Violation {
            id: parse_uuid(&row.id)?,
            kind: parse_enum("kind", &row.kind)?,
            severity: parse_enum("severity", &row.severity)?,
            subject_type: row.subject_type,
            subject_id: row.subject_id,
            description: row.description,
            status: parse_enum("status", &row.status)?,
            detected_at: parse_ts(&row.detected_at)?,
            acknowledged_at: parse_ts_opt(row.acknowledged_at)?,
            resolved_at: parse_ts_opt(row.resolved_at)?,
            resolved_by: parse_uuid_opt(row.resolved_by)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: String,
    title: String,
    period_start: String,
    period_end: String,
    generated_at: String,
    generated_by: Option<String>,
    chain_valid: i64,
    summary: String,
}

impl TryFrom<ReportRow> for ComplianceReport {
    type Error = VaultError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(ComplianceReport {
            id: parse_uuid(&row.id)?,
            title: row.title,
            period_start: parse_ts(&row.period_start)?,
            period_end: parse_ts(&row.period_end)?,
            generated_at: parse_ts(&row.generated_at)?,
            generated_by: parse_uuid_opt(row.generated_by)?,
            chain_valid: row.chain_valid != 0,
            summary: serde_json::from_str(&row.summary)
                .map_err(|e| VaultError::Database(format!("Invalid report summary: {}", e)))?,
        })
    }
}
