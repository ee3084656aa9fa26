//! コンプライアンスAPI（Admin専用）
//!
//! 違反の一覧・対応、スキャン、レポート、ダッシュボード

use crate::audit::types::{AuditAction, AuditContext};
use crate::auth::{claims_user_id, require_admin};
use crate::common::auth::Claims;
use crate::common::types::{Page, PageParams};
use crate::compliance::{ComplianceDashboard, ReportRequest, ScanSummary};
use crate::db::compliance::{self, ViolationFilter};
use crate::types::compliance::{ComplianceReport, Violation};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use uuid::Uuid;

use super::error::AppError;
use super::{created, with_audit};

/// GET /api/v1/audit/compliance/violations?status&kind&severity
pub async fn list_violations(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(filter): Query<ViolationFilter>,
) -> Result<Json<Page<Violation>>, AppError> {
    require_admin(&claims)?;
    Ok(Json(compliance::list(&state.db_pool, &filter).await?))
}

/// POST /api/v1/audit/compliance/violations/{id}/acknowledge
pub async fn acknowledge_violation(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let violation = compliance::acknowledge(&state.db_pool, id).await?;
    let context = AuditContext::resource("violation", id)
        .with_action(AuditAction::Update)
        .with_detail(serde_json::json!({ "status": violation.status }));
    Ok(with_audit(Json(violation), context))
}

/// POST /api/v1/audit/compliance/violations/{id}/resolve
pub async fn resolve_violation(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let violation = compliance::resolve(&state.db_pool, id, claims_user_id(&claims)).await?;
    let context = AuditContext::resource("violation", id)
        .with_action(AuditAction::Update)
        .with_detail(serde_json::json!({ "status": violation.status }));
    Ok(with_audit(Json(violation), context))
}

/// POST /api/v1/audit/compliance/scan - 全検査を即時実行
pub async fn run_scan(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    state.audit_log_writer.flush().await;
    let summary: ScanSummary = state.scanner.scan().await?;
    let context = AuditContext::resource("compliance_scan", summary.scanned_at.to_rfc3339())
        .with_action(AuditAction::Verify)
        .with_detail(serde_json::json!({
            "chain_valid": summary.chain.valid,
            "violations_opened": summary.violations_opened.len(),
            "cases_escalated": summary.cases_escalated.len(),
        }));
    Ok(with_audit(Json(summary), context))
}

/// GET /api/v1/audit/compliance/reports
pub async fn list_reports(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page<ComplianceReport>>, AppError> {
    require_admin(&claims)?;
    Ok(Json(compliance::list_reports(&state.db_pool, &params).await?))
}

/// POST /api/v1/audit/compliance/reports - 期間 [from, to) のレポートを生成
pub async fn create_report(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let report = crate::compliance::generate_report(
        &state.db_pool,
        &state.audit_log_storage,
        request,
        claims_user_id(&claims),
    )
    .await?;
    let context = AuditContext::resource("compliance_report", report.id).with_detail(
        serde_json::json!({
            "period_start": report.period_start,
            "period_end": report.period_end,
            "chain_valid": report.chain_valid,
        }),
    );
    Ok(created(Json(report), context))
}

/// GET /api/v1/audit/compliance/reports/{id}
pub async fn get_report(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ComplianceReport>, AppError> {
    require_admin(&claims)?;
    Ok(Json(compliance::get_report(&state.db_pool, id).await?))
}

/// GET /api/v1/audit/compliance/dashboard
pub async fn get_dashboard(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<Json<ComplianceDashboard>, AppError> {
    require_admin(&claims)?;
    Ok(Json(
        crate::compliance::dashboard(&state.db_pool, &state.audit_log_storage).await?,
    ))
}
