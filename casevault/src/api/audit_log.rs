//! 監査ログAPIハンドラー
//!
//! `/api/v1/audit/logs` 系のエンドポイント（Admin専用）

use super::error::AppError;
use super::with_audit;
use crate::audit::export::{self, ExportFormat};
use crate::audit::hash_chain::{self, ChainVerificationResult};
use crate::audit::types::{AuditAction, AuditContext, AuditLogEntry, AuditLogFilter};
use crate::auth::require_admin;
use crate::common::auth::Claims;
use crate::common::error::VaultError;
use crate::common::types::{Page, PageParams};
use crate::db::audit_log::AuditStats;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::Response,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

/// エクスポートが上限件数で打ち切られたかを示すヘッダー
pub const EXPORT_TRUNCATED_HEADER: header::HeaderName =
    header::HeaderName::from_static("x-export-truncated");

/// エクスポート形式のクエリパラメータ
#[derive(Debug, Default, Deserialize)]
pub struct ExportFormatParam {
    /// 出力形式（既定: csv）
    pub format: Option<ExportFormat>,
}

/// POST /export のリクエストボディ
#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    /// 出力形式（既定: csv）
    pub format: Option<ExportFormat>,
    /// 絞り込み条件
    #[serde(default)]
    pub filter: AuditLogFilter,
}

/// 検証のクエリパラメータ
#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    /// アーカイブDBも検証する
    #[serde(default)]
    pub include_archive: bool,
}

/// チェーン検証レスポンス
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    /// 全体の検証結果
    pub valid: bool,
    /// メインDBの検証結果
    pub chain: ChainVerificationResult,
    /// アーカイブDBの検証結果
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ChainVerificationResult>,
}

/// GET /api/v1/audit/logs - 監査ログ一覧取得
///
/// `include_archive=true` のときはアーカイブ分を後ろに連結してページングする。
pub async fn list_audit_logs(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(filter): Query<AuditLogFilter>,
) -> Result<Json<Page<AuditLogEntry>>, AppError> {
    require_admin(&claims)?;
    let storage = &state.audit_log_storage;

    let include_archive = filter.include_archive.unwrap_or(false);
    let page = match (include_archive, state.audit_archive_pool.as_ref()) {
        (true, Some(archive_pool)) => storage.query_with_archive(&filter, archive_pool).await?,
        _ => {
            let params = PageParams {
                page: filter.page,
                per_page: filter.per_page,
            };
            let items = storage.query(&filter).await?;
            let total = storage.count(&filter).await?;
            Page::new(items, total, &params)
        }
    };
    Ok(Json(page))
}

/// GET /api/v1/audit/logs/{id}
pub async fn get_audit_log(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AuditLogEntry>, AppError> {
    require_admin(&claims)?;
    let entry = state
        .audit_log_storage
        .get_by_id(id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("audit log entry {}", id)))?;
    Ok(Json(entry))
}

/// GET /api/v1/audit/logs/stats - 監査ログ統計取得
pub async fn get_audit_log_stats(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<Json<AuditStats>, AppError> {
    require_admin(&claims)?;
    Ok(Json(state.audit_log_storage.stats().await?))
}

/// POST /api/v1/audit/logs/verify - ハッシュチェーン検証
///
/// 改ざんを検出した場合はコンプライアンス違反を登録する。
pub async fn verify_hash_chain(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;

    // 監査ミドルウェアが送った直前のリクエストも検証対象に含める
    state.audit_log_writer.flush().await;
    let mut opened = Vec::new();
    let chain = state.scanner.check_chain(&mut opened).await?;

    let archive = match (params.include_archive, state.audit_archive_pool.as_ref()) {
        (true, Some(pool)) => Some(hash_chain::verify_archive_chain(pool).await?),
        _ => None,
    };
    let valid = chain.valid && archive.as_ref().map_or(true, |a| a.valid);

    let context = AuditContext::resource("audit_log", "chain")
        .with_action(AuditAction::Verify)
        .with_detail(serde_json::json!({
            "valid": valid,
            "entries_checked": chain.entries_checked,
            "violations_opened": opened.len(),
        }));
    Ok(with_audit(
        Json(VerifyResponse {
            valid,
            chain,
            archive,
        }),
        context,
    ))
}

/// GET /api/v1/audit/logs/export?format=csv|json&... - フィルタ付きエクスポート
pub async fn export_audit_logs(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(format): Query<ExportFormatParam>,
    Query(filter): Query<AuditLogFilter>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    export_response(&state, format.format.unwrap_or(ExportFormat::Csv), filter).await
}

/// POST /api/v1/audit/logs/export - JSONボディのフィルタでエクスポート
pub async fn export_audit_logs_with_body(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    export_response(
        &state,
        request.format.unwrap_or(ExportFormat::Csv),
        request.filter,
    )
    .await
}

async fn export_response(
    state: &AppState,
    format: ExportFormat,
    filter: AuditLogFilter,
) -> Result<Response, AppError> {
    let batch = export::collect_entries(
        &state.audit_log_storage,
        state.audit_archive_pool.as_ref(),
        &filter,
    )
    .await?;
    let body = export::render(format, &batch.entries)?;
    if batch.truncated {
        tracing::warn!(
            format = %format,
            count = batch.entries.len(),
            "Audit log export hit the entry limit and was truncated"
        );
    } else {
        tracing::info!(format = %format, count = batch.entries.len(), "Audit log exported");
    }

    let disposition = format!("attachment; filename=\"{}\"", format.file_name());
    let context = AuditContext::resource("audit_log", "export")
        .with_action(AuditAction::Export)
        .with_detail(serde_json::json!({
            "format": format,
            "count": batch.entries.len(),
            "truncated": batch.truncated,
            "filter": filter,
        }));
    Ok(with_audit(
        (
            [
                (header::CONTENT_TYPE, format.content_type().to_string()),
                (header::CONTENT_DISPOSITION, disposition),
                (EXPORT_TRUNCATED_HEADER, batch.truncated.to_string()),
            ],
            body,
        ),
        context,
    ))
}
