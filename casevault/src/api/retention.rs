//! 保持ポリシー・保持ジョブAPI（Admin専用）

use crate::audit::types::AuditContext;
use crate::auth::require_admin;
use crate::common::auth::Claims;
use crate::common::types::Page;
use crate::db::retention::{self, JobFilter, NewPolicy, PolicyUpdate};
use crate::types::compliance::{RetentionJob, RetentionPolicy, RetentionTrigger};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::error::AppError;
use super::{created, no_content, with_audit};

/// 手動実行リクエスト
#[derive(Debug, Deserialize)]
pub struct RunJobRequest {
    /// 実行するポリシー
    pub policy_id: Uuid,
}

/// GET /api/v1/audit/retention/policies
pub async fn list_policies(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<Json<Vec<RetentionPolicy>>, AppError> {
    require_admin(&claims)?;
    Ok(Json(retention::list_policies(&state.db_pool).await?))
}

/// GET /api/v1/audit/retention/policies/{id}
pub async fn get_policy(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RetentionPolicy>, AppError> {
    require_admin(&claims)?;
    Ok(Json(retention::get_policy(&state.db_pool, id).await?))
}

/// POST /api/v1/audit/retention/policies
pub async fn create_policy(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(input): Json<NewPolicy>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let policy = retention::create_policy(&state.db_pool, input).await?;
    let context = AuditContext::resource("retention_policy", policy.id).with_detail(
        serde_json::json!({
            "target": policy.target,
            "retention_days": policy.retention_days,
        }),
    );
    Ok(created(Json(policy), context))
}

/// PUT /api/v1/audit/retention/policies/{id}
pub async fn update_policy(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<PolicyUpdate>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let policy = retention::update_policy(&state.db_pool, id, changes).await?;
    let context = AuditContext::resource("retention_policy", id).with_detail(serde_json::json!({
        "retention_days": policy.retention_days,
        "enabled": policy.enabled,
    }));
    Ok(with_audit(Json(policy), context))
}

/// DELETE /api/v1/audit/retention/policies/{id}
pub async fn delete_policy(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    retention::delete_policy(&state.db_pool, id).await?;
    Ok(no_content(AuditContext::resource("retention_policy", id)))
}

/// GET /api/v1/audit/retention/jobs?policy_id
pub async fn list_jobs(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<Page<RetentionJob>>, AppError> {
    require_admin(&claims)?;
    Ok(Json(retention::list_jobs(&state.db_pool, &filter).await?))
}

/// GET /api/v1/audit/retention/jobs/{id}
pub async fn get_job(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RetentionJob>, AppError> {
    require_admin(&claims)?;
    Ok(Json(retention::get_job(&state.db_pool, id).await?))
}

/// POST /api/v1/audit/retention/jobs - ポリシーを即時実行
///
/// 終了したジョブを返す。対象処理の失敗は`failed`ステータスのジョブとして返る。
///
/// # Returns
/// * `201 Created` - 終了したジョブ
/// * `404 Not Found` - ポリシーが存在しない
/// * `409 Conflict` - 同じポリシーのジョブが実行中
pub async fn run_job(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(request): Json<RunJobRequest>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let job = state
        .retention
        .run_policy(request.policy_id, RetentionTrigger::Manual)
        .await?;
    let context = AuditContext::resource("retention_job", job.id).with_detail(serde_json::json!({
        "policy_id": job.policy_id,
        "status": job.status,
        "records_processed": job.records_processed,
    }));
    Ok(created(Json(job), context))
}
