//! 事件API
//!
//! 事件のCRUD、ステータス遷移、関係者

use crate::audit::types::AuditContext;
use crate::auth::{claims_user_id, require_write};
use crate::common::auth::Claims;
use crate::common::types::Page;
use crate::db::cases::{self, CaseFilter, CaseUpdate, NewCase, PartyInput};
use crate::types::{Case, CaseStatus, Party};
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

/// ステータス変更リクエスト
#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    /// 遷移先ステータス
    pub status: CaseStatus,
}

/// GET /api/v1/cases - 事件一覧
pub async fn list_cases(
    State(state): State<AppState>,
    Query(filter): Query<CaseFilter>,
) -> Result<Json<Page<Case>>, AppError> {
    Ok(Json(cases::list(&state.db_pool, &filter).await?))
}

/// GET /api/v1/cases/{id}
pub async fn get_case(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let case = cases::get(&state.db_pool, id).await?;
    Ok(with_audit(Json(case), AuditContext::resource("case", id)))
}

/// POST /api/v1/cases - 事件登録
///
/// 事件番号（CASE-YYYY-NNNN）はサーバーで採番する。
pub async fn create_case(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(input): Json<NewCase>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let case = cases::create(&state.db_pool, input, claims_user_id(&claims)).await?;
    let context = AuditContext::resource("case", case.id)
        .with_detail(serde_json::json!({ "case_number": case.case_number }));
    Ok(created(Json(case), context))
}

/// PUT /api/v1/cases/{id} - 部分更新
pub async fn update_case(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<CaseUpdate>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let case = cases::update(&state.db_pool, id, changes).await?;
    Ok(with_audit(Json(case), AuditContext::resource("case", id)))
}

/// PUT /api/v1/cases/{id}/status - ステータス遷移
///
/// 許可されない遷移は409を返す。
pub async fn change_status(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusChangeRequest>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let case = cases::change_status(&state.db_pool, id, request.status).await?;
    let context = AuditContext::resource("case", id)
        .with_detail(serde_json::json!({ "status": request.status }));
    Ok(with_audit(Json(case), context))
}

/// DELETE /api/v1/cases/{id}
pub async fn delete_case(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    cases::delete(&state.db_pool, id).await?;
    Ok(no_content(AuditContext::resource("case", id)))
}

/// GET /api/v1/cases/{id}/parties
pub async fn list_parties(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
) -> Result<Json<Vec<Party>>, AppError> {
    cases::get(&state.db_pool, case_id).await?;
    Ok(Json(cases::list_parties(&state.db_pool, case_id).await?))
}

/// POST /api/v1/cases/{id}/parties
pub async fn create_party(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    Json(input): Json<PartyInput>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let party = cases::create_party(&state.db_pool, case_id, input).await?;
    let context = AuditContext::resource("party", party.id)
        .with_detail(serde_json::json!({ "case_id": case_id }));
    Ok(created(Json(party), context))
}

/// GET /api/v1/parties/{id}
pub async fn get_party(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Party>, AppError> {
    Ok(Json(cases::get_party(&state.db_pool, id).await?))
}

/// PUT /api/v1/parties/{id}
pub async fn update_party(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<PartyInput>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let party = cases::update_party(&state.db_pool, id, input).await?;
    Ok(with_audit(Json(party), AuditContext::resource("party", id)))
}

/// DELETE /api/v1/parties/{id}
pub async fn delete_party(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    cases::delete_party(&state.db_pool, id).await?;
    Ok(no_content(AuditContext::resource("party", id)))
}
