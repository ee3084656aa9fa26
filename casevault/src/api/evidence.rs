//! 証拠・保管履歴API

use crate::audit::types::AuditContext;
use crate::auth::{claims_user_id, require_write};
use crate::common::auth::Claims;
use crate::common::types::Page;
use crate::db::evidence::{self, EvidenceFilter, EvidenceUpdate, NewCustodyEvent, NewEvidence};
use crate::types::{CustodyEvent, Evidence};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use uuid::Uuid;

use super::error::AppError;
use super::{created, no_content, with_audit};

/// GET /api/v1/evidence - 証拠一覧
pub async fn list_evidence(
    State(state): State<AppState>,
    Query(filter): Query<EvidenceFilter>,
) -> Result<Json<Page<Evidence>>, AppError> {
    Ok(Json(evidence::list(&state.db_pool, &filter).await?))
}

/// GET /api/v1/evidence/{id} - 保管履歴付きで取得
pub async fn get_evidence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let item = evidence::get_with_custody(&state.db_pool, id).await?;
    Ok(with_audit(Json(item), AuditContext::resource("evidence", id)))
}

/// POST /api/v1/evidence - 証拠登録
///
/// 収集イベント（連番1）を同じトランザクションで記録する。
pub async fn create_evidence(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(input): Json<NewEvidence>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let item = evidence::create(&state.db_pool, input, claims_user_id(&claims)).await?;
    let context = AuditContext::resource("evidence", item.evidence.id).with_detail(
        serde_json::json!({
            "case_id": item.evidence.case_id,
            "evidence_number": item.evidence.evidence_number,
        }),
    );
    Ok(created(Json(item), context))
}

/// PUT /api/v1/evidence/{id} - 記述項目の更新
pub async fn update_evidence(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<EvidenceUpdate>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let item = evidence::update(&state.db_pool, id, changes).await?;
    Ok(with_audit(Json(item), AuditContext::resource("evidence", id)))
}

/// DELETE /api/v1/evidence/{id}
///
/// 保管中かつ収集イベントのみの証拠に限る。
pub async fn delete_evidence(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    evidence::delete(&state.db_pool, id).await?;
    Ok(no_content(AuditContext::resource("evidence", id)))
}

/// GET /api/v1/evidence/{id}/custody - 保管イベント一覧
pub async fn list_custody(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CustodyEvent>>, AppError> {
    evidence::get(&state.db_pool, id).await?;
    Ok(Json(evidence::list_events(&state.db_pool, id).await?))
}

/// POST /api/v1/evidence/{id}/custody - 保管イベント追記
///
/// # Returns
/// * `201 Created` - 追記されたイベント
/// * `400 Bad Request` - 引き渡し元の不一致・日時の逆行・必須項目不足
/// * `409 Conflict` - 現在の保管状態で許可されないアクション
pub async fn append_custody(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<NewCustodyEvent>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let event = evidence::append_event(&state.db_pool, id, input, claims_user_id(&claims)).await?;
    let context = AuditContext::resource("evidence", id).with_detail(serde_json::json!({
        "custody_event_id": event.id,
        "sequence": event.sequence,
        "action": event.action,
        "to_holder": event.to_holder,
    }));
    Ok(created(Json(event), context))
}
