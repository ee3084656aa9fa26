//! 押収・法的文書API

use crate::audit::types::AuditContext;
use crate::auth::require_write;
use crate::common::auth::Claims;
use crate::common::types::Page;
use crate::db::legal::{
    self, InstrumentFilter, InstrumentUpdate, NewInstrument, NewSeizure, SeizureFilter,
    SeizureUpdate,
};
use crate::types::{InstrumentStatus, LegalInstrument, Seizure};
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

/// 法的文書のステータス変更リクエスト
#[derive(Debug, Deserialize)]
pub struct InstrumentStatusRequest {
    /// 遷移先ステータス
    pub status: InstrumentStatus,
}

/// GET /api/v1/seizures
pub async fn list_seizures(
    State(state): State<AppState>,
    Query(filter): Query<SeizureFilter>,
) -> Result<Json<Page<Seizure>>, AppError> {
    Ok(Json(legal::list_seizures(&state.db_pool, &filter).await?))
}

/// GET /api/v1/seizures/{id}
pub async fn get_seizure(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Seizure>, AppError> {
    Ok(Json(legal::get_seizure(&state.db_pool, id).await?))
}

/// POST /api/v1/seizures
///
/// 参照する法的文書は同じ事件のもので、下書き・取消済みでないこと。
pub async fn create_seizure(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(input): Json<NewSeizure>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let seizure = legal::create_seizure(&state.db_pool, input).await?;
    let context = AuditContext::resource("seizure", seizure.id).with_detail(serde_json::json!({
        "case_id": seizure.case_id,
        "legal_instrument_id": seizure.legal_instrument_id,
    }));
    Ok(created(Json(seizure), context))
}

/// PUT /api/v1/seizures/{id}
pub async fn update_seizure(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<SeizureUpdate>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let seizure = legal::update_seizure(&state.db_pool, id, changes).await?;
    Ok(with_audit(Json(seizure), AuditContext::resource("seizure", id)))
}

/// DELETE /api/v1/seizures/{id}
pub async fn delete_seizure(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    legal::delete_seizure(&state.db_pool, id).await?;
    Ok(no_content(AuditContext::resource("seizure", id)))
}

/// GET /api/v1/legal-instruments
pub async fn list_instruments(
    State(state): State<AppState>,
    Query(filter): Query<InstrumentFilter>,
) -> Result<Json<Page<LegalInstrument>>, AppError> {
    Ok(Json(legal::list_instruments(&state.db_pool, &filter).await?))
}

/// GET /api/v1/legal-instruments/{id}
pub async fn get_instrument(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LegalInstrument>, AppError> {
    Ok(Json(legal::get_instrument(&state.db_pool, id).await?))
}

/// POST /api/v1/legal-instruments
pub async fn create_instrument(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(input): Json<NewInstrument>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let instrument = legal::create_instrument(&state.db_pool, input).await?;
    let context = AuditContext::resource("legal_instrument", instrument.id).with_detail(
        serde_json::json!({ "reference_number": instrument.reference_number }),
    );
    Ok(created(Json(instrument), context))
}

/// PUT /api/v1/legal-instruments/{id}
pub async fn update_instrument(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<InstrumentUpdate>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let instrument = legal::update_instrument(&state.db_pool, id, changes).await?;
    Ok(with_audit(
        Json(instrument),
        AuditContext::resource("legal_instrument", id),
    ))
}

/// PUT /api/v1/legal-instruments/{id}/status
pub async fn change_instrument_status(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<InstrumentStatusRequest>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let instrument = legal::change_instrument_status(&state.db_pool, id, request.status).await?;
    let context = AuditContext::resource("legal_instrument", id)
        .with_detail(serde_json::json!({ "status": request.status }));
    Ok(with_audit(Json(instrument), context))
}

/// DELETE /api/v1/legal-instruments/{id}
///
/// 押収記録から参照されている文書は削除できない（409）。
pub async fn delete_instrument(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    legal::delete_instrument(&state.db_pool, id).await?;
    Ok(no_content(AuditContext::resource("legal_instrument", id)))
}
