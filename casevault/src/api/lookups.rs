//! ルックアップ値API
//!
//! 参照は全ロール、変更はAdminのみ

use crate::audit::types::AuditContext;
use crate::auth::require_admin;
use crate::common::auth::Claims;
use crate::db::lookups::{self, LookupUpdate, NewLookup};
use crate::types::{LookupCategory, LookupValue};
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

/// 一覧の検索条件
#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    /// カテゴリ
    pub category: Option<LookupCategory>,
    /// 有効な値のみ
    #[serde(default)]
    pub active_only: bool,
}

/// GET /api/v1/lookups?category&active_only
pub async fn list_lookups(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Vec<LookupValue>>, AppError> {
    Ok(Json(
        lookups::list(&state.db_pool, query.category, query.active_only).await?,
    ))
}

/// GET /api/v1/lookups/{id}
pub async fn get_lookup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LookupValue>, AppError> {
    Ok(Json(lookups::get(&state.db_pool, id).await?))
}

/// POST /api/v1/lookups
pub async fn create_lookup(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(input): Json<NewLookup>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let value = lookups::create(&state.db_pool, input).await?;
    let context = AuditContext::resource("lookup_value", value.id).with_detail(
        serde_json::json!({ "category": value.category, "code": value.code }),
    );
    Ok(created(Json(value), context))
}

/// PUT /api/v1/lookups/{id}
pub async fn update_lookup(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<LookupUpdate>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let value = lookups::update(&state.db_pool, id, changes).await?;
    Ok(with_audit(Json(value), AuditContext::resource("lookup_value", id)))
}

/// DELETE /api/v1/lookups/{id}
pub async fn delete_lookup(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    lookups::delete(&state.db_pool, id).await?;
    Ok(no_content(AuditContext::resource("lookup_value", id)))
}
