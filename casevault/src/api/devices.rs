//! デバイスAPI

use crate::audit::types::AuditContext;
use crate::auth::require_write;
use crate::common::auth::Claims;
use crate::common::types::Page;
use crate::db::devices::{self, DeviceFilter, DeviceUpdate, NewDevice};
use crate::types::Device;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use uuid::Uuid;

use super::error::AppError;
use super::{created, no_content, with_audit};

/// GET /api/v1/devices
pub async fn list_devices(
    State(state): State<AppState>,
    Query(filter): Query<DeviceFilter>,
) -> Result<Json<Page<Device>>, AppError> {
    Ok(Json(devices::list(&state.db_pool, &filter).await?))
}

/// GET /api/v1/devices/{id}
pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Device>, AppError> {
    Ok(Json(devices::get(&state.db_pool, id).await?))
}

/// POST /api/v1/devices
pub async fn create_device(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(input): Json<NewDevice>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let device = devices::create(&state.db_pool, input).await?;
    let context = AuditContext::resource("device", device.id);
    Ok(created(Json(device), context))
}

/// PUT /api/v1/devices/{id}
///
/// ステータスは前進のみ（任意の状態から返却への移行は可）。
pub async fn update_device(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<DeviceUpdate>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let status = changes.status;
    let device = devices::update(&state.db_pool, id, changes).await?;
    let mut context = AuditContext::resource("device", id);
    if let Some(status) = status {
        context = context.with_detail(serde_json::json!({ "status": status }));
    }
    Ok(with_audit(Json(device), context))
}

/// DELETE /api/v1/devices/{id}
pub async fn delete_device(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    devices::delete(&state.db_pool, id).await?;
    Ok(no_content(AuditContext::resource("device", id)))
}
