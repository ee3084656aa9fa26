//! カレンダーAPI

use crate::audit::types::AuditContext;
use crate::auth::{claims_user_id, require_write};
use crate::common::auth::Claims;
use crate::common::error::VaultError;
use crate::db::calendar::{self, CalendarFilter, CalendarInput};
use crate::types::CalendarEvent;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use uuid::Uuid;

use super::error::AppError;
use super::{created, no_content, with_audit};

/// GET /api/v1/calendar?from&to&case_id - 期間 [from, to) と重なる予定
pub async fn list_events(
    State(state): State<AppState>,
    Query(filter): Query<CalendarFilter>,
) -> Result<Json<Vec<CalendarEvent>>, AppError> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if to <= from {
            return Err(VaultError::validation("'to' must be after 'from'").into());
        }
    }
    Ok(Json(calendar::list(&state.db_pool, &filter).await?))
}

/// GET /api/v1/calendar/{id}
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CalendarEvent>, AppError> {
    Ok(Json(calendar::get(&state.db_pool, id).await?))
}

/// POST /api/v1/calendar
pub async fn create_event(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(input): Json<CalendarInput>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let event = calendar::create(&state.db_pool, input, claims_user_id(&claims)).await?;
    let context = AuditContext::resource("calendar_event", event.id);
    Ok(created(Json(event), context))
}

/// PUT /api/v1/calendar/{id}
pub async fn update_event(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<CalendarInput>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    let event = calendar::update(&state.db_pool, id, input).await?;
    Ok(with_audit(
        Json(event),
        AuditContext::resource("calendar_event", id),
    ))
}

/// DELETE /api/v1/calendar/{id}
pub async fn delete_event(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_write(&claims)?;
    calendar::delete(&state.db_pool, id).await?;
    Ok(no_content(AuditContext::resource("calendar_event", id)))
}
