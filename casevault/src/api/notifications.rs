//! 通知キューAPI（Admin専用）

use crate::audit::types::AuditContext;
use crate::auth::require_admin;
use crate::common::auth::Claims;
use crate::common::types::Page;
use crate::db::notifications::{self, NotificationFilter};
use crate::types::compliance::Notification;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use uuid::Uuid;

use super::error::AppError;
use super::with_audit;

/// GET /api/v1/notifications?status
pub async fn list_notifications(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(filter): Query<NotificationFilter>,
) -> Result<Json<Page<Notification>>, AppError> {
    require_admin(&claims)?;
    Ok(Json(notifications::list(&state.db_pool, &filter).await?))
}

/// POST /api/v1/notifications/{id}/retry - 失敗した通知を再送待ちに戻す
pub async fn retry_notification(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let notification = notifications::retry(&state.db_pool, id).await?;
    Ok(with_audit(
        Json(notification),
        AuditContext::resource("notification", id),
    ))
}
