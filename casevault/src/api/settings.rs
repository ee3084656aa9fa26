//! 設定API
//!
//! 通知設定の参照・更新（Admin専用）

use crate::audit::types::AuditContext;
use crate::auth::require_admin;
use crate::common::auth::Claims;
use crate::common::error::VaultError;
use crate::db::settings::NotificationSettings;
use crate::AppState;
use axum::{extract::State, response::Response, Extension, Json};

use super::error::AppError;
use super::with_audit;

const SENDER_NAME_MAX_LEN: usize = 100;
const RECIPIENT_MAX_LEN: usize = 200;

/// 通知設定を正規化・検証する
///
/// 空文字は未設定として扱う。WebhookのURLはhttp/httpsのみ許可する。
fn validate_settings(mut settings: NotificationSettings) -> Result<NotificationSettings, VaultError> {
    settings.webhook_url = settings
        .webhook_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    settings.default_recipient = settings
        .default_recipient
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    settings.sender_name = settings.sender_name.trim().to_string();

    if let Some(url) = &settings.webhook_url {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| VaultError::validation(format!("webhook_url is not a valid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(VaultError::validation(
                "webhook_url must be an http or https URL with a host",
            ));
        }
    }
    if settings
        .default_recipient
        .as_ref()
        .is_some_and(|r| r.chars().count() > RECIPIENT_MAX_LEN)
    {
        return Err(VaultError::validation(format!(
            "default_recipient must be at most {} characters",
            RECIPIENT_MAX_LEN
        )));
    }
    if settings.sender_name.is_empty() || settings.sender_name.chars().count() > SENDER_NAME_MAX_LEN {
        return Err(VaultError::validation(format!(
            "sender_name must be 1-{} characters",
            SENDER_NAME_MAX_LEN
        )));
    }
    Ok(settings)
}

/// GET /api/v1/settings/notifications
pub async fn get_notification_settings(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<Json<NotificationSettings>, AppError> {
    require_admin(&claims)?;
    Ok(Json(state.settings.notification_settings().await?))
}

/// PUT /api/v1/settings/notifications
pub async fn update_notification_settings(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(request): Json<NotificationSettings>,
) -> Result<Response, AppError> {
    require_admin(&claims)?;
    let settings = validate_settings(request)?;
    state.settings.save_notification_settings(&settings).await?;
    tracing::info!(
        enabled = settings.enabled,
        webhook = settings.webhook_url.is_some(),
        "Notification settings updated"
    );

    let context = AuditContext::resource("settings", "notifications").with_detail(
        serde_json::json!({
            "enabled": settings.enabled,
            "webhook_configured": settings.webhook_url.is_some(),
        }),
    );
    Ok(with_audit(Json(settings), context))
}
