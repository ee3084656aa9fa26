//! 監査ログミドルウェア
//!
//! `/api/`配下の全HTTPリクエストのメタデータを自動記録する。
//! ヘルスチェックとメトリクスは除外。

use crate::audit::types::{ActorType, AuditAction, AuditContext, AuditEvent, AuthFailureInfo};
use crate::common::auth::Claims;
use crate::AppState;
use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use chrono::Utc;
use std::time::Instant;
use tracing::trace;

/// 監査対象から除外すべきパスか判定する
fn should_exclude(path: &str) -> bool {
    if path == "/health" || path == "/metrics" {
        return true;
    }
    !path.starts_with("/api/")
}

/// クライアントIP取得（プロキシ対応）
fn client_ip(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get("x-forwarded-for")
        .or_else(|| request.headers().get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .or_else(|| {
            request
                .extensions()
                .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
}

/// 監査ログミドルウェア
///
/// リクエストのHTTPメソッド・パス・ステータスコード・処理時間等を記録し、
/// `AuditLogWriter` 経由でバッファに送信する。
pub async fn audit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    if should_exclude(&path) {
        return next.run(request).await;
    }

    let client_ip = client_ip(&request);

    let response = next.run(request).await;

    let duration_ms = start.elapsed().as_millis() as i64;
    let status_code = response.status().as_u16();
    let extensions = response.extensions();

    let context = extensions.get::<AuditContext>().cloned().unwrap_or_default();
    let auth_failure = extensions.get::<AuthFailureInfo>().cloned();

    let (actor_type, actor_id, actor_username) = match extensions.get::<Claims>() {
        Some(claims) => (
            ActorType::User,
            Some(claims.sub.clone()),
            Some(claims.username.clone()).filter(|u| !u.is_empty()),
        ),
        None => (
            ActorType::Anonymous,
            None,
            auth_failure
                .as_ref()
                .and_then(|f| f.attempted_username.clone()),
        ),
    };

    let action = match (&auth_failure, context.action) {
        (Some(_), _) => AuditAction::LoginFailed,
        (None, Some(action)) => action,
        (None, None) => AuditAction::from_method(&method),
    };

    let detail = match auth_failure {
        Some(info) => Some(
            serde_json::json!({
                "auth_failure_reason": info.reason,
                "attempted_username": info.attempted_username,
            })
            .to_string(),
        ),
        None => context.detail.map(|d| d.to_string()),
    };

    trace!(
        method = %method,
        path = %path,
        status = status_code,
        duration_ms,
        actor_type = %actor_type,
        "audit log entry captured"
    );

    state.audit_log_writer.send(AuditEvent {
        timestamp: Utc::now(),
        http_method: method,
        request_path: path,
        status_code,
        actor_type,
        actor_id,
        actor_username,
        client_ip,
        duration_ms: Some(duration_ms),
        action,
        resource_type: context.resource_type,
        resource_id: context.resource_id,
        detail,
    });

    response
}
