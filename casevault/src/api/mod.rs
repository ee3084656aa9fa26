//! REST APIハンドラー
//!
//! `/api/v1`配下のJSON API。ログイン以外はJWT認証を要求する。

use crate::audit::types::AuditContext;
use crate::AppState;
use axum::{
    http::{header, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// 監査ログの検索・検証・エクスポート
pub mod audit_log;
/// 認証（ログイン・パスワード変更）
pub mod auth;
/// カレンダー
pub mod calendar;
/// 事件・関係者
pub mod cases;
/// コンプライアンス違反・レポート
pub mod compliance;
/// デバイス
pub mod devices;
/// APIエラーレスポンス
pub mod error;
/// 証拠・保管履歴
pub mod evidence;
/// 押収・法的文書
pub mod legal;
/// ルックアップ値
pub mod lookups;
/// 通知キュー
pub mod notifications;
/// 事件レポート
pub mod reports;
/// 保持ポリシー・ジョブ
pub mod retention;
/// 設定
pub mod settings;
/// ユーザー管理
pub mod users;

/// レスポンスに監査コンテキストを付与する
pub fn with_audit(response: impl IntoResponse, context: AuditContext) -> Response {
    let mut response = response.into_response();
    response.extensions_mut().insert(context);
    response
}

/// 201 Created + 監査コンテキスト
pub fn created(body: impl IntoResponse, context: AuditContext) -> Response {
    with_audit((StatusCode::CREATED, body), context)
}

/// 204 No Content + 監査コンテキスト
pub fn no_content(context: AuditContext) -> Response {
    with_audit(StatusCode::NO_CONTENT, context)
}

/// アプリケーションのルーターを構築する
pub fn create_app(state: AppState) -> Router {
    let public = Router::new().route("/api/v1/auth/login", post(auth::login));

    let protected = Router::new()
        // 認証
        .route("/api/v1/auth/me", get(auth::me))
        .route("/api/v1/auth/password", put(auth::change_password))
        // ユーザー管理
        .route("/api/v1/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/v1/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        // 事件
        .route("/api/v1/cases", get(cases::list_cases).post(cases::create_case))
        .route(
            "/api/v1/cases/{id}",
            get(cases::get_case)
                .put(cases::update_case)
                .delete(cases::delete_case),
        )
        .route("/api/v1/cases/{id}/status", put(cases::change_status))
        .route(
            "/api/v1/cases/{id}/parties",
            get(cases::list_parties).post(cases::create_party),
        )
        .route(
            "/api/v1/parties/{id}",
            get(cases::get_party)
                .put(cases::update_party)
                .delete(cases::delete_party),
        )
        // 証拠
        .route(
            "/api/v1/evidence",
            get(evidence::list_evidence).post(evidence::create_evidence),
        )
        .route(
            "/api/v1/evidence/{id}",
            get(evidence::get_evidence)
                .put(evidence::update_evidence)
                .delete(evidence::delete_evidence),
        )
        .route(
            "/api/v1/evidence/{id}/custody",
            get(evidence::list_custody).post(evidence::append_custody),
        )
        // デバイス
        .route(
            "/api/v1/devices",
            get(devices::list_devices).post(devices::create_device),
        )
        .route(
            "/api/v1/devices/{id}",
            get(devices::get_device)
                .put(devices::update_device)
                .delete(devices::delete_device),
        )
        // 押収・法的文書
        .route(
            "/api/v1/seizures",
            get(legal::list_seizures).post(legal::create_seizure),
        )
        .route(
            "/api/v1/seizures/{id}",
            get(legal::get_seizure)
                .put(legal::update_seizure)
                .delete(legal::delete_seizure),
        )
        .route(
            "/api/v1/legal-instruments",
            get(legal::list_instruments).post(legal::create_instrument),
        )
        .route(
            "/api/v1/legal-instruments/{id}",
            get(legal::get_instrument)
                .put(legal::update_instrument)
                .delete(legal::delete_instrument),
        )
        .route(
            "/api/v1/legal-instruments/{id}/status",
            put(legal::change_instrument_status),
        )
        // カレンダー・ルックアップ
        .route(
            "/api/v1/calendar",
            get(calendar::list_events).post(calendar::create_event),
        )
        .route(
            "/api/v1/calendar/{id}",
            get(calendar::get_event)
                .put(calendar::update_event)
                .delete(calendar::delete_event),
        )
        .route(
            "/api/v1/lookups",
            get(lookups::list_lookups).post(lookups::create_lookup),
        )
        .route(
            "/api/v1/lookups/{id}",
            get(lookups::get_lookup)
                .put(lookups::update_lookup)
                .delete(lookups::delete_lookup),
        )
        // レポート・設定・通知
        .route("/api/v1/reports/cases", get(reports::case_report))
        .route(
            "/api/v1/settings/notifications",
            get(settings::get_notification_settings).put(settings::update_notification_settings),
        )
        .route("/api/v1/notifications", get(notifications::list_notifications))
        .route(
            "/api/v1/notifications/{id}/retry",
            post(notifications::retry_notification),
        )
        // 監査ログ
        .route("/api/v1/audit/logs", get(audit_log::list_audit_logs))
        .route("/api/v1/audit/logs/verify", post(audit_log::verify_hash_chain))
        .route(
            "/api/v1/audit/logs/export",
            get(audit_log::export_audit_logs).post(audit_log::export_audit_logs_with_body),
        )
        .route("/api/v1/audit/logs/stats", get(audit_log::get_audit_log_stats))
        .route("/api/v1/audit/logs/{id}", get(audit_log::get_audit_log))
        // 保持ポリシー
        .route(
            "/api/v1/audit/retention/policies",
            get(retention::list_policies).post(retention::create_policy),
        )
        .route(
            "/api/v1/audit/retention/policies/{id}",
            get(retention::get_policy)
                .put(retention::update_policy)
                .delete(retention::delete_policy),
        )
        .route(
            "/api/v1/audit/retention/jobs",
            get(retention::list_jobs).post(retention::run_job),
        )
        .route("/api/v1/audit/retention/jobs/{id}", get(retention::get_job))
        // コンプライアンス
        .route(
            "/api/v1/audit/compliance/reports",
            get(compliance::list_reports).post(compliance::create_report),
        )
        .route(
            "/api/v1/audit/compliance/reports/{id}",
            get(compliance::get_report),
        )
        .route(
            "/api/v1/audit/compliance/violations",
            get(compliance::list_violations),
        )
        .route(
            "/api/v1/audit/compliance/violations/{id}/acknowledge",
            post(compliance::acknowledge_violation),
        )
        .route(
            "/api/v1/audit/compliance/violations/{id}/resolve",
            post(compliance::resolve_violation),
        )
        .route("/api/v1/audit/compliance/scan", post(compliance::run_scan))
        .route(
            "/api/v1/audit/compliance/dashboard",
            get(compliance::get_dashboard),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.jwt_secret.clone(),
            crate::auth::middleware::jwt_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(public)
        .merge(protected)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            crate::audit::middleware::audit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

/// GET /metrics - Prometheusテキスト形式
async fn metrics_handler() -> Response {
    match crate::metrics::METRICS.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
