//! 認証API Contract Tests
//!
//! POST /api/v1/auth/login, GET /api/v1/auth/me, PUT /api/v1/auth/password

use crate::support::app::{TestApp, TEST_PASSWORD};
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_login_success_returns_token_and_user() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "investigator", "password": TEST_PASSWORD })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());
    assert_eq!(body["expires_in"], 86400);
    assert_eq!(body["user"]["username"], "investigator");
    assert_eq!(body["user"]["role"], "investigator");
    assert!(body["user"].get("password_hash").is_none());

    // 発行されたトークンで保護APIにアクセスできる
    let token = body["token"].as_str().unwrap().to_string();
    let (status, me) = app.request("GET", "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "investigator");
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = TestApp::new().await;
    let (s1, b1) = app
        .request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "admin", "password": "wrong-password" })),
        )
        .await;
    let (s2, b2) = app
        .request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "nobody", "password": "wrong-password" })),
        )
        .await;

    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!(s2, StatusCode::UNAUTHORIZED);
    assert_eq!(b1, b2);
    assert_eq!(b1["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn test_login_attempts_are_audited() {
    let app = TestApp::new().await;
    app.request(
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": "mallory", "password": "guess-guess" })),
    )
    .await;
    app.request(
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": "viewer", "password": TEST_PASSWORD })),
    )
    .await;
    app.flush_audit().await;

    let (status, failed) = app
        .admin("GET", "/api/v1/audit/logs?action=login_failed", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed["total"], 1);
    let entry = &failed["items"][0];
    assert_eq!(entry["actor_type"], "anonymous");
    assert_eq!(entry["actor_username"], "mallory");
    assert_eq!(entry["status_code"], 401);
    assert_eq!(entry["client_ip"], "198.51.100.7");
    assert!(entry["detail"].as_str().unwrap().contains("unknown_user"));

    let (_, ok) = app.admin("GET", "/api/v1/audit/logs?action=login", None).await;
    assert_eq!(ok["total"], 1);
    assert_eq!(ok["items"][0]["actor_type"], "user");
    assert_eq!(ok["items"][0]["actor_id"], app.viewer.id.as_str());
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = TestApp::new().await;
    let (status, body) = app.request("GET", "/api/v1/cases", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "401");

    let (status, _) = app
        .request("GET", "/api/v1/cases", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_and_metrics_are_public() {
    let app = TestApp::new().await;
    let (status, body) = app.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, raw) = app.request_raw("GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(raw).unwrap().contains("casevault_"));
}

#[tokio::test]
async fn test_change_password() {
    let app = TestApp::new().await;
    let token = app.investigator.token.clone();

    let (status, _) = app
        .request(
            "PUT",
            "/api/v1/auth/password",
            Some(&token),
            Some(json!({ "current_password": "wrong-password", "new_password": "new-password-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(
            "PUT",
            "/api/v1/auth/password",
            Some(&token),
            Some(json!({ "current_password": TEST_PASSWORD, "new_password": "short" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            "PUT",
            "/api/v1/auth/password",
            Some(&token),
            Some(json!({ "current_password": TEST_PASSWORD, "new_password": "new-password-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "investigator", "password": "new-password-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}
