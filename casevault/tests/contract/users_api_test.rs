//! ユーザー管理API Contract Tests
//!
//! /api/v1/users

use crate::support::app::{TestApp, TEST_PASSWORD};
use axum::http::StatusCode;
use serde_json::json;

async fn login(app: &TestApp, username: &str, password: &str) -> String {
    let (status, body) = app
        .request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_create_user_with_generated_password() {
    let app = TestApp::new().await;

    let (status, body) = app
        .admin(
            "POST",
            "/api/v1/users",
            Some(json!({ "username": "analyst.kim", "role": "investigator" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["user"]["role"], "investigator");
    assert!(body["user"].get("password_hash").is_none());
    let generated = body["generated_password"].as_str().unwrap().to_string();
    assert!(generated.len() >= 16);

    // 生成されたパスワードでログインできる
    login(&app, "analyst.kim", &generated).await;

    let (status, _) = app
        .admin(
            "POST",
            "/api/v1/users",
            Some(json!({ "username": "analyst.kim", "role": "viewer", "password": TEST_PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .admin(
            "POST",
            "/api/v1/users",
            Some(json!({ "username": "x", "role": "viewer" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, users) = app.admin("GET", "/api/v1/users", None).await;
    assert_eq!(users.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_user_management_is_admin_only() {
    let app = TestApp::new().await;
    let (status, _) = app.investigator("GET", "/api/v1/users", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .viewer(
            "POST",
            "/api/v1/users",
            Some(json!({ "username": "sneaky", "role": "admin" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cannot_delete_or_demote_self() {
    let app = TestApp::new().await;
    let uri = format!("/api/v1/users/{}", app.admin.id);

    let (status, _) = app.admin("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.admin("PUT", &uri, Some(json!({ "role": "viewer" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_last_active_admin_is_protected() {
    let app = TestApp::new().await;

    let (_, created) = app
        .admin(
            "POST",
            "/api/v1/users",
            Some(json!({ "username": "second-admin", "role": "admin", "password": TEST_PASSWORD })),
        )
        .await;
    let second_id = created["user"]["id"].as_str().unwrap().to_string();
    let second_token = login(&app, "second-admin", TEST_PASSWORD).await;

    // 2人目の管理者が最初の管理者を無効化する
    let (status, body) = app
        .request(
            "PUT",
            &format!("/api/v1/users/{}", app.admin.id),
            Some(&second_token),
            Some(json!({ "active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);

    // 無効化されたユーザーはログインできない
    let (status, _) = app
        .request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "admin", "password": TEST_PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // 残った唯一の有効な管理者は削除できない
    let (status, _) = app
        .admin("DELETE", &format!("/api/v1/users/{}", second_id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_delete_user() {
    let app = TestApp::new().await;
    let uri = format!("/api/v1/users/{}", app.viewer.id);

    let (status, _) = app.admin("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.admin("GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
