//! 設定・通知API Contract Tests
//!
//! /api/v1/settings/notifications, /api/v1/notifications

use crate::support::app::TestApp;
use axum::http::StatusCode;
use casevault::db::notifications;
use casevault::types::compliance::NotificationKind;
use serde_json::json;

#[tokio::test]
async fn test_notification_settings_roundtrip() {
    let app = TestApp::new().await;

    let (status, defaults) = app.admin("GET", "/api/v1/settings/notifications", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(defaults["enabled"], true);
    assert_eq!(defaults["sender_name"], "casevault");

    let (status, saved) = app
        .admin(
            "PUT",
            "/api/v1/settings/notifications",
            Some(json!({
                "enabled": false,
                "webhook_url": " https://hooks.example.org/lab ",
                "default_recipient": "evidence-room@example.org",
                "sender_name": "Forensics Lab",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", saved);
    assert_eq!(saved["webhook_url"], "https://hooks.example.org/lab");

    let (_, fetched) = app.admin("GET", "/api/v1/settings/notifications", None).await;
    assert_eq!(fetched, saved);
}

#[tokio::test]
async fn test_notification_settings_validation() {
    let app = TestApp::new().await;

    let (status, body) = app
        .admin(
            "PUT",
            "/api/v1/settings/notifications",
            Some(json!({ "webhook_url": "ftp://files.example.org" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let (status, _) = app
        .admin(
            "PUT",
            "/api/v1/settings/notifications",
            Some(json!({ "sender_name": "   " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .investigator("GET", "/api/v1/settings/notifications", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_list_and_retry_notifications() {
    let app = TestApp::new().await;

    let pending = notifications::enqueue(
        &app.pool,
        NotificationKind::Generic,
        None,
        "Pending",
        "still queued",
    )
    .await
    .unwrap();
    let failed = notifications::enqueue(
        &app.pool,
        NotificationKind::ViolationDetected,
        Some("lead@example.org"),
        "Failed",
        "gave up",
    )
    .await
    .unwrap();
    notifications::record_failure(&app.pool, failed.id, "connection refused", None)
        .await
        .unwrap();

    let (status, list) = app.admin("GET", "/api/v1/notifications", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 2);

    let (_, failed_only) = app
        .admin("GET", "/api/v1/notifications?status=failed", None)
        .await;
    assert_eq!(failed_only["total"], 1);
    assert_eq!(failed_only["items"][0]["last_error"], "connection refused");

    // 送信待ちの通知は再送できない
    let (status, _) = app
        .admin(
            "POST",
            &format!("/api/v1/notifications/{}/retry", pending.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, retried) = app
        .admin(
            "POST",
            &format!("/api/v1/notifications/{}/retry", failed.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retried["status"], "pending");
    assert_eq!(retried["attempts"], 0);

    let (status, _) = app.viewer("GET", "/api/v1/notifications", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
