//! 保持ポリシーAPI Contract Tests
//!
//! /api/v1/audit/retention/policies, /api/v1/audit/retention/jobs

use crate::support::app::TestApp;
use axum::http::StatusCode;
use casevault::audit::types::{AuditAction, AuditEvent};
use chrono::{Duration, Utc};
use serde_json::json;

async fn seed_old_entries(app: &TestApp, count: usize, age_days: i64) {
    for _ in 0..count {
        let mut event = AuditEvent::system(AuditAction::System, "seed", None);
        event.timestamp = Utc::now() - Duration::days(age_days);
        app.state.audit_log_storage.append(event).await.unwrap();
    }
}

#[tokio::test]
async fn test_policy_crud_and_validation() {
    let app = TestApp::new().await;

    let (status, _) = app
        .admin(
            "POST",
            "/api/v1/audit/retention/policies",
            Some(json!({ "name": "zero", "target": "notifications", "retention_days": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, policy) = app
        .admin(
            "POST",
            "/api/v1/audit/retention/policies",
            Some(json!({ "name": "notifications-90", "target": "notifications", "retention_days": 90 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(policy["enabled"], true);
    let id = policy["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .admin(
            "POST",
            "/api/v1/audit/retention/policies",
            Some(json!({ "name": "notifications-90", "target": "notifications", "retention_days": 30 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, updated) = app
        .admin(
            "PUT",
            &format!("/api/v1/audit/retention/policies/{}", id),
            Some(json!({ "retention_days": 120, "enabled": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["retention_days"], 120);
    assert_eq!(updated["enabled"], false);

    let (_, list) = app.admin("GET", "/api/v1/audit/retention/policies", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = app
        .investigator("GET", "/api/v1/audit/retention/policies", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .admin("DELETE", &format!("/api/v1/audit/retention/policies/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_audit_log_policy_archives_old_prefix() {
    let app = TestApp::with_archive().await;
    seed_old_entries(&app, 3, 60).await;
    app.create_case("Recent").await;
    app.flush_audit().await;

    let (_, policy) = app
        .admin(
            "POST",
            "/api/v1/audit/retention/policies",
            Some(json!({ "name": "audit-30", "target": "audit_log", "retention_days": 30 })),
        )
        .await;

    let (status, job) = app
        .admin(
            "POST",
            "/api/v1/audit/retention/jobs",
            Some(json!({ "policy_id": policy["id"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", job);
    assert_eq!(job["status"], "completed");
    assert_eq!(job["trigger"], "manual");
    assert_eq!(job["records_processed"], 3);

    // 残りのチェーンはアンカーから検証でき、アーカイブ側も連続している
    let (status, verify) = app
        .admin("POST", "/api/v1/audit/logs/verify?include_archive=true", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verify["valid"], true, "{}", verify);
    assert_eq!(verify["archive"]["entries_checked"], 3);

    let (_, main_only) = app.admin("GET", "/api/v1/audit/logs?action=system", None).await;
    assert_eq!(main_only["total"], 0);
    let (_, merged) = app
        .admin("GET", "/api/v1/audit/logs?action=system&include_archive=true", None)
        .await;
    assert_eq!(merged["total"], 3);

    let job_id = job["id"].as_str().unwrap();
    let (status, fetched) = app
        .admin("GET", &format!("/api/v1/audit/retention/jobs/{}", job_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["records_processed"], 3);

    let (_, jobs) = app.admin("GET", "/api/v1/audit/retention/jobs", None).await;
    assert_eq!(jobs["total"], 1);
}

#[tokio::test]
async fn test_audit_log_policy_fails_without_archive() {
    let app = TestApp::new().await;
    seed_old_entries(&app, 2, 60).await;

    let (_, policy) = app
        .admin(
            "POST",
            "/api/v1/audit/retention/policies",
            Some(json!({ "name": "audit-30", "target": "audit_log", "retention_days": 30 })),
        )
        .await;
    let (status, job) = app
        .admin(
            "POST",
            "/api/v1/audit/retention/jobs",
            Some(json!({ "policy_id": policy["id"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["status"], "failed");
    assert!(job["error"].as_str().unwrap().contains("archive"));

    // エントリは失われていない
    let (_, verify) = app.admin("POST", "/api/v1/audit/logs/verify", None).await;
    assert_eq!(verify["valid"], true);
}

#[tokio::test]
async fn test_run_unknown_policy() {
    let app = TestApp::new().await;
    let (status, _) = app
        .admin(
            "POST",
            "/api/v1/audit/retention/jobs",
            Some(json!({ "policy_id": uuid::Uuid::new_v4() })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
