//! コンプライアンスAPI Contract Tests
//!
//! /api/v1/audit/compliance/*

use crate::support::app::TestApp;
use axum::http::StatusCode;
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Value};

fn days_ago(days: i64) -> String {
    (Utc::now() - Duration::days(days)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn violations(app: &TestApp, kind: &str) -> Value {
    let (status, body) = app
        .admin(
            "GET",
            &format!("/api/v1/audit/compliance/violations?kind={}", kind),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_scan_escalates_case_past_sla() {
    let app = TestApp::new().await;
    let (status, case) = app
        .investigator(
            "POST",
            "/api/v1/cases",
            Some(json!({ "title": "Stale", "priority": "high", "opened_at": days_ago(45) })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let case_id = case["id"].as_str().unwrap().to_string();

    let (status, summary) = app.admin("POST", "/api/v1/audit/compliance/scan", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["cases_escalated"][0], case_id.as_str());

    let breaches = violations(&app, "case_sla_breach").await;
    assert_eq!(breaches["total"], 1);
    assert_eq!(breaches["items"][0]["subject_id"], case_id.as_str());

    let (_, escalated) = app
        .viewer("GET", &format!("/api/v1/cases/{}", case_id), None)
        .await;
    assert_eq!(escalated["priority"], "critical");
    assert!(escalated["escalated_at"].is_string());

    // 2回目のスキャンでは再登録しない
    app.admin("POST", "/api/v1/audit/compliance/scan", None).await;
    assert_eq!(violations(&app, "case_sla_breach").await["total"], 1);

    let (_, queued) = app
        .admin("GET", "/api/v1/notifications?kind=case_escalated", None)
        .await;
    assert_eq!(queued["total"], 1);
}

#[tokio::test]
async fn test_scan_flags_overdue_checkout() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Overdue").await;
    let (status, evidence) = app
        .investigator(
            "POST",
            "/api/v1/evidence",
            Some(json!({
                "case_id": case_id,
                "description": "USB stick",
                "evidence_type": "digital_media",
                "collected_by": "Officer Tanaka",
                "collected_at": days_ago(40),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let evidence_id = evidence["id"].as_str().unwrap();

    let (status, _) = app
        .investigator(
            "POST",
            &format!("/api/v1/evidence/{}/custody", evidence_id),
            Some(json!({
                "action": "checked_out",
                "to_holder": "Analyst Sato",
                "occurred_at": days_ago(30),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    app.admin("POST", "/api/v1/audit/compliance/scan", None).await;
    let overdue = violations(&app, "custody_checkout_overdue").await;
    assert_eq!(overdue["total"], 1);
    assert_eq!(overdue["items"][0]["subject_id"], evidence_id);
}

#[tokio::test]
async fn test_scan_flags_seizure_outside_instrument_validity() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Warrant").await;
    let (status, instrument) = app
        .investigator(
            "POST",
            "/api/v1/legal-instruments",
            Some(json!({
                "case_id": case_id,
                "instrument_type": "warrant",
                "reference_number": "W-2026-0042",
                "issued_at": days_ago(10),
                "expires_at": days_ago(5),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", instrument);
    assert_eq!(instrument["status"], "draft");

    // 下書きの文書は押収の根拠にならない
    let seizure_body = json!({
        "case_id": case_id,
        "legal_instrument_id": instrument["id"],
        "seized_at": days_ago(2),
        "location": "12 Harbor St",
        "item_count": 3,
    });
    let (status, _) = app
        .investigator("POST", "/api/v1/seizures", Some(seizure_body.clone()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .investigator(
            "PUT",
            &format!(
                "/api/v1/legal-instruments/{}/status",
                instrument["id"].as_str().unwrap()
            ),
            Some(json!({ "status": "active" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, seizure) = app
        .investigator("POST", "/api/v1/seizures", Some(seizure_body))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", seizure);

    app.admin("POST", "/api/v1/audit/compliance/scan", None).await;
    let flagged = violations(&app, "seizure_outside_authority").await;
    assert_eq!(flagged["total"], 1);
    assert_eq!(flagged["items"][0]["subject_id"], seizure["id"]);
}

#[tokio::test]
async fn test_violation_lifecycle() {
    let app = TestApp::new().await;
    app.investigator(
        "POST",
        "/api/v1/cases",
        Some(json!({ "title": "Old", "priority": "critical", "opened_at": days_ago(30) })),
    )
    .await;
    app.admin("POST", "/api/v1/audit/compliance/scan", None).await;
    let list = violations(&app, "case_sla_breach").await;
    let id = list["items"][0]["id"].as_str().unwrap().to_string();

    let (status, acked) = app
        .admin(
            "POST",
            &format!("/api/v1/audit/compliance/violations/{}/acknowledge", id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(acked["status"], "acknowledged");

    let (status, resolved) = app
        .admin(
            "POST",
            &format!("/api/v1/audit/compliance/violations/{}/resolve", id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "resolved");
    assert_eq!(resolved["resolved_by"], app.admin.id.as_str());

    // 解決済みは再度確認できない
    let (status, _) = app
        .admin(
            "POST",
            &format!("/api/v1/audit/compliance/violations/{}/acknowledge", id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_reports_and_dashboard() {
    let app = TestApp::new().await;
    app.create_case("Reported").await;
    app.admin("POST", "/api/v1/audit/logs/verify", None).await;
    app.flush_audit().await;

    let (status, report) = app
        .admin(
            "POST",
            "/api/v1/audit/compliance/reports",
            Some(json!({ "from": days_ago(1), "to": days_ago(-1) })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", report);
    assert_eq!(report["chain_valid"], true);
    let id = report["id"].as_str().unwrap();

    let (status, fetched) = app
        .admin("GET", &format!("/api/v1/audit/compliance/reports/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], id);

    let (_, list) = app.admin("GET", "/api/v1/audit/compliance/reports", None).await;
    assert_eq!(list["total"], 1);

    let (status, _) = app
        .admin(
            "POST",
            "/api/v1/audit/compliance/reports",
            Some(json!({ "from": days_ago(0), "to": days_ago(3) })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, dashboard) = app
        .admin("GET", "/api/v1/audit/compliance/dashboard", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dashboard["last_verification"]["valid"], true);
}
