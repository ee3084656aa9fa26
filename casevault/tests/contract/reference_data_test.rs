//! 参照データAPI Contract Tests
//!
//! デバイス・カレンダー・ルックアップ・事件レポート

use crate::support::app::TestApp;
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_device_lifecycle() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Phone seizure").await;

    let (status, _) = app
        .investigator(
            "POST",
            "/api/v1/devices",
            Some(json!({ "case_id": case_id, "device_type": "phone", "imei": "12345" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, device) = app
        .investigator(
            "POST",
            "/api/v1/devices",
            Some(json!({
                "case_id": case_id,
                "device_type": "phone",
                "make": "Acme",
                "model": "P7",
                "serial_number": "SN-001",
                "imei": "490154203237518",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", device);
    assert_eq!(device["status"], "received");
    let uri = format!("/api/v1/devices/{}", device["id"].as_str().unwrap());

    let (status, _) = app
        .investigator(
            "POST",
            "/api/v1/devices",
            Some(json!({ "device_type": "phone", "make": "Acme", "serial_number": "SN-001" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // ステータスは1段ずつ進む
    let (status, _) = app
        .investigator("PUT", &uri, Some(json!({ "status": "analyzed" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, updated) = app
        .investigator("PUT", &uri, Some(json!({ "status": "imaging" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "imaging");

    let (_, list) = app
        .viewer("GET", &format!("/api/v1/devices?case_id={}&q=P7", case_id), None)
        .await;
    assert_eq!(list["total"], 1);

    let (status, _) = app.viewer("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.investigator("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_calendar_range_queries() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Trial prep").await;

    let (status, event) = app
        .investigator(
            "POST",
            "/api/v1/calendar",
            Some(json!({
                "case_id": case_id,
                "title": "Preliminary hearing",
                "event_type": "hearing",
                "starts_at": "2026-03-10T09:00:00Z",
                "ends_at": "2026-03-10T11:00:00Z",
                "location": "Courtroom 4",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", event);

    let (status, _) = app
        .investigator(
            "POST",
            "/api/v1/calendar",
            Some(json!({
                "title": "Backwards",
                "event_type": "deadline",
                "starts_at": "2026-03-10T09:00:00Z",
                "ends_at": "2026-03-09T09:00:00Z",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, march) = app
        .viewer(
            "GET",
            "/api/v1/calendar?from=2026-03-01T00:00:00Z&to=2026-04-01T00:00:00Z",
            None,
        )
        .await;
    assert_eq!(march.as_array().unwrap().len(), 1);

    let (_, april) = app
        .viewer(
            "GET",
            "/api/v1/calendar?from=2026-04-01T00:00:00Z&to=2026-05-01T00:00:00Z",
            None,
        )
        .await;
    assert!(april.as_array().unwrap().is_empty());

    let (status, _) = app
        .viewer(
            "GET",
            "/api/v1/calendar?from=2026-04-01T00:00:00Z&to=2026-03-01T00:00:00Z",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lookup_writes_are_admin_only() {
    let app = TestApp::new().await;

    let (status, seeded) = app
        .viewer("GET", "/api/v1/lookups?category=device_type", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(seeded
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v["code"] == "phone"));

    let body = json!({ "category": "device_type", "code": "drone", "label": "Drone" });
    let (status, _) = app
        .investigator("POST", "/api/v1/lookups", Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = app.admin("POST", "/api/v1/lookups", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app.admin("POST", "/api/v1/lookups", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // 無効化したコードは新規登録で使えない
    let uri = format!("/api/v1/lookups/{}", created["id"].as_str().unwrap());
    let (status, _) = app.admin("PUT", &uri, Some(json!({ "active": false }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .investigator(
            "POST",
            "/api/v1/devices",
            Some(json!({ "device_type": "drone" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_case_report() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Report subject").await;
    app.create_evidence(&case_id).await;

    let (status, report) = app.viewer("GET", "/api/v1/reports/cases", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["window"]["opened"], 1);
    assert_eq!(report["window"]["closed"], 0);
    assert!(report["cases_by_status"]
        .as_array()
        .unwrap()
        .iter()
        .any(|row| row["key"] == "open" && row["count"] == 1));
    assert!(report["evidence_by_type"]
        .as_array()
        .unwrap()
        .iter()
        .any(|row| row["key"] == "computer" && row["count"] == 1));

    let (status, _) = app
        .viewer(
            "GET",
            "/api/v1/reports/cases?from=2026-02-01T00:00:00Z&to=2026-01-01T00:00:00Z",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
