//! 事件API Contract Tests
//!
//! /api/v1/cases, /api/v1/cases/{id}/status, /api/v1/cases/{id}/parties

use crate::support::app::TestApp;
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_create_case_assigns_sequential_numbers() {
    let app = TestApp::new().await;
    let (status, first) = app
        .investigator("POST", "/api/v1/cases", Some(json!({ "title": "Phishing ring" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "open");
    assert_eq!(first["priority"], "medium");
    assert_eq!(first["created_by"], app.investigator.id.as_str());

    let (_, second) = app
        .investigator("POST", "/api/v1/cases", Some(json!({ "title": "Ransomware" })))
        .await;

    let n1 = first["case_number"].as_str().unwrap();
    let n2 = second["case_number"].as_str().unwrap();
    assert!(n1.starts_with("CASE-"));
    assert!(n1.ends_with("-0001"), "{}", n1);
    assert!(n2.ends_with("-0002"), "{}", n2);
}

#[tokio::test]
async fn test_create_case_requires_title() {
    let app = TestApp::new().await;
    let (status, body) = app
        .investigator("POST", "/api/v1/cases", Some(json!({ "title": "   " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_viewer_can_read_but_not_write() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Read only").await;

    let (status, _) = app
        .viewer("GET", &format!("/api/v1/cases/{}", case_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .viewer("POST", "/api/v1/cases", Some(json!({ "title": "Nope" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["type"], "permission_error");
}

#[tokio::test]
async fn test_status_transitions() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Lifecycle").await;
    let uri = format!("/api/v1/cases/{}/status", case_id);

    // open -> archived は許可されない
    let (status, _) = app
        .investigator("PUT", &uri, Some(json!({ "status": "archived" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .investigator("PUT", &uri, Some(json!({ "status": "closed" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["closed_at"].is_string());

    let (status, body) = app
        .investigator("PUT", &uri, Some(json!({ "status": "archived" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "archived");

    // アーカイブ済み事件は更新できない
    let (status, _) = app
        .investigator(
            "PUT",
            &format!("/api/v1/cases/{}", case_id),
            Some(json!({ "title": "Renamed" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_list_cases_filters_by_status() {
    let app = TestApp::new().await;
    let a = app.create_case("Alpha").await;
    app.create_case("Beta").await;
    app.investigator(
        "PUT",
        &format!("/api/v1/cases/{}/status", a),
        Some(json!({ "status": "active" })),
    )
    .await;

    let (status, page) = app.viewer("GET", "/api/v1/cases?status=active", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["id"], a.as_str());

    let (_, all) = app.viewer("GET", "/api/v1/cases?per_page=1", None).await;
    assert_eq!(all["total"], 2);
    assert_eq!(all["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_parties_crud() {
    let app = TestApp::new().await;
    let case_id = app.create_case("With parties").await;

    let (status, party) = app
        .investigator(
            "POST",
            &format!("/api/v1/cases/{}/parties", case_id),
            Some(json!({ "name": "J. Smith", "role": "suspect" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", party);
    let party_id = party["id"].as_str().unwrap().to_string();

    let (_, list) = app
        .viewer("GET", &format!("/api/v1/cases/{}/parties", case_id), None)
        .await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, updated) = app
        .investigator(
            "PUT",
            &format!("/api/v1/parties/{}", party_id),
            Some(json!({ "name": "John Smith", "role": "suspect", "contact": "555-0100" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["contact"], "555-0100");

    let (status, _) = app
        .investigator("DELETE", &format!("/api/v1/parties/{}", party_id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .viewer("GET", &format!("/api/v1/parties/{}", party_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_case_with_evidence_cannot_be_deleted() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Evidence holder").await;
    app.create_evidence(&case_id).await;

    let (status, _) = app
        .investigator("DELETE", &format!("/api/v1/cases/{}", case_id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let empty = app.create_case("Empty").await;
    let (status, _) = app
        .investigator("DELETE", &format!("/api/v1/cases/{}", empty), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_case_writes_are_audited_with_resource() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Audited").await;
    app.flush_audit().await;

    let (status, logs) = app
        .admin(
            "GET",
            &format!("/api/v1/audit/logs?resource_type=case&resource_id={}", case_id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 1);
    let entry = &logs["items"][0];
    assert_eq!(entry["action"], "create");
    assert_eq!(entry["http_method"], "POST");
    assert_eq!(entry["status_code"], 201);
    assert_eq!(entry["actor_username"], "investigator");
    assert!(entry["detail"].as_str().unwrap().contains("CASE-"));
}
