//! 証拠・保管履歴API Contract Tests
//!
//! /api/v1/evidence, /api/v1/evidence/{id}/custody

use crate::support::app::TestApp;
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_create_evidence_records_collection_event() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Seizure").await;
    let evidence_id = app.create_evidence(&case_id).await;

    let (status, body) = app
        .viewer("GET", &format!("/api/v1/evidence/{}", evidence_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["evidence_number"].as_str().unwrap().starts_with("EV-"));
    assert_eq!(body["custody_status"], "in_storage");
    assert_eq!(body["current_holder"], "Officer Tanaka");

    let custody = body["custody"].as_array().unwrap();
    assert_eq!(custody.len(), 1);
    assert_eq!(custody[0]["sequence"], 1);
    assert_eq!(custody[0]["action"], "collected");
}

#[tokio::test]
async fn test_evidence_requires_known_type_and_case() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Validation").await;

    let (status, _) = app
        .investigator(
            "POST",
            "/api/v1/evidence",
            Some(json!({
                "case_id": case_id,
                "description": "Thing",
                "evidence_type": "not_a_type",
                "collected_by": "Officer",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .investigator(
            "POST",
            "/api/v1/evidence",
            Some(json!({
                "case_id": uuid::Uuid::new_v4(),
                "description": "Thing",
                "evidence_type": "computer",
                "collected_by": "Officer",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_custody_chain_of_events() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Custody").await;
    let evidence_id = app.create_evidence(&case_id).await;
    let uri = format!("/api/v1/evidence/{}/custody", evidence_id);

    let (status, out) = app
        .investigator(
            "POST",
            &uri,
            Some(json!({ "action": "checked_out", "to_holder": "Analyst Sato" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", out);
    assert_eq!(out["sequence"], 2);
    assert_eq!(out["from_holder"], "Officer Tanaka");

    // 引き渡し元が現在の保管者と一致しない
    let (status, _) = app
        .investigator(
            "POST",
            &uri,
            Some(json!({ "action": "checked_in", "from_holder": "Someone Else" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, back) = app
        .investigator("POST", &uri, Some(json!({ "action": "checked_in" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(back["sequence"], 3);

    let (_, events) = app.viewer("GET", &uri, None).await;
    let actions: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["collected", "checked_out", "checked_in"]);

    let (_, evidence) = app
        .viewer("GET", &format!("/api/v1/evidence/{}", evidence_id), None)
        .await;
    assert_eq!(evidence["custody_status"], "in_storage");
}

#[tokio::test]
async fn test_custody_rejects_invalid_actions() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Rules").await;
    let evidence_id = app.create_evidence(&case_id).await;
    let uri = format!("/api/v1/evidence/{}/custody", evidence_id);

    // 保管中の証拠はチェックインできない
    let (status, _) = app
        .investigator("POST", &uri, Some(json!({ "action": "checked_in" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // collected は最初のイベントのみ
    let (status, _) = app
        .investigator("POST", &uri, Some(json!({ "action": "collected" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // 受け取り側が必須
    let (status, _) = app
        .investigator("POST", &uri, Some(json!({ "action": "checked_out" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 時刻の逆行
    let (status, _) = app
        .investigator(
            "POST",
            &uri,
            Some(json!({
                "action": "checked_out",
                "to_holder": "Analyst",
                "occurred_at": "2000-01-01T00:00:00Z",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 廃棄後は何もできない
    let (status, _) = app
        .investigator("POST", &uri, Some(json!({ "action": "disposed" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app
        .investigator(
            "POST",
            &uri,
            Some(json!({ "action": "checked_out", "to_holder": "Analyst" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_custody_events_are_append_only_in_storage() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Immutable").await;
    let evidence_id = app.create_evidence(&case_id).await;

    let result = sqlx::query("UPDATE custody_events SET to_holder = 'forged' WHERE evidence_id = ?")
        .bind(&evidence_id)
        .execute(&app.pool)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_delete_evidence_only_when_untouched() {
    let app = TestApp::new().await;
    let case_id = app.create_case("Deletion").await;
    let moved = app.create_evidence(&case_id).await;
    let fresh = app.create_evidence(&case_id).await;

    app.investigator(
        "POST",
        &format!("/api/v1/evidence/{}/custody", moved),
        Some(json!({ "action": "checked_out", "to_holder": "Analyst" })),
    )
    .await;

    let (status, _) = app
        .investigator("DELETE", &format!("/api/v1/evidence/{}", moved), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .investigator("DELETE", &format!("/api/v1/evidence/{}", fresh), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
