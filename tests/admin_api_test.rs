//! Operator CRUD and health endpoints
//!
//! Covers:
//! - create, list, fetch, update and delete of payment records
//! - not-found handling for unknown and malformed ids
//! - health, readiness and liveness checks

mod common;

use axum::http::StatusCode;
use bigdecimal::BigDecimal;
use serde_json::json;

use common::{amount_of, MockProvider, TestApp};

fn app() -> TestApp {
    TestApp::new(MockProvider::accepting("ws_unused"))
}

#[tokio::test]
async fn create_then_fetch_payment() {
    let app = app();

    let (status, created) = app
        .post(
            "/mpesa/payments",
            json!({"phone": "254712345678", "amount": 75}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["phone_number"], "254712345678");

    let id = created["id"].as_str().unwrap().to_string();
    let (status, fetched) = app.get(&format!("/mpesa/payments/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], id.as_str());
    assert_eq!(amount_of(&fetched["amount"]), Some(BigDecimal::from(75)));
}

#[tokio::test]
async fn create_validates_input() {
    let app = app();

    let (status, body) = app
        .post("/mpesa/payments", json!({"phone": "0712", "amount": 75}))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(app.store.is_empty().await);
}

#[tokio::test]
async fn list_returns_newest_first() {
    let app = app();
    for amount in [10, 20, 30] {
        app.post(
            "/mpesa/payments",
            json!({"phone": "254712345678", "amount": amount}),
        )
        .await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let (status, body) = app.get("/mpesa/payments").await;
    assert_eq!(status, StatusCode::OK);

    let amounts: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|p| amount_of(&p["amount"]).unwrap())
        .collect();
    assert_eq!(
        amounts,
        vec![
            BigDecimal::from(30),
            BigDecimal::from(20),
            BigDecimal::from(10)
        ]
    );
}

#[tokio::test]
async fn update_changes_status_and_amount() {
    let app = app();
    let (_, created) = app
        .post(
            "/mpesa/payments",
            json!({"phone": "254712345678", "amount": 75}),
        )
        .await;
    let uri = format!("/mpesa/payments/{}", created["id"].as_str().unwrap());

    let (status, updated) = app
        .put(&uri, json!({"status": "completed", "amount": 80}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "completed");
    assert_eq!(amount_of(&updated["amount"]), Some(BigDecimal::from(80)));

    let (status, body) = app.put(&uri, json!({"status": "refunded"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn status_edits_keep_payment_invariants() {
    let app = app();
    let (_, created) = app
        .post(
            "/mpesa/payments",
            json!({"phone": "254712345678", "amount": 75}),
        )
        .await;
    let uri = format!("/mpesa/payments/{}", created["id"].as_str().unwrap());

    let (_, completed) = app.put(&uri, json!({"status": "completed"})).await;
    assert_eq!(completed["status"], "completed");
    assert!(completed["paid_at"].is_string());

    let (_, failed) = app.put(&uri, json!({"status": "failed"})).await;
    assert_eq!(failed["status"], "failed");
    assert!(failed["paid_at"].is_null());
    assert!(failed["mpesa_receipt_number"].is_null());
}

#[tokio::test]
async fn amount_edits_are_bounded() {
    let app = app();
    let (_, created) = app
        .post(
            "/mpesa/payments",
            json!({"phone": "254712345678", "amount": 75}),
        )
        .await;
    let uri = format!("/mpesa/payments/{}", created["id"].as_str().unwrap());

    let (status, body) = app.put(&uri, json!({"amount": "1e20"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn delete_removes_payment() {
    let app = app();
    let (_, created) = app
        .post(
            "/mpesa/payments",
            json!({"phone": "254712345678", "amount": 75}),
        )
        .await;
    let uri = format!("/mpesa/payments/{}", created["id"].as_str().unwrap());

    let (status, body) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Deleted successfully");

    let (status, _) = app.get(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() {
    let app = app();

    for uri in [
        "/mpesa/payments/6f1c1a52-5b0e-4c61-9a51-1d1bb7f2a001",
        "/mpesa/payments/not-a-uuid",
    ] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Not found"}));

        let (status, _) = app.put(uri, json!({"status": "failed"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn health_checks_report_in_memory_store() {
    let app = app();

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Healthy");
    assert_eq!(body["checks"]["database"]["status"], "Up");
    assert_eq!(body["checks"]["database"]["details"], "in-memory");

    let (status, body) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    let (status, body) = app.get("/health/live").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}
