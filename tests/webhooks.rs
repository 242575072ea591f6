//! End-to-end tests for the order-paid webhook

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use std::collections::HashMap;
use tower::ServiceExt;

// Product ids ending in 1 resolve to basic, 2 to pro, anything else to enterprise
const BASIC_PRODUCT: &str = "8377160843551";
const PRO_PRODUCT: &str = "8377160843552";
const ENTERPRISE_PRODUCT: &str = "8377160843557";

// ============ Signature ============

#[tokio::test]
async fn test_missing_signature_rejected() {
    let env = TestEnv::new();
    env.stock("basic", &["K1"]);

    let response = env
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/order/paid")
                .body(Body::from(order_payload("1001", BUYER, &[(BASIC_PRODUCT, "Basic", 1)])))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["detail"], "Invalid webhook signature");

    assert_eq!(env.pool("basic"), vec!["K1"], "no key may be allocated");
    assert!(env.mailer.sent().is_empty(), "no email may be sent");
    assert!(env.delivery("1001").is_none(), "no ledger entry may be written");
}

#[tokio::test]
async fn test_signature_over_different_bytes_rejected() {
    let env = TestEnv::new();
    env.stock("basic", &["K1"]);

    let body = order_payload("1001", BUYER, &[(BASIC_PRODUCT, "Basic", 1)]);
    let signature = sign(&body, WEBHOOK_SECRET);

    // Same JSON, one extra space: the signature no longer matches
    let mut tampered = body.clone();
    tampered.insert(1, b' ');

    let response = env
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/order/paid")
                .header(SIGNATURE_HEADER, signature)
                .body(Body::from(tampered))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(env.pool("basic"), vec!["K1"]);
    assert!(env.delivery("1001").is_none());
}

#[tokio::test]
async fn test_signature_with_wrong_secret_rejected() {
    let env = TestEnv::new();
    let body = order_payload("1001", BUYER, &[(BASIC_PRODUCT, "Basic", 1)]);
    let signature = sign(&body, "some-other-secret");

    let response = env
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/order/paid")
                .header(SIGNATURE_HEADER, signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============ Scenario A/B: delivery and idempotency ============

#[tokio::test]
async fn test_single_key_delivered_and_recorded() {
    let env = TestEnv::new();
    env.stock("basic", &["K1", "K2"]);

    let response = env
        .app()
        .oneshot(signed_webhook(order_payload(
            "1001",
            BUYER,
            &[(BASIC_PRODUCT, "Basic License", 1)],
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(
        json["message"],
        "License for category 'basic' sent to buyer@example.com"
    );

    let sent = env.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, BUYER);
    assert_eq!(sent[0].from, FROM);
    assert_eq!(sent[0].subject, "Your License Key - Order #1001");
    assert!(sent[0].text.contains("K1"));
    assert!(!sent[0].text.contains("K2"));

    assert_eq!(env.pool("basic"), vec!["K2"]);

    let record = env.delivery("1001").expect("ledger entry should exist");
    assert_eq!(record.categories, vec!["basic"]);
}

#[tokio::test]
async fn test_redelivered_webhook_is_a_no_op() {
    let env = TestEnv::new();
    env.stock("basic", &["K1", "K2"]);
    let body = order_payload("1001", BUYER, &[(BASIC_PRODUCT, "Basic License", 1)]);

    let first = env.app().oneshot(signed_webhook(body.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = env.app().oneshot(signed_webhook(body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let json = body_json(second).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["message"], "Order 1001 already delivered");

    assert_eq!(env.pool("basic"), vec!["K2"], "no second allocation");
    assert_eq!(env.mailer.sent().len(), 1, "no second email");
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries_allocate_once() {
    let env = TestEnv::new();
    env.stock("basic", &["K1", "K2", "K3"]);
    let body = order_payload("1001", BUYER, &[(BASIC_PRODUCT, "Basic License", 1)]);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let app = env.app();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            app.oneshot(signed_webhook(body)).await.unwrap().status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(env.pool("basic"), vec!["K2", "K3"], "exactly one key allocated");
    assert_eq!(env.mailer.sent().len(), 1, "exactly one email sent");
}

// ============ Scenario C: out of stock ============

#[tokio::test]
async fn test_out_of_stock_notifies_and_records() {
    let env = TestEnv::new();

    let response = env
        .app()
        .oneshot(signed_webhook(order_payload(
            "1002",
            BUYER,
            &[(PRO_PRODUCT, "Pro License", 1)],
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(
        json["message"],
        "No license available for category 'pro' (notified buyer@example.com)"
    );

    let sent = env.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "License Delivery Delayed - Order #1002");
    assert!(sent[0].text.contains("Pro License"));

    let record = env.delivery("1002").expect("ledger entry should exist");
    assert!(record.categories.is_empty());
}

// ============ Scenario D: partial stock ============

#[tokio::test]
async fn test_short_pool_keeps_keys_and_sends_delay_notice() {
    let env = TestEnv::new();
    env.stock("enterprise", &["E1", "E2"]);

    let response = env
        .app()
        .oneshot(signed_webhook(order_payload(
            "1003",
            BUYER,
            &[(ENTERPRISE_PRODUCT, "Enterprise License", 3)],
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "No license available for category 'enterprise' (notified buyer@example.com)"
    );

    // All-or-nothing per group: the two available keys stay in the pool
    assert_eq!(env.pool("enterprise"), vec!["E1", "E2"]);

    let sent = env.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "License Delivery Delayed - Order #1003");
    assert!(!sent[0].text.contains("E1"));

    assert!(env.delivery("1003").is_some());
}

#[tokio::test]
async fn test_quantity_expands_into_one_multi_key_email() {
    let env = TestEnv::new();
    env.stock("enterprise", &["E1", "E2", "E3", "E4"]);

    let response = env
        .app()
        .oneshot(signed_webhook(order_payload(
            "1004",
            BUYER,
            &[(ENTERPRISE_PRODUCT, "Enterprise License", 3)],
        )))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "3 licenses for category 'enterprise' sent to buyer@example.com"
    );

    let sent = env.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Your License Keys - Order #1004");
    for key in ["E1", "E2", "E3"] {
        assert!(sent[0].text.contains(key), "email should contain {}", key);
    }
    assert_eq!(env.pool("enterprise"), vec!["E4"]);
}

// ============ Mixed orders ============

#[tokio::test]
async fn test_groups_are_independent() {
    let env = TestEnv::new();
    env.stock("basic", &["B1"]);

    let response = env
        .app()
        .oneshot(signed_webhook(order_payload(
            "1005",
            BUYER,
            &[
                (BASIC_PRODUCT, "Basic License", 1),
                (PRO_PRODUCT, "Pro License", 1),
            ],
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "License for category 'basic' sent to buyer@example.com\n\
         No license available for category 'pro' (notified buyer@example.com)"
    );

    let sent = env.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].text.contains("B1"));
    assert!(sent[1].subject.starts_with("License Delivery Delayed"));

    let record = env.delivery("1005").unwrap();
    assert_eq!(record.categories, vec!["basic"]);
}

#[tokio::test]
async fn test_same_category_items_share_one_email() {
    let env = TestEnv::new();
    env.stock("basic", &["B1", "B2"]);

    let response = env
        .app()
        .oneshot(signed_webhook(order_payload(
            "1006",
            BUYER,
            &[("101", "Basic License", 1), ("201", "Basic Add-on", 1)],
        )))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "2 licenses for category 'basic' sent to buyer@example.com"
    );

    let sent = env.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("Basic License, Basic Add-on"));
}

#[tokio::test]
async fn test_category_map_overrides_fallback() {
    let env = TestEnv::with_category_map(HashMap::from([(
        BASIC_PRODUCT.to_string(),
        "studio".to_string(),
    )]));
    env.stock("studio", &["S1"]);
    env.stock("basic", &["B1"]);

    env.app()
        .oneshot(signed_webhook(order_payload(
            "1007",
            BUYER,
            &[(BASIC_PRODUCT, "Studio License", 1)],
        )))
        .await
        .unwrap();

    assert!(env.pool("studio").is_empty());
    assert_eq!(env.pool("basic"), vec!["B1"]);
}

#[tokio::test]
async fn test_null_product_id_resolves_to_a_category() {
    let env = TestEnv::new();
    env.stock("basic", &["K1"]);

    // Custom items and deleted products arrive without a product id
    let body = serde_json::to_vec(&serde_json::json!({
        "order_number": 1013,
        "email": BUYER,
        "line_items": [
            {"product_id": 8377160843551u64, "title": "Basic License", "quantity": 1},
            {"product_id": null, "title": "Custom item", "quantity": 1},
        ],
    }))
    .unwrap();

    let response = env.app().oneshot(signed_webhook(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "License for category 'basic' sent to buyer@example.com\n\
         No license available for category 'enterprise' (notified buyer@example.com)"
    );
    assert!(env.pool("basic").is_empty());
    assert!(env.delivery("1013").is_some());
}

#[tokio::test]
async fn test_huge_quantity_is_out_of_stock_not_a_crash() {
    let env = TestEnv::new();
    env.stock("enterprise", &["E1"]);

    let response = env
        .app()
        .oneshot(signed_webhook(order_payload(
            "1014",
            BUYER,
            &[(ENTERPRISE_PRODUCT, "Enterprise License", 4_000_000_000)],
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "No license available for category 'enterprise' (notified buyer@example.com)"
    );
    assert_eq!(env.pool("enterprise"), vec!["E1"]);
    assert!(env.delivery("1014").is_some());
}

#[tokio::test]
async fn test_order_without_items_is_recorded() {
    let env = TestEnv::new();

    let response = env
        .app()
        .oneshot(signed_webhook(order_payload("1008", BUYER, &[])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(env.mailer.sent().is_empty());
    assert!(env.delivery("1008").is_some());
}

// ============ Failures ============

#[tokio::test]
async fn test_malformed_payload_is_500_without_ledger_write() {
    let env = TestEnv::new();
    env.stock("basic", &["K1"]);

    // Valid signature over JSON with no email
    let body = br#"{"order_number": 1009, "line_items": []}"#.to_vec();
    let response = env.app().oneshot(signed_webhook(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert!(json["detail"].as_str().unwrap().contains("Malformed payload"));

    assert!(env.delivery("1009").is_none());
    assert_eq!(env.pool("basic"), vec!["K1"]);
}

#[tokio::test]
async fn test_storage_failure_is_500_and_redelivery_reprocesses() {
    let env = TestEnv::new();
    env.stock("basic", &["K1"]);
    env.state
        .db
        .get()
        .unwrap()
        .execute_batch("DROP TABLE inventory_keys;")
        .unwrap();

    let body = order_payload("1012", BUYER, &[(BASIC_PRODUCT, "Basic License", 1)]);
    let response = env.app().oneshot(signed_webhook(body.clone())).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert!(!json["detail"].as_str().unwrap().is_empty());
    assert!(env.delivery("1012").is_none(), "failed order must stay unrecorded");
    assert!(env.mailer.sent().is_empty());

    // Storage comes back; the store's redelivery of the same order goes through
    init_db(&env.state.db.get().unwrap()).unwrap();
    env.stock("basic", &["K2"]);

    let response = env.app().oneshot(signed_webhook(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "License for category 'basic' sent to buyer@example.com"
    );
    let sent = env.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("K2"));
    assert_eq!(env.delivery("1012").unwrap().categories, vec!["basic"]);
}

#[tokio::test]
async fn test_failed_email_still_records_order_and_keys() {
    let env = TestEnv::with_mailer(RecordingMailer::failing(
        10,
        MailError::Transient("connection reset".into()),
    ));
    env.stock("basic", &["K1"]);

    let response = env
        .app()
        .oneshot(signed_webhook(order_payload(
            "1010",
            BUYER,
            &[(BASIC_PRODUCT, "Basic License", 1)],
        )))
        .await
        .unwrap();

    // Email trouble is not a webhook failure: the key is already allocated
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(env.mailer.attempts(), 3);
    assert!(env.pool("basic").is_empty());
    assert!(env.delivery("1010").is_some());

    let failed = env.failed_sends();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["kind"], "license");
    assert_eq!(failed[0]["to"], BUYER);
    assert_eq!(failed[0]["order_number"], "1010");
    assert_eq!(failed[0]["keys"], serde_json::json!(["K1"]));
    assert_eq!(failed[0]["attempts"], 3);
}

#[tokio::test]
async fn test_issued_keys_are_recorded_and_verifiable() {
    let env = TestEnv::new();
    env.stock("pro", &["P1", "P2"]);

    env.app()
        .oneshot(signed_webhook(order_payload(
            "1011",
            BUYER,
            &[(PRO_PRODUCT, "Pro License", 2)],
        )))
        .await
        .unwrap();

    let issued = env.state.records.get_by_email(BUYER).await.unwrap();
    assert_eq!(issued.len(), 2);
    assert!(issued.iter().all(|i| i.order_id == "1011" && i.category == "pro"));
    assert!(issued.iter().all(|i| i.product_id == PRO_PRODUCT));

    let response = env
        .app()
        .oneshot(
            Request::builder()
                .uri("/verify-license/P1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["valid"], true);
    assert_eq!(json["details"]["key"], "P1");
    assert_eq!(json["details"]["email"], BUYER);
}
