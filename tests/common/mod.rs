//! Test utilities and fixtures for licensedrop integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use tempfile::TempDir;

// Re-export the main library crate
pub use licensedrop::category::CategoryResolver;
pub use licensedrop::db::{AppState, DbPool, create_pool, init_db, queries};
pub use licensedrop::email::{
    FailedSendLog, MailError, MailTransport, Notifier, OutboundEmail,
};
pub use licensedrop::fulfillment::OrderLocks;
pub use licensedrop::handlers;
pub use licensedrop::inventory::{KeyInventory, SqliteInventory};
pub use licensedrop::models::*;
pub use licensedrop::records::{RecordStore, SqliteRecordStore};
pub use licensedrop::retry::RetryPolicy;
pub use licensedrop::shopify::{SIGNATURE_HEADER, sign};

pub const WEBHOOK_SECRET: &str = "shpss_test_webhook_secret";
pub const ADMIN_KEY: &str = "admin-test-key";
pub const BUYER: &str = "buyer@example.com";
pub const FROM: &str = "licenses@shop.test";

/// Mail transport that records every message and can fail on demand.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    attempts: AtomicU32,
    /// Number of upcoming sends to fail
    failures_left: AtomicU32,
    failure: Mutex<Option<MailError>>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `times` sends with `error`, then succeed.
    pub fn failing(times: u32, error: MailError) -> Arc<Self> {
        let mailer = Self::default();
        mailer.failures_left.store(times, Ordering::SeqCst);
        *mailer.failure.lock().unwrap() = Some(error);
        Arc::new(mailer)
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            let error = self.failure.lock().unwrap().clone();
            return Err(error.unwrap_or_else(|| MailError::Transient("test failure".into())));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Retry policy with no waiting between attempts.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::ZERO)
}

/// A file-backed database in a temp dir.
///
/// In-memory SQLite gives every pooled connection its own database, so tests
/// that share state across connections need a real file.
pub fn setup_test_pool(dir: &TempDir) -> DbPool {
    let path = dir.path().join("licensedrop.db");
    let pool = create_pool(path.to_str().unwrap()).expect("Failed to create pool");
    let conn = pool.get().unwrap();
    init_db(&conn).expect("Failed to initialize schema");
    pool
}

/// Everything a test needs to drive the service end to end.
pub struct TestEnv {
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    pub failed_log: PathBuf,
    _dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_mailer(RecordingMailer::new())
    }

    pub fn with_mailer(mailer: Arc<RecordingMailer>) -> Self {
        Self::build(mailer, HashMap::new())
    }

    pub fn with_category_map(map: HashMap<String, String>) -> Self {
        Self::build(RecordingMailer::new(), map)
    }

    fn build(mailer: Arc<RecordingMailer>, map: HashMap<String, String>) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_pool(&dir);
        let failed_log = dir.path().join("failed_emails.jsonl");

        let notifier = Notifier::new(
            mailer.clone(),
            FROM.to_string(),
            Some("shop.example.com".to_string()),
            fast_retry(),
            FailedSendLog::new(&failed_log),
        );

        let state = AppState {
            inventory: Arc::new(SqliteInventory::new(pool.clone())),
            records: Arc::new(SqliteRecordStore::new(pool.clone())),
            db: pool,
            notifier: Arc::new(notifier),
            categories: Arc::new(CategoryResolver::new(map)),
            order_locks: Arc::new(OrderLocks::new()),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            admin_api_key: Some(ADMIN_KEY.to_string()),
        };

        Self {
            state,
            mailer,
            failed_log,
            _dir: dir,
        }
    }

    pub fn app(&self) -> Router {
        handlers::app(self.state.clone())
    }

    pub fn stock(&self, category: &str, keys: &[&str]) {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.state.inventory.add(category, &keys).unwrap();
    }

    pub fn pool(&self, category: &str) -> Vec<String> {
        self.state.inventory.list(category).unwrap()
    }

    pub fn delivery(&self, order_id: &str) -> Option<DeliveryRecord> {
        let conn = self.state.db.get().unwrap();
        queries::get_delivery_record(&conn, order_id).unwrap()
    }

    pub fn failed_sends(&self) -> Vec<serde_json::Value> {
        match std::fs::read_to_string(&self.failed_log) {
            Ok(contents) => contents
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Build an `orders/paid` payload. Items are (product_id, title, quantity).
pub fn order_payload(order_number: &str, email: &str, items: &[(&str, &str, u32)]) -> Vec<u8> {
    let line_items: Vec<serde_json::Value> = items
        .iter()
        .map(|(product_id, title, quantity)| {
            serde_json::json!({
                "product_id": product_id.parse::<u64>().map(serde_json::Value::from)
                    .unwrap_or_else(|_| serde_json::Value::from(*product_id)),
                "title": title,
                "quantity": quantity,
            })
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "id": 5182282154197u64,
        "order_number": order_number,
        "email": email,
        "line_items": line_items,
    }))
    .unwrap()
}

pub fn signed_webhook(body: Vec<u8>) -> Request<Body> {
    let signature = sign(&body, WEBHOOK_SECRET);
    Request::builder()
        .method("POST")
        .uri("/webhook/order/paid")
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

pub fn admin_request(method: &str, uri: &str, key: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
