//! History of issued keys, used for lookups and license verification.
//!
//! The default store is a table in the main database. A Supabase (PostgREST)
//! table can be used instead so other services can read the same history.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SupabaseConfig;
use crate::db::{DbPool, queries, with_conn};
use crate::error::AppError;
use crate::models::{LicenseIssuance, Verification};

const SUPABASE_TABLE: &str = "license_keys";

#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error(transparent)]
    Storage(#[from] AppError),

    #[error("record store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("record store returned {status}: {body}")]
    Api { status: u16, body: String },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn store(&self, issuance: &LicenseIssuance) -> Result<(), RecordStoreError>;

    async fn get_by_key(&self, key: &str) -> Result<Option<LicenseIssuance>, RecordStoreError>;

    async fn get_by_email(&self, email: &str) -> Result<Vec<LicenseIssuance>, RecordStoreError>;

    /// Look up a key. `None` if it was never issued; otherwise valid while active.
    async fn verify(&self, key: &str) -> Result<Option<Verification>, RecordStoreError> {
        Ok(self.get_by_key(key).await?.map(|record| Verification {
            is_valid: record.is_active,
            record,
        }))
    }
}

// ============ SQLite ============

#[derive(Clone)]
pub struct SqliteRecordStore {
    db: DbPool,
}

impl SqliteRecordStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn store(&self, issuance: &LicenseIssuance) -> Result<(), RecordStoreError> {
        let issuance = issuance.clone();
        with_conn(&self.db, move |conn| queries::create_issuance(conn, &issuance)).await?;
        Ok(())
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<LicenseIssuance>, RecordStoreError> {
        let key = key.to_string();
        Ok(with_conn(&self.db, move |conn| queries::get_issuance_by_key(conn, &key)).await?)
    }

    async fn get_by_email(&self, email: &str) -> Result<Vec<LicenseIssuance>, RecordStoreError> {
        let email = email.to_string();
        Ok(with_conn(&self.db, move |conn| queries::list_issuances_by_email(conn, &email)).await?)
    }
}

// ============ Supabase ============

/// Row shape of the `license_keys` table.
#[derive(Debug, Serialize, Deserialize)]
struct SupabaseRow {
    #[serde(default, skip_serializing)]
    id: Option<serde_json::Value>,
    key: String,
    category: String,
    email: String,
    order_id: String,
    product_id: String,
    product_name: String,
    created_at: String,
    is_active: bool,
}

impl From<&LicenseIssuance> for SupabaseRow {
    fn from(issuance: &LicenseIssuance) -> Self {
        let created_at = Utc
            .timestamp_opt(issuance.issued_at, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        Self {
            id: None,
            key: issuance.license_key.clone(),
            category: issuance.category.clone(),
            email: issuance.email.clone(),
            order_id: issuance.order_id.clone(),
            product_id: issuance.product_id.clone(),
            product_name: issuance.product_name.clone(),
            created_at,
            is_active: issuance.is_active,
        }
    }
}

impl From<SupabaseRow> for LicenseIssuance {
    fn from(row: SupabaseRow) -> Self {
        let id = match row.id {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let issued_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.timestamp())
            .unwrap_or_default();
        LicenseIssuance {
            id,
            license_key: row.key,
            category: row.category,
            email: row.email,
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name,
            issued_at,
            is_active: row.is_active,
        }
    }
}

/// [`RecordStore`] backed by a Supabase table through its REST API.
#[derive(Clone)]
pub struct SupabaseRecordStore {
    table_url: String,
    key: String,
    http_client: Client,
}

impl SupabaseRecordStore {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            table_url: format!(
                "{}/rest/v1/{}",
                config.url.trim_end_matches('/'),
                SUPABASE_TABLE
            ),
            key: config.key.clone(),
            http_client: Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, &self.table_url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    async fn select(&self, column: &str, value: &str) -> Result<Vec<LicenseIssuance>, RecordStoreError> {
        let filter = format!("eq.{}", value);
        let response = self
            .request(reqwest::Method::GET)
            .query(&[("select", "*"), (column, filter.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecordStoreError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let rows: Vec<SupabaseRow> = response.json().await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl RecordStore for SupabaseRecordStore {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn store(&self, issuance: &LicenseIssuance) -> Result<(), RecordStoreError> {
        let response = self
            .request(reqwest::Method::POST)
            .header("Prefer", "return=minimal")
            .json(&SupabaseRow::from(issuance))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecordStoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<LicenseIssuance>, RecordStoreError> {
        Ok(self.select("key", key).await?.into_iter().next())
    }

    async fn get_by_email(&self, email: &str) -> Result<Vec<LicenseIssuance>, RecordStoreError> {
        self.select("email", email).await
    }
}
