mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::category::CategoryResolver;
use crate::email::Notifier;
use crate::error::{AppError, Result};
use crate::fulfillment::OrderLocks;
use crate::inventory::KeyInventory;
use crate::records::RecordStore;

pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a writer waits for another connection's write transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (inventory, delivery ledger, issuance history)
    pub db: DbPool,
    pub inventory: Arc<dyn KeyInventory>,
    pub records: Arc<dyn RecordStore>,
    pub notifier: Arc<Notifier>,
    pub categories: Arc<CategoryResolver>,
    /// Serializes concurrent deliveries of the same order
    pub order_locks: Arc<OrderLocks>,
    pub webhook_secret: String,
    /// Admin endpoints are disabled when unset
    pub admin_api_key: Option<String>,
}

pub fn create_pool(database_path: &str) -> std::result::Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
    });
    Pool::builder().max_size(10).build(manager)
}

/// Run blocking work on the blocking thread pool.
///
/// SQLite writers can wait up to `BUSY_TIMEOUT` for the write lock; that wait
/// must not stall a runtime worker.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("spawn_blocking failed: {}", e)))?
}

/// Run `f` with a pooled connection on the blocking thread pool.
pub async fn with_conn<T, F>(db: &DbPool, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    blocking(move || {
        let conn = db.get()?;
        f(&conn)
    })
    .await
}
