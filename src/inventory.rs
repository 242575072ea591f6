//! Finite per-category pools of unissued license keys.
//!
//! Every mutation runs in a `BEGIN IMMEDIATE` transaction: SQLite takes the
//! write lock up front, so two allocators can never read the same head row.
//! That makes handing out one key twice impossible, not just unlikely, and it
//! holds across processes sharing the database file (the CLI and the server).

use rusqlite::TransactionBehavior;
use thiserror::Error;

use crate::db::{DbPool, queries};
use crate::error::AppError;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("No license keys available for category '{category}' (requested {requested}, available {available})")]
    OutOfStock {
        category: String,
        requested: usize,
        available: usize,
    },

    #[error(transparent)]
    Storage(#[from] AppError),
}

impl From<rusqlite::Error> for InventoryError {
    fn from(e: rusqlite::Error) -> Self {
        InventoryError::Storage(e.into())
    }
}

impl From<r2d2::Error> for InventoryError {
    fn from(e: r2d2::Error) -> Self {
        InventoryError::Storage(e.into())
    }
}

pub type InventoryResult<T> = std::result::Result<T, InventoryError>;

/// Storage for the key pools.
pub trait KeyInventory: Send + Sync {
    /// Remove and return the oldest key in `category`.
    fn allocate(&self, category: &str) -> InventoryResult<String> {
        let mut keys = self.allocate_many(category, 1)?;
        keys.pop().ok_or_else(|| InventoryError::OutOfStock {
            category: category.to_string(),
            requested: 1,
            available: 0,
        })
    }

    /// Remove and return the oldest `units` keys, or none at all.
    ///
    /// Fails with `OutOfStock` (pool unchanged) when fewer than `units` are available.
    fn allocate_many(&self, category: &str, units: usize) -> InventoryResult<Vec<String>>;

    /// Append keys not already present. Returns how many were added.
    fn add(&self, category: &str, keys: &[String]) -> InventoryResult<usize>;

    fn count(&self, category: &str) -> InventoryResult<usize>;

    /// Available keys in issuance order.
    fn list(&self, category: &str) -> InventoryResult<Vec<String>>;

    /// Remove `key` from whichever pool holds it. Returns false if no pool does.
    fn remove_any(&self, key: &str) -> InventoryResult<bool>;
}

/// [`KeyInventory`] backed by the `inventory_keys` table.
#[derive(Clone)]
pub struct SqliteInventory {
    db: DbPool,
}

impl SqliteInventory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl KeyInventory for SqliteInventory {
    fn allocate_many(&self, category: &str, units: usize) -> InventoryResult<Vec<String>> {
        if units == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows = queries::peek_keys(&tx, category, units)?;
        if rows.len() < units {
            // Dropping the transaction rolls back; nothing was deleted anyway.
            return Err(InventoryError::OutOfStock {
                category: category.to_string(),
                requested: units,
                available: rows.len(),
            });
        }

        let mut keys = Vec::with_capacity(units);
        for (id, key) in rows {
            if !queries::delete_key_row(&tx, id)? {
                return Err(AppError::Internal(format!(
                    "inventory row {} vanished inside write transaction",
                    id
                ))
                .into());
            }
            keys.push(key);
        }

        tx.commit()?;

        tracing::info!(category = %category, units, "Allocated license keys");
        Ok(keys)
    }

    fn add(&self, category: &str, keys: &[String]) -> InventoryResult<usize> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut added = 0;
        for key in keys.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
            if queries::insert_key(&tx, category, key)? {
                added += 1;
            }
        }

        tx.commit()?;

        let skipped = keys.len() - added;
        tracing::info!(category = %category, added, skipped, "Imported license keys");
        Ok(added)
    }

    fn count(&self, category: &str) -> InventoryResult<usize> {
        let conn = self.db.get()?;
        Ok(queries::count_keys(&conn, category)? as usize)
    }

    fn list(&self, category: &str) -> InventoryResult<Vec<String>> {
        let conn = self.db.get()?;
        Ok(queries::list_keys(&conn, category)?)
    }

    fn remove_any(&self, key: &str) -> InventoryResult<bool> {
        let conn = self.db.get()?;
        let removed = queries::remove_key(&conn, key)?;
        if removed {
            tracing::info!("Removed license key from inventory");
        }
        Ok(removed)
    }
}
