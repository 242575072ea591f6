use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::models::*;

use super::from_row::{DELIVERY_COLS, ISSUANCE_COLS, query_all, query_one};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Inventory ============

/// The oldest `limit` keys in a category as (row id, key), in issuance order.
pub fn peek_keys(conn: &Connection, category: &str, limit: usize) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, license_key FROM inventory_keys WHERE category = ?1 ORDER BY id LIMIT ?2",
    )?;
    // SQLite reads a negative LIMIT as no limit
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(params![category, limit], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_key_row(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute("DELETE FROM inventory_keys WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Insert a key unless it is already in any pool.
/// Returns true if the key was added.
pub fn insert_key(conn: &Connection, category: &str, key: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO inventory_keys (category, license_key, added_at) VALUES (?1, ?2, ?3)",
        params![category, key, now()],
    )?;
    Ok(affected > 0)
}

pub fn count_keys(conn: &Connection, category: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM inventory_keys WHERE category = ?1",
        params![category],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn list_keys(conn: &Connection, category: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT license_key FROM inventory_keys WHERE category = ?1 ORDER BY id")?;
    let keys = stmt
        .query_map(params![category], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(keys)
}

/// Remove a key from whichever pool holds it.
pub fn remove_key(conn: &Connection, key: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM inventory_keys WHERE license_key = ?1",
        params![key],
    )?;
    Ok(affected > 0)
}

// ============ Delivery Ledger ============

pub fn get_delivery_record(conn: &Connection, order_id: &str) -> Result<Option<DeliveryRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM delivered_orders WHERE order_id = ?1",
            DELIVERY_COLS
        ),
        &[&order_id],
    )
}

/// Record an order as delivered.
/// Returns false if it was already recorded (the existing row is left as is).
pub fn mark_order_delivered(
    conn: &Connection,
    order_id: &str,
    categories: &[String],
    summary: &str,
) -> Result<bool> {
    let categories_json = serde_json::to_string(categories)?;
    let affected = conn.execute(
        "INSERT OR IGNORE INTO delivered_orders (order_id, categories, summary, delivered_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![order_id, categories_json, summary, now()],
    )?;
    Ok(affected > 0)
}

// ============ Issuance History ============

pub fn create_issuance(conn: &Connection, issuance: &LicenseIssuance) -> Result<()> {
    conn.execute(
        "INSERT INTO license_issuances
         (id, license_key, category, email, order_id, product_id, product_name, issued_at, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &issuance.id,
            &issuance.license_key,
            &issuance.category,
            &issuance.email,
            &issuance.order_id,
            &issuance.product_id,
            &issuance.product_name,
            issuance.issued_at,
            issuance.is_active as i32,
        ],
    )?;
    Ok(())
}

pub fn get_issuance_by_key(conn: &Connection, key: &str) -> Result<Option<LicenseIssuance>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM license_issuances WHERE license_key = ?1",
            ISSUANCE_COLS
        ),
        &[&key],
    )
}

pub fn list_issuances_by_email(conn: &Connection, email: &str) -> Result<Vec<LicenseIssuance>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM license_issuances WHERE email = ?1 ORDER BY issued_at, rowid",
            ISSUANCE_COLS
        ),
        &[&email],
    )
}
