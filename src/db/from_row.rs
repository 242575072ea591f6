//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const DELIVERY_COLS: &str = "order_id, categories, summary, delivered_at";

pub const ISSUANCE_COLS: &str =
    "id, license_key, category, email, order_id, product_id, product_name, issued_at, is_active";

impl FromRow for DeliveryRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let categories_json: String = row.get(1)?;
        let categories = serde_json::from_str(&categories_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(DeliveryRecord {
            order_id: row.get(0)?,
            categories,
            summary: row.get(2)?,
            delivered_at: row.get(3)?,
        })
    }
}

impl FromRow for LicenseIssuance {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseIssuance {
            id: row.get(0)?,
            license_key: row.get(1)?,
            category: row.get(2)?,
            email: row.get(3)?,
            order_id: row.get(4)?,
            product_id: row.get(5)?,
            product_name: row.get(6)?,
            issued_at: row.get(7)?,
            is_active: row.get::<_, i32>(8)? != 0,
        })
    }
}
