use rusqlite::Connection;

/// Initialize the database schema
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Unissued keys. A row exists only while the key is available; allocation
        -- deletes it. AUTOINCREMENT keeps ids monotonic so ORDER BY id is FIFO even
        -- after the newest row is deleted. license_key is unique across all
        -- categories: a key can sit in at most one pool.
        CREATE TABLE IF NOT EXISTS inventory_keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            license_key TEXT NOT NULL UNIQUE,
            added_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_inventory_keys_category ON inventory_keys(category, id);

        -- Idempotency ledger: one row per fully processed order
        CREATE TABLE IF NOT EXISTS delivered_orders (
            order_id TEXT PRIMARY KEY,
            categories TEXT NOT NULL,  -- JSON array of categories that received keys
            summary TEXT NOT NULL,
            delivered_at INTEGER NOT NULL
        );

        -- Issuance history (local record store)
        CREATE TABLE IF NOT EXISTS license_issuances (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL,
            email TEXT NOT NULL,
            order_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            product_name TEXT NOT NULL,
            issued_at INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_license_issuances_email ON license_issuances(email);
        CREATE INDEX IF NOT EXISTS idx_license_issuances_order ON license_issuances(order_id);
        "#,
    )
}
