use serde::{Deserialize, Serialize};

/// Ledger entry for an order that has been fully processed.
/// At most one exists per order id; it is never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub order_id: String,
    /// Categories that received keys (out-of-stock groups are not listed)
    pub categories: Vec<String>,
    /// Newline-joined summary returned to the webhook caller
    pub summary: String,
    pub delivered_at: i64,
}
