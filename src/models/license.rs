use serde::{Deserialize, Serialize};

/// History record for one issued key.
///
/// Written once per allocated key. `is_active` exists so a key can later be
/// revoked; nothing in this service clears it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LicenseIssuance {
    pub id: String,
    #[serde(rename = "key")]
    pub license_key: String,
    pub category: String,
    pub email: String,
    pub order_id: String,
    pub product_id: String,
    pub product_name: String,
    /// Unix timestamp
    pub issued_at: i64,
    pub is_active: bool,
}

impl LicenseIssuance {
    pub fn new(
        license_key: &str,
        category: &str,
        email: &str,
        order_id: &str,
        product_id: &str,
        product_name: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            license_key: license_key.to_string(),
            category: category.to_string(),
            email: email.to_string(),
            order_id: order_id.to_string(),
            product_id: product_id.to_string(),
            product_name: product_name.to_string(),
            issued_at: chrono::Utc::now().timestamp(),
            is_active: true,
        }
    }
}

/// Outcome of looking up a key in the record store.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub is_valid: bool,
    pub record: LicenseIssuance,
}
