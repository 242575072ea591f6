//! Shopify `orders/paid` webhook: signature verification and payload types.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Shopify-Hmac-SHA256";

/// Product id recorded for line items without one (falls back to enterprise).
pub const MISSING_PRODUCT_ID: &str = "none";

/// Compute the base64 HMAC-SHA256 Shopify sends for `body`.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Verify a webhook signature over the exact bytes received.
///
/// `body` must be the raw request body. Re-serializing the parsed JSON would
/// change whitespace and key order and break verification for any sender whose
/// formatting differs from serde_json's.
pub fn verify_webhook(body: &[u8], signature: Option<&str>, secret: &str) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    let expected = sign(body, secret);
    let expected_bytes = expected.as_bytes();
    let provided_bytes = signature.as_bytes();

    // Length is not secret: a base64 SHA-256 digest is always 44 chars.
    if expected_bytes.len() != provided_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(provided_bytes).into()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    UInt(u64),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            StringOrNumber::String(s) => s,
            StringOrNumber::Int(n) => n.to_string(),
            StringOrNumber::UInt(n) => n.to_string(),
        }
    }
}

/// Accept either a JSON string or number and keep it as a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(StringOrNumber::deserialize(deserializer)?.into_string())
}

/// Custom line items carry `"product_id": null`; they still resolve through the
/// category fallback.
fn product_id_or_missing<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?
        .map(StringOrNumber::into_string)
        .unwrap_or_else(missing_product_id))
}

fn missing_product_id() -> String {
    MISSING_PRODUCT_ID.to_string()
}

fn default_quantity() -> u32 {
    1
}

/// The subset of the Shopify order payload the fulfillment flow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderPaid {
    #[serde(deserialize_with = "string_or_number")]
    pub order_number: String,
    pub email: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItem {
    #[serde(default = "missing_product_id", deserialize_with = "product_id_or_missing")]
    pub product_id: String,
    pub title: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

impl OrderPaid {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}
