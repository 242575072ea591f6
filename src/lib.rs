//! licensedrop - delivers pre-provisioned license keys for paid store orders
//!
//! Receives signed "order paid" webhooks, hands out keys from per-category
//! pools exactly once, emails them to the buyer, and records each order in a
//! ledger so redelivered webhooks are no-ops.

pub mod category;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod extractors;
pub mod fulfillment;
pub mod handlers;
pub mod inventory;
pub mod middleware;
pub mod models;
pub mod records;
pub mod retry;
pub mod shopify;
