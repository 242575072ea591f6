//! Turns a verified paid order into issued keys and buyer emails.
//!
//! Flow per order: ledger check, group line items by category, allocate each
//! group's units in one step, email the buyer, record issuances, then write
//! the ledger entry once every group has an outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::category::CategoryResolver;
use crate::db::{AppState, queries, with_conn};
use crate::email::{DeliveryStatus, LicenseEmail, OutOfStockEmail};
use crate::error::{AppError, Result};
use crate::inventory::InventoryError;
use crate::models::{DeliveryRecord, LicenseIssuance};
use crate::shopify::{LineItem, OrderPaid};

/// Per-order async locks.
///
/// Shopify may deliver the same webhook twice at once. Holding the order's
/// lock from the ledger check to the ledger write makes the second delivery
/// see the first one's ledger entry.
#[derive(Default)]
pub struct OrderLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, order_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop locks nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(order_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of orders with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// The order was already in the ledger; nothing was done.
    AlreadyDelivered(DeliveryRecord),
    Processed {
        /// One line per category group
        summary: Vec<String>,
        /// Categories whose keys were allocated
        delivered: Vec<String>,
    },
}

impl FulfillmentOutcome {
    /// Text returned to the webhook caller.
    pub fn message(&self, order_number: &str) -> String {
        match self {
            FulfillmentOutcome::AlreadyDelivered(_) => {
                format!("Order {} already delivered", order_number)
            }
            FulfillmentOutcome::Processed { summary, .. } => summary.join("\n"),
        }
    }
}

/// One line item's share of a category group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupItem {
    pub product_id: String,
    pub title: String,
    pub quantity: u32,
}

/// All line items of one category in an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryGroup {
    pub category: String,
    /// Distinct item titles joined by ", "
    pub product_name: String,
    pub items: Vec<GroupItem>,
    /// Total quantity across `items`
    pub units: usize,
}

impl CategoryGroup {
    /// One entry per purchased unit, in line item order.
    pub fn unit_items(&self) -> impl Iterator<Item = &GroupItem> {
        self.items
            .iter()
            .flat_map(|item| std::iter::repeat(item).take(item.quantity as usize))
    }
}

/// Group line items by resolved category and total their quantities.
///
/// Groups come out in the order their category first appears. Items with
/// quantity 0 are skipped; a category with no other items gets no group.
pub fn group_line_items(items: &[LineItem], resolver: &CategoryResolver) -> Vec<CategoryGroup> {
    let mut groups: Vec<CategoryGroup> = Vec::new();

    for item in items.iter().filter(|item| item.quantity > 0) {
        let category = resolver.resolve(&item.product_id);
        let idx = match groups.iter().position(|g| g.category == category) {
            Some(idx) => idx,
            None => {
                groups.push(CategoryGroup {
                    category,
                    product_name: String::new(),
                    items: Vec::new(),
                    units: 0,
                });
                groups.len() - 1
            }
        };

        let group = &mut groups[idx];
        if !group.items.iter().any(|existing| existing.title == item.title) {
            if !group.product_name.is_empty() {
                group.product_name.push_str(", ");
            }
            group.product_name.push_str(&item.title);
        }
        group.units = group.units.saturating_add(item.quantity as usize);
        group.items.push(GroupItem {
            product_id: item.product_id.clone(),
            title: item.title.clone(),
            quantity: item.quantity,
        });
    }

    groups
}

fn delivered_line(category: &str, keys: usize, email: &str) -> String {
    if keys == 1 {
        format!("License for category '{}' sent to {}", category, email)
    } else {
        format!("{} licenses for category '{}' sent to {}", keys, category, email)
    }
}

fn out_of_stock_line(category: &str, email: &str) -> String {
    format!(
        "No license available for category '{}' (notified {})",
        category, email
    )
}

/// Allocate a group's keys off the async runtime; SQLite may wait on its busy timeout.
async fn allocate_group(
    state: &AppState,
    category: &str,
    units: usize,
) -> std::result::Result<Vec<String>, InventoryError> {
    let inventory = state.inventory.clone();
    let category = category.to_string();
    tokio::task::spawn_blocking(move || inventory.allocate_many(&category, units))
        .await
        .map_err(|e| AppError::Internal(format!("spawn_blocking failed: {}", e)))?
}

/// Fulfill a verified order.
///
/// Errors only on storage failures, in which case no ledger entry is written
/// and a redelivered webhook processes the order again.
pub async fn fulfill_order(state: &AppState, order: &OrderPaid) -> Result<FulfillmentOutcome> {
    let order_id = order.order_number.as_str();
    let _order_guard = state.order_locks.acquire(order_id).await;

    let id = order_id.to_string();
    let existing = with_conn(&state.db, move |conn| queries::get_delivery_record(conn, &id)).await?;
    if let Some(record) = existing {
        tracing::info!(order = %order_id, "Order already delivered, skipping");
        return Ok(FulfillmentOutcome::AlreadyDelivered(record));
    }

    let groups = group_line_items(&order.line_items, &state.categories);
    tracing::info!(
        order = %order_id,
        groups = groups.len(),
        items = order.line_items.len(),
        "Processing paid order"
    );

    let mut summary = Vec::with_capacity(groups.len());
    let mut delivered = Vec::new();

    for group in &groups {
        match allocate_group(state, &group.category, group.units).await {
            Ok(keys) => {
                let status = state
                    .notifier
                    .send_license(&LicenseEmail {
                        to: order.email.clone(),
                        order_number: order.order_number.clone(),
                        product_name: group.product_name.clone(),
                        category: group.category.clone(),
                        keys: keys.clone(),
                    })
                    .await;
                if let DeliveryStatus::RecordedForManualResend { attempts } = status {
                    tracing::warn!(
                        order = %order_id,
                        category = %group.category,
                        attempts,
                        "License email not sent, keys recorded for manual resend"
                    );
                }

                for (key, unit) in keys.iter().zip(group.unit_items()) {
                    let issuance = LicenseIssuance::new(
                        key,
                        &group.category,
                        &order.email,
                        order_id,
                        &unit.product_id,
                        &unit.title,
                    );
                    if let Err(e) = state.records.store(&issuance).await {
                        tracing::warn!(
                            order = %order_id,
                            category = %group.category,
                            store = state.records.name(),
                            error = %e,
                            "Failed to record issued key"
                        );
                    }
                }

                summary.push(delivered_line(&group.category, keys.len(), &order.email));
                delivered.push(group.category.clone());
            }
            Err(InventoryError::OutOfStock {
                category,
                requested,
                available,
            }) => {
                tracing::warn!(
                    order = %order_id,
                    category = %category,
                    requested,
                    available,
                    "Not enough keys in stock, sending delay notice"
                );
                state
                    .notifier
                    .send_out_of_stock(&OutOfStockEmail {
                        to: order.email.clone(),
                        order_number: order.order_number.clone(),
                        product_name: group.product_name.clone(),
                        category: category.clone(),
                    })
                    .await;
                summary.push(out_of_stock_line(&category, &order.email));
            }
            Err(InventoryError::Storage(e)) => {
                tracing::error!(
                    order = %order_id,
                    category = %group.category,
                    error = %e,
                    "Allocation failed, order left unrecorded"
                );
                return Err(e);
            }
        }
    }

    {
        let id = order_id.to_string();
        let categories = delivered.clone();
        let text = summary.join("\n");
        with_conn(&state.db, move |conn| {
            queries::mark_order_delivered(conn, &id, &categories, &text)
        })
        .await?;
    }
    tracing::info!(order = %order_id, delivered = delivered.len(), "Order recorded as delivered");

    Ok(FulfillmentOutcome::Processed { summary, delivered })
}
