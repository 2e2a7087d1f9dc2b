//! Per-user inventory.
//!
//! `InventoryReconciler` merges detection batches into `InventoryRecord`s kept
//! in an `InventoryStore` (SQLite in production). Categories and expiry dates
//! come from the `ShelfLife` table.

mod reconciler;
mod record;
mod shelf_life;
mod store;

pub use reconciler::{InventoryReconciler, ReconcileReport};
pub use record::InventoryRecord;
pub use shelf_life::{
    AtRiskItem, ShelfLife, ShelfLifeEntry, WasteReport, FALLBACK_CATEGORY,
    FALLBACK_SHELF_LIFE_DAYS, HIGH_RISK_DAYS, LOW_RISK_DAYS, MEDIUM_RISK_DAYS,
};
pub use store::{InMemoryInventoryStore, InventoryStore, SqliteInventoryStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub db_path: String,
    /// Consecutive undetected batches before an item is deleted.
    pub removal_miss_threshold: u32,
    /// Per-label category and shelf life, layered over the built-in table.
    pub shelf_life: BTreeMap<String, ShelfLifeEntry>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            db_path: "fridge_inventory.db".to_string(),
            removal_miss_threshold: 1,
            shelf_life: BTreeMap::new(),
        }
    }
}
