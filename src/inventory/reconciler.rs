use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::record::InventoryRecord;
use super::shelf_life::{ShelfLife, WasteReport};
use super::store::InventoryStore;
use crate::detect::Detection;
use crate::now_s;

/// What one reconcile batch did to a user's inventory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub user_id: u64,
    /// Inventory after the batch, ordered by item name.
    pub records: Vec<InventoryRecord>,
    /// Labels that did not exist before the batch.
    pub added: Vec<String>,
    /// Existing labels that were detected again.
    pub updated: Vec<String>,
    /// Existing labels that were not detected but stay below the miss threshold.
    pub missed: Vec<String>,
    /// Existing labels deleted for reaching the miss threshold.
    pub removed: Vec<String>,
}

/// Merges detections into per-user inventories.
///
/// The reconciler caches each user's records on first use. The cache is the
/// source of truth for the session; store writes follow every change and their
/// failures are logged.
pub struct InventoryReconciler {
    store: Box<dyn InventoryStore>,
    shelf_life: ShelfLife,
    removal_miss_threshold: u32,
    cache: HashMap<u64, BTreeMap<String, InventoryRecord>>,
}

impl InventoryReconciler {
    /// `removal_miss_threshold` is the number of consecutive batches an item may
    /// go undetected before it is deleted. 0 is treated as 1.
    pub fn new(
        store: Box<dyn InventoryStore>,
        shelf_life: ShelfLife,
        removal_miss_threshold: u32,
    ) -> Self {
        Self {
            store,
            shelf_life,
            removal_miss_threshold: removal_miss_threshold.max(1),
            cache: HashMap::new(),
        }
    }

    pub fn shelf_life(&self) -> &ShelfLife {
        &self.shelf_life
    }

    pub fn removal_miss_threshold(&self) -> u32 {
        self.removal_miss_threshold
    }

    /// Reconcile one batch of detections at the current time.
    pub fn reconcile(&mut self, user_id: u64, detections: &[Detection]) -> Vec<InventoryRecord> {
        self.reconcile_at(user_id, detections, now_s()).records
    }

    /// Reconcile one batch of detections.
    ///
    /// - A label absent before the batch is created with quantity 1 on its first
    ///   occurrence; each further occurrence in the batch adds 1.
    /// - A label present before the batch gains 1 however often it occurs.
    /// - A label present before the batch and not detected counts a miss and is
    ///   deleted once its misses reach the threshold.
    pub fn reconcile_at(
        &mut self,
        user_id: u64,
        detections: &[Detection],
        now_s: u64,
    ) -> ReconcileReport {
        let threshold = self.removal_miss_threshold;
        let mut report = ReconcileReport {
            user_id,
            ..ReconcileReport::default()
        };
        let mut dirty: BTreeSet<String> = BTreeSet::new();

        let shelf_life = &self.shelf_life;
        let items = Self::cached(&mut self.cache, self.store.as_mut(), user_id);
        let existing: BTreeSet<String> = items.keys().cloned().collect();
        let mut redetected: BTreeSet<String> = BTreeSet::new();

        for detection in detections {
            let name = detection.class_label.trim();
            if name.is_empty() {
                continue;
            }
            if existing.contains(name) {
                if redetected.insert(name.to_string()) {
                    if let Some(record) = items.get_mut(name) {
                        record.quantity = record.quantity.saturating_add(1);
                        record.last_detected_at = now_s;
                        record.missed_cycles = 0;
                    }
                    report.updated.push(name.to_string());
                    dirty.insert(name.to_string());
                }
            } else if let Some(record) = items.get_mut(name) {
                record.quantity = record.quantity.saturating_add(1);
                record.last_detected_at = now_s;
            } else {
                items.insert(
                    name.to_string(),
                    InventoryRecord {
                        item_name: name.to_string(),
                        quantity: 1,
                        category: shelf_life.category(name).to_string(),
                        expiry_at: shelf_life.expiry_from(name, now_s),
                        added_at: now_s,
                        last_detected_at: now_s,
                        missed_cycles: 0,
                    },
                );
                report.added.push(name.to_string());
                dirty.insert(name.to_string());
            }
        }

        for name in existing.difference(&redetected) {
            let Some(record) = items.get_mut(name) else {
                continue;
            };
            record.missed_cycles = record.missed_cycles.saturating_add(1);
            if record.missed_cycles >= threshold {
                items.remove(name);
                report.removed.push(name.clone());
            } else {
                report.missed.push(name.clone());
                dirty.insert(name.clone());
            }
        }

        report.records = items.values().cloned().collect();
        let to_write: Vec<InventoryRecord> = dirty
            .iter()
            .filter_map(|name| items.get(name).cloned())
            .collect();

        for record in &to_write {
            self.persist_upsert(user_id, record);
        }
        for name in &report.removed {
            self.persist_remove(user_id, name);
        }

        log::info!(
            "user {}: +{} new, {} restocked, {} missed, {} removed ({} item(s))",
            user_id,
            report.added.len(),
            report.updated.len(),
            report.missed.len(),
            report.removed.len(),
            report.records.len()
        );
        report
    }

    /// Add `quantity` of an item. `expiry_at` defaults to the shelf-life table.
    pub fn add_item(
        &mut self,
        user_id: u64,
        item_name: &str,
        quantity: u32,
        expiry_at: Option<u64>,
    ) -> Result<InventoryRecord> {
        let name = item_name.trim();
        if name.is_empty() {
            return Err(anyhow!("item name must not be empty"));
        }
        if quantity == 0 {
            return Err(anyhow!("quantity must be > 0"));
        }
        let now = now_s();
        let shelf_life = &self.shelf_life;
        let items = Self::cached(&mut self.cache, self.store.as_mut(), user_id);
        let record = items
            .entry(name.to_string())
            .and_modify(|r| {
                r.quantity = r.quantity.saturating_add(quantity);
                r.last_detected_at = now;
                r.missed_cycles = 0;
                if let Some(expiry) = expiry_at {
                    r.expiry_at = expiry;
                }
            })
            .or_insert_with(|| InventoryRecord {
                item_name: name.to_string(),
                quantity,
                category: shelf_life.category(name).to_string(),
                expiry_at: expiry_at.unwrap_or_else(|| shelf_life.expiry_from(name, now)),
                added_at: now,
                last_detected_at: now,
                missed_cycles: 0,
            })
            .clone();
        self.persist_upsert(user_id, &record);
        Ok(record)
    }

    /// Take `quantity` of an item out. Returns the remaining record, or `None`
    /// when the item is gone (deleted here, or never present).
    pub fn remove_item(
        &mut self,
        user_id: u64,
        item_name: &str,
        quantity: u32,
    ) -> Option<InventoryRecord> {
        let items = Self::cached(&mut self.cache, self.store.as_mut(), user_id);
        let record = items.get_mut(item_name)?;
        if record.quantity <= quantity {
            items.remove(item_name);
            self.persist_remove(user_id, item_name);
            return None;
        }
        record.quantity -= quantity;
        let record = record.clone();
        self.persist_upsert(user_id, &record);
        Some(record)
    }

    pub fn get_inventory(&mut self, user_id: u64) -> Vec<InventoryRecord> {
        Self::cached(&mut self.cache, self.store.as_mut(), user_id)
            .values()
            .cloned()
            .collect()
    }

    pub fn item(&mut self, user_id: u64, item_name: &str) -> Option<InventoryRecord> {
        Self::cached(&mut self.cache, self.store.as_mut(), user_id)
            .get(item_name)
            .cloned()
    }

    pub fn clear(&mut self, user_id: u64) {
        self.cache.insert(user_id, BTreeMap::new());
        if let Err(e) = self.store.clear(user_id) {
            log::error!("inventory for user {} not cleared in store: {:#}", user_id, e);
        }
    }

    pub fn waste_report(&mut self, user_id: u64, now_s: u64) -> WasteReport {
        let items = Self::cached(&mut self.cache, self.store.as_mut(), user_id);
        WasteReport::build(items.values(), now_s)
    }

    fn cached<'a>(
        cache: &'a mut HashMap<u64, BTreeMap<String, InventoryRecord>>,
        store: &mut dyn InventoryStore,
        user_id: u64,
    ) -> &'a mut BTreeMap<String, InventoryRecord> {
        cache.entry(user_id).or_insert_with(|| match store.get_inventory(user_id) {
            Ok(records) => records
                .into_iter()
                .map(|r| (r.item_name.clone(), r))
                .collect(),
            Err(e) => {
                log::warn!("inventory for user {} not loaded: {:#}", user_id, e);
                BTreeMap::new()
            }
        })
    }

    fn persist_upsert(&mut self, user_id: u64, record: &InventoryRecord) {
        if let Err(e) = self.store.upsert_item(user_id, record) {
            log::error!(
                "inventory item {} for user {} not saved: {:#}",
                record.item_name,
                user_id,
                e
            );
        }
    }

    fn persist_remove(&mut self, user_id: u64, item_name: &str) {
        if let Err(e) = self.store.remove_item(user_id, item_name) {
            log::error!(
                "inventory item {} for user {} not deleted: {:#}",
                item_name,
                user_id,
                e
            );
        }
    }
}
