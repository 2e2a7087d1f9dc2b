//! Item category and shelf-life lookup, and the waste-risk report built on it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::InventoryRecord;

pub const FALLBACK_CATEGORY: &str = "uncategorized";
pub const FALLBACK_SHELF_LIFE_DAYS: u32 = 7;

const DAY_S: u64 = 86_400;

/// Category and days-until-expiry for one item label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfLifeEntry {
    pub category: String,
    pub days: u32,
}

/// Label → (category, shelf life). Labels are matched case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShelfLife {
    entries: BTreeMap<String, ShelfLifeEntry>,
}

const DEFAULT_TABLE: &[(&str, &str, u32)] = &[
    ("apple", "produce", 21),
    ("banana", "produce", 5),
    ("orange", "produce", 14),
    ("tomato", "produce", 7),
    ("lettuce", "produce", 5),
    ("carrot", "produce", 21),
    ("broccoli", "produce", 5),
    ("milk", "dairy", 7),
    ("yogurt", "dairy", 14),
    ("cheese", "dairy", 21),
    ("butter", "dairy", 30),
    ("egg", "dairy", 21),
    ("chicken", "meat", 2),
    ("beef", "meat", 3),
    ("fish", "meat", 2),
    ("juice", "beverages", 7),
    ("soda", "beverages", 180),
    ("water", "beverages", 365),
    ("bottle", "beverages", 30),
    ("leftovers", "prepared", 3),
    ("sandwich", "prepared", 2),
    ("pizza", "prepared", 3),
    ("cake", "prepared", 4),
];

impl Default for ShelfLife {
    fn default() -> Self {
        let entries = DEFAULT_TABLE
            .iter()
            .map(|(name, category, days)| {
                (
                    name.to_string(),
                    ShelfLifeEntry {
                        category: category.to_string(),
                        days: *days,
                    },
                )
            })
            .collect();
        Self { entries }
    }
}

impl ShelfLife {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Default table with `overrides` layered on top.
    pub fn with_overrides(overrides: &BTreeMap<String, ShelfLifeEntry>) -> Self {
        let mut table = Self::default();
        for (name, entry) in overrides {
            table.insert(name, entry.clone());
        }
        table
    }

    pub fn insert(&mut self, item_name: &str, entry: ShelfLifeEntry) {
        self.entries.insert(item_name.to_lowercase(), entry);
    }

    pub fn category(&self, item_name: &str) -> &str {
        self.entries
            .get(&item_name.to_lowercase())
            .map(|e| e.category.as_str())
            .unwrap_or(FALLBACK_CATEGORY)
    }

    pub fn days(&self, item_name: &str) -> u32 {
        self.entries
            .get(&item_name.to_lowercase())
            .map(|e| e.days)
            .unwrap_or(FALLBACK_SHELF_LIFE_DAYS)
    }

    pub fn expiry_from(&self, item_name: &str, now_s: u64) -> u64 {
        now_s + self.days(item_name) as u64 * DAY_S
    }
}

/// Thresholds in days-to-expiry for the waste report buckets.
pub const HIGH_RISK_DAYS: i64 = 2;
pub const MEDIUM_RISK_DAYS: i64 = 5;
pub const LOW_RISK_DAYS: i64 = 7;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AtRiskItem {
    pub item_name: String,
    pub days_left: i64,
    pub quantity: u32,
    pub category: String,
}

/// Items grouped by how soon they expire. Items further out are not listed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WasteReport {
    pub high_risk: Vec<AtRiskItem>,
    pub medium_risk: Vec<AtRiskItem>,
    pub low_risk: Vec<AtRiskItem>,
}

impl WasteReport {
    pub fn build<'a>(records: impl IntoIterator<Item = &'a InventoryRecord>, now_s: u64) -> Self {
        let mut report = WasteReport::default();
        for record in records {
            let days_left = record.days_left(now_s);
            let item = AtRiskItem {
                item_name: record.item_name.clone(),
                days_left,
                quantity: record.quantity,
                category: record.category.clone(),
            };
            if days_left <= HIGH_RISK_DAYS {
                report.high_risk.push(item);
            } else if days_left <= MEDIUM_RISK_DAYS {
                report.medium_risk.push(item);
            } else if days_left <= LOW_RISK_DAYS {
                report.low_risk.push(item);
            }
        }
        for bucket in [
            &mut report.high_risk,
            &mut report.medium_risk,
            &mut report.low_risk,
        ] {
            bucket.sort_by(|a, b| a.days_left.cmp(&b.days_left).then(a.item_name.cmp(&b.item_name)));
        }
        report
    }

    pub fn is_empty(&self) -> bool {
        self.high_risk.is_empty() && self.medium_risk.is_empty() && self.low_risk.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, expiry_days: u64) -> InventoryRecord {
        InventoryRecord {
            item_name: name.to_string(),
            quantity: 1,
            category: "x".to_string(),
            expiry_at: expiry_days * DAY_S,
            added_at: 0,
            last_detected_at: 0,
            missed_cycles: 0,
        }
    }

    #[test]
    fn lookup_is_case_insensitive_with_fallback() {
        let table = ShelfLife::default();
        assert_eq!(table.category("Milk"), "dairy");
        assert_eq!(table.days("milk"), 7);
        assert_eq!(table.category("dragonfruit"), FALLBACK_CATEGORY);
        assert_eq!(table.days("dragonfruit"), FALLBACK_SHELF_LIFE_DAYS);
        assert_eq!(table.expiry_from("chicken", 100), 100 + 2 * DAY_S);
    }

    #[test]
    fn overrides_win() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "Milk".to_string(),
            ShelfLifeEntry {
                category: "dairy".to_string(),
                days: 10,
            },
        );
        assert_eq!(ShelfLife::with_overrides(&overrides).days("milk"), 10);
    }

    #[test]
    fn waste_report_buckets() {
        let records = vec![
            record("chicken", 1),
            record("milk", 4),
            record("butter", 7),
            record("soda", 90),
            record("fish", 0),
        ];
        let report = WasteReport::build(&records, 0);
        let names = |items: &[AtRiskItem]| -> Vec<String> {
            items.iter().map(|i| i.item_name.clone()).collect()
        };
        assert_eq!(names(&report.high_risk), vec!["fish", "chicken"]);
        assert_eq!(names(&report.medium_risk), vec!["milk"]);
        assert_eq!(names(&report.low_risk), vec!["butter"]);
        assert!(!report.is_empty());
    }
}
