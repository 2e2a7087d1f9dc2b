use serde::{Deserialize, Serialize};

/// One item line in a user's inventory, keyed by `(user_id, item_name)`.
///
/// A record never holds quantity 0; it is deleted instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub item_name: String,
    pub quantity: u32,
    pub category: String,
    /// Epoch seconds.
    pub expiry_at: u64,
    pub added_at: u64,
    pub last_detected_at: u64,
    /// Consecutive reconcile batches in which the item was not detected.
    pub missed_cycles: u32,
}

impl InventoryRecord {
    /// Whole days until expiry, rounded towards negative infinity.
    pub fn days_left(&self, now_s: u64) -> i64 {
        (self.expiry_at as i64 - now_s as i64).div_euclid(86_400)
    }
}
