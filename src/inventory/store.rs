use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap};

use super::record::InventoryRecord;
use crate::open_db_connection;

pub trait InventoryStore {
    /// Records ordered by item name.
    fn get_inventory(&mut self, user_id: u64) -> Result<Vec<InventoryRecord>>;

    fn upsert_item(&mut self, user_id: u64, record: &InventoryRecord) -> Result<()>;

    fn remove_item(&mut self, user_id: u64, item_name: &str) -> Result<()>;

    fn clear(&mut self, user_id: u64) -> Result<()>;
}

pub struct SqliteInventoryStore {
    conn: Connection,
}

impl SqliteInventoryStore {
    /// Open (or create) the database. `file:` URIs are accepted.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS inventory_items (
              user_id INTEGER NOT NULL,
              item_name TEXT NOT NULL,
              quantity INTEGER NOT NULL CHECK (quantity > 0),
              category TEXT NOT NULL,
              expiry_at INTEGER NOT NULL,
              added_at INTEGER NOT NULL,
              last_detected_at INTEGER NOT NULL,
              missed_cycles INTEGER NOT NULL DEFAULT 0,
              PRIMARY KEY (user_id, item_name)
            );

            CREATE INDEX IF NOT EXISTS idx_inventory_expiry ON inventory_items(user_id, expiry_at);
            "#,
        )?;
        Ok(())
    }

    /// Every user id with at least one record.
    pub fn users(&mut self) -> Result<Vec<u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT user_id FROM inventory_items ORDER BY user_id ASC")?;
        let mut rows = stmt.query([])?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            users.push(id as u64);
        }
        Ok(users)
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} exceeds i64 range", what))
}

impl InventoryStore for SqliteInventoryStore {
    fn get_inventory(&mut self, user_id: u64) -> Result<Vec<InventoryRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT item_name, quantity, category, expiry_at, added_at, last_detected_at, missed_cycles
            FROM inventory_items WHERE user_id = ?1 ORDER BY item_name ASC
            "#,
        )?;
        let mut rows = stmt.query(params![to_i64(user_id, "user id")?])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let quantity: i64 = row.get(1)?;
            let expiry_at: i64 = row.get(3)?;
            let added_at: i64 = row.get(4)?;
            let last_detected_at: i64 = row.get(5)?;
            let missed_cycles: i64 = row.get(6)?;
            records.push(InventoryRecord {
                item_name: row.get(0)?,
                quantity: u32::try_from(quantity)
                    .map_err(|_| anyhow!("corrupt inventory: quantity {}", quantity))?,
                category: row.get(2)?,
                expiry_at: expiry_at.max(0) as u64,
                added_at: added_at.max(0) as u64,
                last_detected_at: last_detected_at.max(0) as u64,
                missed_cycles: missed_cycles.clamp(0, u32::MAX as i64) as u32,
            });
        }
        Ok(records)
    }

    fn upsert_item(&mut self, user_id: u64, record: &InventoryRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO inventory_items(user_id, item_name, quantity, category, expiry_at, added_at, last_detected_at, missed_cycles)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id, item_name) DO UPDATE SET
              quantity = excluded.quantity,
              category = excluded.category,
              expiry_at = excluded.expiry_at,
              added_at = excluded.added_at,
              last_detected_at = excluded.last_detected_at,
              missed_cycles = excluded.missed_cycles
            "#,
            params![
                to_i64(user_id, "user id")?,
                record.item_name,
                record.quantity as i64,
                record.category,
                to_i64(record.expiry_at, "expiry")?,
                to_i64(record.added_at, "added_at")?,
                to_i64(record.last_detected_at, "last_detected_at")?,
                record.missed_cycles as i64
            ],
        )?;
        Ok(())
    }

    fn remove_item(&mut self, user_id: u64, item_name: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM inventory_items WHERE user_id = ?1 AND item_name = ?2",
            params![to_i64(user_id, "user id")?, item_name],
        )?;
        Ok(())
    }

    fn clear(&mut self, user_id: u64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM inventory_items WHERE user_id = ?1",
            params![to_i64(user_id, "user id")?],
        )?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryInventoryStore {
    users: HashMap<u64, BTreeMap<String, InventoryRecord>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn get_inventory(&mut self, user_id: u64) -> Result<Vec<InventoryRecord>> {
        Ok(self
            .users
            .get(&user_id)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default())
    }

    fn upsert_item(&mut self, user_id: u64, record: &InventoryRecord) -> Result<()> {
        if record.quantity == 0 {
            return Err(anyhow!("refusing to store {} with quantity 0", record.item_name));
        }
        self.users
            .entry(user_id)
            .or_default()
            .insert(record.item_name.clone(), record.clone());
        Ok(())
    }

    fn remove_item(&mut self, user_id: u64, item_name: &str) -> Result<()> {
        if let Some(items) = self.users.get_mut(&user_id) {
            items.remove(item_name);
        }
        Ok(())
    }

    fn clear(&mut self, user_id: u64) -> Result<()> {
        self.users.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, quantity: u32) -> InventoryRecord {
        InventoryRecord {
            item_name: name.to_string(),
            quantity,
            category: "produce".to_string(),
            expiry_at: 1_000,
            added_at: 10,
            last_detected_at: 20,
            missed_cycles: 0,
        }
    }

    fn exercise(store: &mut dyn InventoryStore) -> Result<()> {
        store.upsert_item(1, &record("pear", 1))?;
        store.upsert_item(1, &record("apple", 2))?;
        store.upsert_item(2, &record("apple", 5))?;
        store.upsert_item(1, &record("apple", 3))?;

        let items = store.get_inventory(1)?;
        assert_eq!(
            items.iter().map(|r| (r.item_name.as_str(), r.quantity)).collect::<Vec<_>>(),
            vec![("apple", 3), ("pear", 1)]
        );

        store.remove_item(1, "pear")?;
        assert_eq!(store.get_inventory(1)?.len(), 1);

        store.clear(1)?;
        assert!(store.get_inventory(1)?.is_empty());
        assert_eq!(store.get_inventory(2)?[0].quantity, 5);
        Ok(())
    }

    #[test]
    fn sqlite_store_behaves() -> Result<()> {
        let mut store = SqliteInventoryStore::open(":memory:")?;
        exercise(&mut store)?;
        assert_eq!(store.users()?, vec![2]);
        Ok(())
    }

    #[test]
    fn in_memory_store_behaves() -> Result<()> {
        exercise(&mut InMemoryInventoryStore::new())
    }

    #[test]
    fn zero_quantity_is_rejected() -> Result<()> {
        assert!(InMemoryInventoryStore::new()
            .upsert_item(1, &record("apple", 0))
            .is_err());
        assert!(SqliteInventoryStore::open(":memory:")?
            .upsert_item(1, &record("apple", 0))
            .is_err());
        Ok(())
    }
}
