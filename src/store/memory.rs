//! In-memory target store.

use super::TargetStore;
use crate::error::StoreError;
use crate::schema::{TableDef, TableName};
use crate::value::{CellValue, Row};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Tables held in memory with the same guarantees the SQL backends give:
/// primary keys are unique, foreign keys are enforced while enforcement is on,
/// and an insert call is all-or-nothing.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<HashMap<TableName, BTreeMap<CellValue, Row>>>,
    enforce_foreign_keys: AtomicBool,
    /// Tables whose inserts fail, for exercising failure paths
    failing: RwLock<BTreeSet<TableName>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            enforce_foreign_keys: AtomicBool::new(true),
            failing: RwLock::new(BTreeSet::new()),
        }
    }

    /// Make every later insert into `table` fail with a database error.
    pub fn fail_inserts_into(&self, table: TableName) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(table);
        }
    }

    pub fn foreign_keys_enforced(&self) -> bool {
        self.enforce_foreign_keys.load(Ordering::SeqCst)
    }

    fn poisoned() -> StoreError {
        StoreError::Database("memory store lock poisoned".to_string())
    }
}

impl TargetStore for MemoryStore {
    fn create_table_if_absent(&self, def: &TableDef) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables.entry(def.name).or_default();
        Ok(())
    }

    fn read_column(&self, table: TableName, column: &str) -> Result<BTreeSet<CellValue>, StoreError> {
        if table.def().column(column).is_none() {
            return Err(StoreError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        let rows = tables
            .get(&table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(rows
            .values()
            .filter_map(|row| row.get(column))
            .filter(|v| !v.is_null())
            .cloned()
            .collect())
    }

    fn read_rows(&self, table: TableName) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        let rows = tables
            .get(&table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(rows.values().cloned().collect())
    }

    fn insert_rows(&self, table: TableName, rows: &[Row]) -> Result<usize, StoreError> {
        if self.failing.read().map_err(|_| Self::poisoned())?.contains(&table) {
            return Err(StoreError::Database(format!("insert into {} rejected", table)));
        }

        let def = table.def();
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        if !tables.contains_key(&table) {
            return Err(StoreError::UnknownTable(table.to_string()));
        }

        // Validate everything before touching the table
        let mut staged: BTreeMap<CellValue, Row> = BTreeMap::new();
        {
            let existing = &tables[&table];
            for row in rows {
                let key = row
                    .get(def.primary_key)
                    .filter(|k| !k.is_null())
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::Constraint(format!("{}.{} is null", table, def.primary_key))
                    })?;
                if existing.contains_key(&key) || staged.contains_key(&key) {
                    return Err(StoreError::Constraint(format!(
                        "duplicate key {} in {}",
                        key, table
                    )));
                }
                if self.foreign_keys_enforced() {
                    for fk in &def.foreign_keys {
                        let value = match row.get(fk.column) {
                            Some(v) if !v.is_null() => v,
                            _ => continue,
                        };
                        let in_parent = tables.get(&fk.parent).map_or(false, |parent_rows| {
                            if fk.parent == table {
                                parent_rows.contains_key(value) || staged.contains_key(value)
                            } else {
                                parent_rows.contains_key(value)
                            }
                        });
                        if !in_parent {
                            return Err(StoreError::Constraint(format!(
                                "{}.{} = {} has no parent in {}",
                                table, fk.column, value, fk.parent
                            )));
                        }
                    }
                }
                staged.insert(key, row.clone());
            }
        }

        let written = staged.len();
        if let Some(target) = tables.get_mut(&table) {
            target.extend(staged);
        }
        Ok(written)
    }

    fn delete_all(&self, table: TableName) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        let rows = tables
            .get_mut(&table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let removed = rows.len();
        rows.clear();
        Ok(removed)
    }

    fn count_rows(&self, table: TableName) -> Result<usize, StoreError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        tables
            .get(&table)
            .map(|rows| rows.len())
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn suspend_foreign_keys(&self) -> Result<(), StoreError> {
        self.enforce_foreign_keys.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn restore_foreign_keys(&self) -> Result<(), StoreError> {
        self.enforce_foreign_keys.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn store_with_regions() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table_if_absent(TableName::Region.def()).unwrap();
        store.create_table_if_absent(TableName::Reseller.def()).unwrap();
        store
            .insert_rows(TableName::Region, &[row! { "region_id" => 1i64, "name" => "North" }])
            .unwrap();
        store
    }

    #[test]
    fn test_duplicate_key_rejects_whole_batch() {
        let store = store_with_regions();
        let result = store.insert_rows(
            TableName::Region,
            &[
                row! { "region_id" => 2i64, "name" => "South" },
                row! { "region_id" => 1i64, "name" => "North again" },
            ],
        );
        assert!(matches!(result, Err(StoreError::Constraint(_))));
        assert_eq!(store.count_rows(TableName::Region).unwrap(), 1);
    }

    #[test]
    fn test_foreign_keys_enforced_until_suspended() {
        let store = store_with_regions();
        let orphan = row! { "reseller_id" => 10i64, "name" => "Orphan", "region_id" => 9i64 };

        assert!(store.insert_rows(TableName::Reseller, &[orphan.clone()]).is_err());

        store.suspend_foreign_keys().unwrap();
        assert_eq!(store.insert_rows(TableName::Reseller, &[orphan]).unwrap(), 1);
        store.restore_foreign_keys().unwrap();
        assert!(store.foreign_keys_enforced());
    }

    #[test]
    fn test_read_column_skips_nulls() {
        let store = store_with_regions();
        store
            .insert_rows(
                TableName::Reseller,
                &[row! { "reseller_id" => 10i64, "name" => "A", "region_id" => CellValue::Null }],
            )
            .unwrap();
        assert!(store.read_column(TableName::Reseller, "region_id").unwrap().is_empty());
        assert!(store.read_column(TableName::Reseller, "bogus").is_err());
    }
}
