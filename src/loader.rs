//! Deduplicating Loader: the append-only write path.
//!
//! For one table: coerce the batch, drop keys repeated inside it, read the
//! keys already stored, and insert only the residual. The read and the insert
//! run under a per-table lock so concurrent loads of the same table cannot
//! both decide a key is new.

use crate::error::{ReconcileError, Result, RowRejection};
use crate::schema::TableName;
use crate::store::TargetStore;
use crate::value::{CellValue, Row};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// What one `load` call did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub incoming: usize,
    /// Rows whose key was already in the target
    pub already_present: usize,
    pub inserted: usize,
    /// Rows dropped because an earlier row of the batch had the same key
    pub duplicates_in_batch: usize,
    pub rejected: Vec<RowRejection>,
}

pub struct DedupLoader<S> {
    store: S,
    locks: Mutex<HashMap<TableName, Arc<Mutex<()>>>>,
}

impl<S: TargetStore> DedupLoader<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn table_lock(&self, table: TableName) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ReconcileError::Plan("loader lock table poisoned".to_string()))?;
        Ok(locks.entry(table).or_default().clone())
    }

    /// Insert the rows of `rows` whose `key` value is not yet in `table`.
    ///
    /// Rows failing coercion are reported in `rejected` with their position
    /// and column; the others still load. A store failure on the residual
    /// batch is a `LoadFailure` and nothing of the batch is written.
    pub fn load(&self, table: TableName, rows: &[Row], key: &str) -> Result<LoadOutcome> {
        let mut outcome = LoadOutcome {
            incoming: rows.len(),
            ..LoadOutcome::default()
        };
        if rows.is_empty() {
            tracing::debug!(table = %table, "Empty batch, nothing to load");
            return Ok(outcome);
        }

        let def = table.def();
        if def.column(key).is_none() {
            return Err(ReconcileError::Config(format!(
                "dedup key '{}' is not a column of {}",
                key, table
            )));
        }

        // Coerce and dedup inside the batch, first row wins
        let mut seen: BTreeSet<CellValue> = BTreeSet::new();
        let mut candidates: Vec<(CellValue, Row)> = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let coerced = match def.coerce(row, index) {
                Ok(coerced) => coerced,
                Err(rejection) => {
                    tracing::warn!(table = %table, %rejection, "Row rejected");
                    outcome.rejected.push(rejection);
                    continue;
                }
            };
            let key_value = coerced.get(key).cloned().unwrap_or(CellValue::Null);
            if key_value.is_null() {
                outcome.rejected.push(RowRejection {
                    row: index,
                    column: key.to_string(),
                    reason: "dedup key is null".to_string(),
                });
                continue;
            }
            if !seen.insert(key_value.clone()) {
                outcome.duplicates_in_batch += 1;
                continue;
            }
            candidates.push((key_value, coerced));
        }

        let lock = self.table_lock(table)?;
        let _guard = lock
            .lock()
            .map_err(|_| ReconcileError::Plan(format!("load lock for {} poisoned", table)))?;

        let existing = self
            .store
            .read_column(table, key)
            .map_err(|e| ReconcileError::LoadFailure {
                table,
                cause: format!("reading existing keys: {}", e),
            })?;

        let residual: Vec<Row> = candidates
            .into_iter()
            .filter_map(|(key_value, row)| {
                if existing.contains(&key_value) {
                    outcome.already_present += 1;
                    None
                } else {
                    Some(row)
                }
            })
            .collect();

        if !residual.is_empty() {
            outcome.inserted = self
                .store
                .insert_rows(table, &residual)
                .map_err(|e| ReconcileError::LoadFailure {
                    table,
                    cause: e.to_string(),
                })?;
        }

        tracing::info!(
            table = %table,
            incoming = outcome.incoming,
            already_present = outcome.already_present,
            duplicates_in_batch = outcome.duplicates_in_batch,
            rejected = outcome.rejected.len(),
            inserted = outcome.inserted,
            "Loaded table"
        );
        Ok(outcome)
    }

    /// Replace the whole content of a derived table.
    ///
    /// The delete and the insert run under the table lock but are two store
    /// calls; a failed insert leaves the table empty until the next run.
    pub fn replace(&self, table: TableName, rows: &[Row]) -> Result<LoadOutcome> {
        let def = table.def();
        let mut coerced = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            match def.coerce(row, index) {
                Ok(row) => coerced.push(row),
                Err(rejection) => rejected.push(rejection),
            }
        }

        let lock = self.table_lock(table)?;
        let _guard = lock
            .lock()
            .map_err(|_| ReconcileError::Plan(format!("load lock for {} poisoned", table)))?;

        let load_failure = |e: crate::error::StoreError| ReconcileError::LoadFailure {
            table,
            cause: e.to_string(),
        };
        let removed = self.store.delete_all(table).map_err(load_failure)?;
        let inserted = self.store.insert_rows(table, &coerced).map_err(load_failure)?;

        tracing::info!(table = %table, removed, inserted, "Replaced derived table");
        Ok(LoadOutcome {
            incoming: rows.len(),
            already_present: 0,
            inserted,
            duplicates_in_batch: 0,
            rejected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::store::MemoryStore;

    fn loader() -> DedupLoader<MemoryStore> {
        let store = MemoryStore::new();
        for table in TableName::ALL {
            store.create_table_if_absent(table.def()).unwrap();
        }
        DedupLoader::new(store)
    }

    #[test]
    fn test_incremental_region_delta() {
        let loader = loader();
        loader
            .load(TableName::Region, &[row! { "region_id" => 1i64, "name" => "North" }], "region_id")
            .unwrap();

        let outcome = loader
            .load(
                TableName::Region,
                &[
                    row! { "region_id" => "1", "name" => "North" },
                    row! { "region_id" => "2", "name" => "South" },
                ],
                "region_id",
            )
            .unwrap();
        assert_eq!(outcome.already_present, 1);
        assert_eq!(outcome.inserted, 1);

        let rows = loader.store().read_rows(TableName::Region).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], CellValue::text("North"));
        assert_eq!(rows[1]["name"], CellValue::text("South"));
    }

    #[test]
    fn test_present_rows_are_not_updated() {
        let loader = loader();
        loader
            .load(TableName::Region, &[row! { "region_id" => 1i64, "name" => "North" }], "region_id")
            .unwrap();
        loader
            .load(TableName::Region, &[row! { "region_id" => 1i64, "name" => "Nord" }], "region_id")
            .unwrap();
        let rows = loader.store().read_rows(TableName::Region).unwrap();
        assert_eq!(rows[0]["name"], CellValue::text("North"));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let loader = loader();
        let outcome = loader.load(TableName::Product, &[], "product_id").unwrap();
        assert_eq!(outcome, LoadOutcome::default());
    }

    #[test]
    fn test_batch_duplicates_and_rejections_are_counted() {
        let loader = loader();
        let outcome = loader
            .load(
                TableName::Product,
                &[
                    row! { "product_id" => 1i64, "name" => "Router" },
                    row! { "product_id" => 1i64, "name" => "Router bis" },
                    row! { "product_id" => "x", "name" => "Broken" },
                    row! { "product_id" => 2i64, "name" => "Switch" },
                ],
                "product_id",
            )
            .unwrap();
        assert_eq!(outcome.incoming, 4);
        assert_eq!(outcome.duplicates_in_batch, 1);
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].row, 2);
        assert_eq!(outcome.rejected[0].column, "product_id");
    }

    #[test]
    fn test_store_failure_is_load_failure() {
        let loader = loader();
        loader.store().fail_inserts_into(TableName::Region);
        let err = loader
            .load(TableName::Region, &[row! { "region_id" => 1i64, "name" => "North" }], "region_id")
            .unwrap_err();
        assert!(matches!(err, ReconcileError::LoadFailure { table: TableName::Region, .. }));
        assert_eq!(loader.store().count_rows(TableName::Region).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_loads_of_same_table_insert_once() {
        let loader = loader();
        let batch: Vec<Row> = (1..=50i64)
            .map(|id| row! { "region_id" => id, "name" => format!("Region {}", id) })
            .collect();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| loader.load(TableName::Region, &batch, "region_id").unwrap());
            }
        });
        assert_eq!(loader.store().count_rows(TableName::Region).unwrap(), 50);
    }

    #[test]
    fn test_replace_swaps_content() {
        let loader = loader();
        loader
            .load(TableName::Region, &[row! { "region_id" => 1i64, "name" => "North" }], "region_id")
            .unwrap();
        let outcome = loader
            .replace(TableName::Region, &[row! { "region_id" => 2i64, "name" => "South" }])
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        let ids = loader.store().read_column(TableName::Region, "region_id").unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![CellValue::Int(2)]);
    }
}
