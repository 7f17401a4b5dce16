//! Referential Sequencer: load order over the foreign-key graph.
//!
//! Tables are grouped into levels with Kahn's algorithm; every table of a
//! level only depends on tables of earlier levels, so a level's tables may be
//! loaded concurrently. With constraint suspension the same order is used and
//! references are validated once enforcement is back on.

use crate::config::IntegrityStrategy;
use crate::error::{ReconcileError, Result, StoreError, Violation};
use crate::schema::TableName;
use crate::store::TargetStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Ordered load levels for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadPlan {
    pub strategy: IntegrityStrategy,
    pub levels: Vec<Vec<TableName>>,
    /// Direct dependencies of each planned table, restricted to planned tables
    pub parents: BTreeMap<TableName, Vec<TableName>>,
}

impl LoadPlan {
    /// Plan the given tables. Foreign keys into tables outside the set are
    /// not ordering constraints for this run.
    pub fn build(tables: &[TableName], strategy: IntegrityStrategy) -> Result<Self> {
        let planned: BTreeSet<TableName> = tables.iter().copied().collect();
        let parents: BTreeMap<TableName, Vec<TableName>> = planned
            .iter()
            .map(|table| {
                let deps = table
                    .load_after()
                    .into_iter()
                    .filter(|p| planned.contains(p) && p != table)
                    .collect();
                (*table, deps)
            })
            .collect();

        let levels = compute_levels(&parents)?;
        Ok(Self {
            strategy,
            levels,
            parents,
        })
    }

    /// All tables in load order (flattened levels)
    pub fn order(&self) -> Vec<TableName> {
        self.levels.iter().flatten().copied().collect()
    }

    pub fn level_of(&self, table: TableName) -> Option<usize> {
        self.levels.iter().position(|level| level.contains(&table))
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Check if a table depends on another (directly or indirectly)
    pub fn depends_on(&self, table: TableName, dependency: TableName) -> bool {
        match self.parents.get(&table) {
            Some(parents) => parents
                .iter()
                .any(|p| *p == dependency || self.depends_on(*p, dependency)),
            None => false,
        }
    }

    /// First failed ancestor of `table`, if any.
    ///
    /// Only tables that failed or were themselves blocked count; a parent
    /// skipped for lack of source data does not block its children.
    pub fn blocked_by(&self, table: TableName, unavailable: &BTreeSet<TableName>) -> Option<TableName> {
        self.parents
            .get(&table)?
            .iter()
            .find(|p| unavailable.contains(p))
            .copied()
    }
}

/// Compute processing levels using topological sort (Kahn's algorithm).
///
/// `parents` maps each table to the tables it depends on. Levels are sorted
/// so the plan is deterministic.
pub fn compute_levels(parents: &BTreeMap<TableName, Vec<TableName>>) -> Result<Vec<Vec<TableName>>> {
    // Build reverse dependency map (who depends on this table)
    let mut dependents: BTreeMap<TableName, Vec<TableName>> = BTreeMap::new();
    let mut in_degree: BTreeMap<TableName, usize> = BTreeMap::new();

    for (table, deps) in parents {
        let valid: Vec<&TableName> = deps.iter().filter(|d| parents.contains_key(*d)).collect();
        in_degree.insert(*table, valid.len());
        for dep in valid {
            dependents.entry(*dep).or_default().push(*table);
        }
    }

    let mut queue: VecDeque<TableName> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(table, _)| *table)
        .collect();

    let mut levels: Vec<Vec<TableName>> = Vec::new();
    let mut processed: BTreeSet<TableName> = BTreeSet::new();

    // Process level by level
    while !queue.is_empty() {
        let mut current_level = Vec::new();
        for _ in 0..queue.len() {
            if let Some(table) = queue.pop_front() {
                current_level.push(table);
                processed.insert(table);

                if let Some(children) = dependents.get(&table) {
                    for child in children {
                        if let Some(degree) = in_degree.get_mut(child) {
                            *degree -= 1;
                            if *degree == 0 {
                                queue.push_back(*child);
                            }
                        }
                    }
                }
            }
        }
        current_level.sort();
        levels.push(current_level);
    }

    if processed.len() != parents.len() {
        let unprocessed: Vec<TableName> = parents
            .keys()
            .filter(|t| !processed.contains(*t))
            .copied()
            .collect();
        return Err(ReconcileError::Plan(format!(
            "Circular dependency detected involving tables: {:?}",
            unprocessed
        )));
    }

    Ok(levels)
}

/// Foreign-key values of `tables` with no matching parent row.
///
/// Works from the catalog only: for each foreign key, the child column's
/// values minus the parent key's values.
pub fn validate_references<S: TargetStore + ?Sized>(
    store: &S,
    tables: &[TableName],
) -> std::result::Result<Vec<Violation>, StoreError> {
    let mut violations = Vec::new();
    for table in tables {
        for fk in &table.def().foreign_keys {
            let child_values = store.read_column(*table, fk.column)?;
            if child_values.is_empty() {
                continue;
            }
            let parent_values = store.read_column(fk.parent, fk.parent_column)?;
            let missing: Vec<String> = child_values
                .difference(&parent_values)
                .map(|v| v.to_string())
                .collect();
            if !missing.is_empty() {
                tracing::error!(
                    table = %table,
                    column = fk.column,
                    parent = %fk.parent,
                    missing = missing.len(),
                    "Referential violation"
                );
                violations.push(Violation {
                    table: *table,
                    column: fk.column.to_string(),
                    parent: fk.parent,
                    missing_values: missing,
                });
            }
        }
    }
    Ok(violations)
}

/// Run `load` with foreign-key enforcement suspended, then restore it and
/// validate the references of `tables`.
///
/// Enforcement is restored even when `load` reports failures. Violations are
/// returned, never rolled back.
pub fn with_suspended_constraints<S, T, F>(
    store: &S,
    tables: &[TableName],
    load: F,
) -> Result<(T, Vec<Violation>)>
where
    S: TargetStore + ?Sized,
    F: FnOnce() -> T,
{
    store.suspend_foreign_keys()?;
    tracing::warn!(tables = tables.len(), "Loading with foreign keys suspended");

    let loaded = load();

    store.restore_foreign_keys()?;
    let violations = validate_references(store, tables)?;
    if violations.is_empty() {
        tracing::info!("References validated after suspension");
    }
    Ok((loaded, violations))
}
