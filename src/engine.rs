//! Run orchestration.
//!
//! A run reads every source first, then loads the tables level by level in
//! dependency order, derives the stock ledger from what was committed and
//! hands the stock report to a sink. Failures are contained per table: a
//! failed table blocks its children and nothing else.

use crate::config::{EngineConfig, IntegrityStrategy, KeyAssignment};
use crate::entities::{
    assign_production_ids, fill_contact_emails, source_required_columns, FeedLine, Order,
    OrderLine, ProductionBatch, Record, FEED_REQUIRED_COLUMNS,
};
use crate::error::{ErrorKind, ReconcileError, Result, RowRejection, Violation};
use crate::ledger::{read_records, StockLedger, StockReportRow};
use crate::loader::{DedupLoader, LoadOutcome};
use crate::mapper::{Projection, SchemaMapper};
use crate::schema::TableName;
use crate::sequencer::{with_suspended_constraints, LoadPlan};
use crate::sink::{report_destination, ReportSink};
use crate::source::{resolve_snapshot_table, FeedReader, SnapshotReader, SNAPSHOT_TABLES};
use crate::store::TargetStore;
use crate::surrogate::SurrogateKeyAssigner;
use crate::value::{Frame, Row};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use uuid::Uuid;

/// How one table fared in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Loaded {
        incoming: usize,
        already_present: usize,
        inserted: usize,
        duplicates_in_batch: usize,
        rejected: Vec<RowRejection>,
    },
    /// Nothing to load (no source table, or no mappable column)
    Skipped { reason: String },
    Failed { kind: ErrorKind, message: String },
    /// Not attempted because a table it depends on failed
    Blocked { by: TableName },
}

impl TableStatus {
    fn loaded(outcome: LoadOutcome) -> Self {
        TableStatus::Loaded {
            incoming: outcome.incoming,
            already_present: outcome.already_present,
            inserted: outcome.inserted,
            duplicates_in_batch: outcome.duplicates_in_batch,
            rejected: outcome.rejected,
        }
    }

    fn failed(error: &ReconcileError) -> Self {
        TableStatus::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// True when children of this table cannot be loaded
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TableStatus::Failed { .. } | TableStatus::Blocked { .. })
    }

    pub fn inserted(&self) -> usize {
        match self {
            TableStatus::Loaded { inserted, .. } => *inserted,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOutcome {
    pub table: TableName,
    pub level: usize,
    pub status: TableStatus,
}

/// Everything a run did, for display and for the exit status
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub strategy: IntegrityStrategy,
    pub tables: Vec<TableOutcome>,
    pub violations: Vec<Violation>,
    pub stock: Vec<StockReportRow>,
    /// Row counts per table once loading is over
    pub table_counts: BTreeMap<TableName, usize>,
    pub report_path: Option<PathBuf>,
    pub report_error: Option<String>,
}

impl RunReport {
    pub fn outcome(&self, table: TableName) -> Option<&TableOutcome> {
        self.tables.iter().find(|o| o.table == table)
    }

    pub fn inserted(&self, table: TableName) -> usize {
        self.outcome(table).map_or(0, |o| o.status.inserted())
    }

    pub fn failed_tables(&self) -> Vec<TableName> {
        self.tables
            .iter()
            .filter(|o| o.status.is_unavailable())
            .map(|o| o.table)
            .collect()
    }

    /// A table failed or was blocked, or references are broken
    pub fn has_failures(&self) -> bool {
        !self.failed_tables().is_empty() || !self.violations.is_empty()
    }
}

/// Input for one table, ready to load
#[derive(Debug, Clone)]
enum Prepared {
    Rows {
        rows: Vec<Row>,
        rejected: Vec<RowRejection>,
    },
    /// Computed from committed tables when its level comes up
    Derived,
    Skipped(String),
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

/// Tables whose committed rows hold broken references fail with
/// `ReferentialViolation`; the rows stay in place.
fn flag_violations(mut tables: Vec<TableOutcome>, violations: &[Violation]) -> Vec<TableOutcome> {
    for outcome in &mut tables {
        let found: Vec<Violation> = violations
            .iter()
            .filter(|v| v.table == outcome.table)
            .cloned()
            .collect();
        if !found.is_empty() {
            outcome.status = TableStatus::failed(&ReconcileError::ReferentialViolation(found));
        }
    }
    tables
}

/// Stored orders whose id a fresh numbering would give to another natural key
fn order_collisions(assigned: &[Order], stored: &[Order]) -> Option<ReconcileError> {
    let stored: HashMap<i64, &Order> = stored.iter().map(|o| (o.order_id, o)).collect();
    let colliding: Vec<i64> = assigned
        .iter()
        .filter(|o| stored.get(&o.order_id).map_or(false, |s| s.natural_key() != o.natural_key()))
        .map(|o| o.order_id)
        .collect();
    collision_error(TableName::Order, "order_id", &colliding)
}

fn line_collisions(assigned: &[OrderLine], stored: &[OrderLine]) -> Option<ReconcileError> {
    let stored: HashMap<i64, &OrderLine> = stored.iter().map(|l| (l.line_id, l)).collect();
    let colliding: Vec<i64> = assigned
        .iter()
        .filter(|l| stored.get(&l.line_id).map_or(false, |s| *s != *l))
        .map(|l| l.line_id)
        .collect();
    collision_error(TableName::OrderLine, "line_id", &colliding)
}

fn collision_error(table: TableName, column: &str, colliding: &[i64]) -> Option<ReconcileError> {
    let first = colliding.first()?;
    Some(ReconcileError::LoadFailure {
        table,
        cause: format!(
            "fresh key assignment reuses {} stored {} value(s) for different rows (first: {} = {}); use extend key assignment",
            colliding.len(),
            column,
            column,
            first
        ),
    })
}

impl Prepared {
    fn from_error(error: &ReconcileError) -> Self {
        Prepared::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

pub struct Engine<S> {
    config: EngineConfig,
    loader: DedupLoader<S>,
}

impl<S: TargetStore> Engine<S> {
    pub fn new(config: EngineConfig, store: S) -> Self {
        Self {
            config,
            loader: DedupLoader::new(store),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.loader.store()
    }

    /// Load plan over every target table
    pub fn plan(&self) -> Result<LoadPlan> {
        LoadPlan::build(&TableName::ALL, self.config.integrity_strategy)
    }

    /// Create missing target tables, parents first.
    pub fn prepare_target(&self) -> Result<()> {
        for table in self.plan()?.order() {
            self.store().create_table_if_absent(table.def())?;
        }
        Ok(())
    }

    /// Recompute the stock report from the committed store
    pub fn stock_report(&self) -> Result<Vec<StockReportRow>> {
        Ok(StockLedger::from_store(self.store(), self.config.low_stock_threshold)?.report())
    }

    /// Run a full reconciliation.
    ///
    /// Returns `Err` only for fatal conditions (missing source, unusable
    /// store); per-table failures are in the report.
    pub fn run(
        &self,
        snapshot: &dyn SnapshotReader,
        feed: &dyn FeedReader,
        sink: Option<&dyn ReportSink>,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", run_id = %run_id);
        let _enter = span.enter();
        let started_at = Utc::now();

        tracing::info!(strategy = ?self.config.integrity_strategy, "Starting reconciliation run");

        let plan = self.plan()?;
        self.prepare_target()?;

        // Extraction: every source is read before the first write
        let prepared = self.prepare(snapshot, feed)?;

        let (tables, violations) = match plan.strategy {
            IntegrityStrategy::Topological => (self.load_levels(&plan, &prepared)?, Vec::new()),
            IntegrityStrategy::ConstraintSuspension => {
                let planned = plan.order();
                let (loaded, violations) = with_suspended_constraints(self.store(), &planned, || {
                    self.load_levels(&plan, &prepared)
                })?;
                (loaded?, violations)
            }
        };
        let tables = flag_violations(tables, &violations);

        let mut table_counts = BTreeMap::new();
        for table in TableName::ALL {
            table_counts.insert(table, self.store().count_rows(table)?);
        }

        let stock = self.stock_report()?;

        let mut report = RunReport {
            run_id,
            started_at,
            finished_at: started_at,
            strategy: plan.strategy,
            tables,
            violations,
            stock,
            table_counts,
            report_path: None,
            report_error: None,
        };

        if let Some(sink) = sink {
            let destination =
                report_destination(&self.config.report, chrono::Local::now().naive_local());
            match sink.write(&report.stock, &destination) {
                Ok(path) => report.report_path = Some(path),
                Err(e) => {
                    tracing::error!(error = %e, "Could not write stock report");
                    report.report_error = Some(e.to_string());
                }
            }
        }

        report.finished_at = Utc::now();
        self.log_summary(&report);
        Ok(report)
    }

    fn prepare(
        &self,
        snapshot: &dyn SnapshotReader,
        feed: &dyn FeedReader,
    ) -> Result<BTreeMap<TableName, Prepared>> {
        let mut prepared = BTreeMap::new();

        let available = snapshot.list_tables()?;
        for table in SNAPSHOT_TABLES {
            let entry = match resolve_snapshot_table(&available, table) {
                Some(name) => {
                    let frame = snapshot.read_table(&name)?;
                    tracing::info!(table = %table, source = %name, rows = frame.len(), "Extracted snapshot table");
                    self.prepare_snapshot_table(table, &frame)?
                }
                None => {
                    tracing::warn!(table = %table, "No source table in snapshot");
                    Prepared::Skipped("no source table in snapshot".to_string())
                }
            };
            prepared.insert(table, entry);
        }

        let orders = feed.read_orders()?;
        tracing::info!(rows = orders.len(), "Extracted order feed");
        let (order_entry, line_entry) = self.prepare_feed(&orders)?;
        prepared.insert(TableName::Order, order_entry);
        prepared.insert(TableName::OrderLine, line_entry);

        prepared.insert(TableName::StockMovement, Prepared::Derived);
        Ok(prepared)
    }

    fn prepare_snapshot_table(&self, table: TableName, frame: &Frame) -> Result<Prepared> {
        let mapper = SchemaMapper::new(self.config.column_mapping(table), self.config.normalize_headers);
        let mut rows = match mapper.map_table(table, frame, source_required_columns(table)) {
            Ok(Projection::Mapped(projected)) => projected.rows,
            Ok(Projection::NoMappableColumns) => {
                return Ok(Prepared::Skipped("no mappable columns".to_string()))
            }
            Err(e) => {
                tracing::error!(table = %table, error = %e, "Cannot map source table");
                return Ok(Prepared::from_error(&e));
            }
        };

        match table {
            TableName::Reseller => fill_contact_emails(&mut rows, &self.config.email_domain),
            TableName::ProductionBatch => {
                let stored: Vec<ProductionBatch> = read_records(self.store())?;
                if assign_production_ids(&mut rows, &stored) {
                    tracing::info!(rows = rows.len(), "Assigned positional production ids");
                }
            }
            _ => {}
        }

        Ok(Prepared::Rows {
            rows,
            rejected: Vec::new(),
        })
    }

    /// Map the feed, attach surrogate keys and split it into orders and lines.
    fn prepare_feed(&self, frame: &Frame) -> Result<(Prepared, Prepared)> {
        let mapper = SchemaMapper::new(
            self.config.column_mapping(TableName::Order),
            self.config.normalize_headers,
        );
        let projected = match mapper.map_table(TableName::Order, frame, FEED_REQUIRED_COLUMNS) {
            Ok(Projection::Mapped(projected)) => projected,
            Ok(Projection::NoMappableColumns) => {
                let skipped = Prepared::Skipped("no mappable columns in order feed".to_string());
                return Ok((skipped.clone(), skipped));
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot map order feed");
                return Ok((Prepared::from_error(&e), Prepared::from_error(&e)));
            }
        };

        let mut lines = Vec::with_capacity(projected.len());
        let mut rejected = Vec::new();
        for (index, row) in projected.rows.iter().enumerate() {
            match FeedLine::from_row(row) {
                Ok(line) => lines.push(line),
                Err((column, reason)) => {
                    tracing::warn!(row = index, %column, %reason, "Feed line rejected");
                    rejected.push(RowRejection {
                        row: index,
                        column,
                        reason,
                    });
                }
            }
        }

        let existing_orders: Vec<Order> = read_records(self.store())?;
        let existing_lines: Vec<OrderLine> = read_records(self.store())?;
        let assigned = SurrogateKeyAssigner::new(self.config.key_assignment).assign(
            &lines,
            &existing_orders,
            &existing_lines,
        );

        let mut order_entry = Prepared::Rows {
            rows: assigned.orders.iter().map(Record::to_row).collect(),
            rejected,
        };
        let mut line_entry = Prepared::Rows {
            rows: assigned.lines.iter().map(Record::to_row).collect(),
            rejected: Vec::new(),
        };

        // Fresh numbering must not reuse an id that already means something else
        if self.config.key_assignment == KeyAssignment::Fresh {
            if let Some(error) = order_collisions(&assigned.orders, &existing_orders) {
                tracing::error!(error = %error, "Fresh order ids collide with stored orders");
                order_entry = Prepared::from_error(&error);
                line_entry = Prepared::from_error(&error);
            } else if let Some(error) = line_collisions(&assigned.lines, &existing_lines) {
                tracing::error!(error = %error, "Fresh line ids collide with stored lines");
                line_entry = Prepared::from_error(&error);
            }
        }

        Ok((order_entry, line_entry))
    }

    /// Load every level in order; tables of one level may run concurrently.
    fn load_levels(
        &self,
        plan: &LoadPlan,
        prepared: &BTreeMap<TableName, Prepared>,
    ) -> Result<Vec<TableOutcome>> {
        let mut outcomes = Vec::new();
        let mut unavailable: BTreeSet<TableName> = BTreeSet::new();

        for (level, tables) in plan.levels.iter().enumerate() {
            let mut runnable = Vec::new();
            for table in tables {
                match plan.blocked_by(*table, &unavailable) {
                    Some(by) => {
                        tracing::warn!(table = %table, blocked_by = %by, "Table blocked by failed dependency");
                        outcomes.push(TableOutcome {
                            table: *table,
                            level,
                            status: TableStatus::Blocked { by },
                        });
                        unavailable.insert(*table);
                    }
                    None => runnable.push(*table),
                }
            }

            let statuses: Vec<(TableName, TableStatus)> =
                if self.config.parallel_siblings && runnable.len() > 1 {
                    std::thread::scope(|scope| {
                        let handles: Vec<_> = runnable
                            .iter()
                            .map(|table| {
                                let table = *table;
                                scope.spawn(move || (table, self.load_table(table, prepared)))
                            })
                            .collect();
                        handles
                            .into_iter()
                            .map(|handle| {
                                let (table, status) = handle.join().map_err(|_| {
                                    ReconcileError::Plan("table load thread panicked".to_string())
                                })?;
                                Ok((table, status?))
                            })
                            .collect::<Result<Vec<_>>>()
                    })?
                } else {
                    runnable
                        .iter()
                        .map(|table| Ok((*table, self.load_table(*table, prepared)?)))
                        .collect::<Result<Vec<_>>>()?
                };

            for (table, status) in statuses {
                if status.is_unavailable() {
                    unavailable.insert(table);
                }
                outcomes.push(TableOutcome { table, level, status });
            }
        }

        outcomes.sort_by_key(|o| (o.level, o.table));
        Ok(outcomes)
    }

    /// Load one table. Recoverable errors become a `Failed` status.
    fn load_table(&self, table: TableName, prepared: &BTreeMap<TableName, Prepared>) -> Result<TableStatus> {
        let result = match prepared.get(&table) {
            None => return Ok(TableStatus::Skipped { reason: "not part of this run".to_string() }),
            Some(Prepared::Skipped(reason)) => {
                return Ok(TableStatus::Skipped { reason: reason.clone() })
            }
            Some(Prepared::Failed { kind, message }) => {
                return Ok(TableStatus::Failed {
                    kind: *kind,
                    message: message.clone(),
                })
            }
            Some(Prepared::Rows { rows, rejected }) => self
                .loader
                .load(table, rows, self.config.dedup_key(table))
                .map(|mut outcome| {
                    let mut all = rejected.clone();
                    all.append(&mut outcome.rejected);
                    outcome.rejected = all;
                    outcome
                }),
            Some(Prepared::Derived) => self.rebuild_movements(),
        };

        match result {
            Ok(outcome) => Ok(TableStatus::loaded(outcome)),
            Err(e) if !e.is_fatal() => {
                tracing::error!(table = %table, kind = %e.kind(), error = %e, "Table load failed");
                Ok(TableStatus::failed(&e))
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the stock movements with the ones derived from committed facts
    fn rebuild_movements(&self) -> Result<LoadOutcome> {
        let ledger = StockLedger::from_store(self.store(), self.config.low_stock_threshold)
            .map_err(|e| ReconcileError::LoadFailure {
                table: TableName::StockMovement,
                cause: e.to_string(),
            })?;
        let rows: Vec<Row> = ledger.movements().iter().map(Record::to_row).collect();
        self.loader.replace(TableName::StockMovement, &rows)
    }

    fn log_summary(&self, report: &RunReport) {
        for outcome in &report.tables {
            match &outcome.status {
                TableStatus::Loaded { inserted, .. } => {
                    tracing::info!(table = %outcome.table, inserted, total = report.table_counts.get(&outcome.table).copied().unwrap_or(0), "Table loaded")
                }
                TableStatus::Skipped { reason } => {
                    tracing::info!(table = %outcome.table, %reason, "Table skipped")
                }
                TableStatus::Failed { kind, message } => {
                    tracing::error!(table = %outcome.table, %kind, %message, "Table failed")
                }
                TableStatus::Blocked { by } => {
                    tracing::warn!(table = %outcome.table, blocked_by = %by, "Table blocked")
                }
            }
        }
        if !report.violations.is_empty() {
            tracing::error!(violations = report.violations.len(), "Referential violations after load");
        }
        tracing::info!(
            failed = report.failed_tables().len(),
            products = report.stock.len(),
            "Reconciliation run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::StockStatus;
    use crate::row;
    use crate::sink::CsvReportSink;
    use crate::source::{MemoryFeed, MemorySnapshot};
    use crate::store::MemoryStore;

    fn snapshot() -> MemorySnapshot {
        MemorySnapshot::new()
            .with_table(
                "region",
                Frame::from_rows(vec![
                    row! { "region_id" => 1i64, "region_name" => "Nord" },
                    row! { "region_id" => 2i64, "region_name" => "Sud" },
                ]),
            )
            .with_table(
                "revendeur",
                Frame::from_rows(vec![
                    row! { "revendeur_id" => 10i64, "revendeur_name" => "Tech Express", "region_id" => 1i64 },
                    row! { "revendeur_id" => 11i64, "revendeur_name" => "Info Plus", "region_id" => 2i64 },
                ]),
            )
            .with_table(
                "produit",
                Frame::from_rows(vec![
                    row! { "product_id" => 1i64, "product_name" => "Router", "cout_unitaire" => "49.90" },
                    row! { "product_id" => 2i64, "product_name" => "Switch", "cout_unitaire" => "120.00" },
                ]),
            )
            .with_table(
                "production",
                Frame::from_rows(vec![
                    row! { "product_id" => 1i64, "quantity" => 100i64, "date_production" => "2024-03-01" },
                    row! { "product_id" => 2i64, "quantity" => 5i64, "date_production" => "2024-03-02" },
                ]),
            )
    }

    fn feed() -> MemoryFeed {
        let line = |number: &str, date: &str, reseller: i64, product: i64, quantity: i64| {
            row! {
                "numero_commande" => number,
                "commande_date" => date,
                "revendeur_id" => reseller,
                "product_id" => product,
                "quantity" => quantity,
                "unit_price" => "59.90",
            }
        };
        MemoryFeed::new(Frame::from_rows(vec![
            line("CMD-1", "2024-03-05 10:00:00", 10, 1, 30),
            line("CMD-1", "2024-03-05 10:00:00", 10, 2, 2),
            line("CMD-2", "2024-03-06 09:30:00", 11, 1, 45),
        ]))
    }

    fn engine() -> Engine<MemoryStore> {
        Engine::new(EngineConfig::default(), MemoryStore::new())
    }

    #[test]
    fn test_run_loads_every_table() {
        let engine = engine();
        let report = engine.run(&snapshot(), &feed(), None).unwrap();

        assert!(!report.has_failures());
        assert_eq!(report.table_counts[&TableName::Region], 2);
        assert_eq!(report.table_counts[&TableName::Reseller], 2);
        assert_eq!(report.table_counts[&TableName::Order], 2);
        assert_eq!(report.table_counts[&TableName::OrderLine], 3);
        assert_eq!(report.table_counts[&TableName::StockMovement], 5);

        let levels: Vec<(TableName, usize)> = report.tables.iter().map(|o| (o.table, o.level)).collect();
        assert_eq!(levels[0], (TableName::Region, 0));
        assert_eq!(levels[6], (TableName::StockMovement, 4));

        let stock: Vec<(i64, i64, StockStatus)> = report
            .stock
            .iter()
            .map(|r| (r.product_id, r.current_stock, r.status))
            .collect();
        assert_eq!(stock, vec![(2, 3, StockStatus::Low), (1, 25, StockStatus::Ok)]);
    }

    #[test]
    fn test_second_run_adds_nothing() {
        let engine = engine();
        let first = engine.run(&snapshot(), &feed(), None).unwrap();
        let second = engine.run(&snapshot(), &feed(), None).unwrap();

        assert_eq!(first.table_counts, second.table_counts);
        for table in [TableName::Region, TableName::Order, TableName::OrderLine] {
            assert_eq!(second.inserted(table), 0, "{}", table);
        }
        match &second.outcome(TableName::OrderLine).unwrap().status {
            TableStatus::Loaded { already_present, .. } => assert_eq!(*already_present, 3),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_missing_feed_aborts_before_writing() {
        let engine = engine();
        let result = engine.run(&snapshot(), &MemoryFeed::missing(), None);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceNotFound);
        for table in TableName::ALL {
            assert_eq!(engine.store().count_rows(table).unwrap(), 0);
        }
    }

    #[test]
    fn test_failed_parent_blocks_descendants_only() {
        let store = MemoryStore::new();
        store.fail_inserts_into(TableName::Reseller);
        let engine = Engine::new(EngineConfig::default(), store);

        let report = engine.run(&snapshot(), &feed(), None).unwrap();
        assert!(report.has_failures());

        let status = |t| report.outcome(t).unwrap().status.clone();
        assert!(matches!(status(TableName::Reseller), TableStatus::Failed { kind: ErrorKind::LoadFailure, .. }));
        assert_eq!(status(TableName::Order), TableStatus::Blocked { by: TableName::Reseller });
        assert_eq!(status(TableName::OrderLine), TableStatus::Blocked { by: TableName::Order });
        assert!(matches!(status(TableName::StockMovement), TableStatus::Blocked { .. }));

        assert_eq!(report.table_counts[&TableName::Region], 2);
        assert_eq!(report.table_counts[&TableName::Product], 2);
        assert_eq!(report.table_counts[&TableName::ProductionBatch], 2);
        assert_eq!(report.table_counts[&TableName::Order], 0);
    }

    #[test]
    fn test_absent_source_table_is_skipped_without_blocking() {
        let snapshot = MemorySnapshot::new()
            .with_table(
                "produit",
                Frame::from_rows(vec![row! { "product_id" => 1i64, "product_name" => "Router" }]),
            )
            .with_table(
                "production",
                Frame::from_rows(vec![
                    row! { "product_id" => 1i64, "quantity" => 8i64, "date_production" => "2024-03-01" },
                ]),
            );
        let feed = MemoryFeed::new(Frame::new(
            ["numero_commande", "commande_date", "revendeur_id", "product_id", "quantity"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        ));

        let engine = engine();
        let report = engine.run(&snapshot, &feed, None).unwrap();

        assert!(!report.has_failures());
        assert!(matches!(
            report.outcome(TableName::Region).unwrap().status,
            TableStatus::Skipped { .. }
        ));
        assert_eq!(report.inserted(TableName::Order), 0);
        assert_eq!(report.table_counts[&TableName::StockMovement], 1);
        assert_eq!(report.stock[0].status, StockStatus::Low);
    }

    #[test]
    fn test_bad_feed_lines_are_rejected_not_fatal() {
        let feed = MemoryFeed::new(Frame::from_rows(vec![
            row! {
                "numero_commande" => "CMD-1", "commande_date" => "2024-03-05 10:00:00",
                "revendeur_id" => 10i64, "product_id" => 1i64, "quantity" => 0i64,
            },
            row! {
                "numero_commande" => "CMD-2", "commande_date" => "2024-03-05 11:00:00",
                "revendeur_id" => 10i64, "product_id" => 1i64, "quantity" => 4i64,
            },
        ]));

        let report = engine().run(&snapshot(), &feed, None).unwrap();
        match &report.outcome(TableName::Order).unwrap().status {
            TableStatus::Loaded { inserted, rejected, .. } => {
                assert_eq!(*inserted, 1);
                assert_eq!(rejected.len(), 1);
                assert_eq!(rejected[0].row, 0);
                assert_eq!(rejected[0].column, "quantity");
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_report_written_to_sink() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.report.directory = dir.path().to_path_buf();
        let engine = Engine::new(config, MemoryStore::new());

        let report = engine.run(&snapshot(), &feed(), Some(&CsvReportSink)).unwrap();
        let path = report.report_path.unwrap();
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read_to_string(path).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_missing_required_column_fails_table_and_blocks_children() {
        // Reseller rows without a name column
        let snapshot = snapshot().with_table(
            "revendeur",
            Frame::from_rows(vec![
                row! { "revendeur_id" => 10i64, "region_id" => 1i64 },
                row! { "revendeur_id" => 11i64, "region_id" => 2i64 },
            ]),
        );

        let report = engine().run(&snapshot, &feed(), None).unwrap();
        assert!(report.has_failures());

        let status = |t| report.outcome(t).unwrap().status.clone();
        match status(TableName::Reseller) {
            TableStatus::Failed { kind, message } => {
                assert_eq!(kind, ErrorKind::SchemaMismatch);
                assert!(message.contains("name"), "{}", message);
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(status(TableName::Order), TableStatus::Blocked { by: TableName::Reseller });
        assert_eq!(status(TableName::OrderLine), TableStatus::Blocked { by: TableName::Order });
        assert!(matches!(status(TableName::Region), TableStatus::Loaded { .. }));
        assert!(matches!(status(TableName::Product), TableStatus::Loaded { .. }));
        assert!(matches!(status(TableName::ProductionBatch), TableStatus::Loaded { .. }));
        assert_eq!(report.table_counts[&TableName::Reseller], 0);
    }

    #[test]
    fn test_fresh_ids_clashing_with_stored_orders_fail_the_run() {
        let config = EngineConfig {
            key_assignment: KeyAssignment::Fresh,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config, MemoryStore::new());

        engine.run(&snapshot(), &feed(), None).unwrap();
        let rerun = engine.run(&snapshot(), &feed(), None).unwrap();
        assert!(!rerun.has_failures(), "{:?}", rerun.tables);

        // An earlier order would be numbered 1, which CMD-1 already holds
        let earlier = MemoryFeed::new(Frame::from_rows(vec![row! {
            "numero_commande" => "CMD-0",
            "commande_date" => "2024-03-04 08:00:00",
            "revendeur_id" => 10i64,
            "product_id" => 1i64,
            "quantity" => 5i64,
        }]));
        let report = engine.run(&snapshot(), &earlier, None).unwrap();

        assert!(report.has_failures());
        match &report.outcome(TableName::Order).unwrap().status {
            TableStatus::Failed { kind, message } => {
                assert_eq!(*kind, ErrorKind::LoadFailure);
                assert!(message.contains("order_id = 1"), "{}", message);
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(
            report.outcome(TableName::OrderLine).unwrap().status,
            TableStatus::Blocked { by: TableName::Order }
        );
        assert_eq!(report.table_counts[&TableName::Order], 2);
        assert_eq!(report.table_counts[&TableName::OrderLine], 3);
    }
}
