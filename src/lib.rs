//! # Stockrecon: Inventory and Order Reconciliation
//!
//! Stockrecon reconciles a relational snapshot (regions, resellers, products,
//! production batches) and a flat order feed into a normalized target store.
//! Repeated runs over growing or overlapping sources never insert a key twice
//! and keep foreign keys intact; the stock ledger is derived from what was
//! committed.
//!
//! ## Features
//!
//! - **Schema mapping**: source headers (French or English variants) onto the target catalog
//! - **Surrogate keys**: deterministic `order_id`/`line_id` from natural keys, extendable across runs
//! - **Deduplicating loader**: append-only inserts, one critical section per table
//! - **Referential sequencer**: topological load levels, or constraint suspension with validation
//! - **Stock ledger**: inbound/outbound movements, running balances and the stock report
//! - **Backends**: SQLite (default), PostgreSQL and MySQL through Diesel, plus an in-memory store
//!
//! ## Example configuration
//!
//! ```yaml
//! source_paths:
//!   snapshot: data/base_stock.sqlite
//!   orders: data/commandes_revendeurs.csv
//! target_connection:
//!   url: target.sqlite
//! integrity_strategy: topological
//! low_stock_threshold: 10
//! report:
//!   directory: reports
//!   format: csv
//! ```

// Data model
pub mod value;
pub mod error;
pub mod schema;
pub mod entities;

// Configuration
pub mod config;

// Target stores
pub mod store;

// Reconciliation components
pub mod mapper;
pub mod surrogate;
pub mod loader;
pub mod sequencer;
pub mod ledger;

// Collaborators
pub mod source;
pub mod sink;

// Run orchestration
pub mod engine;

// Re-export key types
pub use value::{CellValue, Frame, Row};
pub use error::{ErrorKind, ReconcileError, Result, RowRejection, Severity, SourceError, StoreError, Violation};
pub use schema::{TableDef, TableName};
pub use config::{EngineConfig, IntegrityStrategy, KeyAssignment, ReportFormat};
pub use store::{MemoryStore, TargetStore};

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
pub use store::Database;

pub use mapper::SchemaMapper;
pub use surrogate::{AssignedKeys, SurrogateKeyAssigner};
pub use loader::{DedupLoader, LoadOutcome};
pub use sequencer::LoadPlan;
pub use ledger::{StockLedger, StockReportRow, StockStatus};
pub use source::{FeedReader, SnapshotReader};
pub use sink::ReportSink;
pub use engine::{Engine, RunReport, TableOutcome, TableStatus};
