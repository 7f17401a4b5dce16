//! Source collaborators: the relational snapshot and the order feed.
//!
//! Readers hand over untyped [`Frame`]s with the source's own column names;
//! renaming is the mapper's job and typing is the loader's.

pub mod csv;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use self::csv::{CsvOrderFeed, CsvSnapshot};
pub use memory::{MemoryFeed, MemorySnapshot};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSnapshot;

use crate::error::SourceError;
use crate::schema::TableName;
use crate::value::Frame;
use serde::Serialize;
use std::collections::BTreeSet;

/// Row-oriented snapshot of the reference tables
pub trait SnapshotReader {
    fn list_tables(&self) -> Result<BTreeSet<String>, SourceError>;

    /// Read one table; an unknown name is `SourceError::NotFound`.
    fn read_table(&self, name: &str) -> Result<Frame, SourceError>;
}

/// Flat transactional order feed
pub trait FeedReader {
    /// Read every order line; an absent feed is `SourceError::NotFound`.
    fn read_orders(&self) -> Result<Frame, SourceError>;
}

/// Target tables fed by the snapshot, parents first
pub const SNAPSHOT_TABLES: [TableName; 4] = [
    TableName::Region,
    TableName::Reseller,
    TableName::Product,
    TableName::ProductionBatch,
];

/// Source table names that feed a target table, in preference order
pub fn snapshot_table_aliases(table: TableName) -> &'static [&'static str] {
    match table {
        TableName::Region => &["region", "regions"],
        TableName::Reseller => &["revendeur", "revendeurs", "reseller", "resellers"],
        TableName::Product => &["produit", "produits", "product", "products"],
        TableName::ProductionBatch => &["production", "productions", "production_batches"],
        _ => &[],
    }
}

/// Name of the snapshot table feeding `table`, matched case-insensitively.
pub fn resolve_snapshot_table(available: &BTreeSet<String>, table: TableName) -> Option<String> {
    snapshot_table_aliases(table).iter().find_map(|alias| {
        available
            .iter()
            .find(|name| name.eq_ignore_ascii_case(alias))
            .cloned()
    })
}

/// Shape of one source table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: usize,
    /// Target table this source table feeds, if any
    pub feeds: Option<TableName>,
}

/// What the sources hold, for diagnostics before a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescription {
    pub tables: Vec<TableSummary>,
    pub feed: Option<TableSummary>,
}

/// List snapshot tables with their columns and row counts, and the feed.
pub fn describe(
    snapshot: &dyn SnapshotReader,
    feed: Option<&dyn FeedReader>,
) -> Result<SourceDescription, SourceError> {
    let available = snapshot.list_tables()?;
    let mut tables = Vec::with_capacity(available.len());
    for name in &available {
        let frame = snapshot.read_table(name)?;
        let feeds = SNAPSHOT_TABLES
            .iter()
            .copied()
            .find(|t| resolve_snapshot_table(&available, *t).as_deref() == Some(name.as_str()));
        tables.push(TableSummary {
            name: name.clone(),
            columns: frame.columns.clone(),
            rows: frame.len(),
            feeds,
        });
    }

    let feed = match feed {
        Some(reader) => match reader.read_orders() {
            Ok(frame) => Some(TableSummary {
                name: "orders".to_string(),
                columns: frame.columns.clone(),
                rows: frame.len(),
                feeds: Some(TableName::Order),
            }),
            Err(SourceError::NotFound(what)) => {
                tracing::warn!(%what, "Order feed not found");
                None
            }
            Err(e) => return Err(e),
        },
        None => None,
    };

    Ok(SourceDescription { tables, feed })
}
