//! Error types for reconciliation runs.
//!
//! `ReconcileError` carries the run-level taxonomy (source missing, schema
//! mismatch, load failure, referential violation) plus the collaborator
//! failures that feed into it. `Severity` separates the conditions a run can
//! skip past from the ones that abort it.

use crate::schema::TableName;
use std::fmt;

/// The error taxonomy reported per table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceNotFound,
    SchemaMismatch,
    LoadFailure,
    ReferentialViolation,
    Config,
    Store,
    Source,
    Sink,
    Plan,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SourceNotFound => "SourceNotFound",
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::LoadFailure => "LoadFailure",
            ErrorKind::ReferentialViolation => "ReferentialViolation",
            ErrorKind::Config => "Config",
            ErrorKind::Store => "Store",
            ErrorKind::Source => "Source",
            ErrorKind::Sink => "Sink",
            ErrorKind::Plan => "Plan",
        };
        write!(f, "{}", name)
    }
}

/// Whether a condition lets the run continue with sibling tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Skip the affected table (and its children) and keep going
    Recoverable,
    /// Abort the run
    Fatal,
}

/// A row the loader refused, with enough detail to find it in the source.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RowRejection {
    /// Zero-based position in the incoming batch
    pub row: usize,
    pub column: String,
    pub reason: String,
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} column '{}': {}", self.row, self.column, self.reason)
    }
}

/// A foreign key value with no matching parent row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Violation {
    pub table: TableName,
    pub column: String,
    pub parent: TableName,
    pub missing_values: Vec<String>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} references {} values missing from {}: {}",
            self.table,
            self.column,
            self.missing_values.len(),
            self.parent,
            self.missing_values.join(", ")
        )
    }
}

/// Failures raised by a relational target store
#[derive(Debug)]
pub enum StoreError {
    Database(String),
    Pool(String),
    /// A primary key or foreign key constraint rejected the write
    Constraint(String),
    UnknownTable(String),
    UnknownColumn { table: String, column: String },
    Decode(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(msg) => write!(f, "Database error: {}", msg),
            StoreError::Pool(msg) => write!(f, "Database pool error: {}", msg),
            StoreError::Constraint(msg) => write!(f, "Constraint violated: {}", msg),
            StoreError::UnknownTable(table) => write!(f, "Unknown table: {}", table),
            StoreError::UnknownColumn { table, column } => {
                write!(f, "Unknown column '{}' in table '{}'", column, table)
            }
            StoreError::Decode(msg) => write!(f, "Could not decode stored row: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match e {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
            | Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                StoreError::Constraint(info.message().to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Pool(e.to_string())
    }
}

impl From<diesel::ConnectionError> for StoreError {
    fn from(e: diesel::ConnectionError) -> Self {
        StoreError::Pool(e.to_string())
    }
}

/// Failures raised by source readers
#[derive(Debug)]
pub enum SourceError {
    NotFound(String),
    Io(std::io::Error),
    Csv(csv::Error),
    Decode(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::NotFound(what) => write!(f, "Source not found: {}", what),
            SourceError::Io(e) => write!(f, "I/O error: {}", e),
            SourceError::Csv(e) => write!(f, "CSV error: {}", e),
            SourceError::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e)
    }
}

impl From<csv::Error> for SourceError {
    fn from(e: csv::Error) -> Self {
        SourceError::Csv(e)
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Decode(e.to_string())
    }
}

impl From<StoreError> for SourceError {
    fn from(e: StoreError) -> Self {
        SourceError::Decode(e.to_string())
    }
}

/// Error type for reconciliation operations
#[derive(Debug)]
pub enum ReconcileError {
    SourceNotFound(String),
    SchemaMismatch {
        table: TableName,
        missing: Vec<String>,
    },
    LoadFailure {
        table: TableName,
        cause: String,
    },
    ReferentialViolation(Vec<Violation>),
    Config(String),
    Store(StoreError),
    Source(SourceError),
    Sink(String),
    Plan(String),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            ReconcileError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            ReconcileError::LoadFailure { .. } => ErrorKind::LoadFailure,
            ReconcileError::ReferentialViolation(_) => ErrorKind::ReferentialViolation,
            ReconcileError::Config(_) => ErrorKind::Config,
            ReconcileError::Store(_) => ErrorKind::Store,
            ReconcileError::Source(_) => ErrorKind::Source,
            ReconcileError::Sink(_) => ErrorKind::Sink,
            ReconcileError::Plan(_) => ErrorKind::Plan,
        }
    }

    /// Per-table conditions are recoverable; anything that leaves the run
    /// without inputs or without a usable store is fatal.
    pub fn severity(&self) -> Severity {
        match self {
            ReconcileError::SchemaMismatch { .. }
            | ReconcileError::LoadFailure { .. }
            | ReconcileError::ReferentialViolation(_)
            | ReconcileError::Sink(_) => Severity::Recoverable,
            ReconcileError::SourceNotFound(_)
            | ReconcileError::Config(_)
            | ReconcileError::Store(_)
            | ReconcileError::Source(_)
            | ReconcileError::Plan(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::SourceNotFound(what) => write!(f, "Source not found: {}", what),
            ReconcileError::SchemaMismatch { table, missing } => write!(
                f,
                "Schema mismatch for '{}': missing columns {:?}",
                table, missing
            ),
            ReconcileError::LoadFailure { table, cause } => {
                write!(f, "Load into '{}' failed: {}", table, cause)
            }
            ReconcileError::ReferentialViolation(violations) => {
                write!(f, "{} referential violation(s)", violations.len())?;
                for v in violations {
                    write!(f, "; {}", v)?;
                }
                Ok(())
            }
            ReconcileError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ReconcileError::Store(e) => write!(f, "{}", e),
            ReconcileError::Source(e) => write!(f, "{}", e),
            ReconcileError::Sink(msg) => write!(f, "Report sink error: {}", msg),
            ReconcileError::Plan(msg) => write!(f, "Load plan error: {}", msg),
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        ReconcileError::Store(e)
    }
}

impl From<SourceError> for ReconcileError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::NotFound(what) => ReconcileError::SourceNotFound(what),
            other => ReconcileError::Source(other),
        }
    }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
