//! Schema Mapper: projects source frames onto target attribute names.

use crate::config::ColumnMapping;
use crate::error::{ReconcileError, Result};
use crate::schema::TableName;
use crate::value::{CellValue, Frame, Row};
use convert_case::{Case, Casing};
use indexmap::IndexMap;

/// Result of projecting one source table
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Rows renamed to target attributes
    Mapped(Frame),
    /// The source shares no column with the mapping; the load is skipped
    NoMappableColumns,
}

/// Renames and aliases source columns according to a mapping table.
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    mapping: ColumnMapping,
    normalize_headers: bool,
}

/// Canonical form of a header: trimmed and, optionally, snake_case.
pub fn normalize_header(raw: &str, normalize: bool) -> String {
    let trimmed = raw.trim().trim_start_matches('\u{feff}');
    if normalize {
        trimmed.to_case(Case::Snake)
    } else {
        trimmed.to_string()
    }
}

impl SchemaMapper {
    pub fn new(mapping: ColumnMapping, normalize_headers: bool) -> Self {
        Self {
            mapping,
            normalize_headers,
        }
    }

    /// For each target column, the source column that feeds it.
    ///
    /// Aliases are tried in mapping order; the first present in the frame wins.
    fn resolve(&self, frame: &Frame) -> IndexMap<String, String> {
        let present: IndexMap<String, &String> = frame
            .columns
            .iter()
            .map(|c| (normalize_header(c, self.normalize_headers), c))
            .collect();

        let mut chosen: IndexMap<String, String> = IndexMap::new();
        for (source, target) in &self.mapping {
            if chosen.contains_key(target) {
                continue;
            }
            let key = normalize_header(source, self.normalize_headers);
            if let Some(original) = present.get(&key) {
                chosen.insert(target.clone(), (*original).clone());
            }
        }
        chosen
    }

    /// Project only the columns present in both the frame and the mapping.
    ///
    /// Pure: the input frame is untouched. With no mappable column the result
    /// has no columns and no rows.
    pub fn project(&self, frame: &Frame) -> Frame {
        let chosen = self.resolve(frame);
        if chosen.is_empty() {
            return Frame::default();
        }

        let mut out = Frame::new(chosen.keys().cloned().collect());
        for row in &frame.rows {
            let projected: Row = chosen
                .iter()
                .map(|(target, source)| {
                    let value = row.get(source).cloned().unwrap_or(CellValue::Null);
                    (target.clone(), value)
                })
                .collect();
            out.push(projected);
        }
        out
    }

    /// Project a frame for `table`, requiring the given target columns.
    ///
    /// Returns `NoMappableColumns` when nothing maps, and `SchemaMismatch`
    /// when something maps but a required column is missing.
    pub fn map_table(&self, table: TableName, frame: &Frame, required: &[&str]) -> Result<Projection> {
        let projected = self.project(frame);
        if projected.columns.is_empty() {
            tracing::warn!(
                table = %table,
                source_columns = ?frame.columns,
                "No mappable columns, skipping table"
            );
            return Ok(Projection::NoMappableColumns);
        }

        let missing: Vec<String> = required
            .iter()
            .filter(|c| !projected.has_column(c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReconcileError::SchemaMismatch { table, missing });
        }

        tracing::debug!(table = %table, columns = ?projected.columns, rows = projected.len(), "Mapped source columns");
        Ok(Projection::Mapped(projected))
    }
}
