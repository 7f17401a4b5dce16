//! Snapshot read from a SQLite database file.

use super::SnapshotReader;
use crate::error::{SourceError, StoreError};
use crate::schema::is_safe_identifier;
use crate::store::Dialect;
use crate::value::{cell_from_json, CellValue, Frame, Row};
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::sqlite::SqliteConnection;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(QueryableByName)]
struct JsonDoc {
    #[diesel(sql_type = Text)]
    doc: String,
}

pub struct SqliteSnapshot {
    path: PathBuf,
    conn: Mutex<SqliteConnection>,
}

impl SqliteSnapshot {
    /// Open an existing database file. A missing file is `NotFound` rather
    /// than a new empty database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }
        let location = path
            .to_str()
            .ok_or_else(|| SourceError::Decode(format!("non UTF-8 path {}", path.display())))?;
        let conn = SqliteConnection::establish(location).map_err(StoreError::from)?;
        tracing::info!(path = %path.display(), "Opened SQLite snapshot");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn docs(&self, sql: &str) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, SourceError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SourceError::Decode("snapshot connection poisoned".to_string()))?;
        let docs = diesel::sql_query(sql)
            .load::<JsonDoc>(&mut *conn)
            .map_err(StoreError::from)?;
        docs.into_iter()
            .map(|d| match serde_json::from_str::<serde_json::Value>(&d.doc)? {
                serde_json::Value::Object(map) => Ok(map),
                other => Err(SourceError::Decode(format!("expected object, got {}", other))),
            })
            .collect()
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, SourceError> {
        let sql = format!(
            "SELECT json_object('name', name) AS doc FROM pragma_table_info({}) ORDER BY cid",
            Dialect::Sqlite.literal(&CellValue::Text(table.to_string()))
        );
        Ok(self
            .docs(&sql)?
            .iter()
            .filter_map(|doc| doc.get("name").and_then(|v| v.as_str()).map(str::to_string))
            .collect())
    }
}

impl SnapshotReader for SqliteSnapshot {
    fn list_tables(&self) -> Result<BTreeSet<String>, SourceError> {
        let docs = self.docs(
            "SELECT json_object('name', name) AS doc FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        Ok(docs
            .iter()
            .filter_map(|doc| doc.get("name").and_then(|v| v.as_str()).map(str::to_string))
            .collect())
    }

    fn read_table(&self, name: &str) -> Result<Frame, SourceError> {
        if !is_safe_identifier(name) || !self.list_tables()?.contains(name) {
            return Err(SourceError::NotFound(format!("table {} in {}", name, self.path.display())));
        }

        let columns = self.columns(name)?;
        let mut frame = Frame::new(columns.clone());
        if columns.is_empty() {
            return Ok(frame);
        }

        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        if let Some(bad) = names.iter().find(|c| !is_safe_identifier(c)) {
            return Err(SourceError::Decode(format!("unsupported column name '{}' in {}", bad, name)));
        }
        let sql = format!(
            "SELECT {} FROM {}",
            Dialect::Sqlite.json_row_expr(&names),
            Dialect::Sqlite.quote_ident(name)
        );
        for doc in self.docs(&sql)? {
            let row: Row = columns
                .iter()
                .map(|c| (c.clone(), doc.get(c).map(cell_from_json).unwrap_or(CellValue::Null)))
                .collect();
            frame.push(row);
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_tables_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base_stock.sqlite");
        {
            let mut conn = SqliteConnection::establish(path.to_str().unwrap()).unwrap();
            diesel::sql_query("CREATE TABLE produit (product_id INTEGER, product_name TEXT, cout_unitaire REAL)")
                .execute(&mut conn)
                .unwrap();
            diesel::sql_query("INSERT INTO produit VALUES (1, 'Router', 49.5), (2, 'Switch', NULL)")
                .execute(&mut conn)
                .unwrap();
        }

        let snapshot = SqliteSnapshot::open(&path).unwrap();
        assert!(snapshot.list_tables().unwrap().contains("produit"));

        let frame = snapshot.read_table("produit").unwrap();
        assert_eq!(frame.columns, vec!["product_id", "product_name", "cout_unitaire"]);
        assert_eq!(frame.rows[0]["product_id"], CellValue::Int(1));
        assert_eq!(frame.rows[0]["product_name"], CellValue::text("Router"));
        assert_eq!(frame.rows[1]["cout_unitaire"], CellValue::Null);

        assert!(matches!(snapshot.read_table("missing"), Err(SourceError::NotFound(_))));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteSnapshot::open(dir.path().join("absent.sqlite"));
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }
}
