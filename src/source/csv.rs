//! CSV-backed snapshot and order feed.

use super::{FeedReader, SnapshotReader};
use crate::error::SourceError;
use crate::value::{CellValue, Frame, Row};
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// `;` when the header line uses it and has no `,`, otherwise `,`.
fn sniff_delimiter(path: &Path) -> Result<u8, SourceError> {
    let file = fs::File::open(path)?;
    let mut header = String::new();
    BufReader::new(file).read_line(&mut header)?;
    if header.contains(';') && !header.contains(',') {
        Ok(b';')
    } else {
        Ok(b',')
    }
}

/// Read a whole CSV file into a frame of text cells.
pub fn read_csv_frame(path: &Path) -> Result<Frame, SourceError> {
    if !path.is_file() {
        return Err(SourceError::NotFound(path.display().to_string()));
    }

    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(path)?)
        .trim(::csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut frame = Frame::new(columns.clone());
    for record in reader.records() {
        let record = record?;
        let row: Row = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let value = record.get(i).map(CellValue::text).unwrap_or(CellValue::Null);
                (column.clone(), value)
            })
            .collect();
        frame.push(row);
    }

    tracing::debug!(path = %path.display(), rows = frame.len(), "Read CSV");
    Ok(frame)
}

/// Directory of `<table>.csv` files
#[derive(Debug, Clone)]
pub struct CsvSnapshot {
    directory: PathBuf,
}

impl CsvSnapshot {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }
}

impl SnapshotReader for CsvSnapshot {
    fn list_tables(&self) -> Result<BTreeSet<String>, SourceError> {
        if !self.directory.is_dir() {
            return Err(SourceError::NotFound(self.directory.display().to_string()));
        }
        let mut tables = BTreeSet::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));
            if !is_csv {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tables.insert(stem.to_string());
            }
        }
        Ok(tables)
    }

    fn read_table(&self, name: &str) -> Result<Frame, SourceError> {
        read_csv_frame(&self.directory.join(format!("{}.csv", name)))
    }
}

/// Order feed stored as one CSV file
#[derive(Debug, Clone)]
pub struct CsvOrderFeed {
    path: PathBuf,
}

impl CsvOrderFeed {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl FeedReader for CsvOrderFeed {
    fn read_orders(&self) -> Result<Frame, SourceError> {
        read_csv_frame(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("region.csv"), "region_id,region_name\n1, North \n2,\n").unwrap();
        fs::write(dir.path().join("readme.txt"), "not a table").unwrap();

        let snapshot = CsvSnapshot::new(dir.path());
        let tables = snapshot.list_tables().unwrap();
        assert_eq!(tables.into_iter().collect::<Vec<_>>(), vec!["region".to_string()]);

        let frame = snapshot.read_table("region").unwrap();
        assert_eq!(frame.columns, vec!["region_id", "region_name"]);
        assert_eq!(frame.rows[0]["region_name"], CellValue::text("North"));
        assert_eq!(frame.rows[1]["region_name"], CellValue::Null);
    }

    #[test]
    fn test_missing_feed_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let feed = CsvOrderFeed::new(dir.path().join("commandes.csv"));
        assert!(matches!(feed.read_orders(), Err(SourceError::NotFound(_))));
    }

    #[test]
    fn test_semicolon_feed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commandes.csv");
        fs::write(
            &path,
            "numero_commande;commande_date;revendeur_id;product_id;quantity;unit_price\n\
             CMD-1;2024-03-05;3;1;30;59.90\n",
        )
        .unwrap();

        let frame = CsvOrderFeed::new(&path).read_orders().unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.rows[0]["quantity"], CellValue::text("30"));
        assert_eq!(frame.rows[0]["unit_price"], CellValue::text("59.90"));
    }
}
