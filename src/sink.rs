//! Report sinks for the stock report.

use crate::config::{ReportConfig, ReportFormat};
use crate::error::{ReconcileError, Result};
use crate::ledger::StockReportRow;
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes stock report rows to a destination
pub trait ReportSink {
    fn write(&self, rows: &[StockReportRow], destination: &Path) -> Result<PathBuf>;

    fn extension(&self) -> &'static str;
}

/// `stock_report_<YYYYmmdd_HHMMSS>.<ext>`
pub fn report_file_name(at: NaiveDateTime, extension: &str) -> String {
    format!("stock_report_{}.{}", at.format("%Y%m%d_%H%M%S"), extension)
}

fn sink_error(destination: &Path, e: impl std::fmt::Display) -> ReconcileError {
    ReconcileError::Sink(format!("{}: {}", destination.display(), e))
}

fn ensure_parent(destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| sink_error(parent, e))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvReportSink;

impl ReportSink for CsvReportSink {
    fn write(&self, rows: &[StockReportRow], destination: &Path) -> Result<PathBuf> {
        ensure_parent(destination)?;
        let mut writer = csv::Writer::from_path(destination).map_err(|e| sink_error(destination, e))?;
        writer
            .write_record([
                "product_id",
                "name",
                "unit_cost",
                "total_inbound",
                "total_outbound",
                "current_stock",
                "status",
                "last_outbound_on",
                "order_count",
            ])
            .map_err(|e| sink_error(destination, e))?;

        for row in rows {
            writer
                .write_record([
                    row.product_id.to_string(),
                    row.name.clone(),
                    row.unit_cost.map(|c| c.to_string()).unwrap_or_default(),
                    row.total_inbound.to_string(),
                    row.total_outbound.to_string(),
                    row.current_stock.to_string(),
                    row.status.to_string(),
                    row.last_outbound_on
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default(),
                    row.order_count.to_string(),
                ])
                .map_err(|e| sink_error(destination, e))?;
        }
        writer.flush().map_err(|e| sink_error(destination, e))?;

        tracing::info!(path = %destination.display(), rows = rows.len(), "Stock report written");
        Ok(destination.to_path_buf())
    }

    fn extension(&self) -> &'static str {
        "csv"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportSink;

impl ReportSink for JsonReportSink {
    fn write(&self, rows: &[StockReportRow], destination: &Path) -> Result<PathBuf> {
        ensure_parent(destination)?;
        let json = serde_json::to_string_pretty(rows).map_err(|e| sink_error(destination, e))?;
        fs::write(destination, json).map_err(|e| sink_error(destination, e))?;

        tracing::info!(path = %destination.display(), rows = rows.len(), "Stock report written");
        Ok(destination.to_path_buf())
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

/// Sink matching the configured report format
pub fn sink_for(config: &ReportConfig) -> Box<dyn ReportSink> {
    match config.format {
        ReportFormat::Csv => Box::new(CsvReportSink),
        ReportFormat::Json => Box::new(JsonReportSink),
    }
}

/// Timestamped destination inside the configured report directory
pub fn report_destination(config: &ReportConfig, at: NaiveDateTime) -> PathBuf {
    config
        .directory
        .join(report_file_name(at, config.format.extension()))
}
