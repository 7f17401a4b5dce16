//! Typed records for the target tables and the raw order feed.
//!
//! The loader works on untyped [`Row`]s so that any table goes through the
//! same dedup path; the key assigner and the stock ledger work on the typed
//! records below. [`Record`] converts between the two.

use crate::schema::TableName;
use crate::value::{CellValue, Row};
use crate::row;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// A typed row of one target table
pub trait Record: Sized {
    const TABLE: TableName;

    fn to_row(&self) -> Row;

    /// Read a record back from a row; the error names the offending column.
    fn from_row(row: &Row) -> Result<Self, String>;
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a CellValue {
    row.get(column).unwrap_or(&CellValue::Null)
}

fn int(row: &Row, column: &str) -> Result<i64, String> {
    cell(row, column)
        .as_i64()
        .ok_or_else(|| format!("{}: expected integer, got '{}'", column, cell(row, column)))
}

fn opt_int(row: &Row, column: &str) -> Result<Option<i64>, String> {
    match cell(row, column) {
        CellValue::Null => Ok(None),
        _ => int(row, column).map(Some),
    }
}

fn text(row: &Row, column: &str) -> Result<String, String> {
    cell(row, column)
        .as_text()
        .ok_or_else(|| format!("{}: missing value", column))
}

fn opt_text(row: &Row, column: &str) -> Option<String> {
    cell(row, column).as_text()
}

fn opt_decimal(row: &Row, column: &str) -> Result<Option<Decimal>, String> {
    match cell(row, column) {
        CellValue::Null => Ok(None),
        other => other
            .as_decimal()
            .map(Some)
            .ok_or_else(|| format!("{}: expected decimal, got '{}'", column, other)),
    }
}

fn date(row: &Row, column: &str) -> Result<NaiveDate, String> {
    cell(row, column)
        .as_date()
        .ok_or_else(|| format!("{}: expected date, got '{}'", column, cell(row, column)))
}

/// Timestamps are kept to whole seconds, the precision every backend stores.
fn timestamp(row: &Row, column: &str) -> Result<NaiveDateTime, String> {
    cell(row, column)
        .as_timestamp()
        .map(|ts| ts.with_nanosecond(0).unwrap_or(ts))
        .ok_or_else(|| format!("{}: expected timestamp, got '{}'", column, cell(row, column)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub region_id: i64,
    pub name: String,
}

impl Record for Region {
    const TABLE: TableName = TableName::Region;

    fn to_row(&self) -> Row {
        row! { "region_id" => self.region_id, "name" => self.name.as_str() }
    }

    fn from_row(row: &Row) -> Result<Self, String> {
        Ok(Self {
            region_id: int(row, "region_id")?,
            name: text(row, "name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reseller {
    pub reseller_id: i64,
    pub name: String,
    pub region_id: Option<i64>,
    pub contact_email: Option<String>,
}

impl Record for Reseller {
    const TABLE: TableName = TableName::Reseller;

    fn to_row(&self) -> Row {
        row! {
            "reseller_id" => self.reseller_id,
            "name" => self.name.as_str(),
            "region_id" => self.region_id,
            "contact_email" => self.contact_email.clone(),
        }
    }

    fn from_row(row: &Row) -> Result<Self, String> {
        Ok(Self {
            reseller_id: int(row, "reseller_id")?,
            name: text(row, "name")?,
            region_id: opt_int(row, "region_id")?,
            contact_email: opt_text(row, "contact_email"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub product_id: i64,
    pub name: String,
    pub unit_cost: Option<Decimal>,
}

impl Record for Product {
    const TABLE: TableName = TableName::Product;

    fn to_row(&self) -> Row {
        row! {
            "product_id" => self.product_id,
            "name" => self.name.as_str(),
            "unit_cost" => self.unit_cost,
        }
    }

    fn from_row(row: &Row) -> Result<Self, String> {
        Ok(Self {
            product_id: int(row, "product_id")?,
            name: text(row, "name")?,
            unit_cost: opt_decimal(row, "unit_cost")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionBatch {
    pub production_id: i64,
    pub product_id: i64,
    pub quantity_produced: i64,
    pub produced_on: NaiveDate,
}

impl Record for ProductionBatch {
    const TABLE: TableName = TableName::ProductionBatch;

    fn to_row(&self) -> Row {
        row! {
            "production_id" => self.production_id,
            "product_id" => self.product_id,
            "quantity_produced" => self.quantity_produced,
            "produced_on" => self.produced_on,
        }
    }

    fn from_row(row: &Row) -> Result<Self, String> {
        Ok(Self {
            production_id: int(row, "production_id")?,
            product_id: int(row, "product_id")?,
            quantity_produced: int(row, "quantity_produced")?,
            produced_on: date(row, "produced_on")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: i64,
    pub order_number: String,
    pub order_date: NaiveDateTime,
    pub reseller_id: i64,
}

impl Order {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            order_number: self.order_number.clone(),
            order_date: self.order_date,
            reseller_id: self.reseller_id,
        }
    }
}

impl Record for Order {
    const TABLE: TableName = TableName::Order;

    fn to_row(&self) -> Row {
        row! {
            "order_id" => self.order_id,
            "order_number" => self.order_number.as_str(),
            "order_date" => self.order_date,
            "reseller_id" => self.reseller_id,
        }
    }

    fn from_row(row: &Row) -> Result<Self, String> {
        Ok(Self {
            order_id: int(row, "order_id")?,
            order_number: text(row, "order_number")?,
            order_date: timestamp(row, "order_date")?,
            reseller_id: int(row, "reseller_id")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub line_id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_sale_price: Option<Decimal>,
}

impl Record for OrderLine {
    const TABLE: TableName = TableName::OrderLine;

    fn to_row(&self) -> Row {
        row! {
            "line_id" => self.line_id,
            "order_id" => self.order_id,
            "product_id" => self.product_id,
            "quantity" => self.quantity,
            "unit_sale_price" => self.unit_sale_price,
        }
    }

    fn from_row(row: &Row) -> Result<Self, String> {
        Ok(Self {
            line_id: int(row, "line_id")?,
            order_id: int(row, "order_id")?,
            product_id: int(row, "product_id")?,
            quantity: int(row, "quantity")?,
            unit_sale_price: opt_decimal(row, "unit_sale_price")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Inbound,
    Outbound,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Inbound => "INBOUND",
            MovementType::Outbound => "OUTBOUND",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One signed stock event, derived from a production batch or an order line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovement {
    pub movement_id: i64,
    pub product_id: i64,
    pub movement_type: MovementType,
    pub signed_quantity: i64,
    pub occurred_on: NaiveDateTime,
    /// `production:<id>` or `order:<id>`
    pub reference: String,
    pub production_id: Option<i64>,
    pub order_id: Option<i64>,
}

impl Record for StockMovement {
    const TABLE: TableName = TableName::StockMovement;

    fn to_row(&self) -> Row {
        row! {
            "movement_id" => self.movement_id,
            "product_id" => self.product_id,
            "movement_type" => self.movement_type.as_str(),
            "signed_quantity" => self.signed_quantity,
            "occurred_on" => self.occurred_on,
            "reference" => self.reference.as_str(),
            "production_id" => self.production_id,
            "order_id" => self.order_id,
        }
    }

    fn from_row(row: &Row) -> Result<Self, String> {
        let movement_type = match text(row, "movement_type")?.as_str() {
            "INBOUND" => MovementType::Inbound,
            "OUTBOUND" => MovementType::Outbound,
            other => return Err(format!("movement_type: unknown value '{}'", other)),
        };
        Ok(Self {
            movement_id: int(row, "movement_id")?,
            product_id: int(row, "product_id")?,
            movement_type,
            signed_quantity: int(row, "signed_quantity")?,
            occurred_on: timestamp(row, "occurred_on")?,
            reference: text(row, "reference")?,
            production_id: opt_int(row, "production_id")?,
            order_id: opt_int(row, "order_id")?,
        })
    }
}

/// Natural key of an order. Ordering is by number, then date, then reseller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub order_number: String,
    pub order_date: NaiveDateTime,
    pub reseller_id: i64,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.order_number,
            self.order_date.format("%Y-%m-%d %H:%M:%S"),
            self.reseller_id
        )
    }
}

/// One line of the flat order feed, after column mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedLine {
    pub order_number: String,
    pub order_date: NaiveDateTime,
    pub reseller_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_sale_price: Option<Decimal>,
}

/// Feed attributes that must be present after mapping
pub const FEED_REQUIRED_COLUMNS: &[&str] = &[
    "order_number",
    "order_date",
    "reseller_id",
    "product_id",
    "quantity",
];

/// Every feed attribute a column mapping may target
pub const FEED_COLUMNS: &[&str] = &[
    "order_number",
    "order_date",
    "reseller_id",
    "product_id",
    "quantity",
    "unit_sale_price",
];

impl FeedLine {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            order_number: self.order_number.clone(),
            order_date: self.order_date,
            reseller_id: self.reseller_id,
        }
    }

    /// Parse a mapped feed row. The error carries the failing column.
    pub fn from_row(row: &Row) -> Result<Self, (String, String)> {
        let attribute = |column: &str, message: String| (column.to_string(), message);
        let quantity = int(row, "quantity").map_err(|m| attribute("quantity", m))?;
        if quantity <= 0 {
            return Err(attribute("quantity", format!("{} must be positive", quantity)));
        }
        Ok(Self {
            order_number: text(row, "order_number").map_err(|m| attribute("order_number", m))?,
            order_date: timestamp(row, "order_date").map_err(|m| attribute("order_date", m))?,
            reseller_id: int(row, "reseller_id").map_err(|m| attribute("reseller_id", m))?,
            product_id: int(row, "product_id").map_err(|m| attribute("product_id", m))?,
            quantity,
            unit_sale_price: opt_decimal(row, "unit_sale_price")
                .map_err(|m| attribute("unit_sale_price", m))?,
        })
    }
}

/// Source attributes a snapshot table must provide after mapping.
///
/// Derived columns (`contact_email`), nullable references and positional keys
/// (`production_id`) are not required.
pub fn source_required_columns(table: TableName) -> &'static [&'static str] {
    match table {
        TableName::Region => &["region_id", "name"],
        TableName::Reseller => &["reseller_id", "name"],
        TableName::Product => &["product_id", "name"],
        TableName::ProductionBatch => &["product_id", "quantity_produced", "produced_on"],
        TableName::Order | TableName::OrderLine => FEED_REQUIRED_COLUMNS,
        TableName::StockMovement => &[],
    }
}

/// Contact e-mail for a reseller: name lower-cased, all whitespace removed,
/// then `@domain`.
pub fn derive_contact_email(name: &str, domain: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    format!("{}@{}", re.replace_all(&name.to_lowercase(), ""), domain)
}

/// Fill `contact_email` on mapped reseller rows that do not carry one.
pub fn fill_contact_emails(rows: &mut [Row], domain: &str) {
    for row in rows.iter_mut() {
        let has_email = row.get("contact_email").map_or(false, |v| !v.is_null());
        if has_email {
            continue;
        }
        let email = row
            .get("name")
            .and_then(CellValue::as_text)
            .map(|name| CellValue::Text(derive_contact_email(&name, domain)))
            .unwrap_or(CellValue::Null);
        row.insert("contact_email".to_string(), email);
    }
}

/// Give production rows without a source id a positional one.
///
/// Rows are sorted on `(produced_on, product_id, quantity_produced)` (stable,
/// so exact duplicates keep source order). A row whose signature and
/// occurrence match a stored batch takes that batch's id; the others are
/// numbered after the largest stored id. Returns false when the rows already
/// carry `production_id` and nothing was changed.
pub fn assign_production_ids(rows: &mut Vec<Row>, existing: &[ProductionBatch]) -> bool {
    let has_ids = rows
        .iter()
        .any(|r| r.get("production_id").map_or(false, |v| !v.is_null()));
    if has_ids {
        return false;
    }

    type Signature = (Option<NaiveDate>, Option<i64>, Option<i64>);
    let signature = |r: &Row| -> Signature {
        (
            cell(r, "produced_on").as_date(),
            cell(r, "product_id").as_i64(),
            cell(r, "quantity_produced").as_i64(),
        )
    };

    let mut stored: HashMap<Signature, Vec<i64>> = HashMap::new();
    for batch in existing {
        stored
            .entry((Some(batch.produced_on), Some(batch.product_id), Some(batch.quantity_produced)))
            .or_default()
            .push(batch.production_id);
    }
    for ids in stored.values_mut() {
        ids.sort_unstable();
    }

    let mut next_id = existing.iter().map(|b| b.production_id).max().unwrap_or(0) + 1;
    let mut seen: HashMap<Signature, usize> = HashMap::new();

    rows.sort_by_key(|r| signature(r));
    for row in rows.iter_mut() {
        let key = signature(row);
        let occurrence = seen.entry(key).or_insert(0);
        let id = match stored.get(&key).and_then(|ids| ids.get(*occurrence)) {
            Some(id) => *id,
            None => {
                let id = next_id;
                next_id += 1;
                id
            }
        };
        *occurrence += 1;
        row.shift_insert(0, "production_id".to_string(), CellValue::Int(id));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_email_derivation() {
        assert_eq!(
            derive_contact_email("Tech Express  Lyon", "exemple.com"),
            "techexpresslyon@exemple.com"
        );
        assert_eq!(derive_contact_email("\tNord\nInfo ", "shop.fr"), "nordinfo@shop.fr");
    }

    #[test]
    fn test_fill_contact_emails_keeps_existing() {
        let mut rows = vec![
            row! { "reseller_id" => 1i64, "name" => "Tech Express" },
            row! { "reseller_id" => 2i64, "name" => "Other", "contact_email" => "sales@other.fr" },
        ];
        fill_contact_emails(&mut rows, "exemple.com");
        assert_eq!(rows[0]["contact_email"], CellValue::text("techexpress@exemple.com"));
        assert_eq!(rows[1]["contact_email"], CellValue::text("sales@other.fr"));
    }

    #[test]
    fn test_production_ids_follow_sorted_order_not_row_order() {
        let mut rows = vec![
            row! { "product_id" => "2", "quantity_produced" => "50", "produced_on" => "2024-02-01" },
            row! { "product_id" => "1", "quantity_produced" => "100", "produced_on" => "2024-01-15" },
            row! { "product_id" => "1", "quantity_produced" => "20", "produced_on" => "2024-02-01" },
        ];
        let mut shuffled = vec![rows[2].clone(), rows[0].clone(), rows[1].clone()];

        assert!(assign_production_ids(&mut rows, &[]));
        assert!(assign_production_ids(&mut shuffled, &[]));
        assert_eq!(rows, shuffled);
        assert_eq!(rows[0]["production_id"], CellValue::Int(1));
        assert_eq!(rows[0]["quantity_produced"], CellValue::text("100"));
        assert_eq!(rows[1]["product_id"], CellValue::text("1"));
        assert_eq!(rows[2]["product_id"], CellValue::text("2"));
    }

    #[test]
    fn test_production_ids_reuse_stored_batches() {
        let stored = vec![ProductionBatch {
            production_id: 1,
            product_id: 1,
            quantity_produced: 100,
            produced_on: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        }];
        // An earlier batch appears in the grown snapshot
        let mut rows = vec![
            row! { "product_id" => "1", "quantity_produced" => "100", "produced_on" => "2024-03-10" },
            row! { "product_id" => "2", "quantity_produced" => "7", "produced_on" => "2024-03-01" },
        ];

        assert!(assign_production_ids(&mut rows, &stored));
        assert_eq!(rows[0]["product_id"], CellValue::text("2"));
        assert_eq!(rows[0]["production_id"], CellValue::Int(2));
        assert_eq!(rows[1]["production_id"], CellValue::Int(1));
    }

    #[test]
    fn test_source_production_ids_are_kept() {
        let mut rows = vec![row! { "production_id" => 7i64, "product_id" => 1i64 }];
        assert!(!assign_production_ids(&mut rows, &[]));
        assert_eq!(rows[0]["production_id"], CellValue::Int(7));
    }

    #[test]
    fn test_feed_line_parsing() {
        let row = row! {
            "order_number" => "CMD-001",
            "order_date" => "2024-03-05 10:30:00",
            "reseller_id" => "3",
            "product_id" => "1",
            "quantity" => "30",
            "unit_sale_price" => "59.90",
        };
        let line = FeedLine::from_row(&row).unwrap();
        assert_eq!(line.quantity, 30);
        assert_eq!(line.unit_sale_price, Some(Decimal::new(5990, 2)));

        let mut bad = row.clone();
        bad.insert("quantity".to_string(), CellValue::text("-2"));
        assert_eq!(FeedLine::from_row(&bad).unwrap_err().0, "quantity");
    }

    #[test]
    fn test_feed_line_drops_fractional_seconds() {
        let row = row! {
            "order_number" => "CMD-001",
            "order_date" => "2024-03-05 10:00:00.500",
            "reseller_id" => "3",
            "product_id" => "1",
            "quantity" => "30",
        };
        let line = FeedLine::from_row(&row).unwrap();
        let whole = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(line.order_date, whole);
        assert_eq!(line.natural_key().order_date, whole);
    }

    #[test]
    fn test_record_round_trip_through_row() {
        let movement = StockMovement {
            movement_id: 4,
            product_id: 1,
            movement_type: MovementType::Outbound,
            signed_quantity: -30,
            occurred_on: NaiveDate::from_ymd_opt(2024, 3, 5)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap(),
            reference: "order:1".to_string(),
            production_id: None,
            order_id: Some(1),
        };
        let row = movement.to_row();
        assert_eq!(row["movement_type"], CellValue::text("OUTBOUND"));
        assert_eq!(StockMovement::from_row(&row).unwrap(), movement);
    }
}
