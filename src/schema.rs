//! Target table catalog.
//!
//! Every table the engine writes is described here once: its columns, primary
//! key and foreign keys. Load ordering, DDL, row coercion and referential
//! validation are all derived from these definitions.

use crate::error::RowRejection;
use crate::store::Dialect;
use crate::value::{CellValue, Row};
use convert_case::{Case, Casing};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Tables of the normalized target store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableName {
    Region,
    Reseller,
    Product,
    ProductionBatch,
    Order,
    OrderLine,
    StockMovement,
}

impl TableName {
    pub const ALL: [TableName; 7] = [
        TableName::Region,
        TableName::Reseller,
        TableName::Product,
        TableName::ProductionBatch,
        TableName::Order,
        TableName::OrderLine,
        TableName::StockMovement,
    ];

    /// Name of the table in the target store
    pub fn sql_name(&self) -> &'static str {
        match self {
            TableName::Region => "regions",
            TableName::Reseller => "resellers",
            TableName::Product => "products",
            TableName::ProductionBatch => "production_batches",
            TableName::Order => "orders",
            TableName::OrderLine => "order_lines",
            TableName::StockMovement => "stock_movements",
        }
    }

    pub fn def(&self) -> &'static TableDef {
        catalog()
            .iter()
            .find(|def| def.name == *self)
            .unwrap_or_else(|| unreachable!("every table has a definition"))
    }

    /// Tables this one holds foreign keys into
    pub fn parents(&self) -> Vec<TableName> {
        let mut parents: Vec<TableName> = Vec::new();
        for fk in &self.def().foreign_keys {
            if !parents.contains(&fk.parent) {
                parents.push(fk.parent);
            }
        }
        parents
    }

    /// Tables whose committed rows this table is computed from
    pub fn derived_from(&self) -> &'static [TableName] {
        match self {
            TableName::StockMovement => &[TableName::ProductionBatch, TableName::OrderLine],
            _ => &[],
        }
    }

    /// Tables that must be loaded before this one: foreign-key parents and,
    /// for derived tables, their inputs.
    pub fn load_after(&self) -> Vec<TableName> {
        let mut deps = self.parents();
        for input in self.derived_from() {
            if !deps.contains(input) {
                deps.push(*input);
            }
        }
        deps
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

impl FromStr for TableName {
    type Err = String;

    /// Accepts the SQL name (`order_lines`) or the entity name in any casing
    /// (`OrderLine`, `order_line`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let snake = s.trim().to_case(Case::Snake);
        TableName::ALL
            .iter()
            .copied()
            .find(|t| {
                t.sql_name() == snake || format!("{:?}", t).to_case(Case::Snake) == snake
            })
            .ok_or_else(|| format!("Unknown table: {}", s))
    }
}

// Serialized as the SQL name; parsed leniently so config keys may use either form
impl Serialize for TableName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.sql_name())
    }
}

impl<'de> Deserialize<'de> for TableName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Decimal,
    Text,
    Date,
    Timestamp,
}

/// Value constraints checked before a row reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    NonNegative,
    Positive,
    OneOf(&'static [&'static str]),
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub check: Option<Check>,
}

#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub column: &'static str,
    pub parent: TableName,
    pub parent_column: &'static str,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: TableName,
    pub columns: Vec<ColumnDef>,
    pub primary_key: &'static str,
    pub foreign_keys: Vec<ForeignKey>,
}

fn col(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        nullable: false,
        check: None,
    }
}

fn nullable(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        nullable: true,
        check: None,
    }
}

fn checked(name: &'static str, ty: ColumnType, check: Check) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        nullable: false,
        check: Some(check),
    }
}

fn fk(column: &'static str, parent: TableName, parent_column: &'static str) -> ForeignKey {
    ForeignKey {
        column,
        parent,
        parent_column,
    }
}

pub const MOVEMENT_TYPES: &[&str] = &["INBOUND", "OUTBOUND"];

/// All table definitions, parents first.
pub fn catalog() -> &'static [TableDef] {
    static CATALOG: OnceLock<Vec<TableDef>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        use ColumnType::*;
        vec![
            TableDef {
                name: TableName::Region,
                columns: vec![col("region_id", Int), col("name", Text)],
                primary_key: "region_id",
                foreign_keys: vec![],
            },
            TableDef {
                name: TableName::Reseller,
                columns: vec![
                    col("reseller_id", Int),
                    col("name", Text),
                    nullable("region_id", Int),
                    nullable("contact_email", Text),
                ],
                primary_key: "reseller_id",
                foreign_keys: vec![fk("region_id", TableName::Region, "region_id")],
            },
            TableDef {
                name: TableName::Product,
                columns: vec![
                    col("product_id", Int),
                    col("name", Text),
                    nullable("unit_cost", Decimal),
                ],
                primary_key: "product_id",
                foreign_keys: vec![],
            },
            TableDef {
                name: TableName::ProductionBatch,
                columns: vec![
                    col("production_id", Int),
                    col("product_id", Int),
                    checked("quantity_produced", Int, Check::NonNegative),
                    col("produced_on", Date),
                ],
                primary_key: "production_id",
                foreign_keys: vec![fk("product_id", TableName::Product, "product_id")],
            },
            TableDef {
                name: TableName::Order,
                columns: vec![
                    col("order_id", Int),
                    col("order_number", Text),
                    col("order_date", Timestamp),
                    col("reseller_id", Int),
                ],
                primary_key: "order_id",
                foreign_keys: vec![fk("reseller_id", TableName::Reseller, "reseller_id")],
            },
            TableDef {
                name: TableName::OrderLine,
                columns: vec![
                    col("line_id", Int),
                    col("order_id", Int),
                    col("product_id", Int),
                    checked("quantity", Int, Check::Positive),
                    nullable("unit_sale_price", Decimal),
                ],
                primary_key: "line_id",
                foreign_keys: vec![
                    fk("order_id", TableName::Order, "order_id"),
                    fk("product_id", TableName::Product, "product_id"),
                ],
            },
            TableDef {
                name: TableName::StockMovement,
                columns: vec![
                    col("movement_id", Int),
                    col("product_id", Int),
                    checked("movement_type", Text, Check::OneOf(MOVEMENT_TYPES)),
                    col("signed_quantity", Int),
                    col("occurred_on", Timestamp),
                    col("reference", Text),
                    nullable("production_id", Int),
                    nullable("order_id", Int),
                ],
                primary_key: "movement_id",
                foreign_keys: vec![
                    fk("product_id", TableName::Product, "product_id"),
                    fk("production_id", TableName::ProductionBatch, "production_id"),
                    fk("order_id", TableName::Order, "order_id"),
                ],
            },
        ]
    })
}

/// True for plain SQL identifiers (letters, digits, underscore).
pub fn is_safe_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("static regex"))
        .is_match(name)
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Columns that must be non-null in every row
    pub fn required_columns(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|c| !c.nullable)
            .map(|c| c.name)
            .collect()
    }

    /// Convert a row to the declared column order, types and constraints.
    ///
    /// `index` is the row's position in its batch and ends up in the
    /// rejection so the caller can point at the offending source row.
    pub fn coerce(&self, row: &Row, index: usize) -> Result<Row, RowRejection> {
        let mut out = Row::with_capacity(self.columns.len());
        for column in &self.columns {
            let raw = row.get(column.name).cloned().unwrap_or(CellValue::Null);
            let value = column.coerce(&raw).map_err(|reason| RowRejection {
                row: index,
                column: column.name.to_string(),
                reason,
            })?;
            out.insert(column.name.to_string(), value);
        }
        Ok(out)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for the given dialect
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut line = format!("{} {}", dialect.quote_ident(c.name), dialect.column_type(c.ty));
                if !c.nullable {
                    line.push_str(" NOT NULL");
                }
                line
            })
            .collect();
        lines.push(format!("PRIMARY KEY ({})", dialect.quote_ident(self.primary_key)));
        for fk in &self.foreign_keys {
            lines.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                dialect.quote_ident(fk.column),
                dialect.quote_ident(fk.parent.sql_name()),
                dialect.quote_ident(fk.parent_column)
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            dialect.quote_ident(self.name.sql_name()),
            lines.join(",\n    ")
        )
    }
}

impl ColumnDef {
    /// Convert one value to this column's type and check its constraint.
    pub fn coerce(&self, raw: &CellValue) -> Result<CellValue, String> {
        coerce_cell(self, raw)
    }
}

fn coerce_cell(column: &ColumnDef, raw: &CellValue) -> Result<CellValue, String> {
    if raw.is_null() {
        return if column.nullable {
            Ok(CellValue::Null)
        } else {
            Err("missing value".to_string())
        };
    }

    let value = match column.ty {
        ColumnType::Int => raw.as_i64().map(CellValue::Int),
        ColumnType::Decimal => raw.as_decimal().map(CellValue::Decimal),
        ColumnType::Text => raw.as_text().map(CellValue::Text),
        ColumnType::Date => raw.as_date().map(CellValue::Date),
        ColumnType::Timestamp => raw.as_timestamp().map(CellValue::Timestamp),
    }
    .ok_or_else(|| format!("cannot read '{}' as {:?}", raw, column.ty))?;

    match column.check {
        Some(Check::NonNegative) if value.as_i64().map_or(false, |v| v < 0) => {
            Err(format!("{} must not be negative", value))
        }
        Some(Check::Positive) if value.as_i64().map_or(false, |v| v <= 0) => {
            Err(format!("{} must be positive", value))
        }
        Some(Check::OneOf(allowed))
            if !allowed.iter().any(|a| Some(a.to_string()) == value.as_text()) =>
        {
            Err(format!("'{}' is not one of {:?}", value, allowed))
        }
        _ => Ok(value),
    }
}
