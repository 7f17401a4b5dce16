//! SQL dialect differences between the supported backends.

use crate::schema::ColumnType;
use crate::value::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Mysql,
    Sqlite,
}

impl Dialect {
    /// Dialect of the backend compiled in, with the same precedence as the
    /// connection type: postgres, then mysql, then sqlite.
    pub fn current() -> Self {
        if cfg!(feature = "postgres") {
            Dialect::Postgres
        } else if cfg!(feature = "mysql") {
            Dialect::Mysql
        } else {
            Dialect::Sqlite
        }
    }

    /// Guess the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Dialect::Postgres)
        } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Some(Dialect::Mysql)
        } else if url.starts_with("sqlite://")
            || url.starts_with("file:")
            || url == ":memory:"
            || url.ends_with(".sqlite")
            || url.ends_with(".db")
        {
            Some(Dialect::Sqlite)
        } else {
            None
        }
    }

    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    pub fn column_type(&self, ty: ColumnType) -> &'static str {
        match (self, ty) {
            (Dialect::Sqlite, ColumnType::Int) => "INTEGER",
            (_, ColumnType::Int) => "BIGINT",
            (Dialect::Mysql, ColumnType::Decimal) => "DECIMAL(12,2)",
            (Dialect::Postgres, ColumnType::Decimal) => "NUMERIC(12,2)",
            (Dialect::Sqlite, ColumnType::Decimal) => "NUMERIC",
            (Dialect::Mysql, ColumnType::Text) => "VARCHAR(255)",
            (_, ColumnType::Text) => "TEXT",
            (Dialect::Sqlite, ColumnType::Date) => "TEXT",
            (_, ColumnType::Date) => "DATE",
            (Dialect::Postgres, ColumnType::Timestamp) => "TIMESTAMP",
            (Dialect::Mysql, ColumnType::Timestamp) => "DATETIME",
            (Dialect::Sqlite, ColumnType::Timestamp) => "TEXT",
        }
    }

    /// Render a value as an SQL literal
    pub fn literal(&self, value: &CellValue) -> String {
        match value {
            CellValue::Null => "NULL".to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Decimal(d) => d.to_string(),
            CellValue::Date(_) | CellValue::Timestamp(_) | CellValue::Text(_) => {
                self.quote_str(&value.to_string())
            }
        }
    }

    fn quote_str(&self, raw: &str) -> String {
        let escaped = raw.replace('\'', "''");
        match self {
            // MySQL treats backslash as an escape character inside literals
            Dialect::Mysql => format!("'{}'", escaped.replace('\\', "\\\\")),
            Dialect::Postgres | Dialect::Sqlite => format!("'{}'", escaped),
        }
    }

    /// Expression that renders a row as JSON text, aliased `doc`.
    pub fn json_row_expr(&self, columns: &[&str]) -> String {
        let pairs: Vec<String> = columns
            .iter()
            .map(|c| format!("'{}', {}", c, self.quote_ident(c)))
            .collect();
        match self {
            Dialect::Postgres => format!("json_build_object({})::text AS doc", pairs.join(", ")),
            Dialect::Mysql => format!("CAST(JSON_OBJECT({}) AS CHAR) AS doc", pairs.join(", ")),
            Dialect::Sqlite => format!("json_object({}) AS doc", pairs.join(", ")),
        }
    }

    /// Session statement toggling foreign-key enforcement.
    pub fn foreign_keys_sql(&self, enforce: bool) -> &'static str {
        match (self, enforce) {
            (Dialect::Mysql, true) => "SET FOREIGN_KEY_CHECKS = 1",
            (Dialect::Mysql, false) => "SET FOREIGN_KEY_CHECKS = 0",
            (Dialect::Postgres, true) => "SET session_replication_role = origin",
            (Dialect::Postgres, false) => "SET session_replication_role = replica",
            (Dialect::Sqlite, true) => "PRAGMA foreign_keys = ON",
            (Dialect::Sqlite, false) => "PRAGMA foreign_keys = OFF",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_quote_ident_per_dialect() {
        assert_eq!(Dialect::Mysql.quote_ident("orders"), "`orders`");
        assert_eq!(Dialect::Postgres.quote_ident("orders"), "\"orders\"");
    }

    #[test]
    fn test_literal_escaping() {
        let value = CellValue::Text("O'Brien \\ Co".to_string());
        assert_eq!(Dialect::Postgres.literal(&value), "'O''Brien \\ Co'");
        assert_eq!(Dialect::Mysql.literal(&value), "'O''Brien \\\\ Co'");
        assert_eq!(Dialect::Sqlite.literal(&CellValue::Null), "NULL");
        assert_eq!(
            Dialect::Sqlite.literal(&CellValue::Decimal(Decimal::new(1999, 2))),
            "19.99"
        );
    }

    #[test]
    fn test_from_url() {
        assert_eq!(Dialect::from_url("mysql://u:p@localhost:3307/db"), Some(Dialect::Mysql));
        assert_eq!(Dialect::from_url("postgres://localhost/db"), Some(Dialect::Postgres));
        assert_eq!(Dialect::from_url("./data/target.sqlite"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_url("redis://x"), None);
    }

    #[test]
    fn test_json_row_expr() {
        let expr = Dialect::Sqlite.json_row_expr(&["region_id", "name"]);
        assert_eq!(expr, "json_object('region_id', \"region_id\", 'name', \"name\") AS doc");
    }
}
