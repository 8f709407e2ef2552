//! Per-backend SQL facts
//!
//! Every write path consults [`SqlDialect`] for identifier quoting, placeholder
//! style, RETURNING support, literal encoding and insert-id resolution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::backends::DatabaseValue;
use crate::error::ModelError;

/// Date literal format shared by all three dialects (second precision)
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

/// Where a freshly inserted row's primary key may come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertIdSource {
    /// `insert_id` reported by the adapter
    Reported,
    /// primary key column of the first returned row
    ReturnedRow,
    /// `SELECT last_insert_rowid()`
    LastInsertRowid,
}

/// Native single-statement upsert flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// `INSERT ... ON CONFLICT (..) DO UPDATE SET ..`
    OnConflict,
    /// `INSERT ... ON DUPLICATE KEY UPDATE ..`
    OnDuplicateKey,
}

impl SqlDialect {
    /// Get the parameter placeholder for a zero based parameter index
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Quote an identifier. SQLite identifiers are emitted bare.
    pub fn quote_identifier(&self, identifier: &str) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("\"{}\"", identifier.replace('"', "\"\"")),
            SqlDialect::MySQL => format!("`{}`", identifier.replace('`', "``")),
            SqlDialect::SQLite => identifier.to_string(),
        }
    }

    /// Whether `INSERT/UPDATE/DELETE ... RETURNING` is available
    pub fn supports_returning(&self) -> bool {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => true,
            SqlDialect::MySQL => false,
        }
    }

    /// Check if booleans are passed to the driver natively
    pub fn supports_boolean(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }

    /// Check if JSON values are passed to the driver natively
    pub fn supports_json(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }

    pub fn encode_bool(&self, value: bool) -> DatabaseValue {
        if self.supports_boolean() {
            DatabaseValue::Bool(value)
        } else {
            DatabaseValue::Int64(i64::from(value))
        }
    }

    pub fn encode_datetime(&self, value: &DateTime<Utc>) -> DatabaseValue {
        DatabaseValue::String(format_datetime(value))
    }

    /// Ordered list of insert-id sources to try after a plain INSERT
    pub fn insert_id_sources(&self) -> &'static [InsertIdSource] {
        match self {
            SqlDialect::SQLite => &[
                InsertIdSource::Reported,
                InsertIdSource::ReturnedRow,
                InsertIdSource::LastInsertRowid,
            ],
            SqlDialect::PostgreSQL | SqlDialect::MySQL => {
                &[InsertIdSource::Reported, InsertIdSource::ReturnedRow]
            }
        }
    }

    pub fn upsert_style(&self) -> UpsertStyle {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => UpsertStyle::OnConflict,
            SqlDialect::MySQL => UpsertStyle::OnDuplicateKey,
        }
    }

    /// Render LIMIT/OFFSET. OFFSET without LIMIT needs a sentinel limit on
    /// MySQL and SQLite.
    pub fn limit_offset(&self, limit: Option<u64>, skip: Option<u64>) -> String {
        match (limit, skip.filter(|s| *s > 0)) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (Some(limit), Some(skip)) => format!(" LIMIT {} OFFSET {}", limit, skip),
            (None, Some(skip)) => match self {
                SqlDialect::PostgreSQL => format!(" OFFSET {}", skip),
                SqlDialect::MySQL => format!(" LIMIT 18446744073709551615 OFFSET {}", skip),
                SqlDialect::SQLite => format!(" LIMIT -1 OFFSET {}", skip),
            },
        }
    }

    /// Get the current timestamp function for this dialect
    pub fn current_timestamp(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "NOW()",
            SqlDialect::MySQL => "CURRENT_TIMESTAMP",
            SqlDialect::SQLite => "datetime('now')",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "postgresql",
            SqlDialect::MySQL => "mysql",
            SqlDialect::SQLite => "sqlite",
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SqlDialect {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(SqlDialect::PostgreSQL),
            "mysql" | "mariadb" => Ok(SqlDialect::MySQL),
            "sqlite" | "sqlite3" => Ok(SqlDialect::SQLite),
            other => Err(ModelError::Configuration(format!(
                "Unknown database type '{}', expected one of postgresql, mysql, sqlite",
                other
            ))),
        }
    }
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS`
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.format(DATE_FORMAT).to_string()
}

/// Parse the date shapes drivers and callers hand us: RFC 3339, the shared
/// literal format, or a bare date.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [DATE_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Positional parameter collector that hands out dialect placeholders
#[derive(Debug, Clone)]
pub struct BindParams {
    dialect: SqlDialect,
    values: Vec<DatabaseValue>,
}

impl BindParams {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Add a value and return its placeholder
    pub fn push(&mut self, value: DatabaseValue) -> String {
        let placeholder = self.dialect.parameter_placeholder(self.values.len());
        self.values.push(value);
        placeholder
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<DatabaseValue> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(SqlDialect::PostgreSQL.quote_identifier("createdAt"), "\"createdAt\"");
        assert_eq!(SqlDialect::MySQL.quote_identifier("createdAt"), "`createdAt`");
        assert_eq!(SqlDialect::SQLite.quote_identifier("createdAt"), "createdAt");
        assert_eq!(SqlDialect::PostgreSQL.quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_placeholders() {
        let mut params = BindParams::new(SqlDialect::PostgreSQL);
        assert_eq!(params.push(1i64.into()), "$1");
        assert_eq!(params.push(2i64.into()), "$2");

        let mut params = BindParams::new(SqlDialect::MySQL);
        assert_eq!(params.push(1i64.into()), "?");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_capabilities() {
        assert!(SqlDialect::PostgreSQL.supports_returning());
        assert!(SqlDialect::SQLite.supports_returning());
        assert!(!SqlDialect::MySQL.supports_returning());
        assert_eq!(SqlDialect::PostgreSQL.encode_bool(true), DatabaseValue::Bool(true));
        assert_eq!(SqlDialect::SQLite.encode_bool(true), DatabaseValue::Int64(1));
        assert_eq!(SqlDialect::MySQL.encode_bool(false), DatabaseValue::Int64(0));
        assert_eq!(SqlDialect::MySQL.upsert_style(), UpsertStyle::OnDuplicateKey);
        assert_eq!(
            SqlDialect::SQLite.insert_id_sources().last(),
            Some(&InsertIdSource::LastInsertRowid)
        );
        assert!(!SqlDialect::MySQL.insert_id_sources().contains(&InsertIdSource::LastInsertRowid));
    }

    #[test]
    fn test_date_literal() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(format_datetime(&dt), "2024-03-09 14:05:07");
        assert_eq!(parse_datetime("2024-03-09 14:05:07"), Some(dt));
        assert_eq!(parse_datetime("2024-03-09T14:05:07Z"), Some(dt));
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(SqlDialect::SQLite.limit_offset(None, None), "");
        assert_eq!(SqlDialect::SQLite.limit_offset(Some(10), Some(20)), " LIMIT 10 OFFSET 20");
        assert_eq!(SqlDialect::SQLite.limit_offset(None, Some(5)), " LIMIT -1 OFFSET 5");
        assert_eq!(SqlDialect::PostgreSQL.limit_offset(None, Some(5)), " OFFSET 5");
    }

    #[test]
    fn test_parse_dialect() {
        assert_eq!("postgres".parse::<SqlDialect>().unwrap(), SqlDialect::PostgreSQL);
        assert_eq!("SQLite".parse::<SqlDialect>().unwrap(), SqlDialect::SQLite);
        assert!("oracle".parse::<SqlDialect>().is_err());
    }
}
