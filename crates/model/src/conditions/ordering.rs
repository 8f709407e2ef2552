//! ORDER BY specification

use std::fmt;

use serde_json::Value;

use crate::dialect::SqlDialect;
use crate::error::{ModelError, ModelResult};
use crate::security::quote;

/// Order by direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Ordered list of sort keys. Order is significant and preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SortSpec {
    keys: Vec<(String, SortDirection)>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sort key, replacing an earlier key on the same field
    pub fn push(&mut self, field: impl Into<String>, direction: SortDirection) {
        let field = field.into();
        self.keys.retain(|(f, _)| *f != field);
        self.keys.push((field, direction));
    }

    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.push(field, SortDirection::Asc);
        self
    }

    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.push(field, SortDirection::Desc);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[(String, SortDirection)] {
        &self.keys
    }

    /// ` ORDER BY ..` with quoted columns, or an empty string
    pub fn to_sql(&self, dialect: SqlDialect) -> ModelResult<String> {
        if self.keys.is_empty() {
            return Ok(String::new());
        }
        let parts = self
            .keys
            .iter()
            .map(|(field, dir)| Ok(format!("{} {}", quote(dialect, field)?, dir)))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(format!(" ORDER BY {}", parts.join(", ")))
    }

    pub fn signature(&self) -> String {
        self.keys
            .iter()
            .map(|(field, dir)| format!("{}:{}", field, dir))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse `{"field": 1 | -1 | "asc" | "desc", ...}`
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| ModelError::Query("Sort spec must be an object".to_string()))?;
        let mut spec = SortSpec::new();
        for (field, dir) in map {
            let direction = match dir {
                Value::Number(n) if n.as_i64() == Some(1) => SortDirection::Asc,
                Value::Number(n) if n.as_i64() == Some(-1) => SortDirection::Desc,
                Value::String(s) if s.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                Value::String(s) if s.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                other => {
                    return Err(ModelError::Query(format!(
                        "Invalid sort direction {} for '{}'",
                        other, field
                    )))
                }
            };
            spec.push(field.clone(), direction);
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_by_is_quoted() {
        let spec = SortSpec::new().desc("createdAt").asc("name");
        assert_eq!(spec.to_sql(SqlDialect::MySQL).unwrap(), " ORDER BY `createdAt` DESC, `name` ASC");
        assert_eq!(spec.to_sql(SqlDialect::SQLite).unwrap(), " ORDER BY createdAt DESC, name ASC");
        assert_eq!(SortSpec::new().to_sql(SqlDialect::SQLite).unwrap(), "");
    }

    #[test]
    fn test_order_is_significant() {
        let a = SortSpec::new().asc("a").asc("b");
        let b = SortSpec::new().asc("b").asc("a");
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn test_from_json() {
        let spec = SortSpec::from_json(&json!({"age": -1})).unwrap();
        assert_eq!(spec.keys(), &[("age".to_string(), SortDirection::Desc)]);
        assert!(SortSpec::from_json(&json!({"age": 2})).is_err());
        assert!(SortSpec::new().asc("bad field").to_sql(SqlDialect::SQLite).is_err());
    }
}
