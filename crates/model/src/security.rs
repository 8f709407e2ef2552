//! Identifier safety checks
//!
//! Values always travel as bound parameters. Identifiers (tables, columns)
//! cannot, so every one is checked here before it is spliced into SQL.

use crate::dialect::SqlDialect;
use crate::error::{ModelError, ModelResult};

/// Statement keywords that are never accepted as bare identifiers
static STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "FROM", "WHERE", "JOIN", "UNION", "DROP", "CREATE",
    "ALTER", "GRANT", "REVOKE", "TRUNCATE", "EXEC", "EXECUTE",
];

/// Longest identifier accepted (PostgreSQL limit)
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate that an identifier is safe for use in SQL
pub fn validate_identifier(identifier: &str) -> ModelResult<()> {
    let first = identifier
        .chars()
        .next()
        .ok_or_else(|| ModelError::Query("Identifier cannot be empty".to_string()))?;

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(ModelError::Query(format!(
            "Identifier '{}' is too long (max {} characters)",
            identifier, MAX_IDENTIFIER_LEN
        )));
    }

    if let Some(c) = identifier.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(ModelError::Query(format!(
            "Identifier '{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    if first.is_ascii_digit() {
        return Err(ModelError::Query(format!(
            "Identifier '{}' cannot start with a number",
            identifier
        )));
    }

    if STATEMENT_KEYWORDS.contains(&identifier.to_ascii_uppercase().as_str()) {
        return Err(ModelError::Query(format!(
            "Identifier '{}' is a reserved SQL keyword",
            identifier
        )));
    }

    Ok(())
}

/// Validate and quote an identifier for the given dialect
pub fn quote(dialect: SqlDialect, identifier: &str) -> ModelResult<String> {
    validate_identifier(identifier)?;
    Ok(dialect.quote_identifier(identifier))
}
