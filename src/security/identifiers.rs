//! SQL Server identifier checking and quoting.
//!
//! Table and column names arrive from the client as free text. They are
//! matched against a strict pattern first and only then wrapped in
//! SQL Server bracket notation `[identifier]`.

use crate::error::{IdentifierKind, ServerError, ServerResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length for SQL Server identifiers.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .unwrap_or_else(|e| panic!("Internal error: invalid identifier pattern: {}", e))
});

/// Check an identifier against `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn validate_identifier(identifier: &str, kind: IdentifierKind) -> ServerResult<()> {
    if identifier.len() > MAX_IDENTIFIER_LENGTH || !IDENTIFIER_PATTERN.is_match(identifier) {
        return Err(ServerError::invalid_identifier(kind, identifier));
    }
    Ok(())
}

/// Wrap an identifier in brackets, doubling any embedded `]`.
///
/// ```
/// use mssql_crud_mcp::security::escape_identifier;
///
/// assert_eq!(escape_identifier("Users"), "[Users]");
/// assert_eq!(escape_identifier("a]b"), "[a]]b]");
/// ```
pub fn escape_identifier(identifier: &str) -> String {
    format!("[{}]", identifier.replace(']', "]]"))
}

/// Validate and bracket-quote an identifier in one step.
pub fn safe_identifier(identifier: &str, kind: IdentifierKind) -> ServerResult<String> {
    validate_identifier(identifier, kind)?;
    Ok(escape_identifier(identifier))
}

/// Validate a table name.
pub fn safe_table(table: &str) -> ServerResult<String> {
    safe_identifier(table, IdentifierKind::Table)
}

/// Validate a column name.
pub fn safe_column(column: &str) -> ServerResult<String> {
    safe_identifier(column, IdentifierKind::Column)
}
