//! Parameterized statement builders for the data tools.
//!
//! Every identifier goes through [`crate::security`] before it is spliced
//! into SQL text. Every value becomes a bound `@Pn` parameter.

use super::types::SqlParam;
use crate::error::{ServerError, ServerResult};
use crate::security::{safe_column, safe_table};
use serde_json::{Map, Value};

/// SQL text plus its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlStatement {
    fn push_param(&mut self, value: &Value) -> String {
        self.params.push(SqlParam::from_json(value));
        format!("@P{}", self.params.len())
    }

    /// Append `WHERE a = @Pn AND b IS NULL ...`.
    fn push_where(&mut self, filter: &Map<String, Value>) -> ServerResult<()> {
        let mut clauses = Vec::with_capacity(filter.len());
        for (column, value) in filter {
            let col = safe_column(column)?;
            if value.is_null() {
                clauses.push(format!("{} IS NULL", col));
            } else {
                let placeholder = self.push_param(value);
                clauses.push(format!("{} = {}", col, placeholder));
            }
        }
        self.sql.push_str(" WHERE ");
        self.sql.push_str(&clauses.join(" AND "));
        Ok(())
    }
}

fn require_non_empty(map: &Map<String, Value>, field: &str) -> ServerResult<()> {
    if map.is_empty() {
        return Err(ServerError::invalid_input(format!(
            "'{}' must contain at least one column",
            field
        )));
    }
    Ok(())
}

/// `INSERT INTO [t] ([a], [b]) VALUES (@P1, @P2)`
pub fn build_insert(table: &str, data: &Map<String, Value>) -> ServerResult<SqlStatement> {
    let table = safe_table(table)?;
    require_non_empty(data, "data")?;

    let mut stmt = SqlStatement {
        sql: String::new(),
        params: Vec::with_capacity(data.len()),
    };
    let mut columns = Vec::with_capacity(data.len());
    let mut placeholders = Vec::with_capacity(data.len());
    for (column, value) in data {
        columns.push(safe_column(column)?);
        placeholders.push(stmt.push_param(value));
    }

    stmt.sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok(stmt)
}

/// `UPDATE [t] SET [a] = @P1 WHERE [id] = @P2`
pub fn build_update(
    table: &str,
    data: &Map<String, Value>,
    filter: &Map<String, Value>,
) -> ServerResult<SqlStatement> {
    let table = safe_table(table)?;
    require_non_empty(data, "data")?;
    require_non_empty(filter, "where")?;

    let mut stmt = SqlStatement {
        sql: String::new(),
        params: Vec::with_capacity(data.len() + filter.len()),
    };
    let mut assignments = Vec::with_capacity(data.len());
    for (column, value) in data {
        let col = safe_column(column)?;
        let placeholder = stmt.push_param(value);
        assignments.push(format!("{} = {}", col, placeholder));
    }

    stmt.sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
    stmt.push_where(filter)?;
    Ok(stmt)
}

/// `DELETE FROM [t] WHERE [id] = @P1`
pub fn build_delete(table: &str, filter: &Map<String, Value>) -> ServerResult<SqlStatement> {
    let table = safe_table(table)?;
    require_non_empty(filter, "where")?;

    let mut stmt = SqlStatement {
        sql: format!("DELETE FROM {}", table),
        params: Vec::with_capacity(filter.len()),
    };
    stmt.push_where(filter)?;
    Ok(stmt)
}
