//! SQL Server metadata queries for schema introspection.

use crate::database::types::SqlParam;
use crate::database::QueryExecutor;
use crate::error::{IdentifierKind, NotFoundKind, ServerError, ServerResult};
use crate::security::validate_identifier;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Columns of one table. The table name is bound, never spliced.
pub const TABLE_COLUMNS_SQL: &str = r#"
SELECT
    c.TABLE_SCHEMA AS [schemaName],
    c.COLUMN_NAME AS [columnName],
    c.DATA_TYPE AS [dataType],
    c.CHARACTER_MAXIMUM_LENGTH AS [maxLength],
    c.NUMERIC_PRECISION AS [precision],
    c.NUMERIC_SCALE AS [scale],
    c.IS_NULLABLE AS [isNullable],
    c.COLUMN_DEFAULT AS [defaultValue]
FROM INFORMATION_SCHEMA.COLUMNS c
WHERE c.TABLE_NAME = @P1
ORDER BY c.TABLE_SCHEMA, c.ORDINAL_POSITION
"#;

/// One line per user table.
pub const TABLE_SUMMARY_SQL: &str = r#"
SELECT
    s.name AS [schemaName],
    t.name AS [tableName],
    (SELECT COUNT(*) FROM sys.columns c WHERE c.object_id = t.object_id) AS [columnCount],
    (SELECT SUM(p.rows) FROM sys.partitions p
        WHERE p.object_id = t.object_id AND p.index_id IN (0, 1)) AS [rowCount],
    t.create_date AS [createdAt],
    t.modify_date AS [modifiedAt]
FROM sys.tables t
INNER JOIN sys.schemas s ON t.schema_id = s.schema_id
WHERE t.is_ms_shipped = 0
ORDER BY s.name, t.name
"#;

/// Column listing for a single table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<Map<String, Value>>,
}

/// Summary of every user table.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSchema {
    pub tables: Vec<Map<String, Value>>,
}

/// Metadata queries executor.
pub struct MetadataQueries {
    executor: Arc<QueryExecutor>,
}

impl MetadataQueries {
    /// Create a new metadata queries instance.
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self { executor }
    }

    /// Describe the columns of `table`.
    pub async fn table_columns(&self, table: &str) -> ServerResult<TableSchema> {
        validate_identifier(table, IdentifierKind::Table)?;

        let result = self
            .executor
            .query(TABLE_COLUMNS_SQL, &[SqlParam::String(table.to_string())])
            .await?;

        if result.rows.is_empty() {
            return Err(ServerError::not_found(NotFoundKind::Table, table));
        }

        Ok(TableSchema {
            table: table.to_string(),
            columns: result.rows,
        })
    }

    /// Summarize all user tables.
    pub async fn table_summary(&self) -> ServerResult<DatabaseSchema> {
        let result = self.executor.query(TABLE_SUMMARY_SQL, &[]).await?;
        Ok(DatabaseSchema {
            tables: result.rows,
        })
    }
}
