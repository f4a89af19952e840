//! Query execution and result handling.

use crate::constants::LOG_QUERY_TRUNCATE_LENGTH;
use crate::database::statements::SqlStatement;
use crate::database::types::{SqlParam, TypeMapper};
use crate::database::{ConnectionManager, RawConnection};
use crate::error::ServerResult;
use futures_util::stream::TryStreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Result of a SELECT.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Rows as column-name keyed objects.
    pub rows: Vec<Map<String, Value>>,

    /// Number of rows returned.
    pub row_count: usize,

    /// Whether rows were dropped because of the row cap.
    pub truncated: bool,

    /// Execution time in milliseconds.
    #[serde(skip)]
    pub execution_time_ms: u64,
}

/// Runs statements on connections checked out of the shared pool.
pub struct QueryExecutor {
    connections: Arc<ConnectionManager>,
    max_rows: usize,
}

impl QueryExecutor {
    /// Create a new query executor.
    pub fn new(connections: Arc<ConnectionManager>, max_rows: usize) -> Self {
        Self {
            connections,
            max_rows,
        }
    }

    /// Run a row-returning statement, keeping at most `max_rows` rows.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> ServerResult<QueryResult> {
        let start = Instant::now();
        debug!("Executing query: {}", truncate_for_log(sql, LOG_QUERY_TRUNCATE_LENGTH));

        let mut conn = self.connections.acquire().await?;
        let result = run_query(conn.begin(), sql, params, self.max_rows).await;
        let mut result = conn.finish(result)?;
        result.execution_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            "Query completed: {} rows in {} ms",
            result.row_count, result.execution_time_ms
        );
        Ok(result)
    }

    /// Run a data-modifying statement and return the affected row count.
    pub async fn execute(&self, stmt: &SqlStatement) -> ServerResult<u64> {
        debug!("Executing statement: {}", truncate_for_log(&stmt.sql, LOG_QUERY_TRUNCATE_LENGTH));

        let mut conn = self.connections.acquire().await?;
        let result = run_execute(conn.begin(), stmt).await;
        let rows_affected = conn.finish(result)?;

        debug!("Statement completed: {} rows affected", rows_affected);
        Ok(rows_affected)
    }
}

async fn run_query(
    conn: &mut RawConnection,
    sql: &str,
    params: &[SqlParam],
    max_rows: usize,
) -> ServerResult<QueryResult> {
    let mut query = tiberius::Query::new(sql);
    for param in params {
        param.bind_to(&mut query);
    }

    let mut stream = query.query(conn).await?;
    let mut result = QueryResult::default();

    while let Some(item) = stream.try_next().await? {
        if let tiberius::QueryItem::Row(row) = item {
            // Only the first result set is returned.
            if row.result_index() > 0 {
                continue;
            }
            if result.rows.len() >= max_rows {
                result.truncated = true;
                continue;
            }
            result.rows.push(TypeMapper::row_to_json(&row));
        }
    }

    result.row_count = result.rows.len();
    Ok(result)
}

async fn run_execute(conn: &mut RawConnection, stmt: &SqlStatement) -> ServerResult<u64> {
    let mut query = tiberius::Query::new(stmt.sql.as_str());
    for param in &stmt.params {
        param.bind_to(&mut query);
    }
    let result = query.execute(conn).await?;
    Ok(result.rows_affected().iter().sum())
}

/// Truncate a string for logging purposes.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::error::ServerError;

    #[test]
    fn test_query_result_wire_shape() {
        let mut row = Map::new();
        row.insert("id".into(), Value::from(1));
        let result = QueryResult {
            rows: vec![row],
            row_count: 1,
            truncated: false,
            execution_time_ms: 3,
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["rowCount"], 1);
        assert_eq!(v["rows"][0]["id"], 1);
        assert!(v.get("executionTimeMs").is_none());
    }

    #[tokio::test]
    async fn test_executor_requires_connection() {
        let manager = Arc::new(ConnectionManager::new(DatabaseConfig::default()));
        let executor = QueryExecutor::new(manager, 10);
        assert!(matches!(
            executor.query("SELECT 1", &[]).await,
            Err(ServerError::NotConnected)
        ));
        let stmt = SqlStatement {
            sql: "DELETE FROM [t] WHERE [id] = @P1".into(),
            params: vec![SqlParam::I64(1)],
        };
        assert!(matches!(
            executor.execute(&stmt).await,
            Err(ServerError::NotConnected)
        ));
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("this is a long string", 10), "this is a ...");
        assert_eq!(truncate_for_log("ééééé", 2), "éé...");
    }
}
