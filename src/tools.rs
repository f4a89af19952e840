//! MCP tools for SQL Server CRUD operations.
//!
//! - `connection`: open, close or inspect the shared connection pool
//! - `query`: run a read-only SELECT with positional parameters
//! - `create`: insert one row
//! - `update`: update rows matching an equality filter
//! - `delete`: delete rows matching an equality filter
//! - `readSchema`: describe one table or summarize all of them
//!
//! Tool failures are reported inside the result with `isError: true`.
//! Only failures that are not tool-level (see
//! [`ServerError::is_tool_error`]) escape as JSON-RPC errors.

mod inputs;

pub use inputs::*;

use crate::config::Config;
use crate::database::{
    build_delete, build_insert, build_update, ConnectionManager, MetadataQueries, QueryExecutor,
    SqlParam, SqlStatement,
};
use crate::error::{NotFoundKind, ServerError, ServerResult};
use crate::protocol::{CallToolResult, Tool};
use crate::security::{rewrite_positional_placeholders, QueryValidator};
use crate::telemetry::{QueryTimer, SharedMetrics};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const TOOL_CONNECTION: &str = "connection";
pub const TOOL_QUERY: &str = "query";
pub const TOOL_CREATE: &str = "create";
pub const TOOL_UPDATE: &str = "update";
pub const TOOL_DELETE: &str = "delete";
pub const TOOL_READ_SCHEMA: &str = "readSchema";

static TOOL_CATALOG: Lazy<Vec<Tool>> = Lazy::new(|| {
    vec![
        Tool {
            name: TOOL_CONNECTION.to_string(),
            description: "Manage the database connection: connect, disconnect, or report status."
                .to_string(),
            input_schema: input_schema::<ConnectionInput>(),
        },
        Tool {
            name: TOOL_QUERY.to_string(),
            description: "Run a read-only SELECT query. Use ? placeholders with params for values."
                .to_string(),
            input_schema: input_schema::<QueryInput>(),
        },
        Tool {
            name: TOOL_CREATE.to_string(),
            description: "Insert a row into a table.".to_string(),
            input_schema: input_schema::<CreateInput>(),
        },
        Tool {
            name: TOOL_UPDATE.to_string(),
            description: "Update rows in a table that match every column in 'where'.".to_string(),
            input_schema: input_schema::<UpdateInput>(),
        },
        Tool {
            name: TOOL_DELETE.to_string(),
            description: "Delete rows from a table that match every column in 'where'."
                .to_string(),
            input_schema: input_schema::<DeleteInput>(),
        },
        Tool {
            name: TOOL_READ_SCHEMA.to_string(),
            description:
                "Describe the columns of a table, or list all tables when no table is given."
                    .to_string(),
            input_schema: input_schema::<ReadSchemaInput>(),
        },
    ]
});

/// Static tool descriptors.
pub fn list_tools() -> Vec<Tool> {
    TOOL_CATALOG.clone()
}

/// Routes `tools/call` to the tool implementations.
pub struct ToolDispatcher {
    connections: Arc<ConnectionManager>,
    executor: Arc<QueryExecutor>,
    metadata: MetadataQueries,
    validator: QueryValidator,
    metrics: SharedMetrics,
}

impl ToolDispatcher {
    /// Create a dispatcher with a disconnected connection manager.
    pub fn new(config: &Config, metrics: SharedMetrics) -> Self {
        let connections = Arc::new(ConnectionManager::new(config.database.clone()));
        let executor = Arc::new(QueryExecutor::new(
            Arc::clone(&connections),
            config.query.max_result_rows,
        ));
        Self {
            metadata: MetadataQueries::new(Arc::clone(&executor)),
            validator: QueryValidator::new(config.query.max_query_length),
            connections,
            executor,
            metrics,
        }
    }

    /// The shared connection manager.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Run a tool. Tool-level failures come back as `isError` results.
    pub async fn call(&self, name: &str, arguments: Option<Value>) -> ServerResult<CallToolResult> {
        let outcome = self.dispatch(name, arguments).await;
        let result = match outcome {
            Ok(value) => CallToolResult::text(serde_json::to_string_pretty(&value)?),
            Err(e) if e.is_tool_error() => {
                debug!(
                    tool = name,
                    error = %e,
                    suggestion = e.suggestion().unwrap_or_default(),
                    "Tool returned an error result"
                );
                CallToolResult::error(e.to_string())
            }
            Err(e) => return Err(e),
        };
        self.metrics.record_tool_call(result.is_error);
        Ok(result)
    }

    async fn dispatch(&self, name: &str, arguments: Option<Value>) -> ServerResult<Value> {
        match name {
            TOOL_CONNECTION => self.connection(parse_args(arguments)?).await,
            TOOL_QUERY => self.query(parse_args(arguments)?).await,
            TOOL_CREATE => self.create(parse_args(arguments)?).await,
            TOOL_UPDATE => self.update(parse_args(arguments)?).await,
            TOOL_DELETE => self.delete(parse_args(arguments)?).await,
            TOOL_READ_SCHEMA => self.read_schema(parse_args(arguments)?).await,
            other => Err(ServerError::not_found(NotFoundKind::Tool, other)),
        }
    }

    async fn connection(&self, input: ConnectionInput) -> ServerResult<Value> {
        match input.action.as_str() {
            "connect" => {
                let status = self.connections.connect().await.inspect_err(|e| {
                    warn!("Connect failed: {}", e);
                })?;
                Ok(json!({
                    "success": true,
                    "message": format!("Connected to {}:{}", status.host, status.port),
                    "status": status,
                }))
            }
            "disconnect" => {
                let was_connected = self.connections.disconnect().await;
                let message = if was_connected {
                    "Disconnected."
                } else {
                    "Not connected."
                };
                Ok(json!({ "success": true, "message": message }))
            }
            "status" => {
                let status = self.connections.status().await;
                Ok(json!({
                    "status": status,
                    "metrics": self.metrics.snapshot(),
                }))
            }
            other => Err(ServerError::unsupported(format!("Unknown action: {}", other))),
        }
    }

    async fn query(&self, input: QueryInput) -> ServerResult<Value> {
        self.validator.validate_select(&input.sql)?;

        let (sql, markers) = rewrite_positional_placeholders(&input.sql);
        let params: Vec<SqlParam> = input
            .params
            .unwrap_or_default()
            .iter()
            .map(SqlParam::from_json)
            .collect();
        if markers != params.len() {
            return Err(ServerError::invalid_input(format!(
                "Query has {} placeholder(s) but {} parameter(s) were supplied",
                markers,
                params.len()
            )));
        }

        let timer = QueryTimer::start(Arc::clone(&self.metrics));
        let result = self.executor.query(&sql, &params).await;
        timer.stop(result.is_ok());
        let result = result?;

        if result.truncated {
            info!("Query result truncated to {} rows", result.row_count);
        }
        Ok(serde_json::to_value(result)?)
    }

    async fn create(&self, input: CreateInput) -> ServerResult<Value> {
        let stmt = build_insert(&input.table, &input.data)?;
        let affected = self.execute(&stmt).await?;
        Ok(json!({ "success": true, "affectedRows": affected }))
    }

    async fn update(&self, input: UpdateInput) -> ServerResult<Value> {
        let stmt = build_update(&input.table, &input.data, &input.filter)?;
        let affected = self.execute(&stmt).await?;
        Ok(json!({ "success": true, "affectedRows": affected }))
    }

    async fn delete(&self, input: DeleteInput) -> ServerResult<Value> {
        let stmt = build_delete(&input.table, &input.filter)?;
        let affected = self.execute(&stmt).await?;
        Ok(json!({ "success": true, "affectedRows": affected }))
    }

    async fn read_schema(&self, input: ReadSchemaInput) -> ServerResult<Value> {
        match input.table.as_deref().map(str::trim) {
            Some(table) if !table.is_empty() => {
                Ok(serde_json::to_value(self.metadata.table_columns(table).await?)?)
            }
            _ => Ok(serde_json::to_value(self.metadata.table_summary().await?)?),
        }
    }

    async fn execute(&self, stmt: &SqlStatement) -> ServerResult<u64> {
        let timer = QueryTimer::start(Arc::clone(&self.metrics));
        let result = self.executor.execute(stmt).await;
        timer.stop(result.is_ok());
        result
    }
}

/// Decode tool arguments; absent arguments decode as an empty object.
fn parse_args<T: DeserializeOwned>(arguments: Option<Value>) -> ServerResult<T> {
    let value = match arguments {
        None | Some(Value::Null) => json!({}),
        Some(v) => v,
    };
    serde_json::from_value(value).map_err(|e| ServerError::invalid_input(e.to_string()))
}
