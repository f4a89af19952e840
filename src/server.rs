//! MCP server definition and per-session handler factory.

use crate::config::Config;
use crate::constants::{SERVER_NAME, SERVER_VERSION};
use crate::database::ConnectionManager;
use crate::handlers::SessionHandler;
use crate::prompts::PromptCatalog;
use crate::protocol::Implementation;
use crate::telemetry::{new_shared_metrics, SharedMetrics};
use crate::tools::ToolDispatcher;
use std::sync::Arc;
use tracing::info;

/// Collaborators shared by every session handler.
pub(crate) struct ServerShared {
    pub(crate) config: Config,
    pub(crate) tools: ToolDispatcher,
    pub(crate) prompts: PromptCatalog,
    pub(crate) metrics: SharedMetrics,
}

/// The MSSQL CRUD MCP server.
///
/// Cheap to clone; all state is shared through an `Arc`. Every transport
/// obtains its per-session handlers from [`McpServer::new_handler`].
#[derive(Clone)]
pub struct McpServer {
    shared: Arc<ServerShared>,
}

impl McpServer {
    /// Create a server. No database connection is opened until a client
    /// calls the `connection` tool.
    pub fn new(config: Config) -> Self {
        let metrics = new_shared_metrics();
        let tools = ToolDispatcher::new(&config, Arc::clone(&metrics));
        let prompts = PromptCatalog::new(config.prompts_dir.clone());
        Self {
            shared: Arc::new(ServerShared {
                config,
                tools,
                prompts,
                metrics,
            }),
        }
    }

    /// Create a server from environment variables.
    pub fn from_env() -> Result<Self, crate::error::ServerError> {
        Ok(Self::new(Config::from_env()?))
    }

    /// A fresh handler bound to this server, one per session.
    pub fn new_handler(&self) -> SessionHandler {
        SessionHandler::new(Arc::clone(&self.shared))
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Server metrics.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.shared.metrics
    }

    /// The shared connection manager.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        self.shared.tools.connections()
    }

    /// Close the connection pool if one is open.
    pub async fn shutdown(&self) {
        if self.connections().disconnect().await {
            info!("Connection pool closed");
        }
    }
}

/// Identity reported in `serverInfo`.
pub fn server_info() -> Implementation {
    Implementation {
        name: SERVER_NAME.to_string(),
        version: SERVER_VERSION.to_string(),
    }
}

/// Usage notes returned from `initialize`.
pub(crate) fn build_instructions(config: &Config) -> String {
    let mut instructions = String::new();

    instructions.push_str("# MSSQL CRUD MCP Server\n\n");
    instructions.push_str("This server provides CRUD access to a Microsoft SQL Server database.\n\n");

    match config.database.database.as_deref() {
        Some(db) => instructions.push_str(&format!(
            "**Target database:** `{}` on `{}:{}`\n\n",
            db, config.database.host, config.database.port
        )),
        None => instructions.push_str(&format!(
            "**Target server:** `{}:{}` (login default database)\n\n",
            config.database.host, config.database.port
        )),
    }

    instructions.push_str("### Getting started\n");
    instructions.push_str("1. Call `connection` with action `connect`\n");
    instructions.push_str("2. Call `readSchema` to discover tables and columns\n");
    instructions.push_str("3. Use `query` for reads; `create`, `update` and `delete` for writes\n\n");
    instructions.push_str("`query` accepts SELECT statements only. ");
    instructions.push_str(&format!(
        "Results are capped at {} rows.\n",
        config.query.max_result_rows
    ));

    instructions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_mention_target() {
        let mut config = Config::default();
        config.database.database = Some("hr".to_string());
        let text = build_instructions(&config);
        assert!(text.contains("`hr`"));
        assert!(text.contains("SELECT statements only"));
    }

    #[tokio::test]
    async fn test_server_starts_disconnected() {
        let server = McpServer::new(Config::default());
        assert!(!server.connections().is_connected().await);
        server.shutdown().await;
    }

    #[test]
    fn test_handlers_are_independent() {
        let server = McpServer::new(Config::default());
        let a = server.new_handler();
        let b = server.new_handler();
        a.mark_initialized("2025-03-26");
        assert!(a.is_initialized());
        assert!(!b.is_initialized());
    }
}
