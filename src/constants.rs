//! Centralized constants for the MSSQL CRUD MCP server.
//!
//! Default values and magic numbers used throughout the codebase.

use std::time::Duration;

// =============================================================================
// Server Identity
// =============================================================================

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "mssql-crud-mcp";

/// Version reported in `serverInfo`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name sent to SQL Server at login.
pub const APPLICATION_NAME: &str = "mssql-crud-mcp";

// =============================================================================
// Network Defaults
// =============================================================================

/// Default SQL Server host.
pub const DEFAULT_MSSQL_HOST: &str = "localhost";

/// Default SQL Server port.
pub const DEFAULT_MSSQL_PORT: u16 = 1433;

/// Default HTTP bind host for the sse and http transports.
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

/// Default HTTP port for the sse and http transports.
pub const DEFAULT_HTTP_PORT: u16 = 3000;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default connection timeout as Duration.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS);

/// Interval between SSE keep-alive comments.
pub const SSE_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

// =============================================================================
// Connection Pool Constants
// =============================================================================

/// Default minimum connections in pool.
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Default maximum connections in pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default connection idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// Query Constants
// =============================================================================

/// Default maximum result rows returned by the `query` tool.
pub const DEFAULT_MAX_RESULT_ROWS: usize = 10_000;

/// Default maximum query length in bytes.
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 1_000_000;

// =============================================================================
// Shutdown Constants
// =============================================================================

/// Default shutdown drain timeout in seconds.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Default shutdown drain timeout as Duration.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS);

// =============================================================================
// Session Constants
// =============================================================================

/// Header carrying the streamable HTTP session id.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Query parameter carrying the SSE session id.
pub const SSE_SESSION_QUERY_PARAM: &str = "sessionId";

/// Path clients POST to on the SSE transport.
pub const SSE_MESSAGES_PATH: &str = "/messages";

/// Path of the MCP endpoint on both HTTP transports.
pub const MCP_PATH: &str = "/mcp";

// =============================================================================
// Logging Constants
// =============================================================================

/// Default truncation length for query logging.
pub const LOG_QUERY_TRUNCATE_LENGTH: usize = 100;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn,mssql_crud_mcp=info";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_durations() {
        assert_eq!(DEFAULT_CONNECTION_TIMEOUT, Duration::from_secs(30));
        assert_eq!(DEFAULT_DRAIN_TIMEOUT, Duration::from_secs(30));
    }

    #[test]
    fn test_session_header_is_lowercase() {
        assert_eq!(SESSION_ID_HEADER, SESSION_ID_HEADER.to_lowercase());
    }
}
