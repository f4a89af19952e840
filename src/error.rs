//! Error types for the MSSQL CRUD MCP server.
//!
//! Every failure inside the server is a [`ServerError`]. Where the error ends
//! up on the wire is decided at the dispatch boundary:
//!
//! - tool-level failures become a `CallToolResult` with `isError: true`
//!   (see [`ServerError::is_tool_error`]);
//! - everything else becomes a JSON-RPC error object (see [`ServerError::rpc_code`])
//!   or, on the HTTP transports, a status code (see [`ServerError::http_status`]).

use crate::protocol::error_codes;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type ServerResult<T> = Result<T, ServerError>;

/// Kind of SQL identifier that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Table,
    Column,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierKind::Table => write!(f, "table"),
            IdentifierKind::Column => write!(f, "column"),
        }
    }
}

/// Kind of catalog entry that could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Tool,
    Prompt,
    Resource,
    Table,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundKind::Tool => write!(f, "tool"),
            NotFoundKind::Prompt => write!(f, "prompt"),
            NotFoundKind::Resource => write!(f, "resource"),
            NotFoundKind::Table => write!(f, "table"),
        }
    }
}

/// Domain errors for the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A data tool was called while no pool is open.
    #[error("Database not connected.")]
    NotConnected,

    /// Connection error
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication against SQL Server failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Identifier rejected before any SQL was built
    #[error("Invalid {kind} name: {name}")]
    InvalidIdentifier { kind: IdentifierKind, name: String },

    /// Operation refused by policy (e.g. non-SELECT in `query`)
    #[error("{0}")]
    UnsupportedOperation(String),

    /// Unknown tool, prompt, resource or table
    #[error("Unknown {kind}: {name}")]
    NotFound { kind: NotFoundKind, name: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Query execution error
    #[error("Query execution error: {message}")]
    QueryExecution {
        message: String,
        sql_error_code: Option<i32>,
    },

    /// Unknown or closed session identifier
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Request refused by the transport (missing session header, wrong first message)
    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// Wire payload could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Payload decoded but is not a valid JSON-RPC message
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid method parameters
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Method not implemented by the server
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Missing or rejected bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid identifier error.
    pub fn invalid_identifier(kind: IdentifierKind, name: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            kind,
            name: name.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(kind: NotFoundKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an invalid params error.
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Create a query execution error.
    pub fn query_error(msg: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: msg.into(),
            sql_error_code: None,
        }
    }

    /// Create a query execution error with the SQL Server error number.
    pub fn query_error_with_code(msg: impl Into<String>, code: i32) -> Self {
        Self::QueryExecution {
            message: msg.into(),
            sql_error_code: Some(code),
        }
    }

    /// Create a session not found error.
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound(id.into())
    }

    /// Create a bad request error.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is reported inside a tool result rather than as a
    /// JSON-RPC error object.
    pub fn is_tool_error(&self) -> bool {
        match self {
            Self::NotConnected
            | Self::Connection { .. }
            | Self::Authentication(_)
            | Self::InvalidIdentifier { .. }
            | Self::UnsupportedOperation(_)
            | Self::InvalidInput(_)
            | Self::PermissionDenied(_)
            | Self::ConstraintViolation(_)
            | Self::QueryExecution { .. } => true,
            Self::NotFound { kind, .. } => matches!(kind, NotFoundKind::Tool | NotFoundKind::Table),
            _ => false,
        }
    }

    /// JSON-RPC error code for protocol-level failures.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => error_codes::INVALID_PARAMS,
            Self::SessionNotFound(_) | Self::BadRequest(_) | Self::Unauthorized(_) => {
                error_codes::BAD_REQUEST
            }
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status for errors rejected before a request reaches a session.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Parse(_)
            | Self::InvalidRequest(_)
            | Self::BadRequest(_)
            | Self::SessionNotFound(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::NotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotConnected => {
                Some("Call the connection tool with action 'connect' before data operations")
            }
            Self::Connection { .. } => {
                Some("Check server hostname, port, and network connectivity")
            }
            Self::Authentication(_) => Some("Verify MSSQL_USER and MSSQL_PASSWORD are correct"),
            Self::InvalidIdentifier { .. } => {
                Some("Identifiers must start with a letter or underscore and contain only letters, digits and underscores")
            }
            Self::UnsupportedOperation(_) => {
                Some("Use the create, update or delete tools for data changes")
            }
            Self::PermissionDenied(_) => {
                Some("Request appropriate permissions from your database administrator")
            }
            Self::ConstraintViolation(_) => {
                Some("Check the constraint definition and your data values")
            }
            _ => None,
        }
    }
}

/// Map SQL Server error numbers to semantic [`ServerError`] variants.
pub fn from_sql_error(code: i32, message: &str) -> ServerError {
    match code {
        18456 => ServerError::Authentication(format!("Login failed: {}", message)),

        208 => ServerError::query_error_with_code(format!("Invalid object name: {}", message), code),
        207 => ServerError::query_error_with_code(format!("Invalid column: {}", message), code),

        229 | 230 => ServerError::PermissionDenied(message.to_string()),

        547 => ServerError::ConstraintViolation(message.to_string()),
        2601 | 2627 => ServerError::ConstraintViolation(format!("Duplicate key: {}", message)),

        102 => ServerError::query_error_with_code(format!("Syntax error: {}", message), code),

        -1 | 53 => ServerError::connection(format!("Server not reachable: {}", message)),

        _ => ServerError::query_error_with_code(message, code),
    }
}

impl From<tiberius::error::Error> for ServerError {
    fn from(e: tiberius::error::Error) -> Self {
        use tiberius::error::Error;

        if let Error::Server(token) = &e {
            return from_sql_error(token.code() as i32, token.message());
        }

        match e {
            Error::Io { .. } => ServerError::connection_with_source("IO error", e),
            Error::Tls(_) | Error::Routing { .. } => ServerError::connection(e.to_string()),
            _ => ServerError::query_error(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused => ServerError::connection_with_source("Connection refused", e),
            ErrorKind::TimedOut => ServerError::connection_with_source("Connection timed out", e),
            _ => ServerError::connection_with_source(format!("IO error: {}", e), e),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        ServerError::internal(format!("JSON serialization failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_mapping() {
        let err = from_sql_error(18456, "Login failed for user 'test'");
        assert!(matches!(err, ServerError::Authentication(_)));

        let err = from_sql_error(2627, "Violation of PRIMARY KEY constraint");
        assert!(matches!(err, ServerError::ConstraintViolation(_)));

        let err = from_sql_error(229, "SELECT permission denied");
        assert!(matches!(err, ServerError::PermissionDenied(_)));

        let err = from_sql_error(50000, "custom");
        assert!(matches!(
            err,
            ServerError::QueryExecution {
                sql_error_code: Some(50000),
                ..
            }
        ));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(ServerError::NotConnected.to_string(), "Database not connected.");
        assert_eq!(
            ServerError::invalid_identifier(IdentifierKind::Table, "users; DROP TABLE x")
                .to_string(),
            "Invalid table name: users; DROP TABLE x"
        );
        assert_eq!(
            ServerError::not_found(NotFoundKind::Prompt, "nope").to_string(),
            "Unknown prompt: nope"
        );
        assert_eq!(
            ServerError::unsupported("Only SELECT queries are allowed").to_string(),
            "Only SELECT queries are allowed"
        );
    }

    #[test]
    fn test_soft_and_hard_split() {
        assert!(ServerError::NotConnected.is_tool_error());
        assert!(ServerError::not_found(NotFoundKind::Tool, "x").is_tool_error());
        assert!(!ServerError::not_found(NotFoundKind::Prompt, "x").is_tool_error());
        assert!(!ServerError::not_found(NotFoundKind::Resource, "x").is_tool_error());
        assert!(!ServerError::parse("bad").is_tool_error());
    }

    #[test]
    fn test_rpc_codes() {
        assert_eq!(ServerError::parse("x").rpc_code(), -32700);
        assert_eq!(ServerError::MethodNotFound("x".into()).rpc_code(), -32601);
        assert_eq!(ServerError::session_not_found("x").rpc_code(), -32000);
        assert_eq!(
            ServerError::not_found(NotFoundKind::Prompt, "x").rpc_code(),
            -32603
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(ServerError::session_not_found("x").http_status(), 400);
        assert_eq!(ServerError::Unauthorized("x".into()).http_status(), 401);
        assert_eq!(ServerError::internal("x").http_status(), 500);
    }

    #[test]
    fn test_error_suggestions() {
        assert!(ServerError::NotConnected.suggestion().is_some());
        assert!(ServerError::internal("unknown").suggestion().is_none());
    }
}
