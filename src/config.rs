//! Configuration management for the MSSQL CRUD MCP server.
//!
//! Configuration is loaded from environment variables following the 12-factor app pattern.
//! Transport selection lives on the command line (see `main.rs`).

use crate::constants::{
    APPLICATION_NAME, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_DRAIN_TIMEOUT, DEFAULT_DRAIN_TIMEOUT_SECS,
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_QUERY_LENGTH, DEFAULT_MIN_CONNECTIONS, DEFAULT_MAX_RESULT_ROWS,
    DEFAULT_MSSQL_HOST, DEFAULT_MSSQL_PORT,
};
use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database connection configuration
    pub database: DatabaseConfig,

    /// Query execution configuration
    pub query: QueryConfig,

    /// HTTP transport configuration
    pub http: HttpConfig,

    /// Directory overriding the embedded prompt templates
    pub prompts_dir: Option<PathBuf>,

    /// How long shutdown waits for in-flight work
    pub drain_timeout: Duration,
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQL Server hostname or IP address
    pub host: String,

    /// SQL Server port (default: 1433)
    pub port: u16,

    /// Database name
    pub database: Option<String>,

    /// SQL Server login; `None` until both user and password are set
    pub credentials: Option<Credentials>,

    /// Connection pool configuration
    pub pool: PoolConfig,

    /// Enable TLS encryption
    pub encrypt: bool,

    /// Trust server certificate (for self-signed certs)
    pub trust_server_certificate: bool,

    /// Application name sent to SQL Server
    pub application_name: String,
}

/// SQL Server authentication (username/password).
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections kept open while idle
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Idle connections above the minimum are closed after this long
    pub idle_timeout: Duration,

    /// Timeout for opening a connection and for checking one out
    pub connection_timeout: Duration,
}

/// Query execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Maximum query length (bytes)
    pub max_query_length: usize,

    /// Maximum result rows per query
    pub max_result_rows: usize,
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Permissive CORS layer
    pub cors: bool,

    /// Request tracing layer
    pub tracing: bool,

    /// Bearer token required on every HTTP request
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MSSQL_HOST`: SQL Server hostname (default: localhost)
    /// - `MSSQL_PORT`: Port number (default: 1433)
    /// - `MSSQL_USER` / `MSSQL_PASSWORD`: SQL Server login
    /// - `MSSQL_DATABASE`: Database name
    /// - `MSSQL_ENCRYPT`: Enable TLS (default: true)
    /// - `MSSQL_TRUST_CERT`: Trust server certificate (default: false)
    /// - `MSSQL_POOL_MIN`: Minimum idle pool connections (default: 1)
    /// - `MSSQL_POOL_MAX`: Maximum pool connections (default: 10)
    /// - `MSSQL_IDLE_TIMEOUT`: Pool idle timeout in seconds (default: 600)
    /// - `MSSQL_CONNECT_TIMEOUT`: Connection timeout in seconds (default: 30)
    /// - `MSSQL_MAX_ROWS`: Maximum result rows (default: 10000)
    /// - `MCP_PROMPTS_DIR`: Directory of prompt template overrides
    /// - `MCP_HTTP_CORS`: Enable permissive CORS (default: true)
    /// - `MCP_HTTP_TRACING`: Enable HTTP request tracing (default: true)
    /// - `MCP_AUTH_TOKEN`: Require this bearer token on HTTP transports
    /// - `MCP_SHUTDOWN_DRAIN_TIMEOUT`: Drain timeout in seconds (default: 30)
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Missing credentials are reported by the connection tool, not at startup.
        let credentials = match (var("MSSQL_USER"), var("MSSQL_PASSWORD")) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (Some(_), None) => {
                return Err(ServerError::config(
                    "MSSQL_PASSWORD is required when MSSQL_USER is set",
                ))
            }
            (None, Some(_)) => {
                return Err(ServerError::config(
                    "MSSQL_USER is required when MSSQL_PASSWORD is set",
                ))
            }
            (None, None) => None,
        };

        let host = var("MSSQL_HOST").unwrap_or_else(|| DEFAULT_MSSQL_HOST.to_string());
        let port = parse_var(&var, "MSSQL_PORT", DEFAULT_MSSQL_PORT)?;
        let database = var("MSSQL_DATABASE");

        let encrypt = parse_flag(&var, "MSSQL_ENCRYPT", true);
        let trust_server_certificate = parse_flag(&var, "MSSQL_TRUST_CERT", false);

        let max_connections = parse_var(&var, "MSSQL_POOL_MAX", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(ServerError::config("MSSQL_POOL_MAX must be at least 1"));
        }
        let min_connections = parse_var(&var, "MSSQL_POOL_MIN", DEFAULT_MIN_CONNECTIONS)?;
        if min_connections > max_connections {
            return Err(ServerError::config(
                "MSSQL_POOL_MIN must not exceed MSSQL_POOL_MAX",
            ));
        }
        let idle_timeout_secs = parse_var(&var, "MSSQL_IDLE_TIMEOUT", DEFAULT_IDLE_TIMEOUT_SECS)?;
        let connection_timeout_secs =
            parse_var(&var, "MSSQL_CONNECT_TIMEOUT", DEFAULT_CONNECTION_TIMEOUT_SECS)?;

        let max_result_rows = parse_var(&var, "MSSQL_MAX_ROWS", DEFAULT_MAX_RESULT_ROWS)?;
        let max_query_length =
            parse_var(&var, "MSSQL_MAX_QUERY_LENGTH", DEFAULT_MAX_QUERY_LENGTH)?;

        let drain_secs = parse_var(
            &var,
            "MCP_SHUTDOWN_DRAIN_TIMEOUT",
            DEFAULT_DRAIN_TIMEOUT_SECS,
        )?;

        Ok(Config {
            database: DatabaseConfig {
                host,
                port,
                database,
                credentials,
                pool: PoolConfig {
                    min_connections,
                    max_connections,
                    idle_timeout: Duration::from_secs(idle_timeout_secs),
                    connection_timeout: Duration::from_secs(connection_timeout_secs),
                },
                encrypt,
                trust_server_certificate,
                application_name: APPLICATION_NAME.to_string(),
            },
            query: QueryConfig {
                max_query_length,
                max_result_rows,
            },
            http: HttpConfig {
                cors: parse_flag(&var, "MCP_HTTP_CORS", true),
                tracing: parse_flag(&var, "MCP_HTTP_TRACING", true),
                auth_token: var("MCP_AUTH_TOKEN"),
            },
            prompts_dir: var("MCP_PROMPTS_DIR").map(PathBuf::from),
            drain_timeout: Duration::from_secs(drain_secs),
        })
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T, ServerError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ServerError::config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

fn parse_flag<F>(var: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            query: QueryConfig::default(),
            http: HttpConfig::default(),
            prompts_dir: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MSSQL_HOST.to_string(),
            port: DEFAULT_MSSQL_PORT,
            database: None,
            credentials: None,
            pool: PoolConfig::default(),
            encrypt: true,
            trust_server_certificate: false,
            application_name: APPLICATION_NAME.to_string(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            max_result_rows: DEFAULT_MAX_RESULT_ROWS,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            cors: true,
            tracing: true,
            auth_token: None,
        }
    }
}
