//! Connection pool management for SQL Server.
//!
//! Each tool call checks one connection out of the shared bb8 pool and hands
//! it back when the guard drops, so concurrent sessions never interleave TDS
//! traffic on a single client. Connections are validated with `SELECT 1` on
//! checkout and retired when a statement was interrupted or hit a transport
//! error.

use crate::config::DatabaseConfig;
use crate::error::{ServerError, ServerResult};
use async_trait::async_trait;
use bb8::{ManageConnection, Pool, RunError};
use serde::Serialize;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

/// Type alias for a raw tiberius connection.
pub type RawConnection = Client<Compat<TcpStream>>;

/// Create a tiberius Config from DatabaseConfig.
pub fn create_config(db_config: &DatabaseConfig) -> ServerResult<Config> {
    let credentials = db_config.credentials.as_ref().ok_or_else(|| {
        ServerError::Authentication(
            "MSSQL_USER and MSSQL_PASSWORD must be set before connecting".to_string(),
        )
    })?;

    let mut config = Config::new();
    config.host(&db_config.host);
    config.port(db_config.port);

    if let Some(ref database) = db_config.database {
        config.database(database);
    }

    config.authentication(AuthMethod::sql_server(
        &credentials.username,
        &credentials.password,
    ));

    if db_config.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::Off);
    }

    if db_config.trust_server_certificate {
        config.trust_cert();
    }

    config.application_name(&db_config.application_name);

    Ok(config)
}

/// Open a raw connection: TCP connect followed by the TDS handshake.
pub async fn create_connection(db_config: &DatabaseConfig) -> ServerResult<RawConnection> {
    let config = create_config(db_config)?;

    let address = format!("{}:{}", db_config.host, db_config.port);
    debug!("Creating connection to {}", address);

    let handshake = async {
        let tcp = TcpStream::connect(&address).await.map_err(|e| {
            ServerError::connection_with_source(format!("Failed to connect to {}", address), e)
        })?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok::<_, ServerError>(client)
    };

    let client = tokio::time::timeout(db_config.pool.connection_timeout, handshake)
        .await
        .map_err(|_| {
            ServerError::connection(format!(
                "Timed out connecting to {} after {:?}",
                address, db_config.pool.connection_timeout
            ))
        })??;

    debug!("Connection established successfully");
    Ok(client)
}

/// Per-connection bookkeeping consulted when a connection returns to the pool.
#[derive(Debug, Default)]
pub struct ConnectionHealth {
    in_flight: bool,
    broken: bool,
}

impl ConnectionHealth {
    /// Mark a statement as started.
    pub fn begin(&mut self) {
        self.in_flight = true;
    }

    /// Mark the statement as finished. Transport-level failures retire the connection.
    pub fn finish<T>(&mut self, result: ServerResult<T>) -> ServerResult<T> {
        self.in_flight = false;
        if let Err(ServerError::Connection { .. }) = &result {
            self.broken = true;
        }
        result
    }

    /// A connection whose statement never finished (the caller was cancelled)
    /// may still have unread TDS packets and is not handed out again.
    pub fn is_reusable(&self) -> bool {
        !self.in_flight && !self.broken
    }
}

/// A tiberius client together with its health flags.
pub struct TrackedClient {
    client: RawConnection,
    health: ConnectionHealth,
}

impl TrackedClient {
    fn new(client: RawConnection) -> Self {
        Self {
            client,
            health: ConnectionHealth::default(),
        }
    }

    /// Borrow the client for one statement.
    pub fn begin(&mut self) -> &mut RawConnection {
        self.health.begin();
        &mut self.client
    }

    /// Record how the statement started with [`begin`](Self::begin) ended.
    pub fn finish<T>(&mut self, result: ServerResult<T>) -> ServerResult<T> {
        self.health.finish(result)
    }
}

/// bb8 connection manager that opens tiberius clients.
#[derive(Debug, Clone)]
pub struct TiberiusConnector {
    config: DatabaseConfig,
}

impl TiberiusConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ManageConnection for TiberiusConnector {
    type Connection = TrackedClient;
    type Error = ServerError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        create_connection(&self.config).await.map(TrackedClient::new)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.client
            .simple_query("SELECT 1")
            .await?
            .into_results()
            .await?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        !conn.health.is_reusable()
    }
}

/// Type alias for the connection pool.
pub type ConnectionPool = Pool<TiberiusConnector>;

/// Type alias for a checked-out connection. Returned to the pool on drop.
pub type PooledConnection = bb8::PooledConnection<'static, TiberiusConnector>;

/// Build a pool and verify it with one round trip.
pub async fn create_pool(config: &DatabaseConfig) -> ServerResult<ConnectionPool> {
    info!(
        "Creating connection pool for {}:{} (min: {}, max: {})",
        config.host, config.port, config.pool.min_connections, config.pool.max_connections
    );

    let pool = Pool::builder()
        .max_size(config.pool.max_connections.max(1))
        .min_idle(Some(config.pool.min_connections))
        .idle_timeout(Some(config.pool.idle_timeout))
        .connection_timeout(config.pool.connection_timeout)
        .test_on_check_out(true)
        .build(TiberiusConnector::new(config.clone()))
        .await?;

    {
        let _conn = pool
            .get()
            .await
            .map_err(|e| checkout_error(e, config.pool.connection_timeout))?;
        debug!("Initial connection test successful");
    }

    info!("Connection pool created successfully");
    Ok(pool)
}

fn checkout_error(err: RunError<ServerError>, timeout: Duration) -> ServerError {
    match err {
        RunError::User(e) => e,
        RunError::TimedOut => ServerError::connection(format!(
            "Timed out waiting for a pooled connection after {:?}",
            timeout
        )),
    }
}

/// Pool status information.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    /// Open connections waiting for checkout.
    pub idle_connections: usize,
    /// Connections currently checked out.
    pub in_use_connections: usize,
    /// Maximum allowed connections.
    pub max_connections: usize,
}

impl PoolStatus {
    fn of(pool: &ConnectionPool, max_connections: u32) -> Self {
        let state = pool.state();
        Self {
            idle_connections: state.idle_connections as usize,
            in_use_connections: state.connections.saturating_sub(state.idle_connections) as usize,
            max_connections: max_connections as usize,
        }
    }
}

/// Owner of the one shared pool.
///
/// `connect` and `disconnect` act on the pool for every session at once.
pub struct ConnectionManager {
    config: DatabaseConfig,
    pool: RwLock<Option<ConnectionPool>>,
}

/// Snapshot reported by the `connection` tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStatus>,
}

impl ConnectionManager {
    /// Create a manager with no open pool.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    /// Open the shared pool. A second call while connected is a no-op.
    pub async fn connect(&self) -> ServerResult<ConnectionStatus> {
        let mut guard = self.pool.write().await;
        if guard.is_none() {
            let pool = create_pool(&self.config).await?;
            *guard = Some(pool);
            info!(host = %self.config.host, "Database connected");
        } else {
            debug!("connect called while already connected");
        }
        drop(guard);
        Ok(self.status().await)
    }

    /// Close the shared pool. Returns false if nothing was open.
    pub async fn disconnect(&self) -> bool {
        let pool = self.pool.write().await.take();
        match pool {
            Some(pool) => {
                let in_use = PoolStatus::of(&pool, self.config.pool.max_connections).in_use_connections;
                if in_use > 0 {
                    warn!(in_use, "Disconnecting while connections are checked out");
                }
                // Checked-out connections hold their own pool handle; the pool closes after the last one returns.
                drop(pool);
                info!("Database disconnected");
                true
            }
            None => false,
        }
    }

    /// Whether a pool is currently open.
    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// Check out a connection from the shared pool.
    pub async fn acquire(&self) -> ServerResult<PooledConnection> {
        let pool = self
            .pool
            .read()
            .await
            .clone()
            .ok_or(ServerError::NotConnected)?;
        pool.get_owned()
            .await
            .map_err(|e| checkout_error(e, self.config.pool.connection_timeout))
    }

    /// Current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        let pool = self.pool.read().await;
        ConnectionStatus {
            connected: pool.is_some(),
            host: self.config.host.clone(),
            port: self.config.port,
            database: self.config.database.clone(),
            pool: pool
                .as_ref()
                .map(|p| PoolStatus::of(p, self.config.pool.max_connections)),
        }
    }
}
