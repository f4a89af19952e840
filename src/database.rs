//! Database connectivity and query execution.

mod connection;
pub mod metadata;
mod query;
pub mod statements;
pub mod types;

pub use connection::{
    create_config, create_connection, create_pool, ConnectionHealth, ConnectionManager,
    ConnectionPool, ConnectionStatus, PoolStatus, PooledConnection, RawConnection,
    TiberiusConnector, TrackedClient,
};
pub use metadata::{DatabaseSchema, MetadataQueries, TableSchema};
pub use query::{truncate_for_log, QueryExecutor, QueryResult};
pub use statements::{build_delete, build_insert, build_update, SqlStatement};
pub use types::{SqlParam, SqlValue, TypeMapper};
