//! Integration tests against a live SQL Server.
//!
//! These tests support two modes:
//! 1. **Testcontainers** (default): spins up a SQL Server container
//! 2. **External server**: connect to an existing server via `MSSQL_HOST`
//!
//! ```bash
//! cargo test --test integration_tests -- --ignored --test-threads=1
//! MSSQL_HOST=localhost MSSQL_PASSWORD='yourPass' \
//!   cargo test --test integration_tests -- --ignored --test-threads=1
//! ```
//!
//! The SQL Server container needs about 2GB RAM and 30-60 seconds to start.

use mssql_crud_mcp::config::{Config, Credentials};
use mssql_crud_mcp::handlers::SessionHandler;
use mssql_crud_mcp::McpServer;
use serde_json::{json, Value};
use serial_test::serial;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mssql_server::MssqlServer;
use tiberius::{AuthMethod, Client};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;

/// Default SA password for testcontainers.
const DEFAULT_SA_PASSWORD: &str = "yourStrong(!)Password";

const DEFAULT_VERSION: &str = "2022-latest";

#[allow(dead_code)] // Held for lifetime management (Drop stops the container)
enum TestDatabaseSource {
    External,
    Container(Box<ContainerAsync<MssqlServer>>),
}

struct TestDatabase {
    #[allow(dead_code)]
    source: TestDatabaseSource,
    host: String,
    port: u16,
    password: String,
}

impl TestDatabase {
    /// Uses an external server if `MSSQL_HOST` is set, otherwise testcontainers.
    async fn new() -> Self {
        match std::env::var("MSSQL_HOST") {
            Ok(host) => Self {
                source: TestDatabaseSource::External,
                host,
                port: std::env::var("MSSQL_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(1433),
                password: std::env::var("MSSQL_PASSWORD")
                    .unwrap_or_else(|_| DEFAULT_SA_PASSWORD.to_string()),
            },
            Err(_) => Self::from_testcontainer().await,
        }
    }

    async fn from_testcontainer() -> Self {
        let version =
            std::env::var("MSSQL_TEST_VERSION").unwrap_or_else(|_| DEFAULT_VERSION.to_string());
        let container = MssqlServer::default()
            .with_accept_eula()
            .with_tag(version.as_str())
            .start()
            .await
            .unwrap_or_else(|e| panic!("Failed to start SQL Server {} container: {}", version, e));

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(1433)
            .await
            .expect("Failed to get port");

        // Give SQL Server time to finish recovery after the port opens.
        tokio::time::sleep(Duration::from_secs(5)).await;

        Self {
            source: TestDatabaseSource::Container(Box::new(container)),
            host: host.to_string(),
            port,
            password: DEFAULT_SA_PASSWORD.to_string(),
        }
    }

    fn server_config(&self) -> Config {
        let mut config = Config::default();
        config.database.host = self.host.clone();
        config.database.port = self.port;
        config.database.credentials = Some(Credentials {
            username: "sa".to_string(),
            password: self.password.clone(),
        });
        config.database.trust_server_certificate = true;
        config
    }

    /// Raw client for fixture DDL, which the tools deliberately cannot run.
    async fn execute(&self, sql: &str) {
        let mut config = tiberius::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.authentication(AuthMethod::sql_server("sa", &self.password));
        config.trust_cert();

        let tcp = TcpStream::connect(format!("{}:{}", self.host, self.port))
            .await
            .expect("Failed to connect to TCP");
        tcp.set_nodelay(true).expect("Failed to set TCP_NODELAY");
        let mut client = Client::connect(config, tcp.compat_write())
            .await
            .expect("Failed to connect to SQL Server");
        client
            .simple_query(sql)
            .await
            .expect("Fixture statement failed")
            .into_results()
            .await
            .expect("Fixture results failed");
    }
}

async fn call_tool(handler: &SessionHandler, name: &str, arguments: Value) -> (bool, Value) {
    let message = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    });
    let response = handler
        .handle_value(message, None)
        .await
        .expect("tools/call must produce a response")
        .to_value();
    let result = &response["result"];
    let is_error = result["isError"].as_bool().unwrap_or(false);
    let text = result["content"][0]["text"].as_str().unwrap_or_default();
    let parsed = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
    (is_error, parsed)
}

const EMPLOYEES_DDL: &str = "
IF OBJECT_ID('dbo.employees', 'U') IS NOT NULL DROP TABLE dbo.employees;
CREATE TABLE dbo.employees (
    id INT IDENTITY(1,1) PRIMARY KEY,
    name NVARCHAR(100) NOT NULL,
    email NVARCHAR(200) NULL,
    salary DECIMAL(10,2) NULL,
    hired_at DATETIME2 NULL
);";

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_connect_then_select_one() {
    let db = TestDatabase::new().await;
    let server = McpServer::new(db.server_config());
    let handler = server.new_handler();

    let (is_error, connected) = call_tool(&handler, "connection", json!({"action": "connect"})).await;
    assert!(!is_error, "{}", connected);
    assert_eq!(connected["success"], true);

    let (is_error, result) = call_tool(&handler, "query", json!({"sql": "SELECT 1 AS one"})).await;
    assert!(!is_error, "{}", result);
    assert_eq!(result["rowCount"], 1);
    assert_eq!(result["rows"][0]["one"], 1);

    server.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_crud_cycle() {
    let db = TestDatabase::new().await;
    db.execute(EMPLOYEES_DDL).await;

    let server = McpServer::new(db.server_config());
    let handler = server.new_handler();
    call_tool(&handler, "connection", json!({"action": "connect"})).await;

    let (is_error, created) = call_tool(
        &handler,
        "create",
        json!({"table": "employees", "data": {"name": "John Doe", "email": "john@example.com", "salary": 5100.5}}),
    )
    .await;
    assert!(!is_error, "{}", created);
    assert_eq!(created["affectedRows"], 1);

    let (_, rows) = call_tool(
        &handler,
        "query",
        json!({"sql": "SELECT name, salary FROM employees WHERE email = ?", "params": ["john@example.com"]}),
    )
    .await;
    assert_eq!(rows["rowCount"], 1);
    assert_eq!(rows["rows"][0]["name"], "John Doe");
    assert_eq!(rows["rows"][0]["salary"], "5100.50");

    let (_, updated) = call_tool(
        &handler,
        "update",
        json!({"table": "employees", "data": {"email": null}, "where": {"name": "John Doe"}}),
    )
    .await;
    assert_eq!(updated["affectedRows"], 1);

    let (_, deleted) = call_tool(
        &handler,
        "delete",
        json!({"table": "employees", "where": {"email": null}}),
    )
    .await;
    assert_eq!(deleted["affectedRows"], 1);

    let (_, rows) = call_tool(&handler, "query", json!({"sql": "SELECT COUNT(*) AS n FROM employees"})).await;
    assert_eq!(rows["rows"][0]["n"], 0);

    server.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_read_schema() {
    let db = TestDatabase::new().await;
    db.execute(EMPLOYEES_DDL).await;

    let server = McpServer::new(db.server_config());
    let handler = server.new_handler();
    call_tool(&handler, "connection", json!({"action": "connect"})).await;

    let (is_error, schema) = call_tool(&handler, "readSchema", json!({"table": "employees"})).await;
    assert!(!is_error, "{}", schema);
    let columns = schema["columns"].as_array().unwrap();
    assert_eq!(columns.len(), 5);

    let (_, summary) = call_tool(&handler, "readSchema", json!({})).await;
    let tables = summary["tables"].as_array().unwrap();
    assert!(tables.iter().any(|t| t["tableName"] == "employees"));

    let (is_error, missing) = call_tool(&handler, "readSchema", json!({"table": "nope"})).await;
    assert!(is_error);
    assert_eq!(missing, "Unknown table: nope");

    server.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_sql_errors_are_soft() {
    let db = TestDatabase::new().await;
    let server = McpServer::new(db.server_config());
    let handler = server.new_handler();
    call_tool(&handler, "connection", json!({"action": "connect"})).await;

    let (is_error, _) = call_tool(&handler, "query", json!({"sql": "SELECT * FROM no_such_table"})).await;
    assert!(is_error);

    // The pool survives a failed statement.
    let (is_error, _) = call_tool(&handler, "query", json!({"sql": "SELECT 1 AS one"})).await;
    assert!(!is_error);

    let (_, status) = call_tool(&handler, "connection", json!({"action": "status"})).await;
    assert_eq!(status["status"]["connected"], true);

    server.shutdown().await;
}
