//! MSSQL CRUD MCP Server entry point.
//!
//! Database settings come from the environment; the transport and listen
//! address come from the command line.

use anyhow::{Context, Result};
use clap::Parser;
use mssql_crud_mcp::constants::{DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT, DEFAULT_LOG_FILTER};
use mssql_crud_mcp::protocol::LATEST_PROTOCOL_VERSION;
use mssql_crud_mcp::shutdown::{install_signal_handlers, new_shutdown_controller};
use mssql_crud_mcp::{transport, Config, McpServer, TransportType};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mssql-crud-mcp", version, about)]
struct Cli {
    /// Transport to serve on
    #[arg(long, value_enum, env = "MCP_TRANSPORT", default_value_t = TransportType::Stdio)]
    transport: TransportType,

    /// Port for the HTTP transports
    #[arg(long, env = "MCP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Address for the HTTP transports
    #[arg(long, env = "MCP_HOST", default_value = DEFAULT_HTTP_HOST)]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is reserved for JSON-RPC on stdio.
    init_logging();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("[PANIC] {}", info);
    }));

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "mssql-crud-mcp v{} starting (protocol {}, transport {})",
        env!("CARGO_PKG_VERSION"),
        LATEST_PROTOCOL_VERSION,
        cli.transport
    );

    let controller = new_shutdown_controller(config.drain_timeout);
    install_signal_handlers(controller.clone());

    let server = McpServer::new(config);
    transport::run(server, cli.transport, &cli.host, cli.port, controller)
        .await
        .context("Transport failed")?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
