//! # MSSQL CRUD MCP Server
//!
//! A Model Context Protocol server giving AI clients create, read, update and
//! delete access to one Microsoft SQL Server database.
//!
//! This crate provides:
//! - **Tools**: `connection`, `query`, `create`, `update`, `delete`, `readSchema`
//! - **Prompts**: guided data management and employee record workflows
//! - **Resources**: schema documentation
//! - **Transports**: stdio, HTTP+SSE and streamable HTTP, each with
//!   per-client sessions
//!
//! ## Architecture
//!
//! [`McpServer`] owns the shared collaborators (connection pool, prompt
//! catalog, metrics) and hands out one [`handlers::SessionHandler`] per
//! session. Transports only frame messages; all method routing lives in the
//! handler.

pub mod auth;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod handlers;
pub mod prompts;
pub mod protocol;
pub mod resources;
pub mod security;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod telemetry;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{ServerError, ServerResult};
pub use server::McpServer;
pub use transport::TransportType;
