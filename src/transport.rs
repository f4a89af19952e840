//! Transport adapters.
//!
//! - stdio: newline-delimited JSON on stdin/stdout, one implicit session
//! - sse: `GET /mcp` event stream plus `POST /messages?sessionId=..`
//! - http: streamable HTTP on `/mcp` with the `Mcp-Session-Id` header
//!
//! All three create sessions through a [`SessionStore`] and route messages
//! through the session's handler; they differ only in framing.

pub mod sse;
pub mod stdio;
pub mod streamable;

use crate::auth::{require_bearer, SharedVerifier, StaticTokenVerifier};
use crate::constants::{SERVER_NAME, SERVER_VERSION, SESSION_ID_HEADER};
use crate::error::{ServerError, ServerResult};
use crate::protocol::JsonRpcResponse;
use crate::server::McpServer;
use crate::session::{SessionStore, TransportKind};
use crate::shutdown::{ShutdownSignal, SharedShutdownController};
use axum::extract::State;
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Available transport types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportType {
    /// Standard input/output (default)
    Stdio,
    /// Server-Sent Events with a companion POST endpoint
    Sse,
    /// Streamable HTTP
    Http,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::Stdio => write!(f, "stdio"),
            TransportType::Sse => write!(f, "sse"),
            TransportType::Http => write!(f, "http"),
        }
    }
}

/// Router state shared by the HTTP transports.
#[derive(Clone)]
pub(crate) struct HttpState {
    pub(crate) store: Arc<SessionStore>,
    pub(crate) transport: TransportKind,
}

/// Serve `server` on the chosen transport until input ends or shutdown is
/// signalled, then run the graceful shutdown phases.
pub async fn run(
    server: McpServer,
    transport: TransportType,
    host: &str,
    port: u16,
    controller: SharedShutdownController,
) -> ServerResult<()> {
    let store = Arc::new(SessionStore::new(server.clone()));

    let result = match transport {
        TransportType::Stdio => {
            let reader = tokio::io::BufReader::new(tokio::io::stdin());
            stdio::serve(&store, reader, tokio::io::stdout(), controller.signal()).await
        }
        TransportType::Sse => {
            let router = sse::router(Arc::clone(&store));
            serve_http(router, host, port, transport, controller.signal()).await
        }
        TransportType::Http => {
            let router = streamable::router(Arc::clone(&store));
            serve_http(router, host, port, transport, controller.signal()).await
        }
    };

    controller.graceful_shutdown(&server, Some(&store)).await;
    result
}

async fn serve_http(
    router: Router,
    host: &str,
    port: u16,
    transport: TransportType,
    mut shutdown: ShutdownSignal,
) -> ServerResult<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::config(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("{} transport listening on http://{}", transport, addr);
    info!("Health endpoint: http://{}/health", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.recv().await;
            info!("HTTP server received shutdown signal");
        })
        .await?;

    Ok(())
}

/// Add `/health`, authentication, CORS and tracing to a transport router.
pub(crate) fn finish_router(mcp: Router<HttpState>, state: HttpState) -> Router {
    let http = state.store.server().config().http.clone();

    let mut mcp = mcp;
    if let Some(token) = http.auth_token {
        let verifier: SharedVerifier = Arc::new(StaticTokenVerifier::new(token));
        mcp = mcp.route_layer(axum::middleware::from_fn_with_state(verifier, require_bearer));
    }

    let mut router = mcp.route("/health", get(health)).with_state(state);

    if http.cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)]),
        );
    }
    if http.tracing {
        router = router.layer(TraceLayer::new_for_http());
    }
    router
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    let metrics = state.store.server().metrics().snapshot();
    Json(json!({
        "status": "healthy",
        "server": SERVER_NAME,
        "version": SERVER_VERSION,
        "transport": state.transport,
        "sessions": state.store.len(),
        "sessionDetails": state.store.list(),
        "avgQueryTimeMs": metrics.avg_query_time_ms(),
        "metrics": metrics,
    }))
}

/// JSON-RPC error envelope with a null id, sent with the error's HTTP status.
pub(crate) fn error_response(err: &ServerError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response_with_status(status, err)
}

pub(crate) fn error_response_with_status(status: StatusCode, err: &ServerError) -> Response {
    (status, Json(JsonRpcResponse::from_error(None, err).to_value())).into_response()
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::Body;
    use axum::response::Response;
    use serde_json::Value;

    pub async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub fn json_body(v: Value) -> Body {
        Body::from(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::body_json;
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn store_with(config: Config) -> Arc<SessionStore> {
        Arc::new(SessionStore::new(McpServer::new(config)))
    }

    #[tokio::test]
    async fn test_health() {
        let store = store_with(Config::default());
        store.create(TransportKind::Http);
        let app = streamable::router(store);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["transport"], "http");
        assert_eq!(body["sessions"], 1);
        assert_eq!(body["metrics"]["sessionsOpened"], 1);
    }

    #[tokio::test]
    async fn test_auth_token_required() {
        let mut config = Config::default();
        config.http.auth_token = Some("t0ken".to_string());
        let app = streamable::router(store_with(config));

        let init = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        let response = app
            .clone()
            .oneshot(
                Request::post("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(init.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::post("/mcp")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer t0ken")
                    .body(Body::from(init.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Health stays open.
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_transport_display() {
        assert_eq!(TransportType::Sse.to_string(), "sse");
        assert_eq!(TransportType::Http.to_string(), "http");
    }
}
