//! HTTP+SSE transport.
//!
//! `GET /mcp` opens an event stream and a session; the first event is
//! `endpoint`, naming the URL to POST messages to. Responses come back as
//! `message` events on the same stream. Dropping the stream closes the
//! session.

use super::{error_response, error_response_with_status, finish_router, HttpState};
use crate::constants::{MCP_PATH, SSE_KEEP_ALIVE_INTERVAL, SSE_MESSAGES_PATH, SSE_SESSION_QUERY_PARAM};
use crate::error::ServerError;
use crate::protocol::Payload;
use crate::session::{CloseReason, SessionStore, TransportKind};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Build the SSE transport router.
pub fn router(store: Arc<SessionStore>) -> Router {
    let state = HttpState {
        store,
        transport: TransportKind::Sse,
    };
    let mcp = Router::new()
        .route(MCP_PATH, get(open_stream))
        .route(SSE_MESSAGES_PATH, post(post_message));
    finish_router(mcp, state)
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Closes the session when the stream that owns it is dropped.
struct StreamGuard {
    store: Arc<SessionStore>,
    id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.store.close(&self.id, CloseReason::TransportClosed) {
            debug!("SSE stream for session {} dropped", self.id);
        }
    }
}

async fn open_stream(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = state.store.create(TransportKind::Sse);
    let (tx, rx) = mpsc::unbounded_channel();
    // The session was just created, so attaching cannot miss.
    if let Err(e) = state.store.attach_stream(session.id(), tx) {
        warn!("Failed to attach SSE stream: {}", e);
    }

    let endpoint = format!(
        "{}?{}={}",
        SSE_MESSAGES_PATH,
        SSE_SESSION_QUERY_PARAM,
        session.id()
    );
    let guard = StreamGuard {
        store: Arc::clone(&state.store),
        id: session.id().to_string(),
    };

    let messages = UnboundedReceiverStream::new(rx).map(move |message| {
        let _owner = &guard;
        Ok::<_, Infallible>(Event::default().event("message").data(message.to_string()))
    });
    let stream = tokio_stream::once(Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint)))
        .chain(messages);

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE_INTERVAL))
}

async fn post_message(
    State(state): State<HttpState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(id) = query.session_id else {
        return error_response(&ServerError::bad_request(format!(
            "Missing {} query parameter",
            SSE_SESSION_QUERY_PARAM
        )));
    };

    let session = match state.store.get(&id) {
        Ok(session) => session,
        Err(e) => return error_response_with_status(StatusCode::NOT_FOUND, &e),
    };

    let payload = match Payload::parse(&body) {
        Ok(payload) => payload,
        Err(e) => return error_response(&e),
    };

    session.touch();
    tokio::spawn(async move {
        if let Some(reply) = session.handler().handle_payload(payload, Some(session.id())).await {
            if !session.push(reply) {
                debug!("Session {} stream gone; response dropped", session.id());
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}
