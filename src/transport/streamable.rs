//! Streamable HTTP transport on a single `/mcp` endpoint.
//!
//! | Method   | Session header | Result                                       |
//! |----------|----------------|----------------------------------------------|
//! | `POST`   | absent         | must be `initialize`; creates a session      |
//! | `POST`   | known          | JSON response, or 202 for notifications only |
//! | `GET`    | known          | SSE push channel for the session             |
//! | `DELETE` | known          | closes the session                           |
//!
//! Unknown, closed or malformed ids are answered with 400 and a `-32000`
//! envelope.

use super::{error_response, finish_router, HttpState};
use crate::constants::{MCP_PATH, SESSION_ID_HEADER, SSE_KEEP_ALIVE_INTERVAL};
use crate::error::ServerError;
use crate::protocol::Payload;
use crate::session::{CloseReason, Session, SessionStore, TransportKind};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

/// Build the streamable HTTP transport router.
pub fn router(store: Arc<SessionStore>) -> Router {
    let state = HttpState {
        store,
        transport: TransportKind::Http,
    };
    let mcp = Router::new().route(
        MCP_PATH,
        get(open_stream).post(post_message).delete(terminate),
    );
    finish_router(mcp, state)
}

/// Read the session header. `Ok(None)` when absent, an error when it is not
/// visible ASCII.
fn session_header(headers: &HeaderMap) -> Result<Option<&str>, ServerError> {
    match headers.get(SESSION_ID_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| ServerError::bad_request("Invalid session ID")),
    }
}

fn lookup(state: &HttpState, headers: &HeaderMap) -> Result<Arc<Session>, Response> {
    let id = session_header(headers)
        .map_err(|e| error_response(&e))?
        .ok_or_else(|| error_response(&ServerError::bad_request("No valid session ID provided")))?;
    state.store.get(id).map_err(|e| error_response(&e))
}

async fn post_message(State(state): State<HttpState>, headers: HeaderMap, body: String) -> Response {
    let payload = match Payload::parse(&body) {
        Ok(payload) => payload,
        Err(e) => return error_response(&e),
    };

    let header = match session_header(&headers) {
        Ok(header) => header,
        Err(e) => return error_response(&e),
    };
    let (session, created) = match header {
        None if payload.contains_initialize() => (state.store.create(TransportKind::Http), true),
        None => {
            return error_response(&ServerError::bad_request("No valid session ID provided"));
        }
        Some(_) => match lookup(&state, &headers) {
            Ok(session) => (session, false),
            Err(response) => return response,
        },
    };

    session.touch();
    let reply = session
        .handler()
        .handle_payload(payload, Some(session.id()))
        .await;

    let mut response = match reply {
        Some(value) => (StatusCode::OK, Json(value)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if created {
        if let Ok(value) = HeaderValue::from_str(session.id()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
        }
    }
    response
}

async fn open_stream(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let session = match lookup(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    if let Err(e) = state.store.attach_stream(session.id(), tx) {
        return error_response(&e);
    }
    debug!("Push stream opened for session {}", session.id());

    let stream = UnboundedReceiverStream::new(rx).map(|message| {
        Ok::<_, Infallible>(Event::default().event("message").data(message.to_string()))
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE_INTERVAL))
        .into_response()
}

async fn terminate(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let id = match session_header(&headers) {
        Ok(Some(id)) => id,
        Ok(None) => {
            return error_response(&ServerError::bad_request("No valid session ID provided"))
        }
        Err(e) => return error_response(&e),
    };
    if state.store.close(id, CloseReason::Terminated) {
        StatusCode::OK.into_response()
    } else {
        error_response(&ServerError::session_not_found(id))
    }
}
