//! Transport session registry.
//!
//! Each HTTP client (and the single stdio peer) owns one [`Session`] with
//! its own [`SessionHandler`]. Sessions move from active to closed exactly
//! once; closed ids are remembered so late requests get "not found" rather
//! than silently opening a new session.

use crate::error::{ServerError, ServerResult};
use crate::handlers::SessionHandler;
use crate::server::McpServer;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque session identifier (UUID v4 text).
pub type SessionId = String;

/// Transport a session was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// Lookup result for an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Closed,
    Unknown,
}

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The SSE stream or push channel went away.
    TransportClosed,
    /// The client sent `DELETE /mcp`.
    Terminated,
    /// stdin reached end of file.
    EndOfInput,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::TransportClosed => write!(f, "transport closed"),
            CloseReason::Terminated => write!(f, "terminated by client"),
            CloseReason::EndOfInput => write!(f, "end of input"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// One live session.
pub struct Session {
    id: SessionId,
    transport: TransportKind,
    handler: SessionHandler,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    outbound: Mutex<Option<UnboundedSender<Value>>>,
}

impl Session {
    fn new(id: SessionId, transport: TransportKind, handler: SessionHandler) -> Self {
        let now = Instant::now();
        Self {
            id,
            transport,
            handler,
            created_at: now,
            last_activity: Mutex::new(now),
            outbound: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session's request handler.
    pub fn handler(&self) -> &SessionHandler {
        &self.handler
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Record activity on the session.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Push a message to the attached stream.
    ///
    /// Returns `false` when no stream is attached or the receiver is gone.
    pub fn push(&self, message: Value) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Whether a push stream is attached.
    pub fn has_stream(&self) -> bool {
        self.outbound
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    fn detach_stream(&self) {
        self.outbound.lock().take();
    }
}

/// Summary of a session for `/health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub transport: TransportKind,
    pub initialized: bool,
    pub age_secs: u64,
    pub idle_secs: u64,
}

#[derive(Default)]
struct StoreInner {
    active: HashMap<SessionId, Arc<Session>>,
    closed: HashSet<SessionId>,
}

/// Registry of sessions, shared by a transport's request handlers.
pub struct SessionStore {
    server: McpServer,
    inner: RwLock<StoreInner>,
}

impl SessionStore {
    pub fn new(server: McpServer) -> Self {
        Self {
            server,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// The server sessions are created from.
    pub fn server(&self) -> &McpServer {
        &self.server
    }

    /// Open a new session with a fresh handler.
    pub fn create(&self, transport: TransportKind) -> Arc<Session> {
        let mut inner = self.inner.write();
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !inner.active.contains_key(&candidate) && !inner.closed.contains(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(Session::new(
            id.clone(),
            transport,
            self.server.new_handler(),
        ));
        inner.active.insert(id.clone(), Arc::clone(&session));
        drop(inner);

        self.server.metrics().record_session_opened();
        info!("Session {} opened ({})", id, transport);
        session
    }

    /// Look up an active session.
    pub fn get(&self, id: &str) -> ServerResult<Arc<Session>> {
        self.inner
            .read()
            .active
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::session_not_found(id))
    }

    pub fn status(&self, id: &str) -> SessionStatus {
        let inner = self.inner.read();
        if inner.active.contains_key(id) {
            SessionStatus::Active
        } else if inner.closed.contains(id) {
            SessionStatus::Closed
        } else {
            SessionStatus::Unknown
        }
    }

    /// Register the push channel of a session, replacing any previous one.
    pub fn attach_stream(&self, id: &str, sender: UnboundedSender<Value>) -> ServerResult<()> {
        let session = self.get(id)?;
        *session.outbound.lock() = Some(sender);
        debug!("Session {} stream attached", id);
        Ok(())
    }

    /// Close a session. Returns `false` if it was not active.
    pub fn close(&self, id: &str, reason: CloseReason) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner.active.remove(id);
            if removed.is_some() {
                inner.closed.insert(id.to_string());
            }
            removed
        };

        match removed {
            Some(session) => {
                session.detach_stream();
                self.server.metrics().record_session_closed();
                info!("Session {} closed: {}", id, reason);
                true
            }
            None => false,
        }
    }

    /// Close every active session. Returns how many were closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<SessionId> = self.inner.read().active.keys().cloned().collect();
        ids.iter().filter(|id| self.close(id, reason)).count()
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.inner.read().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of active sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.inner
            .read()
            .active
            .values()
            .map(|s| SessionInfo {
                id: s.id.clone(),
                transport: s.transport,
                initialized: s.handler.is_initialized(),
                age_secs: s.age().as_secs(),
                idle_secs: s.idle_for().as_secs(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::sync::mpsc;

    fn store() -> SessionStore {
        SessionStore::new(McpServer::new(Config::default()))
    }

    #[test]
    fn test_create_and_get() {
        let store = store();
        let session = store.create(TransportKind::Http);
        assert_eq!(session.id().len(), 36);
        assert_eq!(store.status(session.id()), SessionStatus::Active);
        assert!(store.get(session.id()).is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let store = store();
        let a = store.create(TransportKind::Sse);
        let b = store.create(TransportKind::Sse);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_close_is_terminal() {
        let store = store();
        let id = store.create(TransportKind::Http).id().to_string();

        assert!(store.close(&id, CloseReason::Terminated));
        assert!(!store.close(&id, CloseReason::Terminated));
        assert_eq!(store.status(&id), SessionStatus::Closed);
        assert!(matches!(store.get(&id), Err(ServerError::SessionNotFound(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_id() {
        let store = store();
        assert_eq!(store.status("nope"), SessionStatus::Unknown);
        assert!(!store.close("nope", CloseReason::Terminated));
        assert!(store.attach_stream("nope", mpsc::unbounded_channel().0).is_err());
    }

    #[tokio::test]
    async fn test_push_through_stream() {
        let store = store();
        let session = store.create(TransportKind::Sse);
        assert!(!session.push(serde_json::json!({"a": 1})));

        let (tx, mut rx) = mpsc::unbounded_channel();
        store.attach_stream(session.id(), tx).unwrap();
        assert!(session.has_stream());
        assert!(session.push(serde_json::json!({"a": 1})));
        assert_eq!(rx.recv().await.unwrap()["a"], 1);

        store.close(session.id(), CloseReason::TransportClosed);
        assert!(!session.push(serde_json::json!({"a": 2})));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_close_all_and_metrics() {
        let store = store();
        store.create(TransportKind::Http);
        store.create(TransportKind::Http);
        assert_eq!(store.close_all(CloseReason::Shutdown), 2);
        assert_eq!(store.server().metrics().snapshot().sessions_active(), 0);
    }

    #[test]
    fn test_sessions_have_separate_handlers() {
        let store = store();
        let a = store.create(TransportKind::Http);
        let b = store.create(TransportKind::Http);
        a.handler().mark_initialized("2025-03-26");
        assert!(!b.handler().is_initialized());
        let listed = store.list();
        assert_eq!(listed.iter().filter(|s| s.initialized).count(), 1);
    }
}
