//! In-process metrics and request correlation.
//!
//! Counters are plain atomics; a [`MetricsSnapshot`] is served on `/health`
//! and by the `connection` tool's `status` action. Every routed JSON-RPC
//! request gets a short correlation id carried in a [`RequestContext`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Generate a short correlation ID (8 characters) for compact logging.
pub fn generate_short_correlation_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Correlation information for one JSON-RPC request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request.
    pub correlation_id: String,
    /// When the request was received.
    pub start_time: Instant,
    /// Session the request arrived on.
    pub session_id: Option<String>,
    /// Method being called.
    pub operation: Option<String>,
}

impl RequestContext {
    /// Create a new request context with a generated correlation ID.
    pub fn new() -> Self {
        Self {
            correlation_id: generate_short_correlation_id(),
            start_time: Instant::now(),
            session_id: None,
            operation: None,
        }
    }

    /// Set the session identifier.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the operation name.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Get the elapsed time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Create a log prefix for consistent logging format.
    pub fn log_prefix(&self) -> String {
        match (&self.session_id, &self.operation) {
            (Some(session), Some(op)) => {
                format!("[{}] [{}] [{}]", self.correlation_id, short(session), op)
            }
            (Some(session), None) => format!("[{}] [{}]", self.correlation_id, short(session)),
            (None, Some(op)) => format!("[{}] [{}]", self.correlation_id, op),
            (None, None) => format!("[{}]", self.correlation_id),
        }
    }
}

fn short(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Server metrics collection.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// JSON-RPC requests routed to a handler.
    pub requests_total: AtomicU64,

    /// Requests answered with a JSON-RPC error object.
    pub requests_failed: AtomicU64,

    /// `tools/call` invocations.
    pub tool_calls_total: AtomicU64,

    /// Tool calls that returned `isError: true`.
    pub tool_errors: AtomicU64,

    /// Statements sent to SQL Server.
    pub queries_total: AtomicU64,

    /// Statements that failed.
    pub queries_failed: AtomicU64,

    /// Total statement execution time in milliseconds.
    pub query_time_ms_total: AtomicU64,

    /// Sessions created.
    pub sessions_opened: AtomicU64,

    /// Sessions closed.
    pub sessions_closed: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a routed request.
    pub fn record_request(&self, success: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a tool call and whether it was flagged as an error.
    pub fn record_tool_call(&self, is_error: bool) {
        self.tool_calls_total.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.tool_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a statement execution.
    pub fn record_query(&self, success: bool, duration: Duration) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.query_time_ms_total
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a session creation.
    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session close.
    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            tool_calls_total: self.tool_calls_total.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
            queries_total: self.queries_total.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            query_time_ms_total: self.query_time_ms_total.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub tool_calls_total: u64,
    pub tool_errors: u64,
    pub queries_total: u64,
    pub queries_failed: u64,
    pub query_time_ms_total: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
}

impl MetricsSnapshot {
    /// Calculate average query time in milliseconds.
    pub fn avg_query_time_ms(&self) -> f64 {
        if self.queries_total == 0 {
            return 0.0;
        }
        self.query_time_ms_total as f64 / self.queries_total as f64
    }

    /// Sessions currently open according to the counters.
    pub fn sessions_active(&self) -> u64 {
        self.sessions_opened.saturating_sub(self.sessions_closed)
    }
}

/// Shared metrics type for thread-safe access.
pub type SharedMetrics = Arc<ServerMetrics>;

/// Create a new shared metrics collector.
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(ServerMetrics::new())
}

/// Query timer for measuring execution duration.
pub struct QueryTimer {
    start: Instant,
    metrics: SharedMetrics,
}

impl QueryTimer {
    /// Start a new query timer.
    pub fn start(metrics: SharedMetrics) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    /// Stop the timer and record the result.
    pub fn stop(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        self.metrics.record_query(success, duration);
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id() {
        let id = generate_short_correlation_id();
        assert_eq!(id.len(), 8);
        assert_ne!(id, generate_short_correlation_id());
    }

    #[test]
    fn test_log_prefix() {
        let ctx = RequestContext::with_session(
            RequestContext::new(),
            "0123456789abcdef",
        )
        .with_operation("tools/call");
        let prefix = ctx.log_prefix();
        assert!(prefix.contains("[01234567]"));
        assert!(prefix.ends_with("[tools/call]"));
    }

    #[test]
    fn test_counters() {
        let metrics = ServerMetrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_tool_call(true);
        metrics.record_query(true, Duration::from_millis(10));
        metrics.record_query(false, Duration::from_millis(30));
        metrics.record_session_opened();
        metrics.record_session_opened();
        metrics.record_session_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.requests_failed, 1);
        assert_eq!(snap.tool_errors, 1);
        assert_eq!(snap.queries_failed, 1);
        assert!((snap.avg_query_time_ms() - 20.0).abs() < f64::EPSILON);
        assert_eq!(snap.sessions_active(), 1);
    }

    #[test]
    fn test_query_timer() {
        let metrics = new_shared_metrics();
        let timer = QueryTimer::start(Arc::clone(&metrics));
        timer.stop(true);
        assert_eq!(metrics.snapshot().queries_total, 1);
    }
}
