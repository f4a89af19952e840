//! Graceful shutdown handling.
//!
//! Signals (SIGINT, SIGTERM, SIGHUP) flip a watch channel that every
//! transport listens on. [`ShutdownController::graceful_shutdown`] then
//! walks the phases: stop accepting, close sessions, wait for checked-out
//! connections, close the pool.

use crate::server::McpServer;
use crate::session::{CloseReason, SessionStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Shutdown signal that can be awaited.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|&v| v).await;
    }

    /// Check if shutdown has been signaled without blocking.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Shutdown phases for coordinated cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Initiated,
    ClosingSessions,
    DrainingRequests,
    ClosingConnections,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Initiated => write!(f, "initiated"),
            ShutdownPhase::ClosingSessions => write!(f, "closing_sessions"),
            ShutdownPhase::DrainingRequests => write!(f, "draining_requests"),
            ShutdownPhase::ClosingConnections => write!(f, "closing_connections"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Controller for managing graceful shutdown.
pub struct ShutdownController {
    sender: watch::Sender<bool>,
    shutting_down: AtomicBool,
    phase_sender: broadcast::Sender<ShutdownPhase>,
    drain_timeout: Duration,
}

impl ShutdownController {
    pub fn new(drain_timeout: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        let (phase_sender, _) = broadcast::channel(16);

        Self {
            sender,
            shutting_down: AtomicBool::new(false),
            phase_sender,
            drain_timeout,
        }
    }

    /// Get a shutdown signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to shutdown phase notifications.
    pub fn subscribe_phases(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.phase_sender.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Initiate shutdown. Idempotent.
    pub fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown...");
            let _ = self.sender.send(true);
            let _ = self.phase_sender.send(ShutdownPhase::Initiated);
        }
    }

    fn notify_phase(&self, phase: ShutdownPhase) {
        info!("Shutdown phase: {}", phase);
        let _ = self.phase_sender.send(phase);
    }

    /// Run every shutdown phase against the server and its session store.
    pub async fn graceful_shutdown(&self, server: &McpServer, sessions: Option<&SessionStore>) {
        self.shutdown();

        self.notify_phase(ShutdownPhase::ClosingSessions);
        if let Some(store) = sessions {
            let closed = store.close_all(CloseReason::Shutdown);
            if closed > 0 {
                info!("Closed {} sessions", closed);
            }
        }

        self.notify_phase(ShutdownPhase::DrainingRequests);
        self.drain_requests(server).await;

        self.notify_phase(ShutdownPhase::ClosingConnections);
        server.shutdown().await;

        self.notify_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown complete");
    }

    /// Wait for checked-out pool connections to come back.
    async fn drain_requests(&self, server: &McpServer) {
        let start = std::time::Instant::now();

        loop {
            let in_use = server
                .connections()
                .status()
                .await
                .pool
                .map(|p| p.in_use_connections)
                .unwrap_or(0);

            if in_use == 0 {
                info!("All requests drained");
                break;
            }

            if start.elapsed() > self.drain_timeout {
                warn!(
                    "Drain timeout exceeded with {} connections still in use",
                    in_use
                );
                break;
            }

            info!("Waiting for {} in-flight requests to complete...", in_use);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

/// Shared shutdown controller type.
pub type SharedShutdownController = Arc<ShutdownController>;

/// Create a new shared shutdown controller.
pub fn new_shutdown_controller(drain_timeout: Duration) -> SharedShutdownController {
    Arc::new(ShutdownController::new(drain_timeout))
}

/// Install signal handlers that trigger `controller.shutdown()`.
pub fn install_signal_handlers(controller: SharedShutdownController) {
    let ctrl_c_controller = Arc::clone(&controller);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                ctrl_c_controller.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C signal: {}", e),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("Received {}, initiating shutdown...", name);
                        controller.shutdown();
                    }
                    Err(e) => error!("Failed to install {} handler: {}", name, e),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::TransportKind;

    #[test]
    fn test_shutdown_signal() {
        let controller = ShutdownController::new(Duration::from_secs(1));
        let signal = controller.signal();
        assert!(!signal.is_shutdown());

        controller.shutdown();
        assert!(controller.is_shutting_down());
        assert!(signal.is_shutdown());

        // Idempotent
        controller.shutdown();
        assert!(controller.is_shutting_down());
    }

    #[tokio::test]
    async fn test_signal_wakes_waiter() {
        let controller = new_shutdown_controller(Duration::from_secs(1));
        let mut signal = controller.signal();
        let waiter = tokio::spawn(async move { signal.recv().await });
        controller.shutdown();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_graceful_shutdown_closes_sessions() {
        let controller = ShutdownController::new(Duration::from_millis(100));
        let server = McpServer::new(Config::default());
        let store = SessionStore::new(server.clone());
        store.create(TransportKind::Http);
        store.create(TransportKind::Sse);

        let mut phases = controller.subscribe_phases();
        controller.graceful_shutdown(&server, Some(&store)).await;

        assert!(store.is_empty());
        assert!(!server.connections().is_connected().await);

        let mut seen = Vec::new();
        while let Ok(phase) = phases.try_recv() {
            seen.push(phase);
        }
        assert_eq!(seen.first(), Some(&ShutdownPhase::Initiated));
        assert_eq!(seen.last(), Some(&ShutdownPhase::Complete));
    }

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::ClosingSessions.to_string(), "closing_sessions");
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }
}
