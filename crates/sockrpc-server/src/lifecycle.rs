//! Server lifecycle management and graceful shutdown

use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

/// Server lifecycle manager
#[derive(Debug)]
pub struct ServerLifecycle {
    state: RwLock<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Server states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Bound but not yet accepting
    Starting,
    /// Accepting connections
    Running,
    /// No longer accepting; open connections are finishing
    ShuttingDown,
    /// All connections closed
    Stopped,
}

/// Shutdown signal
pub type ShutdownSignal = broadcast::Receiver<()>;

impl ServerLifecycle {
    /// Create a new lifecycle manager
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            state: RwLock::new(ServerState::Starting),
            shutdown_tx,
        }
    }

    /// Get current server state
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Move from `Starting` to `Running`; false if shutdown already began
    pub async fn start(&self) -> bool {
        let mut state = self.state.write().await;
        if *state != ServerState::Starting {
            return false;
        }
        *state = ServerState::Running;
        tracing::info!("Server started");
        true
    }

    /// Initiate graceful shutdown
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if matches!(*state, ServerState::ShuttingDown | ServerState::Stopped) {
                return;
            }
            *state = ServerState::ShuttingDown;
        }
        let _ = self.shutdown_tx.send(());
        tracing::info!("Server shutdown initiated");
    }

    /// Mark the server as fully stopped
    pub async fn stopped(&self) {
        *self.state.write().await = ServerState::Stopped;
    }

    /// Subscribe to shutdown signals
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_tx.subscribe()
    }
}

impl Default for ServerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for triggering graceful server shutdown
///
/// Cloneable; any clone can stop the server it was taken from.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    lifecycle: Arc<ServerLifecycle>,
}

impl ShutdownHandle {
    pub(crate) const fn new(lifecycle: Arc<ServerLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Trigger graceful server shutdown
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
    }

    /// Check if shutdown has been initiated
    pub async fn is_shutting_down(&self) -> bool {
        matches!(
            self.lifecycle.state().await,
            ServerState::ShuttingDown | ServerState::Stopped
        )
    }
}
