//! Shared application state for the agent server.

use std::sync::{Arc, Mutex, PoisonError};

use shellcontrol::looping::Orchestrator;
use shellcontrol::transport::SessionEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Broadcast sender for every session's events (SSE observers).
    pub event_tx: Arc<broadcast::Sender<SessionEvent>>,
    /// Parent of every running session's termination token.
    root_cancel: Arc<Mutex<CancellationToken>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            orchestrator,
            event_tx: Arc::new(event_tx),
            root_cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Termination token for a new session.
    pub fn session_token(&self) -> CancellationToken {
        self.root_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Terminate every running session. Sessions started afterwards are unaffected.
    pub fn terminate_all(&self) {
        let mut root = self
            .root_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        root.cancel();
        *root = CancellationToken::new();
    }
}
