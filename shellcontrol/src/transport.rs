//! Event Transport: the queues between one session loop and its client.
//!
//! One inbound queue carries prompts, one outbound queue carries events in
//! emission order. Read-only observers can subscribe to a broadcast copy.
//! Termination is out-of-band through a shared [`CancellationToken`].

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::core::event::Event;

/// Messages a client may send into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Prompt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("event receiver disconnected")]
    Closed,
}

/// Fire-and-forget termination for a running session.
#[derive(Debug, Clone, Default)]
pub struct TerminationHandle(CancellationToken);

impl TerminationHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self(token)
    }

    /// Request termination. Returns immediately.
    pub fn terminate(&self) {
        self.0.cancel();
    }
}

/// An event tagged with its session for fan-out observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvent {
    pub session_id: Uuid,
    /// Position in the session's event stream, starting at 0.
    pub seq: u64,
    pub event: Event,
}

/// Write side of the outbound queue, owned by the loop.
#[derive(Debug)]
pub struct EventSink {
    session_id: Uuid,
    next_seq: u64,
    outbound: mpsc::Sender<Event>,
    observers: Option<broadcast::Sender<SessionEvent>>,
}

impl EventSink {
    /// Deliver `event` to the client, then to observers.
    ///
    /// Waits while the client queue is full. Observers never block.
    pub async fn emit(&mut self, event: Event) -> Result<(), TransportError> {
        let seq = self.next_seq;
        let copy = self.observers.as_ref().map(|_| event.clone());
        debug!(session = %self.session_id, seq, kind = event.kind(), "emit event");
        self.outbound
            .send(event)
            .await
            .map_err(|_| TransportError::Closed)?;
        self.next_seq += 1;
        if let (Some(observers), Some(event)) = (&self.observers, copy) {
            // No subscribers is not an error.
            let _ = observers.send(SessionEvent {
                session_id: self.session_id,
                seq,
                event,
            });
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Client side of a session channel.
#[derive(Debug)]
pub struct ClientEnd {
    pub session_id: Uuid,
    pub prompts: mpsc::Sender<Inbound>,
    pub events: mpsc::Receiver<Event>,
    pub termination: TerminationHandle,
}

/// Loop side of a session channel.
#[derive(Debug)]
pub struct LoopEnd {
    pub session_id: Uuid,
    pub inbound: mpsc::Receiver<Inbound>,
    pub sink: EventSink,
    pub cancel: CancellationToken,
}

impl LoopEnd {
    /// Also publish every event to `observers`.
    pub fn with_observers(mut self, observers: broadcast::Sender<SessionEvent>) -> Self {
        self.sink.observers = Some(observers);
        self
    }
}

/// Create the queues for one session. `cancel` becomes its termination signal.
pub fn session_channel(capacity: usize, cancel: CancellationToken) -> (ClientEnd, LoopEnd) {
    let session_id = Uuid::new_v4();
    let (prompt_tx, prompt_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let client = ClientEnd {
        session_id,
        prompts: prompt_tx,
        events: event_rx,
        termination: TerminationHandle::new(cancel.clone()),
    };
    let end = LoopEnd {
        session_id,
        inbound: prompt_rx,
        sink: EventSink {
            session_id,
            next_seq: 0,
            outbound: event_tx,
            observers: None,
        },
        cancel,
    };
    (client, end)
}
