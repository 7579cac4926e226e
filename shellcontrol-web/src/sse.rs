//! Server-Sent Events stream of every session's events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use shellcontrol::transport::SessionEvent;
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::AppState;

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(session_event) => {
                    if let Some(event) = to_sse(&session_event) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// One SSE message per event, named after the event type.
fn to_sse(session_event: &SessionEvent) -> Option<Event> {
    let json = payload_json(session_event)?;
    Some(
        Event::default()
            .event(session_event.event.kind())
            .id(session_event.seq.to_string())
            .data(json),
    )
}

fn payload_json(session_event: &SessionEvent) -> Option<String> {
    match serde_json::to_string(session_event) {
        Ok(json) => Some(json),
        Err(err) => {
            warn!(err = %err, "failed to serialize session event");
            None
        }
    }
}
