//! Duplex WebSocket channel: one session per connection.
//!
//! Inbound frames are `{"type":"prompt","payload":"..."}` or
//! `{"type":"terminate"}`. Outbound frames are serialized events. The socket
//! is closed after the session's final Completed or Abort event.

use std::fmt::Display;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use shellcontrol::looping::LoopOutcome;
use shellcontrol::transport::{Inbound, TerminationHandle, session_channel};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

const EVENT_QUEUE: usize = 64;

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Prompt { payload: String },
    Terminate,
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        serve_connection(sender, receiver, state).await;
    })
}

/// Relay one session over a split socket until it ends or the client leaves.
pub async fn serve_connection<S, R, E>(
    mut sender: S,
    mut receiver: R,
    state: AppState,
) -> Option<LoopOutcome>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (client, end) = session_channel(EVENT_QUEUE, state.session_token());
    let end = end.with_observers(state.event_tx.as_ref().clone());
    let session_id = client.session_id;
    info!(%session_id, "websocket session opened");

    let orchestrator = state.orchestrator.clone();
    let session = tokio::spawn(async move { orchestrator.run(end).await });

    let prompts = client.prompts;
    let termination = client.termination;
    let mut events = client.events;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let terminal = event.is_terminal();
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if let Err(err) = sender.send(Message::Text(json.into())).await {
                            warn!(%session_id, err = %err, "failed to send event");
                            break;
                        }
                    }
                    Err(err) => warn!(%session_id, err = %err, "failed to serialize event"),
                }
                if terminal {
                    if let Err(err) = sender.send(Message::Close(None)).await {
                        debug!(%session_id, err = %err, "close frame not sent");
                    }
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(text.as_str(), &prompts, &termination);
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(%session_id, "client disconnected");
                    break;
                }
                Some(Err(err)) => {
                    warn!(%session_id, err = %err, "websocket receive failed");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    // Closing both queues lets a still-running loop observe the disconnect.
    drop(events);
    drop(prompts);
    match session.await {
        Ok(outcome) => {
            info!(
                %session_id,
                conclusion = outcome.stop.conclusion(),
                usage = %outcome.usage.summary(),
                "session ended"
            );
            Some(outcome)
        }
        Err(err) => {
            error!(%session_id, err = %err, "session task failed");
            None
        }
    }
}

/// Never waits on the prompt queue, so a terminate frame is always read promptly.
fn handle_client_message(
    text: &str,
    prompts: &mpsc::Sender<Inbound>,
    termination: &TerminationHandle,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Prompt { payload }) => {
            let prompt = payload.trim();
            if prompt.is_empty() {
                warn!("ignoring empty prompt");
                return;
            }
            info!(chars = prompt.len(), "received prompt");
            match prompts.try_send(Inbound::Prompt(prompt.to_string())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("prompt queue full, dropping prompt"),
                Err(TrySendError::Closed(_)) => debug!("session no longer accepts prompts"),
            }
        }
        Ok(ClientMessage::Terminate) => {
            info!("termination requested by client");
            termination.terminate();
        }
        Err(err) => warn!(err = %err, "unrecognized client message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{test_state, test_state_with_tools};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
    use serde_json::Value;
    use shellcontrol::core::error::AbortReason;
    use shellcontrol::looping::LoopStop;
    use shellcontrol::test_support::{
        ScriptedPlanner, StallingTools, complete_json, run_command_json,
    };

    type Outbound = UnboundedReceiver<Message>;
    type ClientTx = UnboundedSender<Result<Message, axum::Error>>;

    fn socket() -> (
        UnboundedSender<Message>,
        Outbound,
        ClientTx,
        UnboundedReceiver<Result<Message, axum::Error>>,
    ) {
        let (out_tx, out_rx) = unbounded();
        let (in_tx, in_rx) = unbounded();
        (out_tx, out_rx, in_tx, in_rx)
    }

    fn send_text(tx: &ClientTx, text: &str) {
        tx.unbounded_send(Ok(Message::Text(text.to_string().into())))
            .expect("client send");
    }

    async fn drain(mut out: Outbound) -> (Vec<Value>, bool) {
        let mut frames = Vec::new();
        let mut closed = false;
        while let Some(msg) = out.next().await {
            match msg {
                Message::Text(text) => {
                    frames.push(serde_json::from_str(text.as_str()).expect("event json"));
                }
                Message::Close(_) => closed = true,
                _ => {}
            }
        }
        (frames, closed)
    }

    fn types(frames: &[Value]) -> Vec<&str> {
        frames
            .iter()
            .map(|frame| frame["type"].as_str().unwrap_or_default())
            .collect()
    }

    #[test]
    fn parses_client_messages() {
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"prompt","payload":"ls"}"#)
                .expect("prompt"),
            ClientMessage::Prompt {
                payload: "ls".to_string()
            }
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"terminate"}"#).expect("terminate"),
            ClientMessage::Terminate
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"resize"}"#).is_err());
    }

    #[tokio::test]
    async fn prompt_runs_session_and_closes_after_completion() {
        let state = test_state(ScriptedPlanner::replies([
            run_command_json("echo hi"),
            complete_json("done"),
        ]));
        let mut observed = state.event_tx.subscribe();
        let (out_tx, out_rx, in_tx, in_rx) = socket();
        send_text(&in_tx, r#"{"type":"bogus"}"#);
        send_text(&in_tx, r#"{"type":"prompt","payload":"  say hi  "}"#);

        let outcome = serve_connection(out_tx, in_rx, state)
            .await
            .expect("outcome");
        let (frames, closed) = drain(out_rx).await;

        assert_eq!(
            types(&frames),
            ["Prompt", "PlannerResponse", "ToolResult", "Completed"]
        );
        assert_eq!(frames[0]["payload"], "say hi");
        assert_eq!(frames[3]["payload"], "done");
        assert!(closed);
        assert!(matches!(outcome.stop, LoopStop::Completed { .. }));

        let first = observed.recv().await.expect("observer copy");
        assert_eq!(first.seq, 0);
        assert_eq!(first.session_id, outcome.session.id());
    }

    #[tokio::test]
    async fn terminate_message_aborts_session() {
        let state = test_state(ScriptedPlanner::replies([complete_json("unused")]));
        let (out_tx, out_rx, in_tx, in_rx) = socket();
        send_text(&in_tx, r#"{"type":"terminate"}"#);
        send_text(&in_tx, r#"{"type":"prompt","payload":"too late"}"#);

        let outcome = serve_connection(out_tx, in_rx, state)
            .await
            .expect("outcome");
        let (frames, closed) = drain(out_rx).await;

        assert_eq!(types(&frames), ["Abort"]);
        assert_eq!(frames[0]["payload"], "Terminated on request.");
        assert!(closed);
        assert_eq!(outcome.stop, LoopStop::Aborted(AbortReason::Terminated));
    }

    #[tokio::test]
    async fn terminate_is_read_even_when_prompt_queue_is_full() {
        let state = test_state_with_tools(
            ScriptedPlanner::replies([
                run_command_json("sleep 5"),
                run_command_json("sleep 5"),
                run_command_json("sleep 5"),
            ]),
            Arc::new(StallingTools::new(Duration::from_secs(5))),
        );
        let (out_tx, out_rx, in_tx, in_rx) = socket();
        for n in 0..80 {
            send_text(&in_tx, &format!(r#"{{"type":"prompt","payload":"step {n}"}}"#));
        }
        send_text(&in_tx, r#"{"type":"terminate"}"#);

        let started = Instant::now();
        let outcome = serve_connection(out_tx, in_rx, state)
            .await
            .expect("outcome");
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "terminate took {:?}",
            started.elapsed()
        );
        let (frames, closed) = drain(out_rx).await;

        assert_eq!(types(&frames).last(), Some(&"Abort"));
        assert!(closed);
        assert_eq!(outcome.stop, LoopStop::Aborted(AbortReason::Terminated));
    }

    #[tokio::test]
    async fn client_leaving_before_prompt_ends_session() {
        let state = test_state(ScriptedPlanner::default());
        let (out_tx, out_rx, in_tx, in_rx) = socket();
        drop(in_tx);

        let outcome = serve_connection(out_tx, in_rx, state)
            .await
            .expect("outcome");
        let (frames, _) = drain(out_rx).await;

        assert!(frames.is_empty());
        assert_eq!(outcome.stop, LoopStop::Aborted(AbortReason::TransportClosed));
    }
}
