// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The live transport's single WebSocket endpoint: one connection, many
//! attached sessions. Mirrors `crates/mux`'s aggregated
//! `/ws/mux` handler (one socket fanning out many upstream event streams)
//! crossed with this codebase's own `/ws` auth-then-dispatch loop, extended
//! with dynamic per-session attach/detach instead of one fixed subscription
//! set chosen at upgrade time.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client_span;
use crate::error::DispatchError;
use crate::model::SessionId;
use crate::orchestrator::LifecycleEvent;
use crate::transport::auth;
use crate::transport::msg::{ClientMessage, ServerMessage};
use crate::transport::state::AppState;

/// `GET /ws` — upgrade to the live transport. Auth happens post-upgrade via
/// the client's first `auth` message; nothing here requires a token, since
/// browsers cannot set `Authorization` headers on a WebSocket handshake.
pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

fn next_client_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("ws-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Everything torn down when an attached session's delivery task ends,
/// either because the client `detach`ed or the stream hit an
/// [`DispatchError::Overflow`].
struct Attachment {
    handle: JoinHandle<()>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Per-connection event loop. Owns the outbound writer half directly since
/// only one task (this one) ever calls `send`; attached-session delivery
/// tasks and the lifecycle forwarder push through `outbound_tx` instead of
/// writing to the socket themselves.
async fn handle_connection(state: Arc<AppState>, socket: WebSocket) {
    let client_id = next_client_id();
    let span = client_span!(client_id);
    let _guard = span.enter();

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(state.settings.backpressure_capacity);

    let mut authed_user: Option<String> = None;
    let mut attachments: HashMap<SessionId, Attachment> = HashMap::new();
    let mut lifecycle_rx = state.orchestrator.subscribe_lifecycle();

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(msg) = outgoing else { break };
                if send_json(&mut ws_tx, &msg).await.is_err() {
                    break;
                }
            }
            lifecycle = lifecycle_rx.recv() => {
                let event = match lifecycle {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if let Some(user_id) = &authed_user {
                    if let Some(msg) = lifecycle_message_for(user_id, event) {
                        if send_json(&mut ws_tx, &msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
            incoming = ws_rx.next() => {
                let Some(incoming) = incoming else { break };
                let msg = match incoming {
                    Ok(m) => m,
                    Err(_) => break,
                };
                match msg {
                    Message::Text(text) => {
                        if !handle_text(&state, &text, &mut authed_user, &mut attachments, &outbound_tx, &mut ws_tx).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
}

fn lifecycle_message_for(user_id: &str, event: LifecycleEvent) -> Option<ServerMessage> {
    match event {
        LifecycleEvent::Created(session) if session.owner_user_id == user_id => {
            Some(ServerMessage::SessionCreated { session })
        }
        LifecycleEvent::Updated(session) if session.owner_user_id == user_id => {
            Some(ServerMessage::SessionUpdated { session })
        }
        LifecycleEvent::Closed { session_id, seq, owner_user_id } if owner_user_id == user_id => {
            Some(ServerMessage::SessionClosed { session_id: session_id.as_str().to_owned(), seq })
        }
        _ => None,
    }
}

/// Dispatch one decoded client message. Returns `false` when the connection
/// should close (a send failure on the socket itself).
async fn handle_text(
    state: &Arc<AppState>,
    text: &str,
    authed_user: &mut Option<String>,
    attachments: &mut HashMap<SessionId, Attachment>,
    outbound_tx: &mpsc::Sender<ServerMessage>,
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
) -> bool {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let err = DispatchError::invalid_argument(format!("malformed message: {e}"));
            return send_json(ws_tx, &ServerMessage::error(&err, None)).await.is_ok();
        }
    };

    match client_msg {
        ClientMessage::Auth { credential } => {
            match auth::validate_credential(&credential, state.settings.auth_token.as_deref()) {
                Ok(user_id) => {
                    *authed_user = Some(user_id.clone());
                    send_json(ws_tx, &ServerMessage::Ok { user_id: Some(user_id) }).await.is_ok()
                }
                Err(err) => send_json(ws_tx, &ServerMessage::error(&err, None)).await.is_ok(),
            }
        }

        ClientMessage::Attach { session_id, after_seq } => {
            attach_and_stream(state, &session_id, after_seq, None, &*authed_user, attachments, outbound_tx, ws_tx).await
        }

        ClientMessage::Detach { session_id } => {
            let Ok(parsed) = SessionId::parse(&session_id) else {
                let err = DispatchError::invalid_argument("invalid session id");
                return send_json(ws_tx, &ServerMessage::error(&err, Some(session_id))).await.is_ok();
            };
            attachments.remove(&parsed);
            send_json(ws_tx, &ServerMessage::ok()).await.is_ok()
        }

        ClientMessage::Catchup { session_id, after_seq } => {
            let limit = Some(state.settings.backpressure_capacity);
            attach_and_stream(state, &session_id, after_seq, limit, &*authed_user, attachments, outbound_tx, ws_tx).await
        }

        ClientMessage::Input { session_id, data } => {
            let Some(user_id) = authed_user.clone() else {
                return send_json(ws_tx, &ServerMessage::error(&DispatchError::NotAuthenticated, Some(session_id)))
                    .await
                    .is_ok();
            };
            let Ok(parsed) = SessionId::parse(&session_id) else {
                let err = DispatchError::invalid_argument("invalid session id");
                return send_json(ws_tx, &ServerMessage::error(&err, Some(session_id))).await.is_ok();
            };
            match state.orchestrator.write(&parsed, &user_id, data).await {
                Ok(()) => send_json(ws_tx, &ServerMessage::ok()).await.is_ok(),
                Err(err) => send_json(ws_tx, &ServerMessage::error(&err, Some(session_id))).await.is_ok(),
            }
        }

        ClientMessage::Resize { session_id, cols, rows } => {
            let Some(user_id) = authed_user.clone() else {
                return send_json(ws_tx, &ServerMessage::error(&DispatchError::NotAuthenticated, Some(session_id)))
                    .await
                    .is_ok();
            };
            let Ok(parsed) = SessionId::parse(&session_id) else {
                let err = DispatchError::invalid_argument("invalid session id");
                return send_json(ws_tx, &ServerMessage::error(&err, Some(session_id))).await.is_ok();
            };
            match state.orchestrator.resize(&parsed, &user_id, cols, rows).await {
                Ok(()) => send_json(ws_tx, &ServerMessage::ok()).await.is_ok(),
                Err(err) => send_json(ws_tx, &ServerMessage::error(&err, Some(session_id))).await.is_ok(),
            }
        }

        ClientMessage::Close { session_id } => {
            let Some(user_id) = authed_user.clone() else {
                return send_json(ws_tx, &ServerMessage::error(&DispatchError::NotAuthenticated, Some(session_id)))
                    .await
                    .is_ok();
            };
            let Ok(parsed) = SessionId::parse(&session_id) else {
                let err = DispatchError::invalid_argument("invalid session id");
                return send_json(ws_tx, &ServerMessage::error(&err, Some(session_id))).await.is_ok();
            };
            match state.orchestrator.close(&parsed, &user_id).await {
                Ok(()) => send_json(ws_tx, &ServerMessage::ok()).await.is_ok(),
                Err(err) => send_json(ws_tx, &ServerMessage::error(&err, Some(session_id))).await.is_ok(),
            }
        }
    }
}

/// Shared body of `attach` and `catchup`: authorize, establish the live
/// subscription (bounded for `catchup`, unbounded for `attach`), emit an
/// adapter screen-state snapshot first if one is available, then supersede
/// any stale delivery task for this `(client, session)` pair. SPEC_FULL §4.4
/// requires catch-up to deliver a bounded historical burst "and then
/// continue live" rather than stopping after the one-shot read.
async fn attach_and_stream(
    state: &Arc<AppState>,
    session_id: &str,
    after_seq: u64,
    limit: Option<usize>,
    authed_user: &Option<String>,
    attachments: &mut HashMap<SessionId, Attachment>,
    outbound_tx: &mpsc::Sender<ServerMessage>,
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
) -> bool {
    let Some(user_id) = authed_user.clone() else {
        return send_json(ws_tx, &ServerMessage::error(&DispatchError::NotAuthenticated, Some(session_id.to_owned())))
            .await
            .is_ok();
    };
    let Ok(parsed) = SessionId::parse(session_id) else {
        let err = DispatchError::invalid_argument("invalid session id");
        return send_json(ws_tx, &ServerMessage::error(&err, Some(session_id.to_owned()))).await.is_ok();
    };

    match state.orchestrator.attach(&parsed, &user_id, after_seq, limit).await {
        Ok(stream) => {
            if let Ok(Some(payload)) = state.orchestrator.snapshot(&parsed, &user_id).await {
                let msg = ServerMessage::RunSnapshot { session_id: parsed.as_str().to_owned(), payload };
                if send_json(ws_tx, &msg).await.is_err() {
                    return false;
                }
            }
            attachments.insert(parsed.clone(), spawn_delivery(parsed, stream, outbound_tx.clone()));
            send_json(ws_tx, &ServerMessage::ok()).await.is_ok()
        }
        Err(err) => send_json(ws_tx, &ServerMessage::error(&err, Some(session_id.to_owned()))).await.is_ok(),
    }
}

fn event_to_message(event: crate::model::Event) -> ServerMessage {
    ServerMessage::RunEvent {
        session_id: event.session_id.as_str().to_owned(),
        seq: event.seq,
        channel: event.channel,
        kind: event.kind,
        payload: event.payload,
        timestamp: event.timestamp_ms,
    }
}

/// Spawn the task that drains one `attach`ed [`EventStream`], forwarding
/// each event to `outbound_tx`. Translates `Overflow` into one `overflow`
/// frame and then stops (the client is expected to re-`attach` with its
/// last seen seq to recover; see SPEC_FULL §4.4).
fn spawn_delivery(
    session_id: SessionId,
    mut stream: crate::orchestrator::EventStream,
    outbound_tx: mpsc::Sender<ServerMessage>,
) -> Attachment {
    let handle = tokio::spawn(async move {
        loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    if outbound_tx.send(event_to_message(event)).await.is_err() {
                        return;
                    }
                }
                Some(Err(DispatchError::Overflow { last_delivered_seq })) => {
                    let _ = outbound_tx
                        .send(ServerMessage::Overflow {
                            session_id: session_id.as_str().to_owned(),
                            last_delivered_seq,
                        })
                        .await;
                    return;
                }
                Some(Err(_)) | None => return,
            }
        }
    });
    Attachment { handle }
}

async fn send_json<S>(tx: &mut S, msg: &ServerMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(msg) {
        Ok(t) => t,
        Err(_) => return Err(()),
    };
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
