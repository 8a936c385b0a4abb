// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `web-view` adapter: bridges to an existing external WebSocket endpoint
//! rather than spawning a child process.
//!
//! Grounded in this codebase's own upstream bridge (`WsBridge::connect`): a
//! background task owns the single upstream connection and reconnects with
//! exponential backoff (100ms, doubling, capped at 5s) whenever it drops.
//! Unlike the bridge, there is exactly one downstream consumer here (the
//! session's own event stream) rather than N fanned-out clients — fan-out
//! to N browser clients is the transport layer's job, not the adapter's.
//!
//! Has no terminal geometry (`resize` is a no-op) and no replayable buffer
//! (`snapshot` returns `None`); catch-up for this kind replays raw
//! `web-view:navigation` events only.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::{emit, Adapter, AdapterConfig, AdapterHandle, BoxFuture, Emit};
use crate::error::DispatchError;
use crate::model::{channel, Payload};

const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 5_000;

/// Factory for `web-view` sessions. The upstream URL is taken from
/// `AdapterConfig::argv`'s sole element (there being no dedicated field for
/// it in the shared config), e.g. `argv: vec!["ws://127.0.0.1:9000/view"]`.
pub struct WebViewAdapter;

impl Adapter for WebViewAdapter {
    fn start(
        &self,
        config: AdapterConfig,
        emitter: Emit,
    ) -> BoxFuture<'static, Result<Box<dyn AdapterHandle>, DispatchError>> {
        Box::pin(async move {
            let url = config
                .argv
                .as_ref()
                .and_then(|argv| argv.first())
                .cloned()
                .ok_or_else(|| DispatchError::invalid_argument("web-view sessions require an upstream url"))?;

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
            let cancel = CancellationToken::new();

            tokio::spawn(run_loop(url, outbound_rx, emitter, cancel.clone()));

            Ok(Box::new(WebViewHandle { outbound_tx, cancel }) as Box<dyn AdapterHandle>)
        })
    }
}

async fn run_loop(
    url: String,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    emitter: Emit,
    cancel: CancellationToken,
) {
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                backoff_ms = INITIAL_BACKOFF_MS;
                let (mut write, mut read) = stream.split();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    emit(&emitter, channel::WEB_VIEW_NAVIGATION, "frame", Payload::String(text.to_string()));
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Err(_)) => break,
                                _ => {}
                            }
                        }
                        outbound = outbound_rx.recv() => {
                            match outbound {
                                Some(text) => {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                None => return,
                            }
                        }
                    }
                }
            }
            Err(e) => {
                emit(
                    &emitter,
                    channel::SYSTEM_STATUS,
                    "reconnecting",
                    Payload::String(format!("web-view upstream connect failed: {e}")),
                );
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)) => {}
        }
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

struct WebViewHandle {
    outbound_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl AdapterHandle for WebViewHandle {
    fn write(&self, data: Payload) -> BoxFuture<'_, Result<(), DispatchError>> {
        Box::pin(async move {
            let text = match data {
                Payload::String(s) => s,
                other => serde_json::to_string(&other)
                    .map_err(|e| DispatchError::invalid_argument(format!("web-view input: {e}")))?,
            };
            self.outbound_tx
                .send(text)
                .map_err(|_| DispatchError::SessionClosed)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Option<Vec<u8>>> {
        Box::pin(async move {
            self.cancel.cancel();
            None
        })
    }
}

#[cfg(test)]
#[path = "web_view_tests.rs"]
mod tests;
