// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter registry and the adapter capability contract.
//!
//! An adapter translates one external process kind into the event model.
//! Registration is static for the process lifetime: at
//! startup, [`AdapterRegistry::with_builtin`] maps each [`SessionKind`] to a
//! factory; dynamic loading is out of scope.
//!
//! Mirrors this codebase's existing `Backend` trait (object-safe, `Box<dyn
//! Backend>`, a `run` method returning a boxed future) generalized from one
//! hardcoded PTY backend to a registry of heterogeneous adapter kinds keyed
//! by [`SessionKind`], each with its own optional capabilities (`resize`,
//! `snapshot`) queried at runtime rather than assumed.

pub mod ai;
pub mod pty;
pub mod web_view;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::DispatchError;
use crate::model::{Payload, SessionKind, Workspace};

/// A future boxed for use in an object-safe trait method, mirroring this
/// codebase's existing `Backend::run` return type.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One call the adapter makes into the event pipeline. Carried over an
/// unbounded channel so adapters never block on a slow event store; the
/// orchestrator's single-writer task drains this
/// channel in order and performs the actual `EventStore::append`.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub channel: String,
    pub kind: String,
    pub payload: Payload,
}

/// The adapter's sole output channel to the orchestrator. `emit` may be
/// called from any context but its sends are always observed in the order
/// they were made, since the channel itself is the serialization point.
pub type Emit = mpsc::UnboundedSender<Emitted>;

pub fn emit(tx: &Emit, channel: impl Into<String>, kind: impl Into<String>, payload: Payload) {
    // The receiver lives as long as the session's writer task; a send
    // failure only occurs after that task has already torn down, which
    // happens only after the session itself is gone.
    let _ = tx.send(Emitted { channel: channel.into(), kind: kind.into(), payload });
}

/// Launch-time configuration passed to [`Adapter::start`]. Only the fields
/// relevant to a given kind are required; adapters ignore the rest.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub workspace: Workspace,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub env: Vec<(String, String)>,
    pub argv: Option<Vec<String>>,
    pub resume_state: Option<Vec<u8>>,
}

/// A running adapter instance. Owned solely by the orchestrator; never
/// exposed outside it.
pub trait AdapterHandle: Send + Sync {
    /// Deliver input: a byte string for `pty`, a structured command object
    /// for `web-view`, a chat turn for `ai`.
    fn write(&self, data: Payload) -> BoxFuture<'_, Result<(), DispatchError>>;

    /// Optional capability; default no-op for kinds that don't support it
    /// (e.g. `ai`, `web-view`).
    fn resize(&self, _cols: u16, _rows: u16) -> BoxFuture<'_, Result<(), DispatchError>> {
        Box::pin(async { Ok(()) })
    }

    /// Terminate the process gracefully and return serializable state for a
    /// future resume attempt (may be `None`).
    fn close(self: Box<Self>) -> BoxFuture<'static, Option<Vec<u8>>>;

    /// Optional capability: synthesize a replayable prefix (e.g. a `pty`
    /// terminal buffer) for catch-up. `None` means catch-up replays raw
    /// events only.
    fn snapshot(&self) -> Option<Payload> {
        None
    }
}

/// Translates one external process kind into the event model. Implemented
/// once per [`SessionKind`] and registered under that kind.
pub trait Adapter: Send + Sync {
    /// Launch the external process. `emit` is the adapter's sole output
    /// channel; every call the adapter makes on it is forwarded, in order,
    /// to the Event Store by the orchestrator.
    fn start(
        &self,
        config: AdapterConfig,
        emit: Emit,
    ) -> BoxFuture<'static, Result<Box<dyn AdapterHandle>, DispatchError>>;
}

/// Static, process-wide map from [`SessionKind`] to its adapter factory.
pub struct AdapterRegistry {
    factories: HashMap<SessionKind, Box<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn register(&mut self, kind: SessionKind, adapter: Box<dyn Adapter>) -> &mut Self {
        self.factories.insert(kind, adapter);
        self
    }

    pub fn get(&self, kind: SessionKind) -> Result<&dyn Adapter, DispatchError> {
        self.factories
            .get(&kind)
            .map(|boxed| boxed.as_ref())
            .ok_or_else(|| DispatchError::invalid_argument(format!("unknown session kind: {kind}")))
    }

    /// The registry this binary ships: `pty`, `ai`, `web-view`.
    pub fn with_builtin(ai_command: Vec<String>) -> Self {
        let mut registry = Self::new();
        registry.register(SessionKind::Pty, Box::new(pty::PtyAdapter));
        registry.register(SessionKind::Ai, Box::new(ai::AiAdapter::new(ai_command)));
        registry.register(SessionKind::WebView, Box::new(web_view::WebViewAdapter));
        registry
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
