// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: `create`/`write`/`resize`/`close`/`get`/`list`/`attach`,
//! each session's single-writer emit queue, and the historical-then-live
//! join that completes what [`crate::store`] leaves as a raw primitive.
//!
//! Mirrors this codebase's split between a process-wide session map (read
//! often, mutated only on create/close) and per-session mutable state owned
//! by that session's own task — generalized from one hardcoded session to a
//! registry of many, keyed by [`SessionId`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::Level;

use crate::adapter::{emit, AdapterConfig, AdapterHandle, AdapterRegistry, Emitted};
use crate::error::DispatchError;
use crate::model::{channel, now_ms, Event, Payload, RunSession, SessionId, SessionKind, SessionStatus, UserId, Workspace};
use crate::session_span;
use crate::store::EventStore;

/// Everything needed to start a new session.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub kind: SessionKind,
    pub owner_user_id: UserId,
    pub workspace_path: PathBuf,
    pub title: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub env: Vec<(String, String)>,
    pub argv: Option<Vec<String>>,
}

/// A process-wide notification of a session row change, broadcast to every
/// transport connection so `session:created`/`session:updated`/`session:closed`
/// wire messages can be pushed without each client polling `list` (SPEC_FULL
/// §4.4). Grounded in `crates/mux`'s aggregator broadcast: one channel, every
/// subscriber filters by the owner it cares about.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Created(RunSession),
    Updated(RunSession),
    Closed { session_id: SessionId, seq: u64, owner_user_id: UserId },
}

/// Optional narrowing applied by [`Orchestrator::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilter {
    pub kind: Option<SessionKind>,
    pub status: Option<SessionStatus>,
}

impl ListFilter {
    fn matches(&self, session: &RunSession) -> bool {
        let kind_ok = self.kind.map(|k| k == session.kind).unwrap_or(true);
        let status_ok = self.status.map(|s| s == session.status).unwrap_or(true);
        kind_ok && status_ok
    }
}

/// Per-session state private to the orchestrator. `meta` is the
/// externally-visible record; `handle` and `emit_tx` are never exposed
/// beyond this module.
struct SessionEntry {
    id: SessionId,
    meta: Mutex<RunSession>,
    handle: Mutex<Option<Box<dyn AdapterHandle>>>,
    emit_tx: mpsc::UnboundedSender<Emitted>,
    close_requested: AtomicBool,
}

/// Owns the lifecycle of every [`RunSession`].
pub struct Orchestrator {
    store: Arc<EventStore>,
    adapters: Arc<AdapterRegistry>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    store_failure_limit: u32,
    close_grace: Duration,
    idle_threshold: Duration,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<EventStore>,
        adapters: Arc<AdapterRegistry>,
        store_failure_limit: u32,
        close_grace: Duration,
        idle_threshold: Duration,
    ) -> Self {
        let (lifecycle_tx, _) = broadcast::channel(256);
        Self {
            store,
            adapters,
            sessions: RwLock::new(HashMap::new()),
            store_failure_limit: store_failure_limit.max(1),
            close_grace,
            idle_threshold,
            lifecycle_tx,
        }
    }

    /// Subscribe to every session row change across the whole process. The
    /// caller filters by owner; the orchestrator itself has no notion of
    /// "whose connection is this".
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    async fn entry(&self, session_id: &SessionId) -> Result<Arc<SessionEntry>, DispatchError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| DispatchError::not_found(format!("session {session_id}")))
    }

    /// Look up `session_id` and confirm `user_id` is its owner.
    async fn authorize(&self, session_id: &SessionId, user_id: &UserId) -> Result<Arc<SessionEntry>, DispatchError> {
        let entry = self.entry(session_id).await?;
        let owner_matches = entry.meta.lock().await.owner_user_id == *user_id;
        if !owner_matches {
            return Err(DispatchError::NotAuthorized);
        }
        Ok(entry)
    }

    /// Allocate an id, persist the `starting` row, launch the adapter, and
    /// transition to `running` (or `error` on launch failure). The session
    /// row survives a launch failure so the caller can still `get` it.
    pub async fn create(&self, request: CreateRequest) -> Result<RunSession, DispatchError> {
        let workspace = Workspace::new(&request.workspace_path)
            .map_err(|e| DispatchError::invalid_argument(e.to_string()))?;

        let id = SessionId::new();
        let mut session = RunSession::new(id.clone(), request.kind, request.owner_user_id.clone(), &workspace);
        if let Some(title) = request.title {
            session.title = title;
        }

        let (emit_tx, emit_rx) = mpsc::unbounded_channel();
        let entry = Arc::new(SessionEntry {
            id: id.clone(),
            meta: Mutex::new(session),
            handle: Mutex::new(None),
            emit_tx: emit_tx.clone(),
            close_requested: AtomicBool::new(false),
        });

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&id) {
                return Err(DispatchError::conflict("session id already exists"));
            }
            sessions.insert(id.clone(), Arc::clone(&entry));
        }

        tokio::spawn(run_writer(
            Arc::clone(&self.store),
            Arc::clone(&entry),
            emit_rx,
            self.store_failure_limit,
            self.lifecycle_tx.clone(),
        ));

        let adapter_config = AdapterConfig {
            workspace,
            cols: request.cols,
            rows: request.rows,
            env: request.env,
            argv: request.argv,
            resume_state: None,
        };

        match self.adapters.get(request.kind)?.start(adapter_config, emit_tx.clone()).await {
            Ok(handle) => {
                *entry.handle.lock().await = Some(handle);
                entry.meta.lock().await.status = SessionStatus::Running;
                emit(&emit_tx, channel::SYSTEM_STATUS, "opened", Payload::Null);
            }
            Err(err) => {
                entry.meta.lock().await.status = SessionStatus::Error;
                emit(&emit_tx, channel::SYSTEM_STATUS, "failed", Payload::String(err.message()));
                let _ = self.lifecycle_tx.send(LifecycleEvent::Created(entry.meta.lock().await.clone()));
                return Err(err);
            }
        }

        let created = entry.meta.lock().await.clone();
        let _ = self.lifecycle_tx.send(LifecycleEvent::Created(created.clone()));
        Ok(created)
    }

    /// Forward `data` to the adapter, after appending a `system:input`
    /// event so history replays the user's side of the conversation
    ///. The `system:input` append is enqueued before the
    /// adapter is invoked, so it always precedes any event the adapter
    /// produces in response (ordering guarantee in SPEC_FULL §4.4).
    pub async fn write(&self, session_id: &SessionId, user_id: &UserId, data: Payload) -> Result<(), DispatchError> {
        let entry = self.authorize(session_id, user_id).await?;
        if entry.meta.lock().await.status.is_terminal() {
            return Err(DispatchError::SessionClosed);
        }

        emit(&entry.emit_tx, channel::SYSTEM_INPUT, "data", data.clone());

        let handle = entry.handle.lock().await;
        match handle.as_ref() {
            Some(handle) => handle.write(data).await,
            None => Err(DispatchError::SessionClosed),
        }
    }

    pub async fn resize(&self, session_id: &SessionId, user_id: &UserId, cols: u16, rows: u16) -> Result<(), DispatchError> {
        let entry = self.authorize(session_id, user_id).await?;
        if entry.meta.lock().await.status.is_terminal() {
            return Err(DispatchError::SessionClosed);
        }

        let handle = entry.handle.lock().await;
        match handle.as_ref() {
            Some(handle) => handle.resize(cols, rows).await,
            None => Err(DispatchError::SessionClosed),
        }
    }

    /// Idempotent: the first call tears down the adapter and appends
    /// `system:status/closed`; every later call is a no-op success.
    pub async fn close(&self, session_id: &SessionId, user_id: &UserId) -> Result<(), DispatchError> {
        let entry = self.authorize(session_id, user_id).await?;

        if entry.close_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handle = entry.handle.lock().await.take();
        let type_specific_state = match handle {
            Some(handle) => match tokio::time::timeout(self.close_grace, handle.close()).await {
                Ok(state) => state,
                Err(_elapsed) => {
                    emit(&entry.emit_tx, channel::SYSTEM_STATUS, "forced-close", Payload::Null);
                    None
                }
            },
            None => None,
        };

        entry.meta.lock().await.type_specific_state = type_specific_state.clone();
        emit(
            &entry.emit_tx,
            channel::SYSTEM_STATUS,
            "closed",
            type_specific_state.map(Payload::Bytes).unwrap_or(Payload::Null),
        );
        Ok(())
    }

    pub async fn get(&self, session_id: &SessionId) -> Result<RunSession, DispatchError> {
        let mut session = self.entry(session_id).await?.meta.lock().await.clone();
        self.apply_idle(&mut session);
        Ok(session)
    }

    /// Total number of sessions tracked process-wide, regardless of owner.
    /// Used only by the unauthenticated `/healthz` liveness probe.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn list(&self, owner_user_id: &UserId, filter: ListFilter) -> Vec<RunSession> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::new();
        for entry in sessions.values() {
            let mut meta = entry.meta.lock().await.clone();
            self.apply_idle(&mut meta);
            if meta.owner_user_id == *owner_user_id && filter.matches(&meta) {
                out.push(meta);
            }
        }
        out
    }

    /// Derive the advisory `running ⇄ idle` transition on read (SPEC_FULL
    /// §4.3): a `running` session with no activity for `idle_threshold`
    /// reports as `idle` without ever touching the persisted row or dropping
    /// events. Other statuses are left untouched.
    fn apply_idle(&self, session: &mut RunSession) {
        if session.status != SessionStatus::Running {
            return;
        }
        let elapsed_ms = now_ms().saturating_sub(session.last_activity_at_ms);
        if elapsed_ms >= self.idle_threshold.as_millis() as u64 {
            session.status = SessionStatus::Idle;
        }
    }

    /// Query the running adapter's replayable screen-state prefix, if it
    /// offers one (e.g. a `pty` session's terminal buffer). Used by the live
    /// transport to seed an `attach`/`catchup` reply before the event burst.
    pub async fn snapshot(&self, session_id: &SessionId, user_id: &UserId) -> Result<Option<Payload>, DispatchError> {
        let entry = self.authorize(session_id, user_id).await?;
        let handle = entry.handle.lock().await;
        Ok(handle.as_ref().and_then(|handle| handle.snapshot()))
    }

    /// Authorized, one-shot read of `session_id`'s durable history. Used by
    /// the HTTP range endpoint, which replays history without holding a
    /// live connection open.
    pub async fn events(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        after_seq: u64,
        limit: Option<usize>,
    ) -> Result<Vec<Event>, DispatchError> {
        self.authorize(session_id, user_id).await?;
        self.store.range(session_id, after_seq, limit).await
    }

    /// Subscribe to `session_id`'s event stream starting strictly after
    /// `after_seq`. The returned [`EventStream`] first replays history then
    /// transitions to live tail with no gap and no duplicate.
    ///
    /// `limit` bounds the size of the historical burst. When the window from
    /// `after_seq` to the live join point is larger than `limit`, the burst
    /// is trimmed from the *old* end — it always still reaches
    /// `tail.observed_last_seq`, the exact point the live receiver picks up
    /// from, so bounding it can never open a gap at the history/live join.
    pub async fn attach(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        after_seq: u64,
        limit: Option<usize>,
    ) -> Result<EventStream, DispatchError> {
        self.authorize(session_id, user_id).await?;

        let tail = self.store.tail(session_id).await?;
        let range_start = match limit {
            Some(limit) => tail.observed_last_seq.saturating_sub(limit as u64).max(after_seq),
            None => after_seq,
        };
        let mut history = self.store.range(session_id, range_start, None).await?;
        history.retain(|event| event.seq <= tail.observed_last_seq);
        let last_observed_seq = history.last().map(|event| event.seq).unwrap_or(range_start);

        Ok(EventStream {
            history: history.into_iter(),
            receiver: Some(tail.receiver),
            last_delivered_seq: last_observed_seq,
        })
    }
}

/// The single writer for one session's emit queue: drains [`Emitted`]
/// values in order, performs the Event Store append, and applies the
/// resulting status transition. Ends
/// when every `emit_tx` clone (the adapter's and the orchestrator's own)
/// has been dropped.
async fn run_writer(
    store: Arc<EventStore>,
    entry: Arc<SessionEntry>,
    mut emit_rx: mpsc::UnboundedReceiver<Emitted>,
    failure_limit: u32,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
) {
    let span = session_span!(entry.id);
    let _guard = span.enter();
    let mut consecutive_failures: u32 = 0;

    while let Some(emitted) = emit_rx.recv().await {
        match store.append(&entry.id, emitted.channel.clone(), emitted.kind.clone(), emitted.payload).await {
            Ok(seq) => {
                consecutive_failures = 0;
                let mut meta = entry.meta.lock().await;
                let status_before = meta.status;
                meta.last_seq = seq;
                meta.touch_activity();
                apply_status_transition(&mut meta, &emitted.channel, &emitted.kind);

                if meta.status != status_before {
                    let snapshot = meta.clone();
                    drop(meta);
                    let event = if snapshot.status == SessionStatus::Closed {
                        LifecycleEvent::Closed {
                            session_id: snapshot.id.clone(),
                            seq,
                            owner_user_id: snapshot.owner_user_id.clone(),
                        }
                    } else {
                        LifecycleEvent::Updated(snapshot)
                    };
                    let _ = lifecycle_tx.send(event);
                }
            }
            Err(err) => {
                consecutive_failures += 1;
                log_append_failure(&err);
                if consecutive_failures >= failure_limit {
                    let mut meta = entry.meta.lock().await;
                    if !meta.status.is_terminal() {
                        meta.status = SessionStatus::Error;
                        let snapshot = meta.clone();
                        drop(meta);
                        let _ = lifecycle_tx.send(LifecycleEvent::Updated(snapshot));
                    }
                }
            }
        }
    }
}

fn apply_status_transition(meta: &mut RunSession, channel: &str, kind: &str) {
    if channel != channel::SYSTEM_STATUS {
        return;
    }
    match kind {
        "opened" if !meta.status.is_terminal() => meta.status = SessionStatus::Running,
        "closed" => meta.status = SessionStatus::Closed,
        "failed" | "error" if !meta.status.is_terminal() => meta.status = SessionStatus::Error,
        _ => {}
    }
}

fn log_append_failure(err: &DispatchError) {
    match err.log_level() {
        Level::ERROR => tracing::error!(error = %err, "event store append failed"),
        Level::WARN => tracing::warn!(error = %err, "event store append failed"),
        Level::INFO => tracing::info!(error = %err, "event store append failed"),
        Level::DEBUG => tracing::debug!(error = %err, "event store append failed"),
        Level::TRACE => tracing::trace!(error = %err, "event store append failed"),
    }
}

/// A gapless, duplicate-free event stream: buffered history followed by a
/// live tail. Ends (returns `None`) once the live side is exhausted or an
/// `Overflow` has been reported — the caller (transport) is expected to
/// re-`attach` with its last seen seq to recover.
pub struct EventStream {
    history: std::vec::IntoIter<Event>,
    receiver: Option<broadcast::Receiver<Event>>,
    last_delivered_seq: u64,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<Result<Event, DispatchError>> {
        if let Some(event) = self.history.next() {
            self.last_delivered_seq = event.seq;
            return Some(Ok(event));
        }

        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) if event.seq > self.last_delivered_seq => {
                    self.last_delivered_seq = event.seq;
                    return Some(Ok(event));
                }
                Ok(_already_seen) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    self.receiver = None;
                    return Some(Err(DispatchError::Overflow { last_delivered_seq: self.last_delivered_seq }));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    pub fn last_delivered_seq(&self) -> u64 {
        self.last_delivered_seq
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
