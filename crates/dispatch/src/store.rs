// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only per-session event log keyed by monotonic `seq`.
//!
//! Concretely: each session gets one append-only newline-delimited JSON file
//! under the data directory (`{dataDir}/events/{sessionId}.jsonl`), one line
//! per event, opened once in append mode and written to under a per-session
//! lock. This mirrors how this codebase's own session-local event log is
//! structured (see `EventLog`): an append-only JSONL file per concern,
//! opened with `create(true).append(true)`, read back in full on catch-up
//! and filtered by sequence.
//!
//! The store only ever exposes the raw `append`/`range`/tail-primitive
//! operations; the historical-then-live join described in SPEC_FULL §5 is
//! performed one layer up, by [`crate::orchestrator`].

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};

use crate::error::DispatchError;
use crate::model::{Event, Payload, SessionId};

/// Per-session append-only log plus its live fan-out channel.
struct SessionLog {
    path: PathBuf,
    /// Guards the file handle and `last_seq` together so a reserve/release
    /// failure never leaves the two out of sync.
    inner: Mutex<SessionLogInner>,
    /// Live fan-out. Subscribing while holding `inner`'s lock guarantees the
    /// receiver observes exactly the events appended after the subscribe
    /// point — no gap, no duplicate.
    live: broadcast::Sender<Event>,
}

struct SessionLogInner {
    file: std::fs::File,
    last_seq: u64,
    closed: bool,
}

/// Result of [`EventStore::tail`]: a point-in-time snapshot of `last_seq`
/// plus a live receiver subscribed at exactly that point. The caller is
/// responsible for reading `range(after_seq, observed_last_seq)` and then
/// draining `receiver` to get a gapless, duplicate-free stream.
pub struct Tail {
    pub observed_last_seq: u64,
    pub receiver: broadcast::Receiver<Event>,
}

/// Append-only event store, partitioned by session.
pub struct EventStore {
    data_dir: PathBuf,
    live_capacity: usize,
    sessions: RwLock<HashMap<SessionId, Arc<SessionLog>>>,
}

impl EventStore {
    /// Open a store rooted at `data_dir/events/`. Does not scan existing
    /// session files eagerly; each session's file is opened (and, after a
    /// restart, replayed once to recover `last_seq`) on first use.
    pub fn new(data_dir: impl Into<PathBuf>, live_capacity: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            live_capacity: live_capacity.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn events_dir(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    fn session_path(&self, session_id: &SessionId) -> PathBuf {
        self.events_dir().join(format!("{}.jsonl", session_id.as_str()))
    }

    /// Get the in-memory handle for `session_id`, opening (and, if the file
    /// already has content from a prior process, replaying) it on first
    /// access.
    async fn get_or_open(&self, session_id: &SessionId) -> Result<Arc<SessionLog>, DispatchError> {
        if let Some(log) = self.sessions.read().await.get(session_id) {
            return Ok(Arc::clone(log));
        }

        let mut sessions = self.sessions.write().await;
        if let Some(log) = sessions.get(session_id) {
            return Ok(Arc::clone(log));
        }

        let dir = self.events_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| DispatchError::store_failure(format!("create events dir: {e}")))?;
        let path = self.session_path(session_id);

        let last_seq = recover_last_seq(&path)?;

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DispatchError::store_failure(format!("open event log: {e}")))?;

        let (live, _) = broadcast::channel(self.live_capacity);
        let log = Arc::new(SessionLog {
            path,
            inner: Mutex::new(SessionLogInner { file, last_seq, closed: false }),
            live,
        });
        sessions.insert(session_id.clone(), Arc::clone(&log));
        Ok(log)
    }

    /// Atomically assigns `seq = lastSeq(sessionId) + 1`, persists the row,
    /// and updates `lastSeq`. Fails with `SessionClosed` if the session has
    /// already been marked closed via [`Self::close_session`].
    pub async fn append(
        &self,
        session_id: &SessionId,
        channel: impl Into<String>,
        kind: impl Into<String>,
        payload: Payload,
    ) -> Result<u64, DispatchError> {
        let log = self.get_or_open(session_id).await?;
        let mut inner = log.inner.lock().await;
        if inner.closed {
            return Err(DispatchError::SessionClosed);
        }

        let seq = inner.last_seq + 1;
        let event = Event {
            session_id: session_id.clone(),
            seq,
            channel: channel.into(),
            kind: kind.into(),
            payload,
            timestamp_ms: crate::model::now_ms(),
        };

        let mut line = serde_json::to_string(&event)
            .map_err(|e| DispatchError::store_failure(format!("serialize event: {e}")))?;
        line.push('\n');

        // The seq is only reserved in memory until this write succeeds; on
        // failure nothing above has been mutated yet, so the next append
        // will reuse the same seq.
        inner
            .file
            .write_all(line.as_bytes())
            .and_then(|()| inner.file.flush())
            .map_err(|e| DispatchError::store_failure(format!("write event: {e}")))?;

        inner.last_seq = seq;
        drop(inner);

        // No receivers is not an error: history is durable regardless.
        let _ = log.live.send(event);
        Ok(seq)
    }

    /// Mark `session_id` closed: subsequent `append` calls fail with
    /// `SessionClosed`. Idempotent.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<(), DispatchError> {
        let log = self.get_or_open(session_id).await?;
        let mut inner = log.inner.lock().await;
        inner.closed = true;
        Ok(())
    }

    /// The highest seq ever durably appended for `session_id`, or 0 if the
    /// session has no events yet.
    pub async fn last_seq(&self, session_id: &SessionId) -> Result<u64, DispatchError> {
        let log = self.get_or_open(session_id).await?;
        let inner = log.inner.lock().await;
        Ok(inner.last_seq)
    }

    /// Returns events with `seq > after_seq` in ascending order, capped at
    /// `limit` if given.
    pub async fn range(
        &self,
        session_id: &SessionId,
        after_seq: u64,
        limit: Option<usize>,
    ) -> Result<Vec<Event>, DispatchError> {
        let log = self.get_or_open(session_id).await?;
        // Reading the path outside the lock is safe: the file only ever
        // grows (append-only), so a concurrent writer cannot invalidate
        // lines already flushed to disk.
        let path = log.path.clone();
        let mut events = read_events(&path)?;
        events.retain(|e| e.seq > after_seq);
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    /// Observe `last_seq` and subscribe to the live fan-out atomically
    /// (under the same lock `append` uses), so the returned receiver is
    /// guaranteed to see every event appended after this call and none
    /// appended before it. Callers combine this with
    /// `range(after_seq, observed_last_seq)` to build a gapless stream.
    pub async fn tail(&self, session_id: &SessionId) -> Result<Tail, DispatchError> {
        let log = self.get_or_open(session_id).await?;
        let inner = log.inner.lock().await;
        let observed_last_seq = inner.last_seq;
        let receiver = log.live.subscribe();
        drop(inner);
        Ok(Tail { observed_last_seq, receiver })
    }
}

/// Scan an existing JSONL file (if any) to recover `last_seq` after a
/// restart. Tolerates a torn final line (partial write before a crash) by
/// ignoring any line that fails to parse — the corresponding `append` never
/// returned successfully to its caller, so it is correct to treat it as
/// never having happened.
fn recover_last_seq(path: &Path) -> Result<u64, DispatchError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .filter_map(|line| serde_json::from_str::<Event>(line).ok())
            .map(|e| e.seq)
            .max()
            .unwrap_or(0)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DispatchError::store_failure(format!("read event log: {e}"))),
    }
}

fn read_events(path: &Path) -> Result<Vec<Event>, DispatchError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .filter_map(|line| serde_json::from_str::<Event>(line).ok())
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(DispatchError::store_failure(format!("read event log: {e}"))),
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
