// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the live transport: internally-tagged JSON messages
//! exchanged over the WebSocket upgrade. Mirrors
//! `crates/cli`'s own `ClientMessage`/`ServerMessage` split
//! (`#[serde(tag = "type", rename_all = "snake_case")]`), generalized from
//! one implicit session to an explicit `session_id` on every operation.

use serde::{Deserialize, Serialize};

use crate::model::{Payload, RunSession};

/// What a client sends to authenticate the connection. SPEC_FULL §1 has the
/// core consume a verified `userId` from an external auth collaborator;
/// this transport plays that role itself by checking `token` against the
/// configured shared secret and trusting `user_id` once it matches.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub token: Option<String>,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        credential: Credential,
    },
    Attach {
        session_id: String,
        #[serde(default)]
        after_seq: u64,
    },
    Detach {
        session_id: String,
    },
    Catchup {
        session_id: String,
        #[serde(default)]
        after_seq: u64,
    },
    Input {
        session_id: String,
        data: Payload,
    },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    Close {
        session_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One appended event, replayed during catch-up or pushed live. The
    /// event's own `kind` rides under `"kind"`, not `"type"`: the latter is
    /// already spoken for by this enum's own tag.
    #[serde(rename = "run:event")]
    RunEvent {
        session_id: String,
        seq: u64,
        channel: String,
        kind: String,
        payload: Payload,
        timestamp: u64,
    },
    #[serde(rename = "session:created")]
    SessionCreated { session: RunSession },
    #[serde(rename = "session:updated")]
    SessionUpdated { session: RunSession },
    #[serde(rename = "session:closed")]
    SessionClosed { session_id: String, seq: u64 },
    /// Sent once, right before the historical burst, when the session's
    /// adapter offers a replayable screen-state prefix (e.g. a `pty`
    /// terminal buffer). Carries no `seq` of its own: it isn't a stored
    /// event, just a rendering shortcut the client may apply before the
    /// `run:event` burst that follows.
    #[serde(rename = "run:snapshot")]
    RunSnapshot { session_id: String, payload: Payload },
    /// Generic acknowledgement for `auth`/`detach`/`input`/`resize`/`close`.
    /// `user_id` is only ever set in reply to `auth`.
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    Error {
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Overflow {
        session_id: String,
        last_delivered_seq: u64,
    },
}

impl ServerMessage {
    pub fn ok() -> Self {
        ServerMessage::Ok { user_id: None }
    }

    pub fn error(err: &crate::error::DispatchError, session_id: Option<String>) -> Self {
        ServerMessage::Error { kind: err.as_str().to_owned(), message: err.message(), session_id }
    }
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
