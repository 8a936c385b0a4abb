// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core data model: workspaces, run sessions, events, and session ids.
//!
//! Mirrors the shape of the session state this codebase has always kept in
//! `Store` (see the single-session `transport::state::Store`), generalized to
//! a record that is addressed by an explicit `id` rather than held as one
//! per-process singleton.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An extensible, registered session kind. New kinds are added by registering
/// an adapter factory (see [`crate::adapter::AdapterRegistry`]); this enum
/// only enumerates the kinds this crate ships adapters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    Pty,
    Ai,
    WebView,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pty => "pty",
            Self::Ai => "ai",
            Self::WebView => "web-view",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pty" => Some(Self::Pty),
            "ai" => Some(Self::Ai),
            "web-view" => Some(Self::WebView),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `status` of a [`RunSession`]. See SPEC_FULL §4.3 for the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Idle,
    Error,
    Closed,
}

impl SessionStatus {
    /// `closed` is terminal: once reached, it never transitions again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Opaque session identifier. Accepts both newly-minted UUID v4 strings and
/// the legacy `{kind}-{timestamp}-{nonce}` form for parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub const MAX_LEN: usize = 64;

    /// Mint a new UUID v4 session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an opaque session id string, accepting both UUID v4 and the
    /// legacy `{kind}-{timestamp}-{nonce}` form. Rejects anything over
    /// [`Self::MAX_LEN`] or containing characters that are not URL-safe.
    pub fn parse(s: &str) -> Result<Self, InvalidSessionId> {
        if s.is_empty() || s.len() > Self::MAX_LEN {
            return Err(InvalidSessionId);
        }
        let url_safe = s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'));
        if !url_safe {
            return Err(InvalidSessionId);
        }
        Ok(Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `s` has the legacy `{kind}-{timestamp}-{nonce}` shape, e.g.
    /// `pty-1737936000-4af1`. Used only to decide acceptance during parsing;
    /// new ids are always minted via [`Self::new`].
    pub fn is_legacy_form(&self) -> bool {
        let parts: Vec<&str> = self.0.splitn(3, '-').collect();
        parts.len() == 3
            && SessionKind::parse(parts[0]).is_some()
            && parts[1].chars().all(|c| c.is_ascii_digit())
            && !parts[2].is_empty()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSessionId;

impl std::fmt::Display for InvalidSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid session id")
    }
}

impl std::error::Error for InvalidSessionId {}

/// Opaque authenticated user identifier, consumed verbatim from the external
/// auth collaborator.
pub type UserId = String;

/// A filesystem directory that scopes a session's working context.
///
/// Invariant: `path` must be absolute. Canonicalization (resolving symlinks
/// and `..`) is performed once at construction so later comparisons
/// (ownership checks, display) never have to re-normalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Build a workspace from an absolute path. Canonicalizes when the path
    /// exists on disk; falls back to a lexical normalization (no `..`
    /// segments) otherwise, so workspaces can be declared before the
    /// directory is created by the external collaborator.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, InvalidWorkspace> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(InvalidWorkspace::NotAbsolute);
        }
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| lexical_normalize(path));
        Ok(Self { path: canonical })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidWorkspace {
    NotAbsolute,
}

impl std::fmt::Display for InvalidWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAbsolute => f.write_str("workspace path must be absolute"),
        }
    }
}

impl std::error::Error for InvalidWorkspace {}

/// The core entity: a long-lived external process exposed as an event
/// stream plus an input channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSession {
    pub id: SessionId,
    pub kind: SessionKind,
    pub owner_user_id: UserId,
    pub workspace_path: PathBuf,
    pub title: String,
    pub status: SessionStatus,
    pub last_seq: u64,
    pub created_at_ms: u64,
    pub last_activity_at_ms: u64,
    pub pinned: bool,
    /// Opaque bytes the adapter serialized at close to permit a later resume
    /// attempt. Never interpreted by the orchestrator itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_specific_state: Option<Vec<u8>>,
}

impl RunSession {
    pub fn new(id: SessionId, kind: SessionKind, owner_user_id: UserId, workspace: &Workspace) -> Self {
        let now = now_ms();
        Self {
            id,
            kind,
            owner_user_id,
            workspace_path: workspace.path().to_path_buf(),
            title: kind.as_str().to_owned(),
            status: SessionStatus::Starting,
            last_seq: 0,
            created_at_ms: now,
            last_activity_at_ms: now,
            pinned: false,
            type_specific_state: None,
        }
    }

    pub fn touch_activity(&mut self) {
        self.last_activity_at_ms = now_ms();
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Append-only record attached to a session. See SPEC_FULL §3 for the full
/// invariants (dense, gap-free `seq`; `(sessionId, seq)` uniqueness).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub session_id: SessionId,
    pub seq: u64,
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Payload,
    pub timestamp_ms: u64,
}

/// A self-describing, channel-specific value. Adapters construct these
/// freely; the store and transport never interpret the contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Opaque bytes, carried as base64 on the wire (matches this codebase's
    /// existing convention for binary PTY output in JSON messages).
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    List(Vec<Payload>),
    Map(indexmap::IndexMap<String, Payload>),
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

/// Well-known channel names. Channels are otherwise free-form strings;
/// adapters own their own namespace.
pub mod channel {
    pub const STDOUT: &str = "stdout";
    pub const STDIN: &str = "stdin";
    pub const RESIZE: &str = "resize";
    pub const SYSTEM_STATUS: &str = "system:status";
    pub const SYSTEM_INPUT: &str = "system:input";
    pub const AI_MESSAGE: &str = "ai:message";
    pub const AI_ERROR: &str = "ai:error";
    pub const WEB_VIEW_NAVIGATION: &str = "web-view:navigation";
}

/// Transient: one live connection attached to one session. Exists only
/// while the transport holds it; never persisted.
#[derive(Debug, Clone)]
pub struct ClientSubscription {
    pub client_id: String,
    pub session_id: SessionId,
    pub last_delivered_seq: u64,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
