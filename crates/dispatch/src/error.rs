// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed error taxonomy threaded through every layer and serialized only at
//! the transport boundary (HTTP status / WS `error` frame). Mirrors the
//! three-way mapping this codebase's own `ErrorCode` has always carried
//! (`http_status()`, `as_str()`, `Display`), extended with the taxonomy
//! SPEC_FULL §7 requires and a `tracing` level per variant.

use serde::{Deserialize, Serialize};
use tracing::Level;

/// Error taxonomy surfaced to callers, orthogonal to transport/HTTP framing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchError {
    NotFound { what: String },
    NotAuthenticated,
    NotAuthorized,
    InvalidArgument { detail: String },
    Conflict { detail: String },
    SessionClosed,
    AdapterFailure { detail: String },
    StoreFailure { detail: String },
    Overflow { last_delivered_seq: u64 },
}

impl DispatchError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::InvalidArgument { detail: detail.into() }
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict { detail: detail.into() }
    }

    pub fn adapter_failure(detail: impl Into<String>) -> Self {
        Self::AdapterFailure { detail: detail.into() }
    }

    pub fn store_failure(detail: impl Into<String>) -> Self {
        Self::StoreFailure { detail: detail.into() }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::NotAuthenticated => 401,
            Self::NotAuthorized => 403,
            Self::InvalidArgument { .. } => 400,
            Self::Conflict { .. } => 409,
            Self::SessionClosed => 410,
            Self::AdapterFailure { .. } => 502,
            Self::StoreFailure { .. } => 503,
            Self::Overflow { .. } => 429,
        }
    }

    /// The `kind` string sent in a WebSocket `error` frame's `kind` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Conflict { .. } => "CONFLICT",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::AdapterFailure { .. } => "ADAPTER_FAILURE",
            Self::StoreFailure { .. } => "STORE_FAILURE",
            Self::Overflow { .. } => "OVERFLOW",
        }
    }

    /// The `tracing` level a caller should log this error at. Auth failures
    /// are deliberately quiet (`debug`) since they happen routinely for
    /// stale clients; store and adapter failures are loud (`error`/`warn`).
    pub fn log_level(&self) -> Level {
        match self {
            Self::NotAuthenticated | Self::NotAuthorized => Level::DEBUG,
            Self::NotFound { .. } | Self::InvalidArgument { .. } | Self::Conflict { .. } => {
                Level::WARN
            }
            Self::SessionClosed | Self::Overflow { .. } => Level::INFO,
            Self::AdapterFailure { .. } => Level::WARN,
            Self::StoreFailure { .. } => Level::ERROR,
        }
    }

    /// Short, free-form, user-visible message. Never a stack trace, never
    /// includes a credential.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound { what } => format!("not found: {what}"),
            Self::NotAuthenticated => "authentication required".to_owned(),
            Self::NotAuthorized => "not authorized for this session".to_owned(),
            Self::InvalidArgument { detail } => detail.clone(),
            Self::Conflict { detail } => detail.clone(),
            Self::SessionClosed => "session is closed".to_owned(),
            Self::AdapterFailure { detail } => detail.clone(),
            Self::StoreFailure { detail } => detail.clone(),
            Self::Overflow { last_delivered_seq } => {
                format!("subscription overflow after seq {last_delivered_seq}")
            }
        }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.message())
    }
}

impl std::error::Error for DispatchError {}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
