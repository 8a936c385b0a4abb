// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared-secret bearer validation, standing in for the external auth
//! collaborator SPEC_FULL §1 says the core consumes a verified `userId`
//! from. Mirrors this codebase's existing `transport::auth` module
//! (`validate_bearer`/`validate_ws_auth`, constant-time comparison).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::DispatchError;
use crate::transport::http::{ErrorBody, ErrorResponse};
use crate::transport::msg::Credential;
use crate::transport::state::AppState;

/// Constant-time string comparison to avoid a timing side-channel on the
/// shared secret.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a `Bearer` token from an HTTP request's `Authorization` header.
/// `Ok(())` when `expected` is `None` (auth disabled) or the header matches.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), DispatchError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(DispatchError::NotAuthenticated)?;

    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(DispatchError::NotAuthenticated)
    }
}

/// Validate a WebSocket `auth` message's credential. Returns the verified
/// `userId` on success. When `expected` is `None`, auth is disabled and the
/// client-supplied `user_id` is trusted outright — matching this codebase's
/// existing toggle where an absent configured secret means "auth off".
pub fn validate_credential(
    credential: &Credential,
    expected: Option<&str>,
) -> Result<String, DispatchError> {
    match expected {
        None => Ok(credential.user_id.clone()),
        Some(secret) => match credential.token.as_deref() {
            Some(token) if constant_time_eq(token, secret) => Ok(credential.user_id.clone()),
            _ => Err(DispatchError::NotAuthenticated),
        },
    }
}

/// Axum middleware enforcing bearer auth on every HTTP route except
/// `/healthz` and the `/ws` upgrade (the live transport authenticates its
/// own connection via the `auth` client message instead, since a browser
/// cannot set an `Authorization` header on a WebSocket handshake).
pub async fn auth_layer(State(state): State<Arc<AppState>>, req: Request<axum::body::Body>, next: Next) -> Response {
    let path = req.uri().path();
    if path == "/healthz" || path == "/ws" {
        return next.run(req).await;
    }

    if let Err(err) = validate_bearer(req.headers(), state.settings.auth_token.as_deref()) {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::UNAUTHORIZED);
        let body = ErrorResponse { error: ErrorBody { code: err.as_str().to_owned(), message: err.message() } };
        return (status, Json(body)).into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
