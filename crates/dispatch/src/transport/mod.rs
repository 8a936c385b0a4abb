// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP and WebSocket transport: the only two ways a client ever reaches
//! the orchestrator. Mirrors this codebase's own
//! `transport::build_router`/`build_router_inner` split — one function
//! assembling every route behind a shared `State`, CORS permissive by
//! default since the browser client and this server are not assumed to
//! share an origin.

pub mod auth;
pub mod http;
pub mod msg;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum `Router` with every HTTP route and the `/ws` live
/// transport upgrade.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions", post(http::create_session).get(http::list_sessions))
        .route("/sessions/{id}", get(http::get_session))
        .route("/sessions/{id}/close", post(http::close_session))
        .route("/sessions/{id}/events", get(http::session_events))
        .route("/healthz", get(http::healthz))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
