// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state passed to every HTTP/WS handler via axum's
//! `State` extractor. Mirrors this codebase's existing `Store`, trimmed to
//! the handful of process-wide services the core actually needs (SPEC_FULL
//! §9: "the only process-wide state is the registered adapter factories and
//! the initialized core services").

use std::sync::Arc;
use std::time::Instant;

use crate::orchestrator::Orchestrator;

/// Settings read once at startup and never mutated, threaded alongside the
/// orchestrator so handlers can answer without a lock (auth token, queue
/// capacity, process start time for `/healthz` uptime).
pub struct TransportSettings {
    pub auth_token: Option<String>,
    pub backpressure_capacity: usize,
    pub started_at: Instant,
}

/// Everything an HTTP or WebSocket handler needs, shared behind one `Arc`.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub settings: TransportSettings,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, settings: TransportSettings) -> Arc<Self> {
        Arc::new(Self { orchestrator, settings })
    }
}
