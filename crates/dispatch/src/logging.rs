// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured, leveled diagnostics correlated by session id, initialized the
//! same way every binary in this codebase sets up its `fmt` subscriber: an
//! `env-filter` built from `--log-level`/`RUST_LOG`, JSON output in
//! production and compact text in development.

use crate::config::Config;

/// Initialize the global `tracing` subscriber from `config`. Call once, as
/// early as possible in `main`, before anything else logs.
pub fn init(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }
}

/// Build a `tracing` span correlated to a single run session. Attach at the
/// point a session is created so every later log line in that task's tree
/// carries `session_id` automatically.
#[macro_export]
macro_rules! session_span {
    ($session_id:expr) => {
        tracing::info_span!("session", session_id = %$session_id)
    };
}

/// Build a `tracing` span correlated to a single transport connection.
#[macro_export]
macro_rules! client_span {
    ($client_id:expr) => {
        tracing::info_span!("client", client_id = %$client_id)
    };
}
