// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process configuration: a single `clap::Parser` struct, fields overridable
//! by `DISPATCH_`-prefixed environment variables, validated once in
//! [`Config::validate`] right after parsing and before anything binds a
//! socket — the same shape this codebase's command-line entry points have
//! always used (`#[arg(long, env = "...")]` on every field).

use std::path::PathBuf;

use clap::Parser;

/// Dispatch server configuration.
#[derive(Debug, Parser, Clone)]
#[command(name = "dispatchd", version, about = "Run session dispatch server.")]
pub struct Config {
    /// HTTP/WS port to listen on.
    #[arg(long, env = "DISPATCH_PORT")]
    pub port: Option<u16>,

    /// Unix socket path to listen on, as an alternative to `--port`.
    #[arg(long, env = "DISPATCH_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Host address to bind to.
    #[arg(long, env = "DISPATCH_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Root directory for the event store's persistence
    /// (`{data-dir}/events/{sessionId}.jsonl`, one file per session).
    #[arg(long, env = "DISPATCH_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Default working-directory root used to resolve relative workspace
    /// paths supplied to `create`.
    #[arg(long, env = "DISPATCH_WORKDIR_ROOT", default_value = ".")]
    pub workdir_root: PathBuf,

    /// Shared-secret bearer token. `None` disables auth, matching this
    /// codebase's existing auth toggle.
    #[arg(long, env = "DISPATCH_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Per-subscription outbound queue capacity before a slow client is
    /// dropped with `overflow`.
    #[arg(long, env = "DISPATCH_BACKPRESSURE_CAPACITY", default_value = "1024")]
    pub backpressure_capacity: usize,

    /// Grace period, in seconds, an adapter gets to return
    /// `typeSpecificState` on close before a forced close.
    #[arg(long, env = "DISPATCH_CLOSE_GRACE_SECS", default_value = "5")]
    pub close_grace_secs: u64,

    /// Seconds of inactivity before a `running` session is reported `idle`.
    /// Advisory only; never drops events.
    #[arg(long, env = "DISPATCH_IDLE_THRESHOLD_SECS", default_value = "300")]
    pub idle_threshold_secs: u64,

    /// Consecutive store append failures tolerated before a session is
    /// marked `error`.
    #[arg(long, env = "DISPATCH_STORE_FAILURE_LIMIT", default_value = "3")]
    pub store_failure_limit: u32,

    /// Log format: `json` or `text`.
    #[arg(long, env = "DISPATCH_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "DISPATCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Default argv used to launch an `ai` session when `create` doesn't
    /// override it. Space-separated when set via the environment variable.
    #[arg(
        long,
        env = "DISPATCH_AI_COMMAND",
        value_delimiter = ' ',
        default_value = "ai-assistant"
    )]
    pub ai_command: Vec<String>,
}

impl Config {
    /// Validate the configuration after parsing, before anything binds a
    /// socket or opens the data directory.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port.is_none() && self.socket.is_none() {
            anyhow::bail!("either --port or --socket must be specified");
        }
        if self.port.is_some() && self.socket.is_some() {
            anyhow::bail!("cannot specify both --port and --socket");
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be 'json' or 'text'");
        }
        if self.backpressure_capacity == 0 {
            anyhow::bail!("--backpressure-capacity must be at least 1");
        }
        if self.store_failure_limit == 0 {
            anyhow::bail!("--store-failure-limit must be at least 1");
        }
        if self.ai_command.is_empty() {
            anyhow::bail!("--ai-command must be non-empty");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
