// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ai` adapter: drives a configured coding-assistant subprocess over its
//! stdio, framing each line of stdout as one `ai:message` event (falling
//! back to the raw line when it isn't JSON) and each line of stderr as
//! `ai:error` — the same structured-stdout-JSONL tier this codebase's own
//! `StdoutDetector` watches for, generalized from "detect a state" to
//! "forward every line".
//!
//! Does not implement `resize`: an AI assistant process has no terminal
//! geometry to speak of.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use super::{emit, Adapter, AdapterConfig, AdapterHandle, BoxFuture, Emit};
use crate::error::DispatchError;
use crate::model::{channel, Payload};

/// Factory for `ai` sessions. `command` is the argv used to launch the
/// assistant when a session doesn't override it via `AdapterConfig::argv`.
pub struct AiAdapter {
    default_command: Vec<String>,
}

impl AiAdapter {
    pub fn new(default_command: Vec<String>) -> Self {
        Self { default_command }
    }
}

impl Adapter for AiAdapter {
    fn start(
        &self,
        config: AdapterConfig,
        emitter: Emit,
    ) -> BoxFuture<'static, Result<Box<dyn AdapterHandle>, DispatchError>> {
        let argv = config.argv.filter(|v| !v.is_empty()).unwrap_or_else(|| self.default_command.clone());
        Box::pin(async move {
            let [program, rest @ ..] = argv.as_slice() else {
                return Err(DispatchError::invalid_argument("ai sessions require a non-empty command"));
            };

            let mut command = Command::new(program);
            command
                .args(rest)
                .current_dir(config.workspace.path())
                .envs(config.env.iter().cloned())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = command
                .spawn()
                .map_err(|e| DispatchError::adapter_failure(format!("spawn ai command: {e}")))?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| DispatchError::adapter_failure("ai child has no stdin"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| DispatchError::adapter_failure("ai child has no stdout"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| DispatchError::adapter_failure("ai child has no stderr"))?;

            tokio::spawn(pump_lines(stdout, channel::AI_MESSAGE, emitter.clone()));
            tokio::spawn(pump_lines(stderr, channel::AI_ERROR, emitter.clone()));
            tokio::spawn(wait_and_report(child, emitter));

            Ok(Box::new(AiHandle { stdin: Mutex::new(stdin) }) as Box<dyn AdapterHandle>)
        })
    }
}

async fn pump_lines(
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    channel: &'static str,
    emitter: Emit,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let payload = match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(value) => json_to_payload(value),
                    Err(_) => Payload::String(line),
                };
                emit(&emitter, channel, "message", payload);
            }
            Ok(None) => break,
            Err(e) => {
                emit(
                    &emitter,
                    channel,
                    "error",
                    Payload::String(format!("read error: {e}")),
                );
                break;
            }
        }
    }
}

async fn wait_and_report(mut child: Child, emitter: Emit) {
    let status = child.wait().await;
    let kind = match &status {
        Ok(status) if status.success() => "closed",
        _ => "error",
    };
    let mut fields = indexmap::IndexMap::new();
    fields.insert(
        "exitCode".to_owned(),
        status
            .ok()
            .and_then(|s| s.code())
            .map(|c| Payload::Number(c as f64))
            .unwrap_or(Payload::Null),
    );
    emit(&emitter, channel::SYSTEM_STATUS, kind, Payload::Map(fields));
}

fn json_to_payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Null => Payload::Null,
        serde_json::Value::Bool(b) => Payload::Bool(b),
        serde_json::Value::Number(n) => Payload::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Payload::String(s),
        serde_json::Value::Array(items) => Payload::List(items.into_iter().map(json_to_payload).collect()),
        serde_json::Value::Object(map) => {
            Payload::Map(map.into_iter().map(|(k, v)| (k, json_to_payload(v))).collect())
        }
    }
}

struct AiHandle {
    stdin: Mutex<ChildStdin>,
}

impl AdapterHandle for AiHandle {
    fn write(&self, data: Payload) -> BoxFuture<'_, Result<(), DispatchError>> {
        Box::pin(async move {
            let line = match data {
                Payload::String(s) => s,
                other => serde_json::to_string(&other)
                    .map_err(|e| DispatchError::invalid_argument(format!("ai input: {e}")))?,
            };
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .and_then(|()| stdin.write_all(b"\n"))
                .map_err(|_| DispatchError::SessionClosed)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Option<Vec<u8>>> {
        Box::pin(async move {
            let mut stdin = self.stdin.into_inner();
            let _ = stdin.shutdown().await;
            None
        })
    }
}

#[cfg(test)]
#[path = "ai_tests.rs"]
mod tests;
