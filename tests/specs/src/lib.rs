// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenarios against the real `dispatchd`
//! binary. Spawns the binary as a
//! subprocess, listening on a free TCP port with a temp data dir, and
//! exercises it over the HTTP and WebSocket transports exactly as an
//! external client would.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Resolve the path to the compiled `dispatchd` binary.
pub fn dispatchd_binary() -> PathBuf {
    let manifest = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("dispatchd")
}

/// A running `dispatchd` process, killed on drop.
pub struct DispatchProcess {
    child: Child,
    port: u16,
    _data_dir: tempfile::TempDir,
}

impl DispatchProcess {
    /// Spawn `dispatchd` with a fresh temp data dir and auth disabled.
    pub fn start() -> anyhow::Result<Self> {
        Self::start_with_auth(None)
    }

    /// Spawn `dispatchd` with the given shared-secret auth token, or no auth
    /// when `auth_token` is `None`.
    pub fn start_with_auth(auth_token: Option<&str>) -> anyhow::Result<Self> {
        let binary = dispatchd_binary();
        anyhow::ensure!(binary.exists(), "dispatchd binary not found at {}", binary.display());

        let port = free_port()?;
        let data_dir = tempfile::tempdir()?;

        let mut command = Command::new(&binary);
        command
            .arg("--port")
            .arg(port.to_string())
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--data-dir")
            .arg(data_dir.path())
            .arg("--log-format")
            .arg("text")
            .arg("--log-level")
            .arg("warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(token) = auth_token {
            command.arg("--auth-token").arg(token);
        }

        let child = command.spawn()?;
        Ok(Self { child, port, _data_dir: data_dir })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Poll `/healthz` until it responds, or fail after `timeout`.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/healthz", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("dispatchd did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("dispatchd did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for DispatchProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Minimal HTTP client for the `/sessions` REST surface,
/// used by scenario tests that create/list/close sessions over HTTP and
/// then attach to them over the `/ws` live transport.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }

    pub async fn create_session(&self, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let resp = self.client.post(format!("{}/sessions", self.base_url)).json(&body).send().await?;
        anyhow::ensure!(resp.status().is_success(), "create_session: {}", resp.status());
        Ok(resp.json().await?)
    }

    pub async fn get_session(&self, id: &str, owner_user_id: &str) -> anyhow::Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}/sessions/{id}", self.base_url))
            .query(&[("owner_user_id", owner_user_id)])
            .send()
            .await?)
    }

    pub async fn close_session(&self, id: &str, owner_user_id: &str) -> anyhow::Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}/sessions/{id}/close", self.base_url))
            .json(&serde_json::json!({ "owner_user_id": owner_user_id }))
            .send()
            .await?)
    }

    pub async fn events(&self, id: &str, owner_user_id: &str, after_seq: u64) -> anyhow::Result<Vec<serde_json::Value>> {
        let resp = self
            .client
            .get(format!("{}/sessions/{id}/events", self.base_url))
            .query(&[("owner_user_id", owner_user_id), ("after_seq", &after_seq.to_string())])
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "events: {}", resp.status());
        Ok(resp.json().await?)
    }
}
