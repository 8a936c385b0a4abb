// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios from SPEC_FULL §8, run against the real `dispatchd`
//! binary over its HTTP and WebSocket transports.

use std::time::Duration;

use dispatch_specs::{ApiClient, DispatchProcess};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

const TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(dispatchd: &DispatchProcess) -> anyhow::Result<WsStream> {
    let (ws, _) = tokio_tungstenite::connect_async(dispatchd.ws_url()).await?;
    Ok(ws)
}

async fn send_json<S>(ws: &mut S, value: serde_json::Value) -> anyhow::Result<()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    ws.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

async fn recv_json<S>(ws: &mut S) -> anyhow::Result<serde_json::Value>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
    let text = match msg {
        Message::Text(t) => t.to_string(),
        other => anyhow::bail!("expected a text message, got {other:?}"),
    };
    Ok(serde_json::from_str(&text)?)
}

#[tokio::test]
async fn http_health_reports_session_count() -> anyhow::Result<()> {
    let dispatchd = DispatchProcess::start()?;
    dispatchd.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value = reqwest::get(format!("{}/healthz", dispatchd.base_url())).await?.json().await?;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["session_count"], 0);

    Ok(())
}

/// Scenario A — pty echo.
#[tokio::test]
async fn scenario_a_pty_echo() -> anyhow::Result<()> {
    let dispatchd = DispatchProcess::start()?;
    dispatchd.wait_healthy(TIMEOUT).await?;
    let api = ApiClient::new(dispatchd.base_url());

    let session = api
        .create_session(serde_json::json!({
            "kind": "pty",
            "owner_user_id": "u1",
            "workspace_path": "/tmp",
            "argv": ["/bin/echo", "hello"],
        }))
        .await?;
    let session_id = session["id"].as_str().unwrap().to_owned();

    let mut ws = connect(&dispatchd).await?;
    send_json(&mut ws, serde_json::json!({"type": "auth", "credential": {"user_id": "u1"}})).await?;
    let auth_reply = recv_json(&mut ws).await?;
    assert_eq!(auth_reply["type"], "ok");

    send_json(&mut ws, serde_json::json!({"type": "attach", "session_id": session_id, "after_seq": 0})).await?;
    // `pty` sessions offer a screen-state snapshot, delivered once right
    // before the `ok` ack.
    let mut attach_reply = recv_json(&mut ws).await?;
    if attach_reply["type"] == "run:snapshot" {
        assert_eq!(attach_reply["session_id"], session_id);
        attach_reply = recv_json(&mut ws).await?;
    }
    assert_eq!(attach_reply["type"], "ok");

    let mut stdout = Vec::new();
    let mut saw_opened = false;
    let mut closed_event = None;

    loop {
        let event = recv_json(&mut ws).await?;
        assert_eq!(event["type"], "run:event", "unexpected message: {event}");
        match (event["channel"].as_str(), event["kind"].as_str()) {
            (Some("system:status"), Some("opened")) => {
                saw_opened = true;
                assert_eq!(event["seq"], 1);
            }
            (Some("stdout"), Some("data")) => {
                if let Some(s) = event["payload"].as_str() {
                    use base64::Engine;
                    stdout.extend(base64::engine::general_purpose::STANDARD.decode(s)?);
                }
            }
            (Some("system:status"), Some("closed")) => {
                closed_event = Some(event);
                break;
            }
            _ => {}
        }
    }

    assert!(saw_opened, "never observed system:status/opened");
    assert_eq!(String::from_utf8(stdout)?, "hello\n");
    let closed_event = closed_event.expect("session never closed");
    assert_eq!(closed_event["payload"]["exitCode"].as_f64(), Some(0.0));

    Ok(())
}

/// Scenario E — authorization: a second user may not attach
/// to or write to a session they do not own, and no event is appended as a
/// result of the rejected write.
#[tokio::test]
async fn scenario_e_authorization() -> anyhow::Result<()> {
    let dispatchd = DispatchProcess::start()?;
    dispatchd.wait_healthy(TIMEOUT).await?;
    let api = ApiClient::new(dispatchd.base_url());

    let session = api
        .create_session(serde_json::json!({
            "kind": "pty",
            "owner_user_id": "u1",
            "workspace_path": "/tmp",
            "argv": ["sleep", "5"],
        }))
        .await?;
    let session_id = session["id"].as_str().unwrap().to_owned();

    // HTTP surface: a mismatched owner_user_id is NotAuthorized too.
    let resp = api.get_session(&session_id, "u2").await?;
    assert_eq!(resp.status().as_u16(), 403);

    let mut ws = connect(&dispatchd).await?;
    send_json(&mut ws, serde_json::json!({"type": "auth", "credential": {"user_id": "u2"}})).await?;
    let auth_reply = recv_json(&mut ws).await?;
    assert_eq!(auth_reply["type"], "ok");

    send_json(&mut ws, serde_json::json!({"type": "attach", "session_id": session_id, "after_seq": 0})).await?;
    let attach_reply = recv_json(&mut ws).await?;
    assert_eq!(attach_reply["type"], "error");
    assert_eq!(attach_reply["kind"], "NOT_AUTHORIZED");

    send_json(&mut ws, serde_json::json!({"type": "input", "session_id": session_id, "data": "x"})).await?;
    let write_reply = recv_json(&mut ws).await?;
    assert_eq!(write_reply["type"], "error");
    assert_eq!(write_reply["kind"], "NOT_AUTHORIZED");

    // No system:input event should have been appended as a result.
    let events = api.events(&session_id, "u1", 0).await?;
    assert!(events.iter().all(|e| e["channel"] != "system:input"));

    api.close_session(&session_id, "u1").await?;
    Ok(())
}

/// Scenario F — close idempotence: repeated `close` calls
/// yield exactly one `system:status/closed` event.
#[tokio::test]
async fn scenario_f_close_idempotence() -> anyhow::Result<()> {
    let dispatchd = DispatchProcess::start()?;
    dispatchd.wait_healthy(TIMEOUT).await?;
    let api = ApiClient::new(dispatchd.base_url());

    let session = api
        .create_session(serde_json::json!({
            "kind": "pty",
            "owner_user_id": "u1",
            "workspace_path": "/tmp",
            "argv": ["sleep", "5"],
        }))
        .await?;
    let session_id = session["id"].as_str().unwrap().to_owned();

    for _ in 0..3 {
        let resp = api.close_session(&session_id, "u1").await?;
        assert_eq!(resp.status().as_u16(), 204);
    }

    let resp = api.get_session(&session_id, "u1").await?;
    let session: serde_json::Value = resp.json().await?;
    assert_eq!(session["status"], "closed");

    let events = api.events(&session_id, "u1", 0).await?;
    let closed_count =
        events.iter().filter(|e| e["channel"] == "system:status" && e["type"] == "closed").count();
    assert_eq!(closed_count, 1);

    Ok(())
}

/// Event store invariant 1: `range(0)` returns a gap-free,
/// duplicate-free `1, 2, ..., lastSeq` sequence.
#[tokio::test]
async fn event_range_has_no_gaps_or_duplicates() -> anyhow::Result<()> {
    let dispatchd = DispatchProcess::start()?;
    dispatchd.wait_healthy(TIMEOUT).await?;
    let api = ApiClient::new(dispatchd.base_url());

    let session = api
        .create_session(serde_json::json!({
            "kind": "pty",
            "owner_user_id": "u1",
            "workspace_path": "/tmp",
            "argv": ["/bin/echo", "gap-check"],
        }))
        .await?;
    let session_id = session["id"].as_str().unwrap().to_owned();

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("session never closed");
        }
        let resp = api.get_session(&session_id, "u1").await?;
        let session: serde_json::Value = resp.json().await?;
        if session["status"] == "closed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let events = api.events(&session_id, "u1", 0).await?;
    let seqs: Vec<u64> = events.iter().map(|e| e["seq"].as_u64().unwrap()).collect();
    let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected);

    Ok(())
}

/// Authenticated WebSocket operations fail before `auth` has completed.
#[tokio::test]
async fn unauthenticated_attach_is_rejected() -> anyhow::Result<()> {
    let dispatchd = DispatchProcess::start()?;
    dispatchd.wait_healthy(TIMEOUT).await?;

    let mut ws = connect(&dispatchd).await?;
    send_json(&mut ws, serde_json::json!({"type": "attach", "session_id": "does-not-exist", "after_seq": 0})).await?;
    let reply = recv_json(&mut ws).await?;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["kind"], "NOT_AUTHENTICATED");

    Ok(())
}
