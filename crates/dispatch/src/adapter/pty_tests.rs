use std::time::Duration;

use serial_test::serial;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::model::Workspace;

// Every test here forks a real PTY child; run them one at a time so a loaded
// CI box doesn't starve `waitpid`/`forkpty` across tests (matches this
// codebase's own serialization of its PTY backend tests).

fn config(argv: Vec<&str>) -> AdapterConfig {
    AdapterConfig {
        workspace: Workspace::new(std::env::temp_dir()).unwrap(),
        cols: Some(80),
        rows: Some(24),
        env: Vec::new(),
        argv: Some(argv.into_iter().map(str::to_owned).collect()),
        resume_state: None,
    }
}

async fn next_emitted(rx: &mut mpsc::UnboundedReceiver<crate::adapter::Emitted>) -> crate::adapter::Emitted {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an emitted event")
        .expect("emit channel closed unexpectedly")
}

#[tokio::test]
async fn start_without_argv_is_invalid_argument() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let config = AdapterConfig {
        workspace: Workspace::new(std::env::temp_dir()).unwrap(),
        cols: None,
        rows: None,
        env: Vec::new(),
        argv: None,
        resume_state: None,
    };
    let err = PtyAdapter.start(config, tx).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidArgument { .. }));
}

#[tokio::test]
#[serial]
async fn echoed_input_comes_back_on_stdout() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = PtyAdapter.start(config(vec!["cat"]), tx).await.unwrap();

    handle.write(Payload::Bytes(b"hello\n".to_vec())).await.unwrap();

    let mut seen = Vec::new();
    loop {
        let event = next_emitted(&mut rx).await;
        if event.channel == channel::STDOUT {
            if let Payload::Bytes(bytes) = event.payload {
                seen.extend(bytes);
            }
            if seen.windows(5).any(|w| w == b"hello") {
                break;
            }
        }
    }

    drop(handle);
}

#[tokio::test]
#[serial]
async fn close_terminates_the_child() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = PtyAdapter.start(config(vec!["sleep", "30"]), tx).await.unwrap();

    let state = handle.close().await;
    assert!(state.is_none());

    loop {
        let event = next_emitted(&mut rx).await;
        if event.channel == channel::SYSTEM_STATUS {
            break;
        }
    }
}

#[tokio::test]
#[serial]
async fn resize_does_not_error_on_a_live_session() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let handle = PtyAdapter.start(config(vec!["sleep", "30"]), tx).await.unwrap();
    assert!(handle.resize(100, 40).await.is_ok());
    let _ = handle.close().await;
}

#[tokio::test]
#[serial]
async fn snapshot_reflects_fed_output() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = PtyAdapter.start(config(vec!["echo", "snapshot-marker"]), tx).await.unwrap();

    loop {
        let event = next_emitted(&mut rx).await;
        if event.channel == channel::STDOUT {
            break;
        }
    }
    // Give the screen feed a moment to catch up with the just-drained event.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = handle.snapshot().expect("pty adapter supports snapshot");
    let Payload::Map(fields) = snapshot else { panic!("expected a map payload") };
    let Some(Payload::List(lines)) = fields.get("lines") else { panic!("expected a lines list") };
    let joined: String = lines
        .iter()
        .filter_map(|line| match line {
            Payload::String(s) => Some(s.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    assert!(joined.contains("snapshot-marker"));

    drop(handle);
}
