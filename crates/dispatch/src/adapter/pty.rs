// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pty` adapter: spawns `argv` on a real pseudo-terminal via `forkpty`.
//!
//! Grounded directly in this codebase's own PTY backend (`NativePty`): a
//! non-blocking master fd wrapped in `AsyncFd`, a `tokio::select!` loop
//! racing PTY reads against an input channel and a resize channel,
//! `TIOCSWINSZ` for resize, and a `Drop` impl that sends `SIGHUP` then
//! `SIGKILL` with a short grace window.

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, execvp, ForkResult, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use super::{emit, Adapter, AdapterConfig, AdapterHandle, BoxFuture, Emit};
use crate::error::DispatchError;
use crate::model::{channel, Payload};

/// Running terminal emulator fed every `stdout` chunk, so `snapshot` can
/// synthesize a catch-up "screen state" instead of forcing a reconnecting
/// client to replay the session's entire raw byte history (SPEC_FULL §4.2
/// optional capability). Grounded in this codebase's own `Screen` type: an
/// `avt::Vt` fed lossy-UTF-8 text, queried for its current line buffer and
/// cursor position.
struct PtyScreen {
    vt: avt::Vt,
}

impl PtyScreen {
    fn new(cols: u16, rows: u16) -> Self {
        Self { vt: avt::Vt::new(cols as usize, rows as usize) }
    }

    fn feed(&mut self, data: &[u8]) {
        // Lossy is acceptable here: the raw bytes are the durable record
        // (stdout/data events); this copy only backs the optional snapshot.
        let text = String::from_utf8_lossy(data);
        let _ = self.vt.feed_str(&text);
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        let _ = self.vt.resize(cols as usize, rows as usize);
    }

    fn snapshot(&self) -> Payload {
        let (cols, rows) = self.vt.size();
        let cursor = self.vt.cursor();
        let lines: Vec<Payload> =
            self.vt.view().map(|line| Payload::String(line.text())).collect();

        let mut fields = indexmap::IndexMap::new();
        fields.insert("lines".to_owned(), Payload::List(lines));
        fields.insert("cols".to_owned(), Payload::Number(cols as f64));
        fields.insert("rows".to_owned(), Payload::Number(rows as f64));
        fields.insert("cursorRow".to_owned(), Payload::Number(cursor.row as f64));
        fields.insert("cursorCol".to_owned(), Payload::Number(cursor.col as f64));
        Payload::Map(fields)
    }
}

/// Newtype wrapper around the raw master fd for use with `AsyncFd`.
struct PtyFd(std::os::fd::OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

/// Set the given file descriptor to non-blocking mode.
fn set_nonblocking(fd: &impl AsRawFd) -> std::io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

async fn read_chunk(afd: &AsyncFd<PtyFd>, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::read(inner.as_raw_fd(), buf).map_err(io_err)?;
            Ok(n)
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

async fn write_all(afd: &AsyncFd<PtyFd>, data: &[u8]) -> std::io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let mut guard = afd.writable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::write(inner, &data[offset..]).map_err(io_err)?;
            Ok(n)
        }) {
            Ok(Ok(n)) => offset += n,
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

/// Factory for `pty` sessions.
pub struct PtyAdapter;

impl Adapter for PtyAdapter {
    fn start(
        &self,
        config: AdapterConfig,
        emitter: Emit,
    ) -> BoxFuture<'static, Result<Box<dyn AdapterHandle>, DispatchError>> {
        Box::pin(async move {
            let argv = config
                .argv
                .filter(|v| !v.is_empty())
                .ok_or_else(|| DispatchError::invalid_argument("pty sessions require a non-empty argv"))?;
            let cols = config.cols.unwrap_or(80);
            let rows = config.rows.unwrap_or(24);
            let workdir = config.workspace.path().to_path_buf();

            let (master, child_pid) = spawn_pty(&argv, &config.env, &workdir, cols, rows)?;

            let (input_tx, input_rx) = mpsc::channel::<Bytes>(256);
            let (resize_tx, resize_rx) = mpsc::channel::<(u16, u16)>(8);
            let screen = Arc::new(Mutex::new(PtyScreen::new(cols, rows)));

            tokio::spawn(run_io(master, child_pid, input_rx, resize_rx, emitter, Arc::clone(&screen)));

            Ok(Box::new(PtyHandle { input_tx, resize_tx, child_pid, screen }) as Box<dyn AdapterHandle>)
        })
    }
}

/// Spawn `argv` on a fresh PTY inside `workdir`, with `env` applied on top
/// of the child's inherited environment. Returns the non-blocking master fd
/// and the child's pid.
// forkpty requires unsafe: the post-fork child is partially initialized
// until it execs.
#[allow(unsafe_code)]
fn spawn_pty(
    argv: &[String],
    env: &[(String, String)],
    workdir: &std::path::Path,
    cols: u16,
    rows: u16,
) -> Result<(AsyncFd<PtyFd>, Pid), DispatchError> {
    let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

    // SAFETY: forkpty is unsafe because the child is in a
    // partially-initialized state after fork; we immediately chdir and exec.
    let result = unsafe { forkpty(&winsize, None) }
        .map_err(|e| DispatchError::adapter_failure(format!("forkpty failed: {e}")))?;
    let ForkptyResult { master, fork_result } = result;

    match fork_result {
        ForkResult::Child => {
            if chdir(workdir).is_err() {
                std::process::exit(127);
            }
            std::env::set_var("TERM", "xterm-256color");
            for (key, value) in env {
                std::env::set_var(key, value);
            }

            let Ok(c_args) =
                argv.iter().map(|s| CString::new(s.as_bytes())).collect::<Result<Vec<_>, _>>()
            else {
                std::process::exit(127);
            };
            let _ = execvp(&c_args[0], &c_args);
            std::process::exit(127);
        }
        ForkResult::Parent { child } => {
            set_nonblocking(&master)
                .map_err(|e| DispatchError::adapter_failure(format!("set_nonblocking: {e}")))?;
            let afd = AsyncFd::new(PtyFd(master))
                .map_err(|e| DispatchError::adapter_failure(format!("AsyncFd::new: {e}")))?;
            Ok((afd, child))
        }
    }
}

async fn run_io(
    master: AsyncFd<PtyFd>,
    child_pid: Pid,
    mut input_rx: mpsc::Receiver<Bytes>,
    mut resize_rx: mpsc::Receiver<(u16, u16)>,
    emitter: Emit,
    screen: Arc<Mutex<PtyScreen>>,
) {
    let mut buf = vec![0u8; 8192];
    let mut input_closed = false;

    loop {
        tokio::select! {
            result = read_chunk(&master, &mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut s) = screen.lock() {
                            s.feed(&buf[..n]);
                        }
                        emit(
                            &emitter,
                            channel::STDOUT,
                            "data",
                            Payload::Bytes(buf[..n].to_vec()),
                        )
                    }
                    Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                    Err(e) => {
                        emit(
                            &emitter,
                            channel::SYSTEM_STATUS,
                            "error",
                            Payload::String(format!("pty read error: {e}")),
                        );
                        break;
                    }
                }
            }
            input = input_rx.recv(), if !input_closed => {
                match input {
                    Some(data) => {
                        if let Err(e) = write_all(&master, &data).await {
                            emit(
                                &emitter,
                                channel::SYSTEM_STATUS,
                                "error",
                                Payload::String(format!("pty write error: {e}")),
                            );
                            break;
                        }
                    }
                    None => input_closed = true,
                }
            }
            resize = resize_rx.recv() => {
                if let Some((cols, rows)) = resize {
                    if let Err(e) = resize_pty(&master, cols, rows) {
                        emit(
                            &emitter,
                            channel::SYSTEM_STATUS,
                            "error",
                            Payload::String(format!("pty resize error: {e}")),
                        );
                    } else if let Ok(mut s) = screen.lock() {
                        s.resize(cols, rows);
                    }
                }
            }
        }
    }

    let status = tokio::task::spawn_blocking(move || wait_for_exit(child_pid))
        .await
        .unwrap_or(ExitStatus { code: None, signal: None });
    let kind = if status.code == Some(0) { "closed" } else { "error" };
    let mut fields = indexmap::IndexMap::new();
    fields.insert(
        "exitCode".to_owned(),
        status.code.map(|c| Payload::Number(c as f64)).unwrap_or(Payload::Null),
    );
    fields.insert(
        "signal".to_owned(),
        status.signal.map(|s| Payload::Number(s as f64)).unwrap_or(Payload::Null),
    );
    emit(&emitter, channel::SYSTEM_STATUS, kind, Payload::Map(fields));
}

// TIOCSWINSZ ioctl requires unsafe for the raw libc::ioctl call.
#[allow(unsafe_code)]
fn resize_pty(master: &AsyncFd<PtyFd>, cols: u16, rows: u16) -> std::io::Result<()> {
    let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
    // SAFETY: TIOCSWINSZ is a well-defined ioctl setting the PTY window
    // size; `ws` is fully initialized and the fd is the PTY master.
    let ret = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

fn wait_for_exit(pid: Pid) -> ExitStatus {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return ExitStatus { code: Some(code), signal: None },
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return ExitStatus { code: None, signal: Some(sig as i32) }
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return ExitStatus { code: None, signal: None },
        }
    }
}

struct PtyHandle {
    input_tx: mpsc::Sender<Bytes>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    child_pid: Pid,
    screen: Arc<Mutex<PtyScreen>>,
}

impl AdapterHandle for PtyHandle {
    fn write(&self, data: Payload) -> BoxFuture<'_, Result<(), DispatchError>> {
        Box::pin(async move {
            let bytes = match data {
                Payload::Bytes(b) => Bytes::from(b),
                Payload::String(s) => Bytes::from(s.into_bytes()),
                other => {
                    return Err(DispatchError::invalid_argument(format!(
                        "pty input must be bytes or a string, got {other:?}"
                    )))
                }
            };
            self.input_tx
                .send(bytes)
                .await
                .map_err(|_| DispatchError::SessionClosed)
        })
    }

    fn resize(&self, cols: u16, rows: u16) -> BoxFuture<'_, Result<(), DispatchError>> {
        Box::pin(async move {
            self.resize_tx
                .send((cols, rows))
                .await
                .map_err(|_| DispatchError::SessionClosed)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Option<Vec<u8>>> {
        Box::pin(async move {
            // Best-effort graceful shutdown: SIGHUP, a brief grace window,
            // then SIGKILL — matching this codebase's existing Drop impl
            // for its PTY backend.
            let _ = kill(self.child_pid, Signal::SIGHUP);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = kill(self.child_pid, Signal::SIGKILL);
            let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
            None
        })
    }

    fn snapshot(&self) -> Option<Payload> {
        self.screen.lock().ok().map(|s| s.snapshot())
    }
}

#[cfg(test)]
#[path = "pty_tests.rs"]
mod tests;
