// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level process bootstrap: wires [`crate::config::Config`] into a
//! running server. Mirrors this codebase's own `run::run`/`prepare` split
//! (construct every collaborator, spawn each transport listener in its own
//! task, then block on graceful shutdown) trimmed to the single HTTP/WS
//! listener this crate exposes — no credential-switch loop, no gRPC/NATS
//! sidecars.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapter::AdapterRegistry;
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::store::EventStore;
use crate::transport::state::{AppState, TransportSettings};
use crate::transport::build_router;

/// Run to completion: bind the configured listener, serve until a shutdown
/// signal arrives, then return once the last in-flight request has drained.
pub async fn run(config: Config) -> anyhow::Result<()> {
    crate::logging::init(&config);

    let store = Arc::new(EventStore::new(config.data_dir.clone(), config.backpressure_capacity));
    let adapters = Arc::new(AdapterRegistry::with_builtin(config.ai_command.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        adapters,
        config.store_failure_limit,
        Duration::from_secs(config.close_grace_secs),
        Duration::from_secs(config.idle_threshold_secs),
    ));

    let settings = TransportSettings {
        auth_token: config.auth_token.clone(),
        backpressure_capacity: config.backpressure_capacity,
        started_at: Instant::now(),
    };
    let state = AppState::new(orchestrator, settings);
    let router = build_router(state);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    if let Some(port) = config.port {
        let addr = format!("{}:{}", config.host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("dispatchd listening on {}", listener.local_addr()?);
        let result = axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await;
        if let Err(e) = result {
            error!("HTTP server error: {e}");
        }
        return Ok(());
    }

    if let Some(ref socket_path) = config.socket {
        let _ = std::fs::remove_file(socket_path);
        let listener = tokio::net::UnixListener::bind(socket_path)?;
        info!("dispatchd listening on {}", socket_path.display());
        let mut make_service = router.into_make_service();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::debug!("unix socket accept error: {e}");
                            continue;
                        }
                    };
                    let svc_future = <_ as tower::Service<_>>::call(&mut make_service, ());
                    tokio::spawn(async move {
                        let Ok(svc) = svc_future.await;
                        let io = hyper_util::rt::TokioIo::new(stream);
                        let hyper_svc = hyper_util::service::TowerToHyperService::new(svc);
                        let _ = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                            .serve_connection_with_upgrades(io, hyper_svc)
                            .await;
                    });
                }
            }
        }
        return Ok(());
    }

    anyhow::bail!("either --port or --socket must be specified")
}

/// First SIGTERM/SIGINT cancels `shutdown` (graceful drain); a second of
/// either forces an immediate exit, matching this codebase's existing
/// double-signal pattern.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
