use axum::routing::{get, post};
use axum::Router;
use axum_test::TestServer;

use super::*;
use crate::adapter::AdapterRegistry;
use crate::orchestrator::Orchestrator;
use crate::store::EventStore;
use crate::transport::state::TransportSettings;

fn test_server() -> (TestServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EventStore::new(dir.path(), 64));
    let registry = AdapterRegistry::with_builtin(vec!["true".to_owned()]);
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        Arc::new(registry),
        3,
        std::time::Duration::from_secs(5),
        std::time::Duration::from_secs(300),
    ));
    let settings = TransportSettings { auth_token: None, backpressure_capacity: 16, started_at: Instant::now() };
    let state = AppState::new(orchestrator, settings);

    let router = Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/close", post(close_session))
        .route("/sessions/{id}/events", get(session_events))
        .route("/healthz", get(healthz))
        .with_state(state);

    (TestServer::new(router).unwrap(), dir)
}

#[tokio::test]
async fn create_then_get_round_trips_the_session_row() {
    let (server, dir) = test_server();

    let created: RunSession = server
        .post("/sessions")
        .json(&serde_json::json!({
            "kind": "ai",
            "owner_user_id": "alice",
            "workspace_path": dir.path(),
        }))
        .await
        .json();
    assert_eq!(created.owner_user_id, "alice");

    let fetched: RunSession = server
        .get(&format!("/sessions/{}", created.id))
        .add_query_param("owner_user_id", "alice")
        .await
        .json();
    assert_eq!(fetched.id, created.id);
}

#[tokio::test]
async fn create_with_unknown_kind_is_a_bad_request() {
    let (server, dir) = test_server();
    let response = server
        .post("/sessions")
        .json(&serde_json::json!({
            "kind": "nonsense",
            "owner_user_id": "alice",
            "workspace_path": dir.path(),
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_by_a_non_owner_is_forbidden() {
    let (server, dir) = test_server();
    let created: RunSession = server
        .post("/sessions")
        .json(&serde_json::json!({
            "kind": "ai",
            "owner_user_id": "alice",
            "workspace_path": dir.path(),
        }))
        .await
        .json();

    let response =
        server.get(&format!("/sessions/{}", created.id)).add_query_param("owner_user_id", "mallory").await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn list_is_scoped_to_the_requesting_owner() {
    let (server, dir) = test_server();
    server
        .post("/sessions")
        .json(&serde_json::json!({"kind": "ai", "owner_user_id": "alice", "workspace_path": dir.path()}))
        .await;
    server
        .post("/sessions")
        .json(&serde_json::json!({"kind": "ai", "owner_user_id": "bob", "workspace_path": dir.path()}))
        .await;

    let alices: Vec<RunSession> =
        server.get("/sessions").add_query_param("owner_user_id", "alice").await.json();
    assert_eq!(alices.len(), 1);
    assert_eq!(alices[0].owner_user_id, "alice");
}

#[tokio::test]
async fn close_is_idempotent_over_http() {
    let (server, dir) = test_server();
    let created: RunSession = server
        .post("/sessions")
        .json(&serde_json::json!({"kind": "ai", "owner_user_id": "alice", "workspace_path": dir.path()}))
        .await
        .json();

    for _ in 0..3 {
        let response = server
            .post(&format!("/sessions/{}/close", created.id))
            .json(&serde_json::json!({"owner_user_id": "alice"}))
            .await;
        response.assert_status(StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn healthz_reports_session_count_without_auth() {
    let (server, dir) = test_server();
    server
        .post("/sessions")
        .json(&serde_json::json!({"kind": "ai", "owner_user_id": "alice", "workspace_path": dir.path()}))
        .await;

    let health: HealthResponse = server.get("/healthz").await.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.session_count, 1);
}

#[tokio::test]
async fn unknown_session_id_is_not_found() {
    let (server, _dir) = test_server();
    let response = server.get("/sessions/does-not-exist").add_query_param("owner_user_id", "alice").await;
    response.assert_status(StatusCode::NOT_FOUND);
}
