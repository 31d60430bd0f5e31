//! HTTP API integration tests
//!
//! Drives the router with tower's `oneshot`; the game is a /bin/sh script.

#![cfg(unix)]

mod helpers;

use axum::body::Body;
use axum::Router;
use helpers::{orchestrator, Harness, ScriptGame};
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use kiosk_common::events::{EventBus, KioskEvent, SessionState};
use kiosk_daemon::api::{create_router, AppContext};
use kiosk_daemon::config::TriggersConfig;
use kiosk_daemon::session::{event_bus_observer, spawn_history_writer, SessionHistory};
use kiosk_daemon::triggers::command_bus::CommandBus;
use kiosk_daemon::triggers::secret_sequence::{self, SecretSequenceDetector, INPUT_CHANNEL_CAPACITY};
use kiosk_daemon::triggers::{EventingProposer, SessionProposer};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    harness: Harness,
    bus: EventBus,
    _game: ScriptGame,
    _shutdown: watch::Sender<bool>,
}

async fn setup(script: &str) -> TestApp {
    let game = ScriptGame::new();
    let harness = orchestrator(game.params("game.sh", script));
    let bus = EventBus::new(100);
    harness.orchestrator.subscribe(event_bus_observer(bus.clone()));

    let history = SessionHistory::in_memory().await.unwrap();
    let (observer, _writer) = spawn_history_writer(history.clone());
    harness.orchestrator.subscribe(observer);

    let proposer: Arc<dyn SessionProposer> =
        Arc::new(EventingProposer::new(harness.orchestrator.clone(), bus.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    let triggers = TriggersConfig::default();
    secret_sequence::spawn_listener(
        SecretSequenceDetector::from_config(&triggers).unwrap(),
        triggers.secret_player.clone(),
        proposer.clone(),
        input_rx,
        shutdown_rx,
    );

    let ctx = AppContext {
        orchestrator: harness.orchestrator.clone(),
        pipeline: None,
        bus: bus.clone(),
        commands: CommandBus::new(proposer, harness.orchestrator.clone(), bus.clone()),
        input_tx: Some(input_tx),
        history: Some(history),
    };

    TestApp {
        router: create_router(ctx),
        harness,
        bus,
        _game: game,
        _shutdown: shutdown_tx,
    }
}

async fn request(app: &Router, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    let body = match body {
        Some(json_body) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json_body.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn wait_for_history(app: &Router, rows: usize) -> Vec<Value> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (status, body) = request(app, Method::GET, "/api/v1/history?limit=50", None).await;
        assert_eq!(status, StatusCode::OK);
        let sessions = body["sessions"].as_array().cloned().unwrap_or_default();
        if sessions.len() >= rows || Instant::now() > deadline {
            return sessions;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_endpoint() {
    let app = setup("exit 0\n").await;

    let (status, body) = request(&app.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "kioskd");
    assert!(body["version"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_reports_idle_kiosk() {
    let app = setup("exit 0\n").await;

    let (status, body) = request(&app.router, Method::GET, "/api/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["state"], "idle");
    assert_eq!(body["session"]["player"], Value::Null);
    assert_eq!(body["pipeline"], Value::Null);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_launch_busy_and_stop_commands() {
    let app = setup("exec sleep 5\n").await;
    let mut events = app.bus.subscribe();

    let (status, body) = request(
        &app.router,
        Method::POST,
        "/api/v1/command",
        Some(json!({"verb": "launch", "player": "Ada", "params": {"skill": 2}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["state"], "running");
    assert_eq!(body["player"], "Ada");

    let (status, body) = request(
        &app.router,
        Method::POST,
        "/api/v1/command",
        Some(json!({"verb": "launch_game", "player_name": "Grace"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["player"], "Ada");

    let (status, body) = request(&app.router, Method::POST, "/api/v1/command", Some(json!({"verb": "stop"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");

    assert!(
        tokio::task::spawn_blocking(move || {
            app.harness
                .orchestrator
                .wait_for_state(SessionState::Idle, Duration::from_secs(5))
        })
        .await
        .unwrap()
    );

    let mut saw_rejection = false;
    while let Ok(event) = events.try_recv() {
        if let KioskEvent::SessionRejected { player, .. } = event {
            assert_eq!(player, "Grace");
            saw_rejection = true;
        }
    }
    assert!(saw_rejection);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_and_unknown_commands() {
    let app = setup("exit 0\n").await;

    let (status, body) = request(&app.router, Method::POST, "/api/v1/command", Some(json!({"verb": "launch"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid_player");

    let (status, body) = request(&app.router, Method::POST, "/api/v1/command", Some(json!({"verb": "dance"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["state"], "idle");

    let (status, body) = request(&app.router, Method::POST, "/api/v1/command", Some(json!({"verb": "stop"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "not_running");

    let (status, body) = request(&app.router, Method::POST, "/api/v1/command", Some(json!({"verb": "STATUS"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "status");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_history_recorded() {
    let app = setup("exit 4\n").await;

    let (status, _) = request(
        &app.router,
        Method::POST,
        "/api/v1/command",
        Some(json!({"verb": "launch", "player": "Ada"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let sessions = wait_for_history(&app.router, 2).await;
    assert_eq!(sessions.len(), 2);
    // Newest first
    assert_eq!(sessions[0]["event"], "finished");
    assert_eq!(sessions[0]["exit_code"], 4);
    assert_eq!(sessions[1]["event"], "started");
    assert_eq!(sessions[1]["player_name"], "Ada");
    assert_eq!(sessions[0]["session_id"], sessions[1]["session_id"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_secret_sequence_over_input_endpoint() {
    let app = setup("exit 0\n").await;

    let (status, _) = request(&app.router, Method::POST, "/api/v1/input", Some(json!({"button": "jump"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for button in TriggersConfig::default().secret_sequence {
        let (status, body) = request(&app.router, Method::POST, "/api/v1/input", Some(json!({"button": button}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
    }

    let sessions = wait_for_history(&app.router, 1).await;
    let started = sessions
        .iter()
        .find(|s| s["event"] == "started")
        .expect("secret sequence should start a session");
    assert_eq!(started["player_name"], TriggersConfig::default().secret_player);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_stream_headers() {
    let app = setup("exit 0\n").await;

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/events")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}
