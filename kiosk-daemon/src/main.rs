//! kioskd - kiosk session daemon
//!
//! Wires the decode pipeline, process supervisor, session orchestrator,
//! trigger adapters and HTTP API together, then runs until Ctrl+C/SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kiosk_common::config::resolve_config_path;
use kiosk_common::events::EventBus;
use kiosk_common::retry::{retry, Backoff, RetryPolicy};
use kiosk_daemon::api::{self, AppContext};
use kiosk_daemon::config::{Config, ConfigOverrides, LoggingConfig};
use kiosk_daemon::display::{DisplaySurface, HeadlessDisplay};
use kiosk_daemon::session::{event_bus_observer, spawn_history_writer, SessionHistory, SessionOrchestrator};
use kiosk_daemon::supervisor::{LaunchParams, ProcessSupervisor, SupervisorConfig};
use kiosk_daemon::triggers::command_bus::CommandBus;
use kiosk_daemon::triggers::drop_file::DropFilePoller;
use kiosk_daemon::triggers::secret_sequence::{self, SecretSequenceDetector, INPUT_CHANNEL_CAPACITY};
use kiosk_daemon::triggers::{EventingProposer, SessionProposer};
use kiosk_daemon::video::{DecodePipeline, FfmpegDecoder};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Config file path environment variable
const CONFIG_ENV: &str = "KIOSK_CONFIG";

/// Event bus capacity (events buffered per slow SSE client)
const EVENT_BUS_CAPACITY: usize = 1000;

/// How long shutdown waits for queued history rows to be written
const HISTORY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "kioskd")]
#[command(about = "Kiosk session daemon: attract loop, game sessions and triggers")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "KIOSK_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP port
    #[arg(short, long, env = "KIOSK_PORT")]
    port: Option<u16>,

    /// Attract-loop video directory
    #[arg(long, env = "KIOSK_VIDEO_DIR")]
    video_dir: Option<PathBuf>,

    /// Game executable
    #[arg(long, env = "KIOSK_GAME_EXECUTABLE")]
    game_executable: Option<PathBuf>,

    /// Log level or filter directive
    #[arg(long, env = "KIOSK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Drop-trigger file location
    #[arg(long, env = "KIOSK_DROP_FILE")]
    drop_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV);
    let overrides = ConfigOverrides {
        port: args.port,
        video_dir: args.video_dir,
        game_executable: args.game_executable,
        log_level: args.log_level,
        drop_file: args.drop_file,
    };
    let config = Config::load(config_path.as_deref(), &overrides).context("Failed to load configuration")?;

    init_logging(&config.logging)?;

    info!("Starting kioskd v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }
    info!("Game executable: {}", config.game.executable.display());
    info!("Video directory: {}", config.video.directory.display());

    // Attract loop
    let decoder = Arc::new(FfmpegDecoder::new(&config.video));
    let pipeline = Arc::new(DecodePipeline::new(&config.video, decoder));
    let display = Arc::new(HeadlessDisplay::new());

    // Session state machine
    let supervisor = Arc::new(ProcessSupervisor::new(SupervisorConfig::from(&config.session)));
    let orchestrator = SessionOrchestrator::new(
        supervisor,
        pipeline.clone(),
        display.clone(),
        LaunchParams::from(&config.game),
        config.session.grace_delay(),
    );

    let bus = EventBus::new(EVENT_BUS_CAPACITY);
    orchestrator.subscribe(event_bus_observer(bus.clone()));

    let (history, history_writer) = if config.session.history_enabled {
        match SessionHistory::open(&config.session.history_db_path()).await {
            Ok(history) => {
                let (observer, writer) = spawn_history_writer(history.clone());
                orchestrator.subscribe(observer);
                (Some(history), Some(writer))
            }
            Err(e) => {
                warn!("Session history disabled: {}", e);
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    // Idle: attract loop on screen
    {
        let pipeline = pipeline.clone();
        tokio::task::spawn_blocking(move || pipeline.start())
            .await
            .context("Decode pipeline start task failed")?;
    }
    display.set_visible(true);
    display.start_presenter(pipeline.clone(), config.video.fps);

    // Triggers
    let proposer: Arc<dyn SessionProposer> = Arc::new(EventingProposer::new(orchestrator.clone(), bus.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut trigger_tasks = Vec::new();

    if config.triggers.drop_file_enabled {
        let poller = Arc::new(DropFilePoller::new(config.triggers.drop_file.clone(), proposer.clone()));
        trigger_tasks.push(tokio::spawn(poller.run(
            Duration::from_millis(config.triggers.drop_poll_interval_ms),
            shutdown_rx.clone(),
        )));
    }

    let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    let detector = SecretSequenceDetector::from_config(&config.triggers).context("Invalid secret sequence")?;
    trigger_tasks.push(secret_sequence::spawn_listener(
        detector,
        config.triggers.secret_player.clone(),
        proposer.clone(),
        input_rx,
        shutdown_rx.clone(),
    ));

    #[cfg(feature = "gamepad")]
    let mut gamepad = if config.triggers.gamepad_enabled {
        match kiosk_daemon::triggers::gamepad::GamepadInput::start(input_tx.clone()) {
            Ok(gamepad) => Some(gamepad),
            Err(e) => {
                warn!("Gamepad input disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let commands = CommandBus::new(proposer.clone(), orchestrator.clone(), bus.clone()).with_pipeline(pipeline.clone());

    let ctx = AppContext {
        orchestrator: orchestrator.clone(),
        pipeline: Some(pipeline.clone()),
        bus: bus.clone(),
        commands,
        input_tx: Some(input_tx),
        history,
    };
    let app = api::create_router(ctx);

    // HTTP server
    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .context("Invalid server bind address")?;
    let bind_policy = RetryPolicy {
        max_attempts: config.server.bind_attempts,
        backoff: Backoff::Exponential {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(4),
        },
        per_attempt_timeout: Some(Duration::from_secs(5)),
    };
    let listener = retry(&bind_policy, "HTTP bind", |_| tokio::net::TcpListener::bind(addr))
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Shutdown: triggers first so nothing new is proposed
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    for task in trigger_tasks {
        if let Err(e) = task.await {
            error!("Trigger task failed: {}", e);
        }
    }

    #[cfg(feature = "gamepad")]
    if let Some(gamepad) = gamepad.as_mut() {
        gamepad.stop();
    }

    display.stop_presenter();

    // The history observer lives in the orchestrator; dropping the last
    // handle closes the writer's channel
    drop(proposer);
    tokio::task::spawn_blocking(move || {
        orchestrator.shutdown();
        drop(orchestrator);
    })
    .await
    .context("Orchestrator shutdown task failed")?;

    if let Some(writer) = history_writer {
        match tokio::time::timeout(HISTORY_DRAIN_TIMEOUT, writer).await {
            Ok(Ok(())) => info!("Session history flushed"),
            Ok(Err(e)) => error!("Session history writer failed: {}", e),
            Err(_) => warn!("Session history writer still busy after {:?}, abandoning", HISTORY_DRAIN_TIMEOUT),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// stderr logging, plus a plain-text file when configured
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&logging.level));

    let file_layer = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// A bare level applies to the kiosk crates; anything else is a full directive
fn default_filter(level: &str) -> EnvFilter {
    if level.contains('=') || level.contains(',') {
        EnvFilter::new(level)
    } else {
        EnvFilter::new(format!(
            "kioskd={level},kiosk_daemon={level},kiosk_common={level},tower_http=info"
        ))
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
