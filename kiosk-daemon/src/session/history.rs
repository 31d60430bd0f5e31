//! Session history persisted in SQLite
//!
//! One row per notable lifecycle event. Observers run on orchestrator
//! threads, so rows are handed to an async writer task over a channel and
//! the transition never waits on the database.

use super::observers::{Observer, StateChange};
use crate::error::Result;
use kiosk_common::events::SessionState;
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle events worth keeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    Started,
    Finished,
    LaunchFailed,
}

impl HistoryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryEvent::Started => "started",
            HistoryEvent::Finished => "finished",
            HistoryEvent::LaunchFailed => "launch_failed",
        }
    }

    /// Event recorded for a transition, if any
    pub fn from_change(change: &StateChange) -> Option<Self> {
        match (change.previous, change.new) {
            (SessionState::Starting, SessionState::Running) => Some(HistoryEvent::Started),
            (SessionState::Running, SessionState::Finished) => Some(HistoryEvent::Finished),
            (SessionState::Starting, SessionState::Idle) => Some(HistoryEvent::LaunchFailed),
            _ => None,
        }
    }
}

/// Row to insert
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub session_id: String,
    pub player: String,
    pub event: HistoryEvent,
    pub exit_code: Option<i32>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Stored row
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub session_id: String,
    pub player_name: String,
    pub event: String,
    pub exit_code: Option<i64>,
    pub timestamp: String,
}

#[derive(Clone)]
pub struct SessionHistory {
    db: SqlitePool,
}

impl SessionHistory {
    /// Open (creating if needed) the history database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_url = format!("sqlite://{}?mode=rwc", path.display());
        let db = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&db_url)
            .await?;
        info!("Opened session history: {}", path.display());
        Self::with_pool(db).await
    }

    /// Private in-memory database (single connection so every query sees it)
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(db).await
    }

    async fn with_pool(db: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS game_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                player_name TEXT NOT NULL,
                event TEXT NOT NULL,
                exit_code INTEGER,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_game_sessions_session ON game_sessions(session_id)")
            .execute(&db)
            .await?;

        Ok(Self { db })
    }

    pub async fn record(&self, entry: &HistoryEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO game_sessions (session_id, player_name, event, exit_code, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.session_id)
        .bind(&entry.player)
        .bind(entry.event.as_str())
        .bind(entry.exit_code)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Most recent rows first
    pub async fn recent(&self, limit: u32) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, Option<i64>, String)>(
            r#"
            SELECT id, session_id, player_name, event, exit_code, timestamp
            FROM game_sessions
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SessionRecord {
                id: row.0,
                session_id: row.1,
                player_name: row.2,
                event: row.3,
                exit_code: row.4,
                timestamp: row.5,
            })
            .collect())
    }
}

/// Start the writer task and return the observer feeding it
///
/// Must be called inside a tokio runtime. The task ends when the observer
/// (and with it the orchestrator) is dropped.
pub fn spawn_history_writer(history: SessionHistory) -> (Observer, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<HistoryEntry>();

    let task = tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            debug!("Recording {} for {}", entry.event.as_str(), entry.player);
            if let Err(e) = history.record(&entry).await {
                warn!("Failed to record session history: {}", e);
            }
        }
        debug!("Session history writer exiting");
    });

    // A failed launch lands in Idle with the player already cleared
    let starting: Mutex<Option<(Option<Uuid>, Option<String>)>> = Mutex::new(None);

    let observer: Observer = Arc::new(move |change: &StateChange| {
        if change.new == SessionState::Starting {
            *starting.lock().unwrap() = Some((change.session_id, change.player.clone()));
        }
        let Some(event) = HistoryEvent::from_change(change) else {
            return;
        };

        // Either launch outcome resolves the pending Starting entry
        let pending = match event {
            HistoryEvent::Started | HistoryEvent::LaunchFailed => starting.lock().unwrap().take(),
            HistoryEvent::Finished => None,
        };
        let (session_id, player) = if event == HistoryEvent::LaunchFailed {
            pending.unwrap_or_default()
        } else {
            (change.session_id, change.player.clone())
        };
        let entry = HistoryEntry {
            session_id: session_id.map(|id| id.to_string()).unwrap_or_default(),
            player: player.unwrap_or_default(),
            event,
            exit_code: change.exit_code,
            timestamp: change.timestamp,
        };
        if tx.send(entry).is_err() {
            debug!("Session history writer gone");
        }
    });

    (observer, task)
}
