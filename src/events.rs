//! Resumable event store: ordered, offset-addressable stream logs.
//!
//! When a caller passes a `stream_id` to the agent, every emitted event is
//! also appended here. A client that drops mid-stream reconnects by
//! reading events after the last id it saw; ids are strictly increasing
//! and contiguous from 1 *within* a stream (not across streams), so any
//! suffix read glues back onto the prefix with no gaps or duplicates.
//!
//! A stream is `generating` from its first append until the loop marks it
//! `completed` or `failed`; a reader observing a terminal status will
//! never see a later append. Unknown streams read as `absent` with an
//! empty event list.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle status of an event stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// The producing loop is still running.
    Generating,
    /// The loop finished normally.
    Completed,
    /// The loop failed or was cancelled.
    Failed,
    /// No such stream (never created, or expired).
    Absent,
}

/// One persisted event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    /// 1-based id, contiguous within the stream.
    pub id: u64,
    /// Owning stream.
    pub stream_id: String,
    /// Wire-level event kind.
    pub kind: String,
    /// Opaque JSON payload.
    pub data: serde_json::Value,
    /// Append time.
    pub ts: DateTime<Utc>,
}

/// Append-only, offset-addressable log of stream events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends an event, returning its id. Fails once the stream is
    /// terminal.
    async fn append(&self, stream_id: &str, kind: &str, data: serde_json::Value) -> Result<u64>;

    /// Reads every event with id greater than `after_id`, in order.
    async fn read(&self, stream_id: &str, after_id: u64) -> Result<Vec<StoredEvent>>;

    /// The stream's status.
    async fn status(&self, stream_id: &str) -> Result<StreamStatus>;

    /// Marks the stream completed.
    async fn mark_completed(&self, stream_id: &str) -> Result<()>;

    /// Marks the stream failed.
    async fn mark_failed(&self, stream_id: &str) -> Result<()>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

struct StreamRecord {
    events: Vec<StoredEvent>,
    status: StreamStatus,
    touched: Instant,
}

/// In-process store with TTL eviction; expired streams read as absent.
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<String, StreamRecord>>,
    ttl: Option<Duration>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Creates a store that never expires streams.
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Creates a store whose streams expire `ttl` after their last touch.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    fn sweep(&self, streams: &mut HashMap<String, StreamRecord>) {
        if let Some(ttl) = self.ttl {
            let now = Instant::now();
            streams.retain(|_, record| now.duration_since(record.touched) < ttl);
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, stream_id: &str, kind: &str, data: serde_json::Value) -> Result<u64> {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        self.sweep(&mut streams);

        let record = streams
            .entry(stream_id.to_string())
            .or_insert_with(|| StreamRecord {
                events: Vec::new(),
                status: StreamStatus::Generating,
                touched: Instant::now(),
            });
        if record.status != StreamStatus::Generating {
            return Err(Error::event_store(format!(
                "stream '{stream_id}' is already {:?}",
                record.status
            )));
        }

        let id = record.events.len() as u64 + 1;
        record.events.push(StoredEvent {
            id,
            stream_id: stream_id.to_string(),
            kind: kind.to_string(),
            data,
            ts: Utc::now(),
        });
        record.touched = Instant::now();
        Ok(id)
    }

    async fn read(&self, stream_id: &str, after_id: u64) -> Result<Vec<StoredEvent>> {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        self.sweep(&mut streams);
        Ok(streams
            .get(stream_id)
            .map(|record| {
                record
                    .events
                    .iter()
                    .filter(|e| e.id > after_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn status(&self, stream_id: &str) -> Result<StreamStatus> {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        self.sweep(&mut streams);
        Ok(streams
            .get(stream_id)
            .map(|record| record.status)
            .unwrap_or(StreamStatus::Absent))
    }

    async fn mark_completed(&self, stream_id: &str) -> Result<()> {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = streams.get_mut(stream_id) {
            record.status = StreamStatus::Completed;
            record.touched = Instant::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, stream_id: &str) -> Result<()> {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = streams.get_mut(stream_id) {
            record.status = StreamStatus::Failed;
            record.touched = Instant::now();
        }
        Ok(())
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// SQLite-backed store. Ids are assigned transactionally, so appends stay
/// monotonic per stream even under concurrent writers to different
/// streams.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Opens (and migrates) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory database; handy in tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS streams (
                stream_id TEXT PRIMARY KEY,
                status    TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                stream_id TEXT NOT NULL,
                event_id  INTEGER NOT NULL,
                kind      TEXT NOT NULL,
                data_json TEXT NOT NULL,
                ts        TEXT NOT NULL,
                PRIMARY KEY (stream_id, event_id)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn set_status(&self, stream_id: &str, status: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE streams SET status = ?2, updated_at = ?3 WHERE stream_id = ?1",
            params![stream_id, status, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, stream_id: &str, kind: &str, data: serde_json::Value) -> Result<u64> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM streams WHERE stream_id = ?1",
                params![stream_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match status.as_deref() {
            None => {
                tx.execute(
                    "INSERT INTO streams (stream_id, status, updated_at) VALUES (?1, 'generating', ?2)",
                    params![stream_id, now],
                )?;
            }
            Some("generating") => {}
            Some(terminal) => {
                return Err(Error::event_store(format!(
                    "stream '{stream_id}' is already {terminal}"
                )));
            }
        }

        let id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(event_id), 0) + 1 FROM events WHERE stream_id = ?1",
            params![stream_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO events (stream_id, event_id, kind, data_json, ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![stream_id, id, kind, serde_json::to_string(&data)?, now],
        )?;
        tx.execute(
            "UPDATE streams SET updated_at = ?2 WHERE stream_id = ?1",
            params![stream_id, now],
        )?;
        tx.commit()?;
        Ok(id as u64)
    }

    async fn read(&self, stream_id: &str, after_id: u64) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT event_id, kind, data_json, ts FROM events
             WHERE stream_id = ?1 AND event_id > ?2 ORDER BY event_id ASC",
        )?;
        let rows = stmt.query_map(params![stream_id, after_id as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, kind, data_json, ts) = row?;
            out.push(StoredEvent {
                id: id as u64,
                stream_id: stream_id.to_string(),
                kind,
                data: serde_json::from_str(&data_json)?,
                ts: DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| Error::event_store(format!("bad timestamp in store: {e}")))?
                    .with_timezone(&Utc),
            });
        }
        Ok(out)
    }

    async fn status(&self, stream_id: &str) -> Result<StreamStatus> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM streams WHERE stream_id = ?1",
                params![stream_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(match status.as_deref() {
            Some("generating") => StreamStatus::Generating,
            Some("completed") => StreamStatus::Completed,
            Some("failed") => StreamStatus::Failed,
            _ => StreamStatus::Absent,
        })
    }

    async fn mark_completed(&self, stream_id: &str) -> Result<()> {
        self.set_status(stream_id, "completed")
    }

    async fn mark_failed(&self, stream_id: &str) -> Result<()> {
        self.set_status(stream_id, "failed")
    }
}
