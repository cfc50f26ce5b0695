//! Session persistence: conversation history and usage counters.
//!
//! A [`SessionBackend`] owns the durable copy of every session's messages
//! and token usage. Sessions are fully independent; no backend shares
//! state across ids, and `load`/`save`/`delete` are safe under concurrent
//! callers for distinct ids (same-id concurrency is the caller's job).
//!
//! Three implementations ship:
//!
//! - [`InMemorySessionBackend`]: process-local, for tests and ephemeral
//!   agents.
//! - [`SqliteSessionBackend`]: the default for single-process
//!   persistence; survives restarts.
//! - [`KvSessionBackend`]: sessions in an external key-value store with
//!   optional TTL, for cache-style deployments. The store itself is a
//!   [`KvStore`] capability supplied by the caller;
//!   [`InMemoryKvStore`] ships for tests.
//!
//! Messages round-trip losslessly as JSON, including arbitrary
//! `tool_use.input` payloads and `tool_result` flags.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::types::{Message, UsageInfo};
use crate::{Error, Result};

/// Summary row returned by [`SessionBackend::list_sessions`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMeta {
    /// Opaque session id.
    pub id: String,
    /// When the session was first saved.
    pub created_at: DateTime<Utc>,
    /// When the session was last written.
    pub updated_at: DateTime<Utc>,
    /// Number of persisted messages.
    pub message_count: usize,
}

/// Persistence capability for conversation state.
///
/// Loading an unknown session yields empty history and zeroed usage; the
/// first save creates it. `delete` cascades messages and usage together.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Loads a session's messages, oldest first.
    async fn load(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Replaces a session's messages.
    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()>;

    /// Clears a session's messages, keeping the session row.
    async fn reset(&self, session_id: &str) -> Result<()>;

    /// Lists every known session.
    async fn list_sessions(&self) -> Result<Vec<SessionMeta>>;

    /// Deletes a session, its messages, and its usage in one step.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Loads a session's usage counters.
    async fn load_usage(&self, session_id: &str) -> Result<UsageInfo>;

    /// Replaces a session's usage counters.
    async fn save_usage(&self, session_id: &str, usage: &UsageInfo) -> Result<()>;

    /// Zeroes a session's usage counters.
    async fn reset_usage(&self, session_id: &str) -> Result<()>;
}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

struct SessionRecord {
    messages: Vec<Message>,
    usage: UsageInfo,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Process-local backend for tests and ephemeral agents.
#[derive(Default)]
pub struct InMemorySessionBackend {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemorySessionBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for InMemorySessionBackend {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions
            .get(session_id)
            .map(|r| r.messages.clone())
            .unwrap_or_default())
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord {
                messages: Vec::new(),
                usage: UsageInfo::default(),
                created_at: now,
                updated_at: now,
            });
        record.messages = messages.to_vec();
        record.updated_at = now;
        Ok(())
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = sessions.get_mut(session_id) {
            record.messages.clear();
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<SessionMeta> = sessions
            .iter()
            .map(|(id, r)| SessionMeta {
                id: id.clone(),
                created_at: r.created_at,
                updated_at: r.updated_at,
                message_count: r.messages.len(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
        Ok(())
    }

    async fn load_usage(&self, session_id: &str) -> Result<UsageInfo> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions
            .get(session_id)
            .map(|r| r.usage)
            .unwrap_or_default())
    }

    async fn save_usage(&self, session_id: &str, usage: &UsageInfo) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord {
                messages: Vec::new(),
                usage: UsageInfo::default(),
                created_at: now,
                updated_at: now,
            });
        record.usage = *usage;
        record.updated_at = now;
        Ok(())
    }

    async fn reset_usage(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = sessions.get_mut(session_id) {
            record.usage = UsageInfo::default();
        }
        Ok(())
    }
}

// ============================================================================
// SQLITE BACKEND
// ============================================================================

/// SQLite-backed persistence; the default for single-process deployments.
///
/// Calls are short single-transaction statements executed under a mutex on
/// the connection.
pub struct SqliteSessionBackend {
    conn: Mutex<Connection>,
}

impl SqliteSessionBackend {
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
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                session_id TEXT NOT NULL REFERENCES sessions(session_id),
                turn_index INTEGER NOT NULL,
                role       TEXT NOT NULL,
                content_json TEXT NOT NULL,
                PRIMARY KEY (session_id, turn_index)
            );
            CREATE TABLE IF NOT EXISTS usage (
                session_id TEXT PRIMARY KEY REFERENCES sessions(session_id),
                input          INTEGER NOT NULL,
                output         INTEGER NOT NULL,
                cache_creation INTEGER NOT NULL,
                cache_read     INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn ensure_session(conn: &Connection, session_id: &str, now: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO sessions (session_id, created_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(session_id) DO UPDATE SET updated_at = ?2",
            params![session_id, now],
        )?;
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for SqliteSessionBackend {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT role, content_json FROM messages
             WHERE session_id = ?1 ORDER BY turn_index ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let role: String = row.get(0)?;
            let content_json: String = row.get(1)?;
            Ok((role, content_json))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content_json) = row?;
            let role = match role.as_str() {
                "user" => crate::types::MessageRole::User,
                "assistant" => crate::types::MessageRole::Assistant,
                other => {
                    return Err(Error::session(format!("unknown role in store: {other}")));
                }
            };
            let content = serde_json::from_str(&content_json)?;
            messages.push(Message::new(role, content));
        }
        Ok(messages)
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        Self::ensure_session(&tx, session_id, &now)?;
        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
        for (index, message) in messages.iter().enumerate() {
            let role = match message.role {
                crate::types::MessageRole::User => "user",
                crate::types::MessageRole::Assistant => "assistant",
            };
            let content_json = serde_json::to_string(&message.content)?;
            tx.execute(
                "INSERT INTO messages (session_id, turn_index, role, content_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, index as i64, role, content_json],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
        conn.execute(
            "UPDATE sessions SET updated_at = ?2 WHERE session_id = ?1",
            params![session_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT s.session_id, s.created_at, s.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.session_id)
             FROM sessions s ORDER BY s.session_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, created_at, updated_at, message_count) = row?;
            out.push(SessionMeta {
                id,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
                message_count: message_count as usize,
            });
        }
        Ok(out)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        // Cascade across all three tables in one transaction.
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM usage WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
        tx.commit()?;
        Ok(())
    }

    async fn load_usage(&self, session_id: &str) -> Result<UsageInfo> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT input, output, cache_creation, cache_read FROM usage WHERE session_id = ?1",
        )?;
        let usage = stmt
            .query_map(params![session_id], |row| {
                Ok(UsageInfo {
                    input_tokens: row.get::<_, i64>(0)? as u64,
                    output_tokens: row.get::<_, i64>(1)? as u64,
                    cache_creation_input_tokens: row.get::<_, i64>(2)? as u64,
                    cache_read_input_tokens: row.get::<_, i64>(3)? as u64,
                })
            })?
            .next()
            .transpose()?;
        Ok(usage.unwrap_or_default())
    }

    async fn save_usage(&self, session_id: &str, usage: &UsageInfo) -> Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        Self::ensure_session(&tx, session_id, &now)?;
        tx.execute(
            "INSERT INTO usage (session_id, input, output, cache_creation, cache_read, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(session_id) DO UPDATE SET
                input = ?2, output = ?3, cache_creation = ?4, cache_read = ?5, updated_at = ?6",
            params![
                session_id,
                usage.input_tokens as i64,
                usage.output_tokens as i64,
                usage.cache_creation_input_tokens as i64,
                usage.cache_read_input_tokens as i64,
                now,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn reset_usage(&self, session_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute("DELETE FROM usage WHERE session_id = ?1", params![session_id])?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::session(format!("bad timestamp in store: {e}")))
}

// ============================================================================
// KV BACKEND
// ============================================================================

/// Minimal key-value capability consumed by [`KvSessionBackend`].
///
/// Implementations map onto external stores (Redis and friends); entries
/// may carry a TTL after which they read as absent.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Writes a value with an optional TTL.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    /// Deletes a value; absent keys are a no-op.
    async fn delete(&self, key: &str) -> Result<()>;
    /// Lists keys under a prefix.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-process [`KvStore`] with TTL expiry; backs tests and single-process
/// caches.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(entries: &mut HashMap<String, (String, Option<Instant>)>) {
        let now = Instant::now();
        entries.retain(|_, (_, expires)| expires.map(|at| at > now).unwrap_or(true));
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::sweep(&mut entries);
        Ok(entries.get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        entries.insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::sweep(&mut entries);
        let mut out: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }
}

#[derive(Serialize, Deserialize)]
struct KvMeta {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Session backend over an external [`KvStore`], for cache-style
/// deployments where sessions may expire.
pub struct KvSessionBackend<S: KvStore> {
    store: S,
    ttl: Option<Duration>,
}

impl<S: KvStore> KvSessionBackend<S> {
    /// Wraps a store without expiry.
    pub fn new(store: S) -> Self {
        Self { store, ttl: None }
    }

    /// Wraps a store with a per-session TTL refreshed on every write.
    pub fn with_ttl(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl: Some(ttl),
        }
    }

    fn messages_key(session_id: &str) -> String {
        format!("session:{session_id}:messages")
    }

    fn usage_key(session_id: &str) -> String {
        format!("session:{session_id}:usage")
    }

    fn meta_key(session_id: &str) -> String {
        format!("session:{session_id}:meta")
    }

    async fn touch_meta(&self, session_id: &str) -> Result<()> {
        let key = Self::meta_key(session_id);
        let now = Utc::now();
        let meta = match self.store.get(&key).await? {
            Some(raw) => {
                let mut meta: KvMeta = serde_json::from_str(&raw)?;
                meta.updated_at = now;
                meta
            }
            None => KvMeta {
                created_at: now,
                updated_at: now,
            },
        };
        self.store
            .set(&key, serde_json::to_string(&meta)?, self.ttl)
            .await
    }
}

#[async_trait]
impl<S: KvStore> SessionBackend for KvSessionBackend<S> {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        match self.store.get(&Self::messages_key(session_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        self.store
            .set(
                &Self::messages_key(session_id),
                serde_json::to_string(messages)?,
                self.ttl,
            )
            .await?;
        self.touch_meta(session_id).await
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        self.store.delete(&Self::messages_key(session_id)).await?;
        self.touch_meta(session_id).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>> {
        let mut out = Vec::new();
        for key in self.store.keys("session:").await? {
            let Some(id) = key
                .strip_prefix("session:")
                .and_then(|rest| rest.strip_suffix(":meta"))
            else {
                continue;
            };
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let meta: KvMeta = serde_json::from_str(&raw)?;
            let message_count = self.load(id).await?.len();
            out.push(SessionMeta {
                id: id.to_string(),
                created_at: meta.created_at,
                updated_at: meta.updated_at,
                message_count,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.store.delete(&Self::messages_key(session_id)).await?;
        self.store.delete(&Self::usage_key(session_id)).await?;
        self.store.delete(&Self::meta_key(session_id)).await
    }

    async fn load_usage(&self, session_id: &str) -> Result<UsageInfo> {
        match self.store.get(&Self::usage_key(session_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(UsageInfo::default()),
        }
    }

    async fn save_usage(&self, session_id: &str, usage: &UsageInfo) -> Result<()> {
        self.store
            .set(
                &Self::usage_key(session_id),
                serde_json::to_string(usage)?,
                self.ttl,
            )
            .await?;
        self.touch_meta(session_id).await
    }

    async fn reset_usage(&self, session_id: &str) -> Result<()> {
        self.store.delete(&Self::usage_key(session_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, ToolResultBlock, ToolUseBlock};
    use serde_json::json;

    fn history_with_tools() -> Vec<Message> {
        vec![
            Message::user("read it"),
            Message::assistant(vec![
                ContentBlock::text("on it"),
                ContentBlock::ToolUse(ToolUseBlock::new(
                    "toolu_1",
                    "read_file",
                    json!({"path": "a.rs", "nested": {"deep": [1, 2, 3]}}),
                )),
            ]),
            Message::user_with_blocks(vec![ContentBlock::ToolResult(ToolResultBlock::error(
                "toolu_1",
                "file not found",
            ))]),
            Message::assistant_text("it is missing"),
        ]
    }

    async fn exercise_round_trip(backend: &dyn SessionBackend) {
        let history = history_with_tools();
        backend.save("s1", &history).await.unwrap();
        let loaded = backend.load("s1").await.unwrap();
        assert_eq!(loaded, history);

        let usage = UsageInfo {
            input_tokens: 10,
            output_tokens: 20,
            cache_creation_input_tokens: 3,
            cache_read_input_tokens: 4,
        };
        backend.save_usage("s1", &usage).await.unwrap();
        assert_eq!(backend.load_usage("s1").await.unwrap(), usage);
    }

    async fn exercise_isolation(backend: &dyn SessionBackend) {
        backend.save("a", &[Message::user("for a")]).await.unwrap();
        backend.save("b", &[Message::user("for b")]).await.unwrap();

        backend.save("a", &[Message::user("rewritten a")]).await.unwrap();
        assert_eq!(backend.load("b").await.unwrap()[0].text(), "for b");

        backend.delete("a").await.unwrap();
        assert!(backend.load("a").await.unwrap().is_empty());
        assert_eq!(backend.load("b").await.unwrap().len(), 1);
    }

    async fn exercise_delete_cascades(backend: &dyn SessionBackend) {
        backend.save("gone", &[Message::user("hi")]).await.unwrap();
        backend
            .save_usage(
                "gone",
                &UsageInfo {
                    input_tokens: 9,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        backend.delete("gone").await.unwrap();
        assert!(backend.load("gone").await.unwrap().is_empty());
        assert_eq!(backend.load_usage("gone").await.unwrap(), UsageInfo::default());
        assert!(
            backend
                .list_sessions()
                .await
                .unwrap()
                .iter()
                .all(|m| m.id != "gone")
        );
    }

    #[tokio::test]
    async fn test_in_memory_backend() {
        let backend = InMemorySessionBackend::new();
        exercise_round_trip(&backend).await;
        exercise_isolation(&backend).await;
        exercise_delete_cascades(&backend).await;
    }

    #[tokio::test]
    async fn test_sqlite_backend() {
        let backend = SqliteSessionBackend::open_in_memory().unwrap();
        exercise_round_trip(&backend).await;
        exercise_isolation(&backend).await;
        exercise_delete_cascades(&backend).await;
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");

        {
            let backend = SqliteSessionBackend::open(&path).unwrap();
            backend.save("s1", &history_with_tools()).await.unwrap();
        }

        let backend = SqliteSessionBackend::open(&path).unwrap();
        let loaded = backend.load("s1").await.unwrap();
        assert_eq!(loaded, history_with_tools());

        let sessions = backend.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count, 4);
    }

    #[tokio::test]
    async fn test_sqlite_reset_keeps_session_row() {
        let backend = SqliteSessionBackend::open_in_memory().unwrap();
        backend.save("s1", &[Message::user("hi")]).await.unwrap();
        backend.reset("s1").await.unwrap();

        assert!(backend.load("s1").await.unwrap().is_empty());
        let sessions = backend.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count, 0);
    }

    #[tokio::test]
    async fn test_kv_backend() {
        let backend = KvSessionBackend::new(InMemoryKvStore::new());
        exercise_round_trip(&backend).await;
        exercise_isolation(&backend).await;
        exercise_delete_cascades(&backend).await;
    }

    #[tokio::test]
    async fn test_kv_backend_ttl_expiry() {
        let backend =
            KvSessionBackend::with_ttl(InMemoryKvStore::new(), Duration::from_millis(30));
        backend.save("temp", &[Message::user("hi")]).await.unwrap();
        assert_eq!(backend.load("temp").await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(backend.load("temp").await.unwrap().is_empty());
        assert!(backend.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_sessions_metadata() {
        let backend = InMemorySessionBackend::new();
        backend.save("s1", &[Message::user("one")]).await.unwrap();
        backend
            .save("s2", &[Message::user("one"), Message::assistant_text("two")])
            .await
            .unwrap();

        let sessions = backend.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "s1");
        assert_eq!(sessions[0].message_count, 1);
        assert_eq!(sessions[1].message_count, 2);
        assert!(sessions[0].created_at <= sessions[0].updated_at);
    }
}
