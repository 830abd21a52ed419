//! Durable state storage: a keyed blob store for `(state, state data)`.
//!
//! The machine writes `{agent_id}/state` and `{agent_id}/data` atomically
//! after every transition; on restart the pair is reloaded and the machine
//! resumes from it. Shipped backends: SQLite (persistent) and in-memory
//! (tests).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("corrupt record for {0}")]
    Corrupt(String),
}

/// A persisted machine snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedState {
    /// State tag, e.g. `CODING`.
    pub state: String,
    /// Keyed state data as one JSON object.
    pub data: serde_json::Value,
}

/// Keyed blob store for agent state. Writes are atomic per agent.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, agent_id: &str, snapshot: &PersistedState) -> Result<(), StoreError>;
    async fn load(&self, agent_id: &str) -> Result<Option<PersistedState>, StoreError>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<HashMap<String, PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, agent_id: &str, snapshot: &PersistedState) -> Result<(), StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Storage("lock".into()))?
            .insert(agent_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<PersistedState>, StoreError> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| StoreError::Storage("lock".into()))?
            .get(agent_id)
            .cloned())
    }
}

/// SQLite-backed store. One row per agent, state and data written in a
/// single upsert so the pair is never observed torn. Uses `block_in_place`,
/// so callers need a multi-thread runtime.
pub struct SqliteStateStore {
    db: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteStateStore {
    /// Opens or creates the database and table.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path.as_ref())
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agent_state (
                agent_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn save(&self, agent_id: &str, snapshot: &PersistedState) -> Result<(), StoreError> {
        let data =
            serde_json::to_string(&snapshot.data).map_err(|e| StoreError::Storage(e.to_string()))?;
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO agent_state (agent_id, state, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(agent_id) DO UPDATE SET
                     state = excluded.state,
                     data = excluded.data,
                     updated_at = excluded.updated_at",
                rusqlite::params![agent_id, snapshot.state, data, now_ms()],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    async fn load(&self, agent_id: &str) -> Result<Option<PersistedState>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn
                .prepare("SELECT state, data FROM agent_state WHERE agent_id = ?1")
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let mut rows = stmt
                .query(rusqlite::params![agent_id])
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let Some(row) = rows.next().map_err(|e| StoreError::Storage(e.to_string()))? else {
                return Ok(None);
            };
            let state: String = row.get(0).map_err(|e| StoreError::Storage(e.to_string()))?;
            let data_text: String = row.get(1).map_err(|e| StoreError::Storage(e.to_string()))?;
            let data = serde_json::from_str(&data_text)
                .map_err(|_| StoreError::Corrupt(agent_id.to_string()))?;
            Ok(Some(PersistedState { state, data }))
        })
    }
}
