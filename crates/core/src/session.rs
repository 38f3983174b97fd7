//! Session persistence: an optional durable log of agent events.
//!
//! A session without an id is simply not persisted; callers check for the id
//! and skip, they never fail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::AgentEvent;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    fn name(&self) -> &str;

    /// Append one event to the session's log.
    async fn save_event(&self, session: &SessionId, event: &AgentEvent) -> Result<(), StoreError>;

    /// All events of a session, oldest first.
    async fn load_events(&self, session: &SessionId) -> Result<Vec<AgentEvent>, StoreError>;
}

/// Keeps events in memory. Useful for tests and short-lived processes.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Vec<AgentEvent>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save_event(&self, session: &SessionId, event: &AgentEvent) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .entry(session.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn load_events(&self, session: &SessionId) -> Result<Vec<AgentEvent>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session)
            .cloned()
            .unwrap_or_default())
    }
}

/// One JSONL file per session: `<dir>/<session_id>.jsonl`.
///
/// Appends a line per event; corrupted lines are skipped on load.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", session.0))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save_event(&self, session: &SessionId, event: &AgentEvent) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to create session directory: {e}")))?;

        let mut line =
            serde_json::to_string(event).map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push('\n');

        let path = self.path_for(session);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open {}: {e}", path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write {}: {e}", path.display())))?;
        file.flush()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        debug!(session_id = %session, kind = ?event.kind, "Persisted event");
        Ok(())
    }

    async fn load_events(&self, session: &SessionId) -> Result<Vec<AgentEvent>, StoreError> {
        let path = self.path_for(session);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Storage(e.to_string())),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<AgentEvent>(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted session event");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[tokio::test]
    async fn in_memory_store_roundtrip() {
        let store = InMemorySessionStore::new();
        let session = SessionId::new();
        store
            .save_event(&session, &AgentEvent::text(EventKind::UserMessage, "hi"))
            .await
            .unwrap();
        store
            .save_event(&session, &AgentEvent::text(EventKind::AgentResponse, "hello"))
            .await
            .unwrap();

        let events = store.load_events(&session).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::UserMessage);
        assert!(store.load_events(&SessionId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"));
        let session = SessionId("abc".into());

        store
            .save_event(&session, &AgentEvent::text(EventKind::UserMessage, "first"))
            .await
            .unwrap();
        store
            .save_event(&session, &AgentEvent::text(EventKind::AgentResponse, "second"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("sessions/abc.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);

        let events = store.load_events(&session).await.unwrap();
        assert_eq!(events[1].content["text"], "second");
    }

    #[tokio::test]
    async fn file_store_skips_corrupted_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s.jsonl"), "not json\n").unwrap();
        let store = FileSessionStore::new(dir.path());
        let session = SessionId("s".into());
        store
            .save_event(&session, &AgentEvent::text(EventKind::ToolResult, "ok"))
            .await
            .unwrap();

        let events = store.load_events(&session).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::ToolResult);
    }
}
