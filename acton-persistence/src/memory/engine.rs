//! Shared storage and sessions of the in-memory engine
//!
//! Committed data lives in a [`DashMap`] keyed by collection (or table)
//! name. Every write runs against a private copy of the target collection
//! and is published only when it succeeds and passes the unique-key check,
//! so a failing batch never leaves a partial write behind.
//!
//! A [`MemorySession`] snapshots each collection on first touch. Work inside
//! the session reads and writes the snapshot; `commit` publishes only the
//! collections the session wrote (last writer wins), `abort` throws them away.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::repository::{
    downcast_session, Document, RepositoryError, RepositoryOperation, RepositoryResult,
    TransactionHandle,
};

/// Ordered contents of one collection
pub(crate) type Rows = Vec<Document>;

/// Backend name reported by memory handles and sessions
pub(crate) const BACKEND: &str = "memory";

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
pub(crate) struct Engine {
    spaces: DashMap<String, Rows>,
    unique: DashMap<String, Vec<String>>,
}

impl Engine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add_unique(&self, space: &str, field: &str) {
        let mut fields = self.unique.entry(space.to_string()).or_default();
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }

    fn unique_fields(&self, space: &str, key: &str) -> Vec<String> {
        let mut fields = vec![key.to_string()];
        if let Some(extra) = self.unique.get(space) {
            fields.extend(extra.iter().filter(|f| *f != key).cloned());
        }
        fields
    }

    /// Current rows of a space as seen by the session (if any)
    pub(crate) async fn read(
        self: &Arc<Self>,
        space: &str,
        session: Option<&MemorySession>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Rows> {
        match session {
            Some(session) => {
                session.check_usable(self, operation)?;
                let mut state = session.state.lock().await;
                Ok(state
                    .snapshots
                    .entry(space.to_string())
                    .or_insert_with(|| self.committed(space))
                    .clone())
            }
            None => Ok(self.committed(space)),
        }
    }

    fn committed(&self, space: &str) -> Rows {
        self.spaces
            .get(space)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Apply `mutate` to a working copy and publish it if it succeeds
    pub(crate) async fn write<T, F>(
        self: &Arc<Self>,
        space: &str,
        key: &str,
        session: Option<&MemorySession>,
        operation: RepositoryOperation,
        mutate: F,
    ) -> RepositoryResult<T>
    where
        F: FnOnce(&mut Rows) -> RepositoryResult<T>,
    {
        let unique = self.unique_fields(space, key);
        match session {
            Some(session) => {
                session.check_usable(self, operation)?;
                let mut state = session.state.lock().await;
                let current = state
                    .snapshots
                    .entry(space.to_string())
                    .or_insert_with(|| self.committed(space));
                let mut working = current.clone();
                let output = mutate(&mut working)?;
                check_unique(space, &working, &unique, operation)?;
                *current = working;
                state.written.insert(space.to_string());
                Ok(output)
            }
            None => {
                let mut current = self.spaces.entry(space.to_string()).or_default();
                let mut working = current.clone();
                let output = mutate(&mut working)?;
                check_unique(space, &working, &unique, operation)?;
                *current = working;
                Ok(output)
            }
        }
    }
}

fn check_unique(
    space: &str,
    rows: &Rows,
    fields: &[String],
    operation: RepositoryOperation,
) -> RepositoryResult<()> {
    for field in fields {
        let mut seen = HashSet::new();
        for row in rows {
            let value = match row.get(field) {
                None | Some(Value::Null) => continue,
                Some(value) => value.to_string(),
            };
            if !seen.insert(value.clone()) {
                return Err(RepositoryError::constraint_violation(
                    operation,
                    format!(
                        "duplicate key value violates unique constraint \"{}_{}_key\": {}",
                        space, field, value
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Caller-owned unit of work on a memory store
///
/// Obtained from `MemoryDocumentStore::start_session` or
/// `MemoryDatabase::begin`. Dropping an unfinished session discards it.
pub struct MemorySession {
    id: u64,
    engine: Arc<Engine>,
    state: Mutex<SessionState>,
    finished: AtomicBool,
}

#[derive(Default)]
struct SessionState {
    snapshots: HashMap<String, Rows>,
    written: HashSet<String>,
}

impl MemorySession {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self {
            id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            engine,
            state: Mutex::new(SessionState::default()),
            finished: AtomicBool::new(false),
        }
    }

    /// Session number, unique within the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether `commit` or `abort` already ran
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Publish every collection written in the session
    ///
    /// Collections the session only read are left as they are.
    pub async fn commit(&self) -> RepositoryResult<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(RepositoryError::invalid_argument(
                RepositoryOperation::Transaction,
                format!("session {} is already finished", self.id),
            ));
        }
        let mut state = self.state.lock().await;
        let SessionState { snapshots, written } = &mut *state;
        let published = written.len();
        for (space, rows) in snapshots.drain() {
            if written.contains(&space) {
                self.engine.spaces.insert(space, rows);
            }
        }
        written.clear();
        tracing::debug!(session = self.id, published, "Committed memory session");
        Ok(())
    }

    /// Discard every change made in the session
    pub async fn abort(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock().await;
        state.snapshots.clear();
        state.written.clear();
        tracing::debug!(session = self.id, "Aborted memory session");
    }

    fn check_usable(&self, engine: &Arc<Engine>, operation: RepositoryOperation) -> RepositoryResult<()> {
        if !Arc::ptr_eq(&self.engine, engine) {
            return Err(RepositoryError::invalid_argument(
                operation,
                format!("session {} belongs to another memory store", self.id),
            ));
        }
        if self.is_finished() {
            return Err(RepositoryError::invalid_argument(
                operation,
                format!("session {} is already finished", self.id),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl TransactionHandle for MemorySession {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Recover a memory session from an opaque handle
pub(crate) fn memory_session<'a>(
    session: Option<&'a dyn TransactionHandle>,
    operation: RepositoryOperation,
) -> RepositoryResult<Option<&'a MemorySession>> {
    downcast_session::<MemorySession>(session, operation)
}

/// Number of driver calls made through a handle
#[derive(Debug, Clone, Default)]
pub(crate) struct CallCounter(Arc<AtomicU64>);

impl CallCounter {
    pub(crate) fn hit(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;
    use serde_json::json;

    fn row(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    const OP: RepositoryOperation = RepositoryOperation::Create;

    #[tokio::test]
    async fn test_failed_write_publishes_nothing() {
        let engine = Engine::new();
        engine.add_unique("users", "name");

        let err = engine
            .write("users", "_id", None, OP, |rows| {
                rows.push(row(json!({"_id": "1", "name": "x"})));
                rows.push(row(json!({"_id": "2", "name": "x"})));
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, RepositoryErrorKind::ConstraintViolation);
        assert!(err.message.contains("users_name_key"));
        assert!(engine.read("users", None, OP).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_key_is_always_unique() {
        let engine = Engine::new();
        let err = engine
            .write("t", "id", None, OP, |rows| {
                rows.push(row(json!({"id": 1})));
                rows.push(row(json!({"id": 1})));
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ConstraintViolation);
    }

    #[tokio::test]
    async fn test_session_isolation() {
        let engine = Engine::new();
        let session = MemorySession::new(engine.clone());

        engine
            .write("t", "id", Some(&session), OP, |rows| {
                rows.push(row(json!({"id": 1})));
                Ok(())
            })
            .await
            .unwrap();

        assert!(engine.read("t", None, OP).await.unwrap().is_empty());
        assert_eq!(engine.read("t", Some(&session), OP).await.unwrap().len(), 1);

        session.commit().await.unwrap();
        assert_eq!(engine.read("t", None, OP).await.unwrap().len(), 1);
        assert!(session.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_commit_skips_collections_only_read() {
        let engine = Engine::new();
        let session = MemorySession::new(engine.clone());

        assert!(engine.read("t", Some(&session), OP).await.unwrap().is_empty());
        engine
            .write("t", "id", None, OP, |rows| {
                rows.push(row(json!({"id": 1})));
                Ok(())
            })
            .await
            .unwrap();

        session.commit().await.unwrap();
        assert_eq!(engine.read("t", None, OP).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finished_session_is_rejected() {
        let engine = Engine::new();
        let session = MemorySession::new(engine.clone());
        session.abort().await;

        let err = engine.read("t", Some(&session), OP).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_session_from_other_store_is_rejected() {
        let engine = Engine::new();
        let other = MemorySession::new(Engine::new());
        let err = engine.read("t", Some(&other), OP).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
    }
}
