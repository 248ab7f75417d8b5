//! Session record storage
//!
//! [`SessionStore`] is the adapter the lifecycle controller persists session
//! records through. Saves are idempotent overwrites keyed by session ID and
//! deleting an absent record is not an error.
//!
//! Backends:
//! - [`FileSessionStore`]: JSON file, default `<data dir>/pairgate/sessions.json`
//! - [`MemorySessionStore`]: process-local map
//! - [`PgSessionStore`](crate::postgres::PgSessionStore): Postgres table

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pairgate_core::{AuthState, Config, SessionId, StoreBackend};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::postgres::PgSessionStore;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Configuration directory not found")]
    NoConfigDir,
    #[error("Store configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A persisted session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub auth: AuthState,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: SessionId, auth: AuthState) -> Self {
        Self {
            session_id,
            auth,
            updated_at: Utc::now(),
        }
    }
}

/// Persists, retrieves and deletes session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Insert or overwrite the record for `session_id`
    async fn save(&self, session_id: &SessionId, auth: &AuthState) -> StorageResult<()>;

    /// Fetch the record for `session_id`, if any
    async fn get(&self, session_id: &SessionId) -> StorageResult<Option<AuthState>>;

    /// Remove the record for `session_id` if present
    async fn delete(&self, session_id: &SessionId) -> StorageResult<()>;
}

/// Open the store selected by configuration
pub async fn open_store(config: &Config) -> StorageResult<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match config.store {
        StoreBackend::File => match &config.store_path {
            Some(path) => Arc::new(FileSessionStore::with_path(path.clone()).await?),
            None => Arc::new(FileSessionStore::new().await?),
        },
        StoreBackend::Memory => Arc::new(MemorySessionStore::new()),
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                StorageError::Config("postgres store needs --database-url".to_string())
            })?;
            Arc::new(PgSessionStore::connect(url).await?)
        }
    };
    info!("Session store: {}", store.name());
    Ok(store)
}

/// Stored data structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredData {
    /// Session records indexed by session ID
    sessions: HashMap<String, SessionRecord>,
}

/// JSON file store with an in-memory copy
pub struct FileSessionStore {
    /// Path to the storage file
    path: PathBuf,
    /// In-memory cache of records
    data: Arc<RwLock<StoredData>>,
}

impl FileSessionStore {
    /// Create a store at the default location
    ///
    /// Loads existing data from disk if present.
    pub async fn new() -> StorageResult<Self> {
        let path = Self::default_path()?;
        Self::with_path(path).await
    }

    /// Create a store at a specific path
    pub async fn with_path(path: PathBuf) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(data) => {
                    info!("Loaded session store from {:?}", path);
                    data
                }
                Err(e) => {
                    warn!("Failed to parse session store, starting fresh: {}", e);
                    StoredData::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No existing session store, creating new");
                StoredData::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Default path (`<data dir>/pairgate/sessions.json`)
    fn default_path() -> StorageResult<PathBuf> {
        let data_dir = dirs::data_dir().ok_or(StorageError::NoConfigDir)?;
        Ok(data_dir.join("pairgate").join("sessions.json"))
    }

    /// Write the whole map to disk; caller holds the write lock
    async fn persist(&self, data: &StoredData) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(data)?;
        tokio::fs::write(&self.path, json).await?;
        debug!("Saved session store to {:?}", self.path);
        Ok(())
    }

    /// Number of stored sessions
    pub async fn session_count(&self) -> usize {
        self.data.read().await.sessions.len()
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, session_id: &SessionId, auth: &AuthState) -> StorageResult<()> {
        let mut data = self.data.write().await;
        data.sessions.insert(
            session_id.to_string(),
            SessionRecord::new(session_id.clone(), auth.clone()),
        );
        self.persist(&data).await?;
        debug!("Saved session {}", session_id);
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> StorageResult<Option<AuthState>> {
        let data = self.data.read().await;
        Ok(data
            .sessions
            .get(session_id.as_str())
            .map(|record| record.auth.clone()))
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<()> {
        let mut data = self.data.write().await;
        if data.sessions.remove(session_id.as_str()).is_some() {
            self.persist(&data).await?;
            info!("Removed session {}", session_id);
        }
        Ok(())
    }
}

/// Process-local store
#[derive(Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full record including its timestamp
    pub async fn record(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.records.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, session_id: &SessionId, auth: &AuthState) -> StorageResult<()> {
        self.records.write().await.insert(
            session_id.clone(),
            SessionRecord::new(session_id.clone(), auth.clone()),
        );
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> StorageResult<Option<AuthState>> {
        Ok(self
            .records
            .read()
            .await
            .get(session_id)
            .map(|record| record.auth.clone()))
    }

    async fn delete(&self, session_id: &SessionId) -> StorageResult<()> {
        self.records.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_state() -> AuthState {
        AuthState::new(
            json!({"registered": true, "me": {"id": "15551234567@s.whatsapp.net"}}),
            json!({"pre-key": {"1": {"public": "AAAA"}}}),
        )
    }

    #[tokio::test]
    async fn test_file_store_crud() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = FileSessionStore::with_path(path).await.unwrap();
        let id = SessionId::parse("Naxor~0123456789abcdef").unwrap();

        assert!(store.get(&id).await.unwrap().is_none());

        store.save(&id, &sample_state()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(sample_state()));

        // Overwrite
        let updated = AuthState::new(json!({"registered": false}), json!({}));
        store.save(&id, &updated).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(updated));
        assert_eq!(store.session_count().await, 1);

        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());

        // Deleting again is fine
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");
        let id = SessionId::parse("persisted").unwrap();

        {
            let store = FileSessionStore::with_path(path.clone()).await.unwrap();
            store.save(&id, &sample_state()).await.unwrap();
        }

        // Reload from disk
        let store = FileSessionStore::with_path(path).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(sample_state()));
    }

    #[tokio::test]
    async fn test_file_store_recovers_from_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileSessionStore::with_path(path).await.unwrap();
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        let id = SessionId::parse("mem").unwrap();

        store.save(&id, &sample_state()).await.unwrap();
        let record = store.record(&id).await.unwrap();
        assert_eq!(record.session_id, id);
        assert_eq!(record.auth, sample_state());

        store.delete(&id).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_open_store_postgres_needs_url() {
        let config = Config::new().with_store(StoreBackend::Postgres, None, None);
        assert!(matches!(
            open_store(&config).await,
            Err(StorageError::Config(_))
        ));
    }
}
