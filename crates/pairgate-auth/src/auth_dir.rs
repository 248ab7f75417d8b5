//! Local multi-file auth state
//!
//! Each session keeps its protocol credentials under
//! `<auth root>/<session id>/`: `creds.json` plus one `keys-<category>.json`
//! per key category. The directory is created on demand.

use pairgate_core::{AuthState, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::storage::StorageResult;

const CREDS_FILE: &str = "creds.json";
const KEYS_PREFIX: &str = "keys-";
const JSON_SUFFIX: &str = ".json";

/// On-disk layout of one key category file
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    category: String,
    entries: Value,
}

/// Per-session directory of auth files
#[derive(Debug, Clone)]
pub struct AuthDir {
    dir: PathBuf,
}

impl AuthDir {
    pub fn new(root: &Path, session_id: &SessionId) -> Self {
        Self {
            dir: root.join(session_id.as_str()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    /// Create the directory if it does not exist
    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Read whatever state is on disk; missing files yield empty objects
    pub async fn load(&self) -> StorageResult<AuthState> {
        let mut state = AuthState::default();

        match tokio::fs::read_to_string(self.creds_path()).await {
            Ok(contents) => state.creds = serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Map::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !is_key_file(&name) {
                continue;
            }
            let contents = tokio::fs::read_to_string(entry.path()).await?;
            match serde_json::from_str::<KeyFile>(&contents) {
                Ok(file) => {
                    keys.insert(file.category, file.entries);
                }
                Err(e) => warn!("Skipping unreadable key file {}: {}", name, e),
            }
        }
        state.keys = Value::Object(keys);

        Ok(state)
    }

    /// Write creds and every key category, dropping stale category files
    pub async fn save(&self, state: &AuthState) -> StorageResult<()> {
        self.ensure().await?;
        tokio::fs::write(self.creds_path(), serde_json::to_string_pretty(&state.creds)?).await?;

        let mut written = HashSet::new();
        match &state.keys {
            Value::Object(categories) => {
                for (category, entries) in categories {
                    let file_name = key_file_name(category);
                    let file = KeyFile {
                        category: category.clone(),
                        entries: entries.clone(),
                    };
                    tokio::fs::write(self.dir.join(&file_name), serde_json::to_string(&file)?)
                        .await?;
                    written.insert(file_name);
                }
            }
            Value::Null => {}
            other => warn!("Ignoring non-object key state ({})", type_name(other)),
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_key_file(&name) && !written.contains(&name) {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }

        debug!("Wrote auth state to {:?}", self.dir);
        Ok(())
    }

    /// Serialized creds as written to `creds.json`
    pub async fn read_creds(&self) -> StorageResult<Option<String>> {
        match tokio::fs::read_to_string(self.creds_path()).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the whole directory
    pub async fn remove(&self) -> StorageResult<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_key_file(name: &str) -> bool {
    name.starts_with(KEYS_PREFIX) && name.ends_with(JSON_SUFFIX)
}

fn key_file_name(category: &str) -> String {
    format!(
        "{}{}{}",
        KEYS_PREFIX,
        category.replace('/', "__").replace(':', "-"),
        JSON_SUFFIX
    )
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
