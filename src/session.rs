//! Session token persistence.
//!
//! The manager stores the token returned by a successful authentication under
//! [`SESSION_TOKEN_KEY`] and replays it on the next `open`. Stores are best
//! effort: a failed write is logged by the caller, never surfaced to request
//! waiters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config::parse_properties;
use crate::error::ClientError;
use crate::lock_unpoisoned;

/// Name the session token is persisted under.
pub const SESSION_TOKEN_KEY: &str = "GS_SESS_ID";

/// Key/value store that outlives the process.
pub trait SessionStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&self, name: &str, value: &str) -> Result<(), ClientError>;

    fn remove(&self, name: &str) -> Result<(), ClientError>;
}

/// In-memory store, for tests and embedders with their own persistence.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session token.
    pub fn with_token(token: &str) -> Self {
        let store = Self::new();
        lock_unpoisoned(&store.values).insert(SESSION_TOKEN_KEY.to_string(), token.to_string());
        store
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, name: &str) -> Option<String> {
        lock_unpoisoned(&self.values).get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), ClientError> {
        lock_unpoisoned(&self.values).insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), ClientError> {
        lock_unpoisoned(&self.values).remove(name);
        Ok(())
    }
}

/// Resolve the default session file location.
///
/// Resolution order:
/// 1. `<data dir>/gameserver-client/session.properties`
///    (`$XDG_DATA_HOME` on Linux, `~/Library/Application Support` on macOS)
/// 2. `<temp dir>/gameserver-client/session.properties` (fallback)
pub fn default_session_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("gameserver-client")
        .join("session.properties")
}

/// Store backed by a properties file, rewritten on every change.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileSessionStore {
    /// Open the store at `path`, loading existing values if the file exists.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => parse_properties(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &HashMap<String, String>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut keys: Vec<&String> = values.keys().collect();
        keys.sort();
        let body: String = keys
            .into_iter()
            .map(|key| format!("{}={}\n", key, values[key]))
            .collect();

        std::fs::write(&self.path, body)?;
        Ok(())
    }

    /// Run a blocking write without stalling other tasks on this worker.
    ///
    /// Settle hooks call the store from the connection's reader task. On a
    /// multi-thread runtime the write moves off the worker via
    /// `block_in_place`; a current-thread runtime blocks for the write.
    fn write_blocking<F>(&self, write: F) -> Result<(), ClientError>
    where
        F: FnOnce() -> Result<(), ClientError>,
    {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(write)
            }
            _ => write(),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, name: &str) -> Option<String> {
        lock_unpoisoned(&self.values).get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), ClientError> {
        let mut values = lock_unpoisoned(&self.values);
        values.insert(name.to_string(), value.to_string());
        self.write_blocking(|| self.flush(&values))
    }

    fn remove(&self, name: &str) -> Result<(), ClientError> {
        let mut values = lock_unpoisoned(&self.values);
        if values.remove(name).is_some() {
            self.write_blocking(|| self.flush(&values))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        assert_eq!(store.get(SESSION_TOKEN_KEY), None);

        store.set(SESSION_TOKEN_KEY, "s-1").expect("set");
        assert_eq!(store.get(SESSION_TOKEN_KEY).as_deref(), Some("s-1"));

        store.remove(SESSION_TOKEN_KEY).expect("remove");
        assert_eq!(store.get(SESSION_TOKEN_KEY), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("session.properties");

        let store = FileSessionStore::open(&path).expect("open");
        store.set(SESSION_TOKEN_KEY, "token-abc").expect("set");
        drop(store);

        let reopened = FileSessionStore::open(&path).expect("reopen");
        assert_eq!(reopened.get(SESSION_TOKEN_KEY).as_deref(), Some("token-abc"));

        reopened.remove(SESSION_TOKEN_KEY).expect("remove");
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(!text.contains(SESSION_TOKEN_KEY));
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSessionStore::open(dir.path().join("absent.properties")).expect("open");
        assert_eq!(store.get(SESSION_TOKEN_KEY), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_store_writes_from_runtime_worker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("session.properties");
        let store = Arc::new(FileSessionStore::open(&path).expect("open"));

        let writer = Arc::clone(&store);
        tokio::spawn(async move {
            writer.set(SESSION_TOKEN_KEY, "from-task").expect("set");
        })
        .await
        .expect("join");

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text, format!("{}=from-task\n", SESSION_TOKEN_KEY));

        store.remove(SESSION_TOKEN_KEY).expect("remove");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "");
    }

    #[test]
    fn test_default_session_path_format() {
        let path = default_session_path();
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("session.properties")
        );
    }
}
