//! On-disk state for the in-process TM server

use super::memory::{HostedServer, InMemoryServer};
use crate::error::Result;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// State file format version
const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    servers: Vec<HostedServer>,
}

/// Exclusive advisory lock on a state file, released on drop
///
/// Held across load, modify and save so concurrent CLI invocations do not
/// overwrite each other's changes. The lock file itself is left in place.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "Failed to release state lock");
        }
    }
}

/// JSON file holding an [`InMemoryServer`] between CLI invocations
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store backed by `path`
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default state file location
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("tmc")
            .join("state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock file guarding this store
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    /// Block until the state lock is held
    pub fn lock(&self) -> Result<StateLock> {
        let (file, path) = self.open_lock_file()?;
        file.lock_exclusive()?;
        debug!(path = %path.display(), "Acquired state lock");
        Ok(StateLock { file, path })
    }

    /// Take the state lock if no one else holds it
    pub fn try_lock(&self) -> Result<Option<StateLock>> {
        let (file, path) = self.open_lock_file()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(StateLock { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open_lock_file(&self) -> Result<(File, PathBuf)> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path = self.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok((file, path))
    }

    /// Load the server; a missing file yields an empty server
    pub fn load(&self) -> Result<InMemoryServer> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No state file, starting empty");
            return Ok(InMemoryServer::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let state: StateFile = serde_json::from_str(&content)?;
        Ok(InMemoryServer::from_snapshot(state.servers))
    }

    /// Persist the server, replacing the previous file atomically
    pub fn save(&self, server: &InMemoryServer) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let state = StateFile {
            version: STATE_VERSION,
            servers: server.snapshot()?,
        };

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&state)?)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "Saved state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{DatabaseServerRef, ServerSession};
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_empty_server() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path().join("state.json"));

        let server = store.load().unwrap();
        assert!(server.list_database_servers().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path().join("nested").join("state.json"));

        let server = InMemoryServer::new();
        server
            .register_database_server(DatabaseServerRef::new("DB01").property("host", "db01"))
            .unwrap();
        store.save(&server).unwrap();

        let loaded = store.load().unwrap();
        let servers = loaded.list_database_servers().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].properties.get("host"), Some(&"db01".to_string()));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(StateStore::new(path).load().is_err());
    }

    #[test]
    fn test_state_lock_is_exclusive() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path().join("nested").join("state.json"));

        let held = store.lock().unwrap();
        assert!(held.path().exists());
        assert!(store.try_lock().unwrap().is_none());

        drop(held);
        let again = store.try_lock().unwrap();
        assert!(again.is_some());
    }
}
