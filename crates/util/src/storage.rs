//! Scoped key/value persistence consumed by the walkthrough engine.
//!
//! The engine only needs string records addressed by key; typed repositories sit on top of
//! `StorageService`. Two backends are provided: a JSON file written behind every mutation
//! by a dedicated writer thread, and an in-memory map for tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::expand_tilde;

/// Environment variable controlling the state file location.
pub const STATE_PATH_ENV: &str = "GUIDEPOST_STATE_PATH";

/// Default filename for the persisted state.
pub const STATE_FILE_NAME: &str = "state.json";

/// Errors surfaced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O failure while reading or writing the state file.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The background writer is gone; the change was kept in memory only.
    #[error("state writer stopped")]
    WriterStopped,
}

/// Shared trait implemented by persistence backends.
pub trait StorageService: Send + Sync {
    /// Read the record stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store or replace the record under `key`.
    fn store(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Remove the record under `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// JSON-backed storage persisted on disk.
///
/// Reads and mutations only touch the in-memory map. Each mutation hands the serialized
/// state to a writer thread, which coalesces queued snapshots and writes the newest one.
/// Dropping the store waits for the pending write.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    state: Mutex<StateFile>,
    pending: Option<Sender<String>>,
    writer: Option<JoinHandle<()>>,
}

impl JsonFileStorage {
    /// Open the store at the provided path (or the default path when omitted).
    pub fn new<P: Into<Option<PathBuf>>>(path: P) -> Result<Self, StorageError> {
        let resolved_path = match path.into() {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => default_state_path(),
        };

        let state = load_state_file(&resolved_path)?;
        debug!(path = %resolved_path.display(), records = state.entries.len(), "Opened state file");
        let (pending, snapshots) = channel();
        let writer_path = resolved_path.clone();
        let writer = thread::Builder::new()
            .name("guidepost-state-writer".into())
            .spawn(move || drain_snapshots(&writer_path, snapshots))?;
        Ok(Self {
            path: resolved_path,
            state: Mutex::new(state),
            pending: Some(pending),
            writer: Some(writer),
        })
    }

    /// Open the store at the default location.
    pub fn with_defaults() -> Result<Self, StorageError> {
        Self::new(None::<PathBuf>)
    }

    /// Access the underlying file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, state: &StateFile) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(state)?;
        self.pending
            .as_ref()
            .ok_or(StorageError::WriterStopped)?
            .send(content)
            .map_err(|_| StorageError::WriterStopped)
    }
}

impl Drop for JsonFileStorage {
    fn drop(&mut self) {
        drop(self.pending.take());
        if let Some(writer) = self.writer.take()
            && writer.join().is_err()
        {
            warn!(path = %self.path.display(), "State writer panicked");
        }
    }
}

fn drain_snapshots(path: &Path, snapshots: Receiver<String>) {
    while let Ok(mut content) = snapshots.recv() {
        let mut coalesced = 0usize;
        while let Ok(newer) = snapshots.try_recv() {
            content = newer;
            coalesced += 1;
        }
        match write_state_file(path, &content) {
            Ok(()) => debug!(path = %path.display(), coalesced, "Wrote state file"),
            Err(error) => warn!(path = %path.display(), error = %error, "Failed to write state file"),
        }
    }
}

fn write_state_file(path: &Path, content: &str) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

impl StorageService for JsonFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let state = self.state.lock().expect("storage lock poisoned");
        Ok(state.entries.get(key).cloned())
    }

    fn store(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("storage lock poisoned");
        state.entries.insert(key.to_string(), value);
        self.save_locked(&state)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("storage lock poisoned");
        if state.entries.remove(key).is_none() {
            return Ok(());
        }
        self.save_locked(&state)
    }
}

/// In-memory storage primarily used for unit testing.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryStorage {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageService for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().expect("storage lock poisoned");
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().expect("storage lock poisoned");
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().expect("storage lock poisoned");
        entries.remove(key);
        Ok(())
    }
}

/// Resolve the default state file path, honoring `GUIDEPOST_STATE_PATH`.
pub fn default_state_path() -> PathBuf {
    if let Ok(path) = env::var(STATE_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("guidepost")
        .join(STATE_FILE_NAME)
}

fn load_state_file(path: &Path) -> Result<StateFile, StorageError> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<StateFile>(&content) {
            Ok(file) => Ok(file),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Failed to parse state file; starting empty");
                Ok(StateFile::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
        Err(error) => Err(StorageError::Io(error)),
    }
}
