//! Store abstraction the sidecar engine works against.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `NativeStore` (in sidecar-daemon) - Uses tokio::fs under a vault root
//!
//! A store has two views of its contents. `lookup` and `list` answer from the
//! store's index, which may lag behind reality; `exists` asks the underlying
//! medium directly. The reactor uses the former to decide whether there is
//! work to do and the latter to confirm it right before acting.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use crate::events::{EventBus, StoreEvent};
use crate::naming;

/// Folder that trashed files are moved into.
pub const TRASH_DIR: &str = ".trash";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Identity of one file in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle {
    /// Full slash-separated path relative to the store root
    pub path: String,
    /// Final path segment: "photo.jpg"
    pub name: String,
    /// Text after the last dot of `name`: "jpg", or empty
    pub extension: String,
}

impl FileHandle {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = naming::file_name(&path).to_string();
        let extension = naming::extension(&name).to_string();
        Self {
            path,
            name,
            extension,
        }
    }
}

/// Whether any segment of `path` is hidden (starts with a dot).
pub fn is_hidden(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with('.'))
}

/// Mutation and lookup primitives supplied by the host store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Every visible file known to the store's index
    async fn list(&self) -> Result<Vec<FileHandle>>;

    /// Handle for `path` if the index knows it
    async fn lookup(&self, path: &str) -> Result<Option<FileHandle>>;

    /// Whether `path` exists on the underlying medium (bypasses the index)
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Read a file's text
    async fn read(&self, file: &FileHandle) -> Result<String>;

    /// Create a new file; fails if `path` is already taken
    async fn create(&self, path: &str, content: &str) -> Result<()>;

    /// Replace an existing file's text
    async fn modify(&self, file: &FileHandle, content: &str) -> Result<()>;

    /// Move a file; fails if `new_path` is already taken
    async fn rename(&self, file: &FileHandle, new_path: &str) -> Result<()>;

    /// Remove a file permanently
    async fn delete(&self, file: &FileHandle) -> Result<()>;

    /// Move a file into the store's trash
    async fn trash(&self, file: &FileHandle) -> Result<()>;
}

/// In-memory store for testing.
///
/// Keeps the index and the medium apart so tests can reproduce a stale
/// index, lets tests make individual paths fail, and publishes a
/// `StoreEvent` for every mutation.
pub struct InMemoryStore {
    /// What is actually stored
    medium: RwLock<BTreeMap<String, String>>,
    /// Paths the index believes exist
    index: RwLock<BTreeSet<String>>,
    /// Paths whose mutations fail with an IO error
    failing: RwLock<HashSet<String>>,
    events: Arc<EventBus>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            medium: RwLock::new(BTreeMap::new()),
            index: RwLock::new(BTreeSet::new()),
            failing: RwLock::new(HashSet::new()),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Events published for every mutation.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Seed a file without publishing an event.
    pub fn insert(&self, path: &str, content: &str) {
        write(&self.medium).insert(path.to_string(), content.to_string());
        write(&self.index).insert(path.to_string());
    }

    /// Current text at `path` on the medium.
    pub fn contents(&self, path: &str) -> Option<String> {
        read(&self.medium).get(path).cloned()
    }

    /// Every path on the medium, hidden ones included, sorted.
    pub fn paths(&self) -> Vec<String> {
        read(&self.medium).keys().cloned().collect()
    }

    /// Drop `path` from the medium while the index keeps believing in it.
    pub fn remove_from_medium(&self, path: &str) {
        write(&self.medium).remove(path);
    }

    /// Make every mutation touching `path` fail with an IO error.
    pub fn fail_on(&self, path: &str) {
        write(&self.failing).insert(path.to_string());
    }

    fn check_failing(&self, path: &str) -> Result<()> {
        if read(&self.failing).contains(path) {
            return Err(StoreError::Io(format!("injected failure for {}", path)));
        }
        Ok(())
    }

    fn validate(path: &str) -> Result<()> {
        if path.is_empty() || path.starts_with('/') || path.contains("//") {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    fn taken(&self, path: &str) -> bool {
        read(&self.medium).contains_key(path) || read(&self.index).contains(path)
    }

    fn trash_path(&self, path: &str) -> String {
        let base = format!("{}/{}", TRASH_DIR, path);
        let mut candidate = base.clone();
        let mut n = 1;
        while read(&self.medium).contains_key(&candidate) {
            candidate = format!("{} {}", base, n);
            n += 1;
        }
        candidate
    }

    fn remove(&self, path: &str) -> Result<String> {
        let content = write(&self.medium)
            .remove(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        write(&self.index).remove(path);
        Ok(content)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list(&self) -> Result<Vec<FileHandle>> {
        Ok(read(&self.index)
            .iter()
            .filter(|path| !is_hidden(path))
            .map(FileHandle::new)
            .collect())
    }

    async fn lookup(&self, path: &str) -> Result<Option<FileHandle>> {
        Ok(read(&self.index).contains(path).then(|| FileHandle::new(path)))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(read(&self.medium).contains_key(path))
    }

    async fn read(&self, file: &FileHandle) -> Result<String> {
        self.contents(&file.path)
            .ok_or_else(|| StoreError::NotFound(file.path.clone()))
    }

    async fn create(&self, path: &str, content: &str) -> Result<()> {
        Self::validate(path)?;
        self.check_failing(path)?;
        if self.taken(path) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        self.insert(path, content);
        self.events.emit(StoreEvent::Created {
            path: path.to_string(),
        });
        Ok(())
    }

    async fn modify(&self, file: &FileHandle, content: &str) -> Result<()> {
        self.check_failing(&file.path)?;
        let mut medium = write(&self.medium);
        let slot = medium
            .get_mut(&file.path)
            .ok_or_else(|| StoreError::NotFound(file.path.clone()))?;
        *slot = content.to_string();
        Ok(())
    }

    async fn rename(&self, file: &FileHandle, new_path: &str) -> Result<()> {
        Self::validate(new_path)?;
        self.check_failing(&file.path)?;
        self.check_failing(new_path)?;
        if file.path == new_path {
            return Ok(());
        }
        if self.taken(new_path) {
            return Err(StoreError::AlreadyExists(new_path.to_string()));
        }
        let content = self.remove(&file.path)?;
        self.insert(new_path, &content);
        self.events.emit(StoreEvent::Renamed {
            path: new_path.to_string(),
            old_path: file.path.clone(),
        });
        Ok(())
    }

    async fn delete(&self, file: &FileHandle) -> Result<()> {
        self.check_failing(&file.path)?;
        self.remove(&file.path)?;
        self.events.emit(StoreEvent::Deleted {
            path: file.path.clone(),
        });
        Ok(())
    }

    async fn trash(&self, file: &FileHandle) -> Result<()> {
        self.check_failing(&file.path)?;
        let destination = self.trash_path(&file.path);
        let content = self.remove(&file.path)?;
        write(&self.medium).insert(destination, content);
        self.events.emit(StoreEvent::Deleted {
            path: file.path.clone(),
        });
        Ok(())
    }
}

// Lets a test keep a handle on the store it gives to a Reactor.
#[async_trait]
impl<T: Store> Store for Arc<T> {
    async fn list(&self) -> Result<Vec<FileHandle>> {
        (**self).list().await
    }

    async fn lookup(&self, path: &str) -> Result<Option<FileHandle>> {
        (**self).lookup(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn read(&self, file: &FileHandle) -> Result<String> {
        (**self).read(file).await
    }

    async fn create(&self, path: &str, content: &str) -> Result<()> {
        (**self).create(path, content).await
    }

    async fn modify(&self, file: &FileHandle, content: &str) -> Result<()> {
        (**self).modify(file, content).await
    }

    async fn rename(&self, file: &FileHandle, new_path: &str) -> Result<()> {
        (**self).rename(file, new_path).await
    }

    async fn delete(&self, file: &FileHandle) -> Result<()> {
        (**self).delete(file).await
    }

    async fn trash(&self, file: &FileHandle) -> Result<()> {
        (**self).trash(file).await
    }
}
