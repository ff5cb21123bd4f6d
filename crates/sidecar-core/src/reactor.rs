//! Reactor: keeps sidecars in step with store changes, one event at a time.
//!
//! Each event is classified with the naming convention and handled to
//! completion independently. Handlers never return errors: failures are
//! logged and reported as [`Outcome::Failed`], leaving in place whatever
//! already succeeded.
//!
//! Store notifications can describe state that has changed again by the time
//! a handler runs, so every handler probes the store before acting instead of
//! trusting the event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::StoreEvent;
use crate::naming::{self, FileKind};
use crate::rewrite::rewrite;
use crate::store::{FileHandle, Store, StoreError};
use crate::template;

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ReactorError>;

/// How companion files are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteMode {
    /// Move into the store's trash
    #[default]
    Trash,
    /// Remove outright
    Permanent,
}

/// Reactor policy knobs.
#[derive(Debug, Clone, Default)]
pub struct ReactorConfig {
    /// How sidecars (and cascaded main files) are removed
    pub delete_mode: DeleteMode,
    /// Whether deleting a sidecar also deletes its main file
    pub cascade_sidecar_delete: bool,
}

/// Why a handler did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The file takes no part in the sidecar relationship
    NotApplicable,
    /// A sidecar is already present
    SidecarExists,
    /// The index has no companion for this file
    NoCompanion,
    /// The index lists the companion but the medium does not have it
    CompanionMissing,
    /// The event was caused by the reactor's own mutation
    Echo,
    /// Sidecar deletes do not cascade under the current config
    CascadeDisabled,
}

/// What handling one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created { path: String },
    Renamed { from: String, to: String },
    Deleted { path: String },
    Skipped(SkipReason),
    Failed(String),
}

/// Tracks paths the reactor itself just mutated so that the notifications
/// those mutations produce are not handled as fresh user changes.
///
/// Marks expire after `ECHO_TTL` in case the store never reports the
/// mutation; a stale mark must not swallow a later user edit.
#[derive(Clone)]
pub struct EchoTracker {
    /// Map of path -> when the reactor touched it, one entry per mutation
    marked: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    ttl: Duration,
}

/// Time-to-live for echo marks.
pub const ECHO_TTL: Duration = Duration::from_secs(5);

impl Default for EchoTracker {
    fn default() -> Self {
        Self::with_ttl(ECHO_TTL)
    }
}

impl EchoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            marked: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Mark a path before mutating it
    pub fn mark(&self, path: &str) {
        self.lock()
            .entry(path.to_string())
            .or_default()
            .push(Instant::now());
    }

    /// Withdraw one mark after the mutation it announced failed
    pub fn forget(&self, path: &str) {
        let mut marked = self.lock();
        if let Some(marks) = marked.get_mut(path) {
            marks.pop();
            if marks.is_empty() {
                marked.remove(path);
            }
        }
    }

    /// Check and consume one mark (false if none is left or all expired)
    pub fn consume(&self, path: &str) -> bool {
        let ttl = self.ttl;
        let mut marked = self.lock();
        marked.retain(|_, marks| {
            marks.retain(|at| at.elapsed() < ttl);
            !marks.is_empty()
        });
        let Some(marks) = marked.get_mut(path) else {
            return false;
        };
        marks.remove(0);
        if marks.is_empty() {
            marked.remove(path);
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        self.marked.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shape of a rename, decided from the new and old paths.
enum RenameKind {
    Main,
    Sidecar { old_main: String, new_main: String },
    Other,
}

fn classify_rename(file: &FileHandle, old_path: &str) -> RenameKind {
    if naming::is_eligible_main(&file.extension) {
        return RenameKind::Main;
    }
    match (naming::main_path_for(old_path), naming::main_path_for(&file.path)) {
        (Some(old_main), Some(new_main)) => RenameKind::Sidecar { old_main, new_main },
        _ => RenameKind::Other,
    }
}

/// Applies the sidecar policies to store events.
pub struct Reactor<S: Store> {
    store: S,
    config: ReactorConfig,
    echoes: EchoTracker,
}

impl<S: Store> Reactor<S> {
    pub fn new(store: S, config: ReactorConfig) -> Self {
        Self::with_echoes(store, config, EchoTracker::new())
    }

    /// Build a reactor sharing (or replacing) the echo tracker.
    pub fn with_echoes(store: S, config: ReactorConfig, echoes: EchoTracker) -> Self {
        Self {
            store,
            config,
            echoes,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// Run a store mutation of `path`, marked beforehand as our own.
    async fn own<T>(
        &self,
        path: &str,
        mutation: impl Future<Output = crate::store::Result<T>>,
    ) -> Result<T> {
        self.echoes.mark(path);
        mutation.await.map_err(|e| {
            self.echoes.forget(path);
            e.into()
        })
    }

    /// Handle one store event.
    pub async fn handle(&self, event: StoreEvent) -> Outcome {
        if self.echoes.consume(event.path()) {
            debug!("Skipping echo of our own change: {:?}", event);
            return Outcome::Skipped(SkipReason::Echo);
        }

        match event {
            StoreEvent::Created { path } => self.on_create(&FileHandle::new(path)).await,
            StoreEvent::Renamed { path, old_path } => {
                self.on_rename(&FileHandle::new(path), &old_path).await
            }
            StoreEvent::Deleted { path } => self.on_delete(&FileHandle::new(path)).await,
        }
    }

    /// A file appeared: give it a sidecar if it is a main file without one.
    pub async fn on_create(&self, file: &FileHandle) -> Outcome {
        match self.try_create(file).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to create sidecar for {}: {}", file.path, e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn try_create(&self, file: &FileHandle) -> Result<Outcome> {
        if naming::classify(&file.path) != FileKind::Main {
            return Ok(Outcome::Skipped(SkipReason::NotApplicable));
        }

        let sidecar_path = naming::sidecar_path_for(&file.path);
        if self.store.lookup(&sidecar_path).await?.is_some() {
            debug!("Sidecar already exists for {}", file.path);
            return Ok(Outcome::Skipped(SkipReason::SidecarExists));
        }

        let body = template::render(&file.name);
        self.own(&sidecar_path, self.store.create(&sidecar_path, &body))
            .await?;

        info!("Created sidecar for {}", file.path);
        Ok(Outcome::Created { path: sidecar_path })
    }

    /// A file moved: carry its companion along and fix the back-references.
    pub async fn on_rename(&self, file: &FileHandle, old_path: &str) -> Outcome {
        let result = match classify_rename(file, old_path) {
            RenameKind::Main => self.rename_sidecar(file, old_path).await,
            RenameKind::Sidecar { old_main, new_main } => {
                self.rename_main(file, &old_main, &new_main).await
            }
            RenameKind::Other => Ok(Outcome::Skipped(SkipReason::NotApplicable)),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Rename sync skipped for {}: {}", old_path, e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    /// The main file moved from `old_path` to `file.path`.
    async fn rename_sidecar(&self, file: &FileHandle, old_path: &str) -> Result<Outcome> {
        let old_sidecar_path = naming::sidecar_path_for(old_path);
        let new_sidecar_path = naming::sidecar_path_for(&file.path);

        let Some(sidecar) = self.store.lookup(&old_sidecar_path).await? else {
            return Ok(Outcome::Skipped(SkipReason::NoCompanion));
        };
        if !self.store.exists(&old_sidecar_path).await? {
            debug!("Sidecar {} doesn't exist, skipping rename", old_sidecar_path);
            return Ok(Outcome::Skipped(SkipReason::CompanionMissing));
        }

        let body = self.store.read(&sidecar).await?;

        // Move first: an interruption leaves stale text at the right path,
        // which repair can fix, rather than fresh text at a lost path.
        self.own(&new_sidecar_path, self.store.rename(&sidecar, &new_sidecar_path))
            .await?;

        let updated = rewrite(&body, naming::file_name(old_path), &file.name);
        if updated != body {
            self.store
                .modify(&FileHandle::new(new_sidecar_path.clone()), &updated)
                .await?;
        }

        info!("Renamed sidecar {} -> {}", old_sidecar_path, new_sidecar_path);
        Ok(Outcome::Renamed {
            from: old_sidecar_path,
            to: new_sidecar_path,
        })
    }

    /// The sidecar (`file`) moved; move its main file to match.
    async fn rename_main(&self, file: &FileHandle, old_main: &str, new_main: &str) -> Result<Outcome> {
        let Some(main) = self.store.lookup(old_main).await? else {
            return Ok(Outcome::Skipped(SkipReason::NoCompanion));
        };
        if !naming::is_eligible_main(&main.extension) {
            return Ok(Outcome::Skipped(SkipReason::NotApplicable));
        }
        if !self.store.exists(old_main).await? {
            debug!("Main file {} doesn't exist, skipping rename", old_main);
            return Ok(Outcome::Skipped(SkipReason::CompanionMissing));
        }

        let body = self.store.read(file).await?;

        self.own(new_main, self.store.rename(&main, new_main))
            .await?;

        let updated = rewrite(&body, &main.name, naming::file_name(new_main));
        if updated != body {
            self.store.modify(file, &updated).await?;
        }

        info!("Renamed main file {} -> {}", old_main, new_main);
        Ok(Outcome::Renamed {
            from: old_main.to_string(),
            to: new_main.to_string(),
        })
    }

    /// A file was deleted: remove its sidecar (and, by policy, a sidecar's main).
    pub async fn on_delete(&self, file: &FileHandle) -> Outcome {
        let result = match naming::classify(&file.path) {
            FileKind::Main => {
                self.remove_companion(&naming::sidecar_path_for(&file.path))
                    .await
            }
            FileKind::Sidecar { main_path } => {
                if self.config.cascade_sidecar_delete {
                    self.remove_companion(&main_path).await
                } else {
                    Ok(Outcome::Skipped(SkipReason::CascadeDisabled))
                }
            }
            FileKind::Other => Ok(Outcome::Skipped(SkipReason::NotApplicable)),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Could not delete companion of {}: {}", file.path, e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn remove_companion(&self, path: &str) -> Result<Outcome> {
        if naming::classify(path) == FileKind::Other {
            return Ok(Outcome::Skipped(SkipReason::NotApplicable));
        }
        let Some(companion) = self.store.lookup(path).await? else {
            return Ok(Outcome::Skipped(SkipReason::NoCompanion));
        };
        if !self.store.exists(path).await? {
            return Ok(Outcome::Skipped(SkipReason::CompanionMissing));
        }

        match self.config.delete_mode {
            DeleteMode::Trash => self.own(path, self.store.trash(&companion)).await?,
            DeleteMode::Permanent => self.own(path, self.store.delete(&companion)).await?,
        }

        info!("Deleted {}", path);
        Ok(Outcome::Deleted {
            path: path.to_string(),
        })
    }
}
