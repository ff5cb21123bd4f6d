//! File watcher that turns raw notify events into store events.
//!
//! The raw watcher is used instead of a debouncer because renames have to be
//! seen as renames. Backends report a rename as one event carrying both
//! paths, as a From/To pair sharing a tracker cookie, or (FSEvents) as two
//! untracked halves told apart only by which path still exists.
//! `RenamePairer` joins the halves and gives up on a vanished half whose
//! partner never arrives (the file left the vault).

use anyhow::Result;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sidecar_core::store::is_hidden;
use sidecar_core::StoreEvent;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// How long a rename's From half waits for its To half.
pub const RENAME_PAIR_TTL: Duration = Duration::from_millis(500);

/// Path relative to the vault root with `/` separators, or `None` for paths
/// outside the vault or under a hidden segment.
fn relative_path(vault_path: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(vault_path).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    let relative = parts.join("/");
    if relative.is_empty() || is_hidden(&relative) {
        return None;
    }
    Some(relative)
}

/// Joins the two halves of a rename and translates everything else.
pub struct RenamePairer {
    vault_path: PathBuf,
    ttl: Duration,
    /// From halves waiting for their To, keyed by tracker.
    pending: HashMap<usize, (Option<String>, Instant)>,
    /// Trackers already resolved by a To, so a trailing Both is dropped.
    resolved: HashMap<usize, Instant>,
    /// Untracked halves whose path is gone, oldest first.
    unpaired: VecDeque<(String, Instant)>,
}

impl RenamePairer {
    pub fn new(vault_path: PathBuf, ttl: Duration) -> Self {
        Self {
            vault_path,
            ttl,
            pending: HashMap::new(),
            resolved: HashMap::new(),
            unpaired: VecDeque::new(),
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        relative_path(&self.vault_path, path)
    }

    /// Translate one raw event. Expired halves are flushed first.
    pub fn translate(&mut self, event: &Event) -> Vec<StoreEvent> {
        let mut out = self.flush_expired();

        match event.kind {
            EventKind::Create(kind) => {
                for path in &event.paths {
                    let is_file = match kind {
                        CreateKind::File => true,
                        CreateKind::Folder => false,
                        _ => path.is_file(),
                    };
                    if let (true, Some(path)) = (is_file, self.relative(path)) {
                        out.push(StoreEvent::Created { path });
                    }
                }
            }
            EventKind::Remove(kind) => {
                if kind == RemoveKind::Folder {
                    return out;
                }
                for path in &event.paths {
                    if let Some(path) = self.relative(path) {
                        out.push(StoreEvent::Deleted { path });
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.translate_rename(mode, event, &mut out);
            }
            _ => {}
        }

        out
    }

    fn translate_rename(&mut self, mode: RenameMode, event: &Event, out: &mut Vec<StoreEvent>) {
        let tracker = event.tracker();

        match mode {
            RenameMode::Both => {
                if let Some(tracker) = tracker {
                    self.pending.remove(&tracker);
                    if self.resolved.remove(&tracker).is_some() {
                        return;
                    }
                }
                if let [from, to] = event.paths.as_slice() {
                    if to.is_dir() {
                        return;
                    }
                    let from = self.relative(from);
                    let to = self.relative(to);
                    out.extend(Self::moved(from, to));
                }
            }
            RenameMode::From => {
                let from = event.paths.first().and_then(|p| self.relative(p));
                match tracker {
                    Some(tracker) => {
                        self.pending.insert(tracker, (from, Instant::now()));
                    }
                    None => {
                        if let Some(path) = from {
                            out.push(StoreEvent::Deleted { path });
                        }
                    }
                }
            }
            RenameMode::To => {
                let Some(to_path) = event.paths.first() else {
                    return;
                };
                if to_path.is_dir() {
                    if let Some(tracker) = tracker {
                        self.pending.remove(&tracker);
                        self.resolved.insert(tracker, Instant::now());
                    }
                    return;
                }
                let to = self.relative(to_path);
                match tracker.and_then(|t| self.pending.remove(&t).map(|p| (t, p))) {
                    Some((tracker, (from, _))) => {
                        self.resolved.insert(tracker, Instant::now());
                        out.extend(Self::moved(from, to));
                    }
                    None => {
                        if let Some(path) = to {
                            out.push(StoreEvent::Created { path });
                        }
                    }
                }
            }
            _ => {
                // Backends that cannot tell which half they saw (FSEvents).
                // A half whose path is gone waits for a half that exists.
                for path in &event.paths {
                    let relative = self.relative(path);
                    if path.is_file() {
                        let from = self.unpaired.pop_front().map(|(from, _)| from);
                        out.extend(Self::moved(from, relative));
                    } else if !path.exists() {
                        if let Some(relative) = relative {
                            self.unpaired.push_back((relative, Instant::now()));
                        }
                    }
                }
            }
        }
    }

    /// A move across the hidden boundary is a create or delete.
    fn moved(from: Option<String>, to: Option<String>) -> Option<StoreEvent> {
        match (from, to) {
            (Some(old_path), Some(path)) => Some(StoreEvent::Renamed { path, old_path }),
            (None, Some(path)) => Some(StoreEvent::Created { path }),
            (Some(path), None) => Some(StoreEvent::Deleted { path }),
            (None, None) => None,
        }
    }

    /// Turn unpaired halves older than the TTL into deletions.
    pub fn flush_expired(&mut self) -> Vec<StoreEvent> {
        let ttl = self.ttl;
        let now = Instant::now();
        self.resolved.retain(|_, at| now.duration_since(*at) < ttl);

        let expired: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= ttl)
            .map(|(tracker, _)| *tracker)
            .collect();

        let mut out = Vec::new();
        for tracker in expired {
            if let Some((Some(path), _)) = self.pending.remove(&tracker) {
                out.push(StoreEvent::Deleted { path });
            }
        }
        while let Some((_, at)) = self.unpaired.front() {
            if now.duration_since(*at) < ttl {
                break;
            }
            if let Some((path, _)) = self.unpaired.pop_front() {
                out.push(StoreEvent::Deleted { path });
            }
        }
        out
    }
}

/// File watcher that monitors the vault directory.
pub struct FileWatcher {
    /// Vault base path
    vault_path: PathBuf,
    /// Watcher handle (must keep alive)
    _watcher: RecommendedWatcher,
    pairer: Arc<Mutex<RenamePairer>>,
    event_tx: mpsc::UnboundedSender<StoreEvent>,
    /// Receiver for store events
    event_rx: mpsc::UnboundedReceiver<StoreEvent>,
}

impl FileWatcher {
    /// Create a new file watcher for the vault.
    pub fn new(vault_path: PathBuf) -> Result<Self> {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pairer = Arc::new(Mutex::new(RenamePairer::new(
            vault_path.clone(),
            RENAME_PAIR_TTL,
        )));

        let pairer_clone = Arc::clone(&pairer);
        let tx = event_tx.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let events = pairer_clone
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .translate(&event);
                    for store_event in events {
                        debug!("File event: {:?}", store_event);
                        if tx.send(store_event).is_err() {
                            // Receiver dropped
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            }
        })?;

        watcher.watch(&vault_path, RecursiveMode::Recursive)?;

        Ok(Self {
            vault_path,
            _watcher: watcher,
            pairer,
            event_tx,
            event_rx,
        })
    }

    /// Deliver deletions for renames whose destination never showed up.
    ///
    /// Call periodically; otherwise they only surface with the next event.
    pub fn flush_expired(&self) {
        let events = self
            .pairer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .flush_expired();
        for event in events {
            debug!("File event: {:?}", event);
            let _ = self.event_tx.send(event);
        }
    }

    /// Get the receiver for store events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<StoreEvent> {
        &mut self.event_rx
    }

    /// Get the vault path.
    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }
}
