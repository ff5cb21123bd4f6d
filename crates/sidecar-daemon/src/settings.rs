//! Presentation settings.
//!
//! Stored in `.sidecar/settings.json` within the vault directory. The sync
//! engine never reads these; they are for whatever renders the vault.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory under the vault root holding daemon state.
pub const SETTINGS_DIR: &str = ".sidecar";

/// User-facing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Hide `*.md.md` companions from the file explorer.
    pub hide_sidecar_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hide_sidecar_files: true,
        }
    }
}

/// Storage for settings.
pub struct SettingsStorage {
    /// Path to the storage file.
    path: PathBuf,
    /// In-memory cache.
    settings: Settings,
}

impl SettingsStorage {
    /// Open storage for the specified vault directory, loading existing
    /// settings or falling back to defaults.
    pub fn new(vault_path: &Path) -> Result<Self> {
        let path = vault_path.join(SETTINGS_DIR).join("settings.json");

        let mut storage = Self {
            path,
            settings: Settings::default(),
        };
        storage.settings = storage.load()?;

        Ok(storage)
    }

    /// Load settings from disk.
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(&self.path)?;
        let settings: Settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    /// Save current settings to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn set_hide_sidecar_files(&mut self, hide: bool) -> Result<()> {
        self.settings.hide_sidecar_files = hide;
        self.save()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
