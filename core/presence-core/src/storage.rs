//! Storage configuration and path management for Copresence.
//!
//! This module provides a centralized `StorageConfig` struct that manages the
//! on-disk locations used by the file-backed shared medium. The abstraction
//! exists for the same reasons it does everywhere else in the codebase:
//!
//! - Easy path changes without hunting through code
//! - Testability via dependency injection (inject temp paths)
//! - Future flexibility (env var overrides, XDG compliance)
//!
//! Production code uses `StorageConfig::default()` which points to
//! `~/.copresence/`. Tests use `StorageConfig::with_root(temp_dir)`.

use std::path::{Path, PathBuf};

/// Central configuration for Copresence storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all shared coordination data (default: ~/.copresence)
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().expect("Could not find home directory");
        Self {
            root: home.join(".copresence"),
        }
    }
}

impl StorageConfig {
    /// Creates a StorageConfig with a custom root directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the root directory for shared coordination data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the serialized session store (`session.store` key).
    pub fn store_file(&self) -> PathBuf {
        self.key_file(crate::store::STORE_KEY)
    }

    /// Path to the serialized event log (`session.events` key).
    pub fn events_file(&self) -> PathBuf {
        self.key_file(crate::store::EVENTS_KEY)
    }

    /// Path backing an arbitrary logical key.
    ///
    /// Key names are dotted identifiers, which are filesystem-safe as-is.
    pub fn key_file(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Reverse of [`key_file`]: extracts the logical key from a backing path.
    ///
    /// Returns `None` for paths outside the storage layout.
    pub fn key_for_path(&self, path: &Path) -> Option<String> {
        if path.parent() != Some(self.root.as_path()) {
            return None;
        }
        let name = path.file_name()?.to_str()?;
        name.strip_suffix(".json").map(|k| k.to_string())
    }

    /// Ensures the root directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}
