//! Persistence layer.
//!
//! Every artifact is a JSON file in the state directory. Writes go to a
//! uniquely named temp sibling, are fsynced, then renamed over the target, so
//! a reader only ever sees the previous file or the complete new one. Reads
//! fall back to the type's default when the file is missing or corrupt.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Artifact locations
// ---------------------------------------------------------------------------

/// Paths of the persisted artifacts under one state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cycle_state(&self) -> PathBuf {
        self.dir.join("cycle_state.json")
    }

    pub fn opportunities(&self) -> PathBuf {
        self.dir.join("opportunities.json")
    }

    pub fn performance(&self) -> PathBuf {
        self.dir.join("cycle_performance.json")
    }

    pub fn risk_params(&self) -> PathBuf {
        self.dir.join("risk_params.json")
    }

    pub fn cross_market(&self) -> PathBuf {
        self.dir.join("cross_market_snapshot.json")
    }

    pub fn correlation(&self) -> PathBuf {
        self.dir.join("correlation_snapshot.json")
    }

    pub fn trades(&self) -> PathBuf {
        self.dir.join("trades.json")
    }

    pub fn external_signal(&self) -> PathBuf {
        self.dir.join("external_signal_snapshot.json")
    }

    pub fn news_signal(&self) -> PathBuf {
        self.dir.join("news_signal_snapshot.json")
    }

    pub fn price_history(&self) -> PathBuf {
        self.dir.join("price_history.json")
    }

    /// Written by the external balance sync.
    pub fn balance(&self) -> PathBuf {
        self.dir.join("balance.json")
    }

    /// Written by the external position sync.
    pub fn positions(&self) -> PathBuf {
        self.dir.join("positions.json")
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Load `path`, distinguishing "nothing usable" from an unreadable location.
///
/// Missing or unparseable files yield `Ok(None)`. Any other I/O failure
/// (permissions, path is a directory) is an error.
pub fn load_strict<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No saved artifact, using defaults");
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    match serde_json::from_str(&json) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt artifact, using defaults");
            Ok(None)
        }
    }
}

/// Load `path`, falling back to `T::default()` on any failure.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match load_strict(path) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            warn!(error = %e, "Artifact unreadable, using defaults");
            T::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Atomically replace `path` with the pretty JSON of `value`.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise artifact")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let temp_path = temp_sibling(path);
    let write_temp = || -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    };

    if let Err(e) = write_temp() {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to write {}", path.display()));
    }

    debug!(path = %path.display(), bytes = json.len(), "Artifact saved");
    Ok(())
}

/// `<dir>/.<name>.<uuid>.tmp`, unique so concurrent writers never share it.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
