//! State snapshot storage (`.auto-company-state.json`).
//!
//! The snapshot is the scheduler's public face: external observers only ever
//! read this file, so every transition is written through here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use super::fs_util::write_json;
use super::schema::Schema;
use crate::core::types::CycleState;

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last persisted snapshot, or `None` if the loop never ran here.
    pub fn load(&self) -> Result<Option<CycleState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        load_state(&self.path).map(Some)
    }

    pub fn write(&self, state: &CycleState) -> Result<()> {
        write_state(&self.path, state)
    }
}

/// Load and schema-validate a snapshot.
pub fn load_state(path: &Path) -> Result<CycleState> {
    debug!(path = %path.display(), "loading state snapshot");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse state {}", path.display()))?;
    Schema::State.validate(&value)?;
    let state: CycleState = serde_json::from_value(value)
        .with_context(|| format!("deserialize state {}", path.display()))?;
    debug!(status = state.status.as_str(), loop_count = state.loop_count, "state loaded");
    Ok(state)
}

/// Atomically write the snapshot (temp file + rename).
pub fn write_state(path: &Path, state: &CycleState) -> Result<()> {
    debug!(
        path = %path.display(),
        status = state.status.as_str(),
        loop_count = state.loop_count,
        "writing state snapshot"
    );
    write_json(path, state)
}
