//! The shared consensus document and its single backup slot.
//!
//! The scheduler is the only writer. Copies go through temp file + rename so
//! concurrent readers (dashboard, agent) never observe a partial document.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info};

use super::fs_util::{read_optional, write_atomic};

/// Placeholder fed to the agent before any consensus exists.
pub const FIRST_RUN_PLACEHOLDER: &str = "No consensus file found. This is the very first cycle.";

#[derive(Debug, Clone)]
pub struct ConsensusStore {
    live_path: PathBuf,
    backup_path: PathBuf,
}

impl ConsensusStore {
    pub fn new(live_path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>) -> Self {
        Self {
            live_path: live_path.into(),
            backup_path: backup_path.into(),
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    /// Current document, or `None` before the first cycle wrote one.
    pub fn read(&self) -> Result<Option<String>> {
        read_optional(&self.live_path)
    }

    /// Document content for the prompt, falling back to the first-run placeholder.
    pub fn read_for_prompt(&self) -> Result<String> {
        Ok(self
            .read()?
            .unwrap_or_else(|| FIRST_RUN_PLACEHOLDER.to_string()))
    }

    /// Mark the live document as known-good by copying it into the backup slot.
    ///
    /// Overwrites any previous backup. Returns `false` (and leaves the backup
    /// untouched) when there is no live document yet.
    pub fn commit(&self) -> Result<bool> {
        match self.read()? {
            Some(contents) => {
                write_atomic(&self.backup_path, &contents)?;
                debug!(path = %self.backup_path.display(), "consensus committed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Revert the live document to the backup. No-op without a backup.
    pub fn restore(&self) -> Result<bool> {
        match read_optional(&self.backup_path)? {
            Some(contents) => {
                write_atomic(&self.live_path, &contents)?;
                info!("consensus restored from backup");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
