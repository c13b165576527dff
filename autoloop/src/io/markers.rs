//! Presence-based signal files shared with other processes.
//!
//! - stop: presence requests a graceful shutdown; consumed when observed.
//! - pause: presence suspends new cycle starts.
//! - start: content is the idea id to execute next, or [`MANUAL_START`].

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use super::fs_util::{read_optional, remove_if_exists, write_atomic};
use super::init::ProjectPaths;

/// Start-trigger content meaning "run a cycle now" without a specific idea.
pub const MANUAL_START: &str = "manual";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartTrigger {
    Manual,
    Idea(String),
}

impl StartTrigger {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | MANUAL_START => StartTrigger::Manual,
            id => StartTrigger::Idea(id.to_string()),
        }
    }

    pub fn as_marker(&self) -> &str {
        match self {
            StartTrigger::Manual => MANUAL_START,
            StartTrigger::Idea(id) => id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Markers {
    stop_path: PathBuf,
    pause_path: PathBuf,
    start_path: PathBuf,
}

impl Markers {
    pub fn new(paths: &ProjectPaths) -> Self {
        Self {
            stop_path: paths.stop_marker_path.clone(),
            pause_path: paths.pause_marker_path.clone(),
            start_path: paths.start_marker_path.clone(),
        }
    }

    pub fn request_stop(&self) -> Result<()> {
        write_atomic(&self.stop_path, "")
    }

    /// Consume a pending stop request.
    pub fn take_stop(&self) -> Result<bool> {
        remove_if_exists(&self.stop_path)
    }

    pub fn pause(&self) -> Result<()> {
        write_atomic(&self.pause_path, &Utc::now().timestamp_millis().to_string())
    }

    pub fn resume(&self) -> Result<bool> {
        remove_if_exists(&self.pause_path)
    }

    pub fn is_paused(&self) -> bool {
        self.pause_path.exists()
    }

    pub fn trigger_start(&self, trigger: &StartTrigger) -> Result<()> {
        write_atomic(&self.start_path, trigger.as_marker())
    }

    /// Consume a pending start trigger.
    pub fn take_start(&self) -> Result<Option<StartTrigger>> {
        let Some(raw) = read_optional(&self.start_path)? else {
            return Ok(None);
        };
        fs::remove_file(&self.start_path)
            .with_context(|| format!("remove {}", self.start_path.display()))?;
        Ok(Some(StartTrigger::parse(&raw)))
    }

    /// Peek at the start trigger without consuming it.
    pub fn pending_start(&self) -> Result<Option<StartTrigger>> {
        Ok(read_optional(&self.start_path)?.map(|raw| StartTrigger::parse(&raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_marker_is_consumed_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let markers = Markers::new(&ProjectPaths::new(temp.path()));
        markers.request_stop().expect("stop");
        assert!(markers.take_stop().expect("take"));
        assert!(!markers.take_stop().expect("take again"));
    }

    #[test]
    fn pause_and_resume_toggle_presence() {
        let temp = tempfile::tempdir().expect("tempdir");
        let markers = Markers::new(&ProjectPaths::new(temp.path()));
        assert!(!markers.is_paused());
        markers.pause().expect("pause");
        assert!(markers.is_paused());
        assert!(markers.resume().expect("resume"));
        assert!(!markers.is_paused());
    }

    #[test]
    fn start_trigger_round_trips_ids_and_sentinel() {
        let temp = tempfile::tempdir().expect("tempdir");
        let markers = Markers::new(&ProjectPaths::new(temp.path()));
        markers
            .trigger_start(&StartTrigger::Idea("0001".to_string()))
            .expect("trigger");
        assert_eq!(
            markers.pending_start().expect("peek"),
            Some(StartTrigger::Idea("0001".to_string()))
        );
        assert_eq!(
            markers.take_start().expect("take"),
            Some(StartTrigger::Idea("0001".to_string()))
        );
        assert_eq!(markers.take_start().expect("take again"), None);

        markers.trigger_start(&StartTrigger::Manual).expect("trigger");
        assert_eq!(
            markers.take_start().expect("take"),
            Some(StartTrigger::Manual)
        );
    }
}
