//! Shared deterministic types for the cycle scheduler.
//!
//! These types define the persisted contracts read by external observers
//! (dashboard, `autoloop status`). Field names and casing must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    #[default]
    Idle,
    Running,
    Cooldown,
    Error,
    Stopped,
}

impl CycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::Idle => "idle",
            CycleStatus::Running => "running",
            CycleStatus::Cooldown => "cooldown",
            CycleStatus::Error => "error",
            CycleStatus::Stopped => "stopped",
        }
    }
}

/// Scheduler counters and status, persisted as the state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleState {
    pub status: CycleStatus,
    /// Incremented once per cycle attempt, whatever the outcome.
    pub loop_count: u64,
    pub error_count: u64,
    /// Reset only by a successful cycle or a circuit-breaker trip.
    pub consecutive_errors: u32,
    pub last_run: Option<DateTime<Utc>>,
    #[serde(rename = "engine")]
    pub engine_id: String,
    #[serde(rename = "model")]
    pub model_id: String,
    #[serde(rename = "current")]
    pub current_label: String,
}

impl CycleState {
    pub fn new(engine_id: impl Into<String>, model_id: Option<&str>) -> Self {
        Self {
            status: CycleStatus::Idle,
            loop_count: 0,
            error_count: 0,
            consecutive_errors: 0,
            last_run: None,
            engine_id: engine_id.into(),
            model_id: model_id.unwrap_or("default").to_string(),
            current_label: "Idle".to_string(),
        }
    }

    /// Label shown while cycle `n` is the most recent attempt.
    pub fn cycle_label(loop_count: u64) -> String {
        format!("Cycle #{loop_count}")
    }
}

/// Raw result of one agent invocation, as seen by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// The process exited on its own.
    Exited {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration_ms: u64,
    },
    /// The deadline expired and the process was killed.
    TimedOut { duration_ms: u64 },
    /// The process could not be started (or the prompt could not be built).
    NotStarted { reason: String },
}

impl Invocation {
    pub fn duration_ms(&self) -> u64 {
        match self {
            Invocation::Exited { duration_ms, .. } | Invocation::TimedOut { duration_ms } => {
                *duration_ms
            }
            Invocation::NotStarted { .. } => 0,
        }
    }
}

/// Classification of a cycle, produced by an `OutcomeClassifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Success,
    /// Timeouts, spawn errors and output that fails validation.
    OrdinaryFailure { reason: String },
    /// The agent hit an upstream rate or quota limit.
    SoftFailure { marker: String },
}

impl CycleOutcome {
    /// Human-readable failure description (empty for success).
    pub fn describe(&self) -> String {
        match self {
            CycleOutcome::Success => String::new(),
            CycleOutcome::OrdinaryFailure { reason } => reason.clone(),
            CycleOutcome::SoftFailure { marker } => format!("usage limit detected: {marker}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_uses_default_model_label() {
        let state = CycleState::new("codex", None);
        assert_eq!(state.model_id, "default");
        assert_eq!(state.status, CycleStatus::Idle);
    }

    #[test]
    fn state_serializes_with_legacy_field_names() {
        let state = CycleState::new("codex", Some("o3"));
        let value = serde_json::to_value(&state).expect("serialize");
        let keys: Vec<&str> = value
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        for key in [
            "status",
            "loopCount",
            "errorCount",
            "consecutiveErrors",
            "lastRun",
            "engine",
            "model",
            "current",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(value["status"], "idle");
    }
}
