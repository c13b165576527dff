//! Best-effort cycle event delivery.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Events emitted by the scheduler; serialized as `{"type": ..., ...fields}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CycleEvent {
    CycleStart {
        cycle_num: u64,
    },
    CycleEnd {
        cycle_num: u64,
        status: String,
        duration: u64,
    },
    CycleError {
        cycle_num: u64,
        error: String,
        error_count: u64,
    },
    CircuitBreaker {
        consecutive_errors: u32,
    },
}

impl CycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CycleEvent::CycleStart { .. } => "cycleStart",
            CycleEvent::CycleEnd { .. } => "cycleEnd",
            CycleEvent::CycleError { .. } => "cycleError",
            CycleEvent::CircuitBreaker { .. } => "circuitBreaker",
        }
    }
}

/// Delivery never fails the caller; implementations drop what they cannot send.
pub trait Notifier {
    fn notify(&self, event: &CycleEvent);
}

/// Logs events through `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &CycleEvent) {
        info!(event = event.kind(), "{event:?}");
    }
}
