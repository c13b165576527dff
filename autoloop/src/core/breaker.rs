//! Failure counters and the circuit breaker.
//!
//! Pure transitions over [`CycleState`]. The scheduler owns the sleeping; this
//! module only decides what the counters and status become.

use chrono::{DateTime, Utc};

use crate::core::types::{CycleState, CycleStatus};

/// Decision taken after a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerVerdict {
    /// Below threshold; the loop keeps its normal cadence.
    Armed,
    /// Threshold reached; the loop must cool down before the next cycle.
    Tripped,
}

/// Trips once `consecutive_errors >= max_errors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreaker {
    max_errors: u32,
}

impl CircuitBreaker {
    pub fn new(max_errors: u32) -> Self {
        Self { max_errors }
    }

    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    pub fn should_trip(&self, consecutive_errors: u32) -> bool {
        consecutive_errors >= self.max_errors
    }
}

/// Mark the start of a new cycle attempt.
pub fn begin_cycle(state: &mut CycleState, now: DateTime<Utc>) -> u64 {
    state.loop_count += 1;
    state.last_run = Some(now);
    state.current_label = CycleState::cycle_label(state.loop_count);
    state.loop_count
}

pub fn record_success(state: &mut CycleState) {
    state.consecutive_errors = 0;
    state.status = CycleStatus::Running;
}

/// Count a failed cycle (ordinary or soft) and evaluate the breaker.
///
/// On a trip the status becomes `cooldown`; the counter is only cleared by
/// [`finish_cooldown`], once the cooldown has actually elapsed.
pub fn record_failure(state: &mut CycleState, breaker: &CircuitBreaker) -> BreakerVerdict {
    state.error_count += 1;
    state.consecutive_errors = state.consecutive_errors.saturating_add(1);
    if breaker.should_trip(state.consecutive_errors) {
        state.status = CycleStatus::Cooldown;
        BreakerVerdict::Tripped
    } else {
        state.status = CycleStatus::Error;
        BreakerVerdict::Armed
    }
}

/// Re-arm the breaker after the cooldown elapsed.
pub fn finish_cooldown(state: &mut CycleState) {
    state.consecutive_errors = 0;
    state.status = CycleStatus::Running;
}
