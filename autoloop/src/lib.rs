//! Autonomous agent loop scheduler.
//!
//! Repeatedly invokes an external coding agent on a fixed cadence, keeps a
//! shared consensus document recoverable across failed cycles, trips a circuit
//! breaker on repeated failures, and maintains a priority-ordered queue of
//! human-submitted ideas awaiting approval.
//!
//! - **[`core`]**: Pure logic (classification, breaker transitions, queue
//!   ordering). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, process execution,
//!   persistence). Isolated behind traits so the scheduler is testable.
//!
//! [`scheduler`] drives the loop; [`control`] and [`notify`] are its inbound
//! and outbound channels; [`cli`] implements the `autoloop` subcommands.

pub mod cli;
pub mod control;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod notify;
pub mod scheduler;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
