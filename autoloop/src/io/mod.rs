//! Filesystem, process, and persistence plumbing for the cycle loop.

pub mod config;
pub mod consensus;
pub mod cycle_log;
pub mod engine;
pub mod fs_util;
pub mod ideas;
pub mod init;
pub mod instance;
pub mod markers;
pub mod process;
pub mod prompt;
pub mod schema;
pub mod state_store;
