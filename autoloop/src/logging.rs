//! Diagnostic tracing to stderr and, for the loop, the operator log.
//!
//! - **Tracing (this module)**: operator diagnostics filtered by `RUST_LOG`.
//!   `autoloop run` also appends them to `logs/auto-company.log` so a
//!   detached loop keeps its history.
//! - **Cycle logs (`io/cycle_log`)**: product artifacts in `logs/`. Always
//!   written, unaffected by `RUST_LOG`.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for `autoloop run`, where the loop narrates each cycle.
pub const LOOP_FILTER: &str = "info";
/// Default filter for one-shot commands.
pub const COMMAND_FILTER: &str = "warn";

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies. With
/// `operator_log`, events are also appended to that file without ANSI colors.
///
/// # Example
/// ```bash
/// RUST_LOG=autoloop=debug autoloop run
/// ```
pub fn init(default_filter: &str, operator_log: Option<&Path>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = operator_log.and_then(|path| match open_operator_log(path) {
        Ok(file) => Some(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .compact(),
        ),
        Err(err) => {
            eprintln!("warning: operator log disabled: {err:#}");
            None
        }
    });

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init();
}

/// Open the operator log for appending, creating `logs/` if needed.
pub fn open_operator_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn operator_log_appends_and_creates_parent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs").join("auto-company.log");

        writeln!(open_operator_log(&path).expect("open"), "first").expect("write");
        writeln!(open_operator_log(&path).expect("reopen"), "second").expect("write");

        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "first\nsecond\n"
        );
    }
}
