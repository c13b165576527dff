//! Resolving the agent executable once at startup.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// The engine could not be resolved to an executable. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineNotFound {
    pub engine: String,
}

impl fmt::Display for EngineNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} not found. Install it and ensure it's in PATH.",
            self.engine
        )
    }
}

impl std::error::Error for EngineNotFound {}

pub trait EngineLocator {
    fn resolve(&self, engine_id: &str) -> Result<PathBuf, EngineNotFound>;
}

/// Resolves an explicit binary first, then searches `PATH` for known aliases.
#[derive(Debug, Clone)]
pub struct PathEngineLocator {
    explicit: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl PathEngineLocator {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            search_path: env::var_os("PATH"),
        }
    }

    /// Search `search_path` instead of the process `PATH`.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }
}

/// Executable names tried for an engine id, in order.
pub fn engine_candidates(engine_id: &str) -> Vec<&str> {
    match engine_id {
        "codex" => vec!["codex", "codex-cli"],
        "claude-code" => vec!["claude-code", "claude"],
        "claude" => vec!["claude", "claude-code"],
        other => vec![other],
    }
}

impl EngineLocator for PathEngineLocator {
    fn resolve(&self, engine_id: &str) -> Result<PathBuf, EngineNotFound> {
        info!(engine = engine_id, "checking for engine");
        if let Some(explicit) = &self.explicit {
            if is_executable(explicit) {
                info!(path = %explicit.display(), "using explicit engine path");
                return Ok(explicit.clone());
            }
            warn!(path = %explicit.display(), "explicit engine path is not executable");
        }

        if let Some(search_path) = &self.search_path {
            for candidate in engine_candidates(engine_id) {
                for dir in env::split_paths(search_path) {
                    let full = dir.join(candidate);
                    if is_executable(&full) {
                        info!(engine = engine_id, path = %full.display(), "found engine");
                        return Ok(full);
                    }
                    let exe = dir.join(format!("{candidate}.exe"));
                    if is_executable(&exe) {
                        info!(engine = engine_id, path = %exe.display(), "found engine");
                        return Ok(exe);
                    }
                }
                debug!(candidate, "not found in PATH");
            }
        }

        Err(EngineNotFound {
            engine: engine_id.to_string(),
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn make_executable(path: &Path) {
        fs::write(path, "#!/bin/sh\n").expect("write");
        let mut perms = fs::metadata(path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }

    #[test]
    fn finds_alias_on_search_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        make_executable(&temp.path().join("codex-cli"));
        let locator = PathEngineLocator::new(None).with_search_path(temp.path().as_os_str());
        let found = locator.resolve("codex").expect("resolve");
        assert_eq!(found, temp.path().join("codex-cli"));
    }

    #[test]
    fn explicit_path_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let explicit = temp.path().join("my-agent");
        make_executable(&explicit);
        make_executable(&temp.path().join("codex"));
        let locator = PathEngineLocator::new(Some(explicit.clone()))
            .with_search_path(temp.path().as_os_str());
        assert_eq!(locator.resolve("codex").expect("resolve"), explicit);
    }

    #[test]
    fn non_executable_files_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("claude"), "not executable").expect("write");
        let locator = PathEngineLocator::new(None).with_search_path(temp.path().as_os_str());
        let err = locator.resolve("claude").unwrap_err();
        assert_eq!(err.engine, "claude");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn unknown_engine_is_searched_by_name() {
        assert_eq!(engine_candidates("aider"), vec!["aider"]);
        assert_eq!(engine_candidates("claude"), vec!["claude", "claude-code"]);
    }
}
