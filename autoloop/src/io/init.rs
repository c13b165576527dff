//! Project layout and `autoloop init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{LoopConfig, write_config};
use super::fs_util::write_atomic;

/// All canonical paths for a project root.
///
/// File names match the layout observers (dashboard, scripts) already read.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub prompt_path: PathBuf,
    pub memories_dir: PathBuf,
    pub consensus_path: PathBuf,
    pub consensus_backup_path: PathBuf,
    pub logs_dir: PathBuf,
    pub state_path: PathBuf,
    pub ideas_dir: PathBuf,
    pub idea_index_path: PathBuf,
    pub current_idea_path: PathBuf,
    pub stop_marker_path: PathBuf,
    pub pause_marker_path: PathBuf,
    pub start_marker_path: PathBuf,
    pub pid_path: PathBuf,
    pub operator_log_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let memories_dir = root.join("memories");
        let ideas_dir = root.join("ideas");
        Self {
            config_path: root.join("autoloop.toml"),
            prompt_path: root.join("PROMPT.md"),
            consensus_path: memories_dir.join("consensus.md"),
            consensus_backup_path: memories_dir.join("consensus.md.bak"),
            memories_dir,
            operator_log_path: root.join("logs").join("auto-company.log"),
            logs_dir: root.join("logs"),
            state_path: root.join(".auto-company-state.json"),
            idea_index_path: ideas_dir.join("index.json"),
            ideas_dir,
            current_idea_path: root.join(".auto-company-idea"),
            stop_marker_path: root.join(".auto-company-stop"),
            pause_marker_path: root.join(".auto-company-paused"),
            start_marker_path: root.join(".auto-company-start"),
            pid_path: root.join(".auto-company.pid"),
            root,
        }
    }

    /// Create the directories the loop writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.memories_dir, &self.logs_dir, &self.ideas_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, overwrite existing config and prompt files.
    pub force: bool,
}

const PROMPT_PLACEHOLDER: &str = "# Mission\n\nDescribe what the agent should work on every cycle.\n";

/// Create the project layout in `root`.
///
/// Fails if `autoloop.toml` already exists unless `options.force` is set. The
/// consensus document, ideas and logs are never overwritten.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root);
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "autoloop init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    paths.ensure_dirs()?;
    write_config(&paths.config_path, &LoopConfig::default())?;
    if options.force || !paths.prompt_path.exists() {
        write_atomic(&paths.prompt_path, PROMPT_PLACEHOLDER)?;
    }
    if !paths.idea_index_path.exists() {
        write_atomic(&paths.idea_index_path, "[]\n")?;
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        assert!(paths.config_path.is_file());
        assert!(paths.prompt_path.is_file());
        assert!(paths.memories_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.idea_index_path).expect("index"),
            "[]\n"
        );
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_project(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_project(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn force_rewrites_prompt_but_keeps_consensus() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.prompt_path, "custom").expect("write prompt");
        fs::write(&paths.consensus_path, "state").expect("write consensus");
        init_project(temp.path(), &InitOptions { force: true }).expect("force init");
        assert_eq!(
            fs::read_to_string(&paths.prompt_path).expect("prompt"),
            PROMPT_PLACEHOLDER
        );
        assert_eq!(
            fs::read_to_string(&paths.consensus_path).expect("consensus"),
            "state"
        );
    }

    #[test]
    fn paths_use_legacy_names() {
        let paths = ProjectPaths::new("/srv/company");
        assert!(paths.state_path.ends_with(".auto-company-state.json"));
        assert!(paths.consensus_backup_path.ends_with("memories/consensus.md.bak"));
        assert!(paths.stop_marker_path.ends_with(".auto-company-stop"));
    }
}
