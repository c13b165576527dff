//! Implementations of the `autoloop` subcommands.
//!
//! `run` owns the loop. Every other command talks to a running loop the same
//! way external tools do: through the marker files and the idea queue on disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::info;

use crate::control::{command_channel, stop_on_termination_signals};
use crate::core::classifier::MarkerClassifier;
use crate::core::ideas::IndexEntry;
use crate::core::types::{CycleOutcome, CycleState};
use crate::io::config::load_effective_config;
use crate::io::cycle_log::{LogRotator, parse_cycle_seq};
use crate::io::engine::PathEngineLocator;
use crate::io::fs_util::read_optional;
use crate::io::ideas::IdeaQueue;
use crate::io::init::{InitOptions, ProjectPaths, init_project};
use crate::io::instance::InstanceLock;
use crate::io::markers::{Markers, StartTrigger};
use crate::io::process::SystemProcessRunner;
use crate::io::state_store::StateStore;
use crate::notify::LogNotifier;
use crate::scheduler::{CycleScheduler, LoopContext, LoopServices, ThreadSleeper};

pub fn init(root: &Path, force: bool) -> Result<()> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialized {}", paths.root.display());
    Ok(())
}

/// Run the loop until stopped, or a single cycle with `once`.
///
/// Holds the project's loop lock throughout, so at most one agent runs per
/// project. SIGINT/SIGTERM stop the loop after the current cycle.
pub fn run(root: &Path, once: bool) -> Result<()> {
    let paths = ProjectPaths::new(root);
    let _lock = InstanceLock::acquire(&paths.pid_path)?;
    let config = load_effective_config(&paths.config_path)?;
    let classifier = MarkerClassifier::new(&config.limit_markers)
        .context("compile limit markers")?;
    let locator = PathEngineLocator::new(config.engine_bin.clone());
    let ctx = LoopContext::new(paths, config);
    let services = LoopServices {
        locator: &locator,
        runner: &SystemProcessRunner,
        classifier: &classifier,
        notifier: &LogNotifier,
        sleeper: &ThreadSleeper,
    };
    let mut scheduler = CycleScheduler::start(&ctx, services)?;

    if once {
        let report = scheduler.run_once();
        return match report.outcome {
            CycleOutcome::Success => Ok(()),
            failure => Err(anyhow!("cycle {} failed: {}", report.cycle, failure.describe())),
        };
    }

    let (sender, commands) = command_channel();
    stop_on_termination_signals(sender)?;
    let state = scheduler.run(&commands)?;
    info!(loop_count = state.loop_count, error_count = state.error_count, "exited");
    Ok(())
}

/// Snapshot plus the control-plane state an operator cares about.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: Option<CycleState>,
    pub paused: bool,
    pub pending_start: Option<String>,
    pub current_idea: Option<String>,
    pub queued_ideas: usize,
}

pub fn status_report(root: &Path) -> Result<StatusReport> {
    let paths = ProjectPaths::new(root);
    let markers = Markers::new(&paths);
    let ideas = IdeaQueue::new(&paths);
    Ok(StatusReport {
        state: StateStore::new(&paths.state_path).load()?,
        paused: markers.is_paused(),
        pending_start: markers
            .pending_start()?
            .map(|trigger| trigger.as_marker().to_string()),
        current_idea: ideas.current_idea()?,
        queued_ideas: ideas.list()?.len(),
    })
}

pub fn status(root: &Path) -> Result<()> {
    let report = status_report(root)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// List cycle logs, print one of them, or tail the operator log with `main`.
pub fn logs(root: &Path, limit: usize, show: Option<&str>, main: bool) -> Result<()> {
    let paths = ProjectPaths::new(root);
    if main {
        for line in operator_log_tail(&paths, limit)? {
            println!("{line}");
        }
        return Ok(());
    }
    if let Some(name) = show {
        if parse_cycle_seq(name).is_none() || name.contains(['/', '\\']) {
            return Err(anyhow!("{name} is not a cycle log name"));
        }
        let path = paths.logs_dir.join(name);
        let content =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        print!("{content}");
        return Ok(());
    }
    let rotator = LogRotator::new(&paths.logs_dir, usize::MAX);
    for entry in rotator.list()?.into_iter().take(limit) {
        println!("{}\t{}", entry.name, entry.size);
    }
    Ok(())
}

/// Last `limit` lines of `logs/auto-company.log`; empty before the first run.
pub fn operator_log_tail(paths: &ProjectPaths, limit: usize) -> Result<Vec<String>> {
    let Some(content) = read_optional(&paths.operator_log_path)? else {
        return Ok(Vec::new());
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(limit);
    Ok(lines[start..].iter().map(|line| (*line).to_string()).collect())
}

pub fn stop(root: &Path) -> Result<()> {
    Markers::new(&ProjectPaths::new(root)).request_stop()?;
    println!("stop requested; the loop exits after the current cycle");
    Ok(())
}

pub fn pause(root: &Path) -> Result<()> {
    Markers::new(&ProjectPaths::new(root)).pause()?;
    println!("paused");
    Ok(())
}

pub fn resume(root: &Path) -> Result<()> {
    Markers::new(&ProjectPaths::new(root)).resume()?;
    println!("resumed");
    Ok(())
}

pub fn start(root: &Path) -> Result<()> {
    Markers::new(&ProjectPaths::new(root)).trigger_start(&StartTrigger::Manual)?;
    println!("start triggered");
    Ok(())
}

pub fn idea_submit(root: &Path, text: &str, priority: i64, start_now: bool) -> Result<()> {
    let item = IdeaQueue::new(&ProjectPaths::new(root)).submit(text, priority, start_now)?;
    println!("{}", item.id);
    Ok(())
}

pub fn idea_approve(root: &Path, id: &str) -> Result<()> {
    let item = IdeaQueue::new(&ProjectPaths::new(root)).approve(id)?;
    println!("approved {}", item.id);
    Ok(())
}

pub fn idea_reject(root: &Path, id: &str) -> Result<()> {
    let item = IdeaQueue::new(&ProjectPaths::new(root)).reject(id)?;
    println!("rejected {}", item.id);
    Ok(())
}

pub fn idea_priority(root: &Path, id: &str, value: i64) -> Result<()> {
    let item = IdeaQueue::new(&ProjectPaths::new(root)).set_priority(id, value)?;
    println!("{} priority {}", item.id, item.priority);
    Ok(())
}

pub fn idea_list(root: &Path, repair: bool) -> Result<()> {
    let queue = IdeaQueue::new(&ProjectPaths::new(root));
    let index: Vec<IndexEntry> = if repair {
        queue.reconcile()?
    } else {
        queue.list()?
    };
    for entry in index {
        let item = queue.get(&entry.id)?;
        println!(
            "{}\t{}\t{}\t{}",
            entry.id,
            entry.priority,
            entry.status.as_str(),
            item.text
        );
    }
    Ok(())
}
