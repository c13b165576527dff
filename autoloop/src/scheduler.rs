//! The cycle loop: invoke the agent, classify, and keep the books.
//!
//! One control thread owns [`CycleState`] and every write to the consensus
//! document. Per tick the scheduler drains control commands, polls the marker
//! files, runs at most one cycle, then waits on the command channel for the
//! configured interval.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, info_span, warn};

use crate::control::{Command, CommandQueue, MarkerBridge};
use crate::core::breaker::{
    BreakerVerdict, CircuitBreaker, begin_cycle, finish_cooldown, record_failure, record_success,
};
use crate::core::classifier::OutcomeClassifier;
use crate::core::types::{CycleOutcome, CycleState, CycleStatus, Invocation};
use crate::io::config::LoopConfig;
use crate::io::consensus::ConsensusStore;
use crate::io::cycle_log::{CycleLogRecord, LogRotator, write_cycle_log};
use crate::io::engine::EngineLocator;
use crate::io::fs_util::{read_optional, remove_if_exists};
use crate::io::ideas::IdeaQueue;
use crate::io::init::ProjectPaths;
use crate::io::markers::{Markers, StartTrigger};
use crate::io::process::{ProcessError, ProcessRequest, ProcessRunner};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::state_store::StateStore;
use crate::notify::{CycleEvent, Notifier};

pub const PAUSED_LABEL: &str = "Paused";
pub const STOPPED_LABEL: &str = "Stopped";

/// Blocking waits for the breaker cooldown and the rate-limit backoff.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Configuration and layout resolved once before the loop starts.
#[derive(Debug, Clone)]
pub struct LoopContext {
    pub paths: ProjectPaths,
    pub config: LoopConfig,
}

impl LoopContext {
    pub fn new(paths: ProjectPaths, config: LoopConfig) -> Self {
        Self { paths, config }
    }
}

/// Collaborators the scheduler calls out to.
#[derive(Clone, Copy)]
pub struct LoopServices<'a> {
    pub locator: &'a dyn EngineLocator,
    pub runner: &'a dyn ProcessRunner,
    pub classifier: &'a dyn OutcomeClassifier,
    pub notifier: &'a dyn Notifier,
    pub sleeper: &'a dyn Sleeper,
}

/// What a single cycle produced, returned for callers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcome: CycleOutcome,
    pub breaker: Option<BreakerVerdict>,
    pub log_path: Option<PathBuf>,
}

pub struct CycleScheduler<'a> {
    ctx: &'a LoopContext,
    services: LoopServices<'a>,
    engine_path: PathBuf,
    breaker: CircuitBreaker,
    consensus: ConsensusStore,
    rotator: LogRotator,
    state_store: StateStore,
    markers: Markers,
    bridge: MarkerBridge,
    ideas: IdeaQueue,
    prompts: PromptBuilder,
    state: CycleState,
    stop_requested: bool,
    pending_start: Option<StartTrigger>,
}

impl<'a> CycleScheduler<'a> {
    /// Resolve the engine and restore counters from the last snapshot.
    ///
    /// An unresolvable engine is fatal and surfaces as
    /// [`EngineNotFound`](crate::io::engine::EngineNotFound).
    pub fn start(ctx: &'a LoopContext, services: LoopServices<'a>) -> Result<Self> {
        let config = &ctx.config;
        let paths = &ctx.paths;
        let engine_path = services.locator.resolve(&config.engine)?;
        info!(engine = %config.engine, path = %engine_path.display(), "engine resolved");
        paths.ensure_dirs()?;

        let markers = Markers::new(paths);
        let mut scheduler = Self {
            ctx,
            services,
            engine_path,
            breaker: CircuitBreaker::new(config.max_errors),
            consensus: ConsensusStore::new(&paths.consensus_path, &paths.consensus_backup_path),
            rotator: LogRotator::new(&paths.logs_dir, config.max_logs),
            state_store: StateStore::new(&paths.state_path),
            bridge: MarkerBridge::new(markers.clone()),
            markers,
            ideas: IdeaQueue::new(paths),
            prompts: PromptBuilder::new(),
            state: CycleState::new(&config.engine, config.model.as_deref()),
            stop_requested: false,
            pending_start: None,
        };
        scheduler.restore_counters();
        Ok(scheduler)
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    /// Carry `loopCount` and `errorCount` over from the previous process.
    ///
    /// Log sequence numbers are also considered so a lost snapshot never makes
    /// cycle numbers (and log names) go backwards.
    fn restore_counters(&mut self) {
        match self.state_store.load() {
            Ok(Some(previous)) => {
                self.state.loop_count = previous.loop_count;
                self.state.error_count = previous.error_count;
            }
            Ok(None) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "ignoring unreadable state snapshot"),
        }
        match self.rotator.latest_seq() {
            Ok(Some(seq)) => self.state.loop_count = self.state.loop_count.max(seq),
            Ok(None) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "failed to scan cycle logs"),
        }
        if self.state.loop_count > 0 {
            info!(
                loop_count = self.state.loop_count,
                error_count = self.state.error_count,
                "restored counters"
            );
        }
    }

    /// Run until a stop request is observed between cycles.
    pub fn run(&mut self, commands: &CommandQueue) -> Result<CycleState> {
        info!(
            interval_secs = self.ctx.config.interval_secs,
            max_errors = self.breaker.max_errors(),
            "loop started"
        );
        self.persist();

        loop {
            for command in commands.drain() {
                self.apply(command);
            }
            match self.bridge.poll() {
                Ok(observed) => {
                    for command in observed {
                        self.apply(command);
                    }
                }
                Err(err) => warn!(err = %format!("{err:#}"), "failed to poll marker files"),
            }
            if self.stop_requested {
                break;
            }

            let trigger = self.pending_start.take();
            if trigger.is_none() && self.markers.is_paused() {
                if self.state.current_label != PAUSED_LABEL {
                    info!("paused; waiting for resume or a start trigger");
                    self.state.current_label = PAUSED_LABEL.to_string();
                    self.persist();
                }
            } else {
                let idea = self.idea_for(trigger.as_ref());
                self.run_cycle(idea);
            }

            self.wait_between_cycles(commands);
        }

        self.state.status = CycleStatus::Stopped;
        self.state.current_label = STOPPED_LABEL.to_string();
        self.persist();
        info!(loop_count = self.state.loop_count, "loop stopped");
        Ok(self.state.clone())
    }

    /// Run a single cycle outside the loop, honouring a pending start trigger.
    pub fn run_once(&mut self) -> CycleReport {
        let trigger = match self.markers.take_start() {
            Ok(trigger) => trigger,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to read start trigger");
                None
            }
        };
        let idea = self.idea_for(trigger.as_ref());
        self.run_cycle(idea)
    }

    /// Wait out the interval, returning early for stop and start commands.
    fn wait_between_cycles(&mut self, commands: &CommandQueue) {
        let deadline = Instant::now() + self.ctx.config.interval();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            let Some(command) = commands.wait(remaining) else {
                return;
            };
            let urgent = command.is_urgent();
            self.apply(command);
            if urgent {
                return;
            }
        }
    }

    fn apply(&mut self, command: Command) {
        debug!(?command, "control command");
        let result = match command {
            Command::Stop => {
                info!("stop requested");
                self.stop_requested = true;
                Ok(())
            }
            Command::Pause => self.markers.pause(),
            Command::Resume => self.markers.resume().map(|_| ()),
            Command::Start(trigger) => {
                self.pending_start = Some(trigger);
                Ok(())
            }
            Command::SubmitIdea {
                text,
                priority,
                start_now,
            } => self.ideas.submit(&text, priority, start_now).map(|_| ()),
            Command::ApproveIdea(id) => self.ideas.approve(&id).map(|_| ()),
            Command::RejectIdea(id) => self.ideas.reject(&id).map(|_| ()),
            Command::SetPriority { id, priority } => {
                self.ideas.set_priority(&id, priority).map(|_| ())
            }
        };
        if let Err(err) = result {
            warn!(err = %format!("{err:#}"), "control command failed");
        }
    }

    /// Idea text for the next prompt: the triggering idea, else the current one.
    fn idea_for(&self, trigger: Option<&StartTrigger>) -> Option<String> {
        if let Some(StartTrigger::Idea(id)) = trigger {
            match self.ideas.get(id) {
                Ok(item) => return Some(item.text),
                Err(err) => warn!(id = %id, err = %format!("{err:#}"), "start trigger names unknown idea"),
            }
        }
        match self.ideas.current_idea() {
            Ok(idea) => idea,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to read current idea");
                None
            }
        }
    }

    /// Run one cycle. Never fails: every error becomes a counter update.
    pub fn run_cycle(&mut self, idea: Option<String>) -> CycleReport {
        let started_at = Utc::now();
        let cycle = begin_cycle(&mut self.state, started_at);
        self.state.status = CycleStatus::Running;
        let span = info_span!("cycle", cycle);
        let _enter = span.enter();
        info!("cycle started");
        self.services
            .notifier
            .notify(&CycleEvent::CycleStart { cycle_num: cycle });
        self.persist();

        let capture_path = self
            .ctx
            .paths
            .logs_dir
            .join(format!(".cycle-output-{cycle}.txt"));
        let attempt = match self.build_prompt(cycle, idea) {
            Ok(prompt) => {
                if let Err(err) = self.consensus.commit() {
                    warn!(err = %format!("{err:#}"), "failed to commit consensus before cycle");
                }
                self.invoke(prompt, &capture_path)
            }
            Err(err) => Attempt::not_started(format!("{err:#}")),
        };
        let last_message = self.take_capture(&capture_path);
        let outcome = self.services.classifier.classify(&attempt.invocation);
        let duration_ms = attempt.invocation.duration_ms();

        let log_path = self.write_log(
            cycle,
            started_at,
            &outcome,
            &attempt,
            last_message.as_deref(),
        );

        let breaker = match &outcome {
            CycleOutcome::Success => {
                self.on_success(cycle, duration_ms);
                None
            }
            failure => Some(self.on_failure(cycle, failure)),
        };

        match self.rotator.enforce() {
            Ok(removed) if removed > 0 => debug!(removed, "old cycle logs removed"),
            Ok(_) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "log rotation failed"),
        }
        self.persist();

        CycleReport {
            cycle,
            outcome,
            breaker,
            log_path,
        }
    }

    fn build_prompt(&self, cycle: u64, idea: Option<String>) -> Result<String> {
        let inputs = PromptInputs {
            base: PromptInputs::load_base(&self.ctx.paths.prompt_path)?,
            consensus: self
                .consensus
                .read_for_prompt()
                .context("read consensus")?,
            idea,
            cycle,
        };
        self.prompts.render(&inputs)
    }

    fn engine_args(&self, prompt: String, capture_path: &std::path::Path) -> Vec<String> {
        let config = &self.ctx.config;
        let mut args = vec![
            "exec".to_string(),
            "-c".to_string(),
            format!("sandbox_mode=\"{}\"", config.sandbox_mode),
        ];
        if let Some(model) = config.model.as_deref().filter(|m| !m.is_empty()) {
            args.push("-m".to_string());
            args.push(model.to_string());
        }
        args.push("-o".to_string());
        args.push(capture_path.display().to_string());
        args.push(prompt);
        args
    }

    fn invoke(&self, prompt: String, capture_path: &std::path::Path) -> Attempt {
        let config = &self.ctx.config;
        let request = ProcessRequest {
            program: self.engine_path.clone(),
            args: self.engine_args(prompt, capture_path),
            workdir: self.ctx.paths.root.clone(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        };
        info!("executing agent");
        match self.services.runner.run(&request) {
            Ok(output) => {
                let notice = output.truncated_notice();
                Attempt {
                    invocation: Invocation::Exited {
                        exit_code: output.exit_code,
                        stdout: output.stdout,
                        stderr: output.stderr,
                        duration_ms: output.duration_ms,
                    },
                    partial_output: None,
                    notes: (!notice.trim().is_empty()).then(|| notice.trim().to_string()),
                }
            }
            Err(ProcessError::Timeout {
                timeout,
                stdout,
                stderr,
            }) => Attempt {
                invocation: Invocation::TimedOut {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
                partial_output: Some((stdout, stderr)),
                notes: Some(format!(
                    "agent killed after {}s timeout",
                    timeout.as_secs()
                )),
            },
            Err(err) => Attempt::not_started(err.to_string()),
        }
    }

    /// Read and remove the agent's last-message capture file.
    fn take_capture(&self, capture_path: &std::path::Path) -> Option<String> {
        let message = match read_optional(capture_path) {
            Ok(message) => message,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to read agent capture file");
                None
            }
        };
        if let Err(err) = remove_if_exists(capture_path) {
            warn!(err = %format!("{err:#}"), "failed to remove agent capture file");
        }
        message
    }

    fn write_log(
        &self,
        cycle: u64,
        started_at: chrono::DateTime<Utc>,
        outcome: &CycleOutcome,
        attempt: &Attempt,
        last_message: Option<&str>,
    ) -> Option<PathBuf> {
        let (stdout, stderr) = match (&attempt.invocation, &attempt.partial_output) {
            (Invocation::Exited { stdout, stderr, .. }, _) => (stdout.as_str(), stderr.as_str()),
            (_, Some((stdout, stderr))) => (stdout.as_str(), stderr.as_str()),
            _ => ("", ""),
        };
        let outcome_label = match outcome {
            CycleOutcome::Success => "success".to_string(),
            failure => format!("failure: {}", failure.describe()),
        };
        let record = CycleLogRecord {
            cycle,
            started_at,
            outcome: &outcome_label,
            duration_ms: attempt.invocation.duration_ms(),
            stdout,
            stderr,
            last_message,
            notes: attempt.notes.as_deref(),
        };
        match write_cycle_log(&self.ctx.paths.logs_dir, &record) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to write cycle log");
                None
            }
        }
    }

    fn on_success(&mut self, cycle: u64, duration_ms: u64) {
        if let Err(err) = self.consensus.commit() {
            warn!(err = %format!("{err:#}"), "failed to commit consensus after success");
        }
        record_success(&mut self.state);
        info!(duration_ms, "cycle succeeded");
        self.services.notifier.notify(&CycleEvent::CycleEnd {
            cycle_num: cycle,
            status: "success".to_string(),
            duration: duration_ms,
        });
    }

    fn on_failure(&mut self, cycle: u64, outcome: &CycleOutcome) -> BreakerVerdict {
        if let Err(err) = self.consensus.restore() {
            warn!(err = %format!("{err:#}"), "failed to restore consensus");
        }
        let verdict = record_failure(&mut self.state, &self.breaker);
        let reason = outcome.describe();
        error!(
            reason = %reason,
            error_count = self.state.error_count,
            consecutive_errors = self.state.consecutive_errors,
            "cycle failed"
        );
        self.services.notifier.notify(&CycleEvent::CycleError {
            cycle_num: cycle,
            error: reason,
            error_count: self.state.error_count,
        });

        match verdict {
            BreakerVerdict::Tripped => {
                let cooldown = self.ctx.config.cooldown();
                error!(
                    consecutive_errors = self.state.consecutive_errors,
                    cooldown_secs = cooldown.as_secs(),
                    "circuit breaker tripped; cooling down"
                );
                self.persist();
                self.services.notifier.notify(&CycleEvent::CircuitBreaker {
                    consecutive_errors: self.state.consecutive_errors,
                });
                self.services.sleeper.sleep(cooldown);
                finish_cooldown(&mut self.state);
            }
            BreakerVerdict::Armed => {
                if let CycleOutcome::SoftFailure { marker } = outcome {
                    let wait = self.ctx.config.limit_wait();
                    warn!(marker = %marker, wait_secs = wait.as_secs(), "usage limit; backing off");
                    self.persist();
                    self.services.sleeper.sleep(wait);
                }
            }
        }
        verdict
    }

    fn persist(&self) {
        if let Err(err) = self.state_store.write(&self.state) {
            warn!(err = %format!("{err:#}"), "failed to persist state snapshot");
        }
    }
}

/// Invocation plus what the cycle log needs beyond it.
struct Attempt {
    invocation: Invocation,
    /// Output printed before a timeout kill.
    partial_output: Option<(String, String)>,
    notes: Option<String>,
}

impl Attempt {
    fn not_started(reason: String) -> Self {
        Self {
            notes: Some(reason.clone()),
            invocation: Invocation::NotStarted { reason },
            partial_output: None,
        }
    }
}
