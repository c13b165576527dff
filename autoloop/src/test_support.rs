//! Scripted fakes and a throwaway project layout for scheduler tests.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use crate::control::{Command, CommandSender};
use crate::core::types::CycleState;
use crate::io::config::LoopConfig;
use crate::io::engine::{EngineLocator, EngineNotFound};
use crate::io::init::{InitOptions, ProjectPaths, init_project};
use crate::io::process::{ProcessError, ProcessOutput, ProcessRequest, ProcessRunner};
use crate::io::state_store::StateStore;
use crate::notify::{CycleEvent, Notifier};
use crate::scheduler::{LoopContext, Sleeper};

/// What a scripted agent run returns.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Exit {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    Timeout,
    SpawnError,
}

/// One scripted agent run, optionally with the side effects a real agent has.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub response: ScriptedResponse,
    /// Written to `memories/consensus.md` before returning.
    pub consensus: Option<String>,
    /// Written to the `-o` capture file before returning.
    pub last_message: Option<String>,
}

impl ScriptedRun {
    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            response: ScriptedResponse::Exit {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
            consensus: None,
            last_message: None,
        }
    }

    pub fn success() -> Self {
        Self::exit(0, "shipped the landing page", "")
    }

    /// Nonzero exit with no output: an ordinary failure.
    pub fn failure() -> Self {
        Self::exit(1, "", "boom")
    }

    /// Exit carrying a rate-limit marker: a soft failure.
    pub fn rate_limited() -> Self {
        Self::exit(1, "", "Error: Rate limit reached for requests")
    }

    pub fn timeout() -> Self {
        Self {
            response: ScriptedResponse::Timeout,
            consensus: None,
            last_message: None,
        }
    }

    pub fn spawn_error() -> Self {
        Self {
            response: ScriptedResponse::SpawnError,
            consensus: None,
            last_message: None,
        }
    }

    pub fn writes_consensus(mut self, text: &str) -> Self {
        self.consensus = Some(text.to_string());
        self
    }

    pub fn writes_last_message(mut self, text: &str) -> Self {
        self.last_message = Some(text.to_string());
        self
    }
}

/// Replays [`ScriptedRun`]s in order and records every request.
///
/// With [`stop_when_exhausted`](Self::stop_when_exhausted), a `Stop` command is
/// queued as soon as the last scripted run has been handed out.
#[derive(Debug)]
pub struct ScriptedProcessRunner {
    runs: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<ProcessRequest>>,
    stop: Option<CommandSender>,
}

impl ScriptedProcessRunner {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            requests: Mutex::new(Vec::new()),
            stop: None,
        }
    }

    pub fn stop_when_exhausted(mut self, sender: CommandSender) -> Self {
        self.stop = Some(sender);
        self
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn apply_side_effects(run: &ScriptedRun, request: &ProcessRequest) {
        if let Some(consensus) = &run.consensus {
            let path = ProjectPaths::new(&request.workdir).consensus_path;
            fs::write(&path, consensus).expect("scripted consensus write");
        }
        if let Some(message) = &run.last_message {
            let capture = request
                .args
                .iter()
                .position(|arg| arg == "-o")
                .and_then(|idx| request.args.get(idx + 1))
                .expect("capture path argument");
            fs::write(capture, message).expect("scripted capture write");
        }
    }
}

impl ProcessRunner for ScriptedProcessRunner {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, ProcessError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let (next, exhausted) = {
            let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
            let next = runs.pop_front();
            (next, runs.is_empty())
        };
        if exhausted && let Some(stop) = &self.stop {
            let _ = stop.try_send(Command::Stop);
        }
        let Some(run) = next else {
            return Err(ProcessError::Io {
                message: "scripted runner exhausted".to_string(),
            });
        };
        Self::apply_side_effects(&run, request);
        match run.response {
            ScriptedResponse::Exit {
                code,
                stdout,
                stderr,
            } => Ok(ProcessOutput {
                exit_code: code,
                stdout,
                stderr,
                stdout_truncated: 0,
                stderr_truncated: 0,
                duration_ms: 5,
            }),
            ScriptedResponse::Timeout => Err(ProcessError::Timeout {
                timeout: request.timeout,
                stdout: "partial".to_string(),
                stderr: String::new(),
            }),
            ScriptedResponse::SpawnError => Err(ProcessError::Spawn {
                program: request.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            }),
        }
    }
}

/// Resolves every engine id to a fixed path, or to nothing.
#[derive(Debug, Clone)]
pub struct FixedEngineLocator {
    path: Option<PathBuf>,
}

impl FixedEngineLocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn missing() -> Self {
        Self { path: None }
    }
}

impl EngineLocator for FixedEngineLocator {
    fn resolve(&self, engine_id: &str) -> Result<PathBuf, EngineNotFound> {
        self.path.clone().ok_or_else(|| EngineNotFound {
            engine: engine_id.to_string(),
        })
    }
}

/// Records requested sleeps instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<CycleEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<CycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(CycleEvent::kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &CycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// An initialized project in a temp dir with a `PROMPT.md` in place.
pub struct TestProject {
    temp: TempDir,
    pub paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Self {
        Self::try_new().expect("test project")
    }

    fn try_new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_project(temp.path(), &InitOptions::default())?;
        fs::write(&paths.prompt_path, "Run the company.\n")?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Loop context with no inter-cycle wait and a small breaker threshold.
    pub fn context(&self) -> LoopContext {
        let config = LoopConfig {
            interval_secs: 0,
            max_errors: 3,
            timeout_secs: 5,
            ..LoopConfig::default()
        };
        LoopContext::new(self.paths.clone(), config)
    }

    pub fn write_consensus(&self, text: &str) {
        fs::write(&self.paths.consensus_path, text).expect("write consensus");
    }

    pub fn consensus(&self) -> Option<String> {
        fs::read_to_string(&self.paths.consensus_path).ok()
    }

    pub fn state(&self) -> Option<CycleState> {
        StateStore::new(&self.paths.state_path)
            .load()
            .expect("load state")
    }

    pub fn cycle_logs(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.paths.logs_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                    .filter(|name| name.starts_with("cycle-"))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
