//! Loop configuration stored in `autoloop.toml` at the project root.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Loop configuration (TOML).
///
/// Meant to be edited by humans. Missing fields fall back to defaults, and the
/// environment variables listed on [`LoopConfig::apply_env`] override the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Engine id passed to the engine locator (`codex`, `claude`, ...).
    pub engine: String,

    /// Optional model override passed as `-m`.
    pub model: Option<String>,

    pub sandbox_mode: String,

    /// Explicit engine binary, bypassing the `PATH` search.
    pub engine_bin: Option<PathBuf>,

    /// Seconds to wait between cycles.
    pub interval_secs: u64,

    /// Per-cycle wall-clock deadline in seconds; the agent is killed on expiry.
    pub timeout_secs: u64,

    /// Circuit-breaker cooldown in seconds.
    pub cooldown_secs: u64,

    /// Extra wait after a rate/quota limit, in seconds.
    pub limit_wait_secs: u64,

    /// Consecutive failed cycles before the breaker trips.
    pub max_errors: u32,

    /// Number of cycle logs retained in `logs/`.
    pub max_logs: usize,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Case-insensitive phrases that classify a cycle as rate limited.
    pub limit_markers: Vec<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            engine: "codex".to_string(),
            model: None,
            sandbox_mode: "danger-full-access".to_string(),
            engine_bin: None,
            interval_secs: 30,
            timeout_secs: 30 * 60,
            cooldown_secs: 5 * 60,
            limit_wait_secs: 60 * 60,
            max_errors: 5,
            max_logs: 200,
            output_limit_bytes: 1_000_000,
            limit_markers: crate::core::classifier::DEFAULT_LIMIT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine.trim().is_empty() {
            return Err(anyhow!("engine must be non-empty"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.max_errors == 0 {
            return Err(anyhow!("max_errors must be > 0"));
        }
        if self.max_logs == 0 {
            return Err(anyhow!("max_logs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn limit_wait(&self) -> Duration {
        Duration::from_secs(self.limit_wait_secs)
    }

    /// Apply overrides from environment variables.
    ///
    /// Recognized: `ENGINE`, `MODEL`, `SANDBOX_MODE`, `INTERVAL`, `TIMEOUT`,
    /// `COOLDOWN`, `LIMIT_WAIT`, `MAX_ERRORS`, `MAX_LOGS`, `CODEX_BIN`, `CLAUDE_BIN`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(engine) = get("ENGINE") {
            self.engine = engine;
        }
        if let Some(model) = get("MODEL") {
            self.model = Some(model);
        }
        if let Some(mode) = get("SANDBOX_MODE") {
            self.sandbox_mode = mode;
        }
        if let Some(bin) = get("CODEX_BIN").or_else(|| get("CLAUDE_BIN")) {
            self.engine_bin = Some(PathBuf::from(bin));
        }
        if let Some(value) = get("INTERVAL") {
            self.interval_secs = parse_env("INTERVAL", &value)?;
        }
        if let Some(value) = get("TIMEOUT") {
            self.timeout_secs = parse_env("TIMEOUT", &value)?;
        }
        if let Some(value) = get("COOLDOWN") {
            self.cooldown_secs = parse_env("COOLDOWN", &value)?;
        }
        if let Some(value) = get("LIMIT_WAIT") {
            self.limit_wait_secs = parse_env("LIMIT_WAIT", &value)?;
        }
        if let Some(value) = get("MAX_ERRORS") {
            self.max_errors = parse_env("MAX_ERRORS", &value)?;
        }
        if let Some(value) = get("MAX_LOGS") {
            self.max_logs = parse_env("MAX_LOGS", &value)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| anyhow!("invalid {key}={value}: {err}"))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from disk, then apply environment overrides.
pub fn load_effective_config(path: &Path) -> Result<LoopConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env()?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::fs_util::write_atomic(path, &buf)
}
