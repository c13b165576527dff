//! Per-cycle log files in `logs/` and their retention.
//!
//! Names are `cycle-<seq>-<timestamp>.log` with a zero-padded sequence number,
//! so lexicographic order is chronological order.

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

static CYCLE_LOG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^cycle-(\d+)-.*\.log$").expect("cycle log pattern is valid"));

/// File name for cycle `seq` started at `at`.
pub fn cycle_log_name(seq: u64, at: DateTime<Utc>) -> String {
    format!("cycle-{seq:04}-{}.log", at.format("%Y-%m-%dT%H-%M-%S"))
}

/// Sequence number encoded in a cycle log name.
pub fn parse_cycle_seq(name: &str) -> Option<u64> {
    CYCLE_LOG_RE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|seq| seq.as_str().parse().ok())
}

fn is_cycle_log(name: &str) -> bool {
    name.starts_with("cycle-") && name.ends_with(".log")
}

/// Everything written to one cycle log.
#[derive(Debug, Clone)]
pub struct CycleLogRecord<'a> {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub outcome: &'a str,
    pub duration_ms: u64,
    pub stdout: &'a str,
    pub stderr: &'a str,
    /// The agent's final message, when it wrote one to the capture file.
    pub last_message: Option<&'a str>,
    /// Runner-side notes (truncation, timeout, spawn failure).
    pub notes: Option<&'a str>,
}

/// Write the log for one cycle and return its path.
pub fn write_cycle_log(dir: &Path, record: &CycleLogRecord<'_>) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
    let path = dir.join(cycle_log_name(record.cycle, record.started_at));

    let mut buf = format!(
        "cycle: {}\nstarted_at: {}\noutcome: {}\nduration_ms: {}\n",
        record.cycle,
        record.started_at.to_rfc3339(),
        record.outcome,
        record.duration_ms
    );
    buf.push_str("\n=== stdout ===\n");
    buf.push_str(record.stdout);
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(record.stderr);
    if let Some(message) = record.last_message {
        buf.push_str("\n=== last message ===\n");
        buf.push_str(message);
    }
    if let Some(notes) = record.notes {
        buf.push_str("\n=== runner ===\n");
        buf.push_str(notes);
    }
    buf.push('\n');

    fs::write(&path, buf).with_context(|| format!("write cycle log {}", path.display()))?;
    Ok(path)
}

/// A retained cycle log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleLogEntry {
    pub name: String,
    pub seq: Option<u64>,
    pub size: u64,
}

/// Keeps at most `max_logs` cycle logs in `dir`.
#[derive(Debug, Clone)]
pub struct LogRotator {
    dir: PathBuf,
    max_logs: usize,
}

impl LogRotator {
    pub fn new(dir: impl Into<PathBuf>, max_logs: usize) -> Self {
        Self {
            dir: dir.into(),
            max_logs,
        }
    }

    /// Cycle log names, oldest first.
    fn sorted_names(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?
        {
            let entry = entry.with_context(|| format!("read {}", self.dir.display()))?;
            if let Some(name) = entry.file_name().to_str()
                && is_cycle_log(name)
            {
                names.push(name.to_string());
            }
        }
        // Sequence first keeps the order right past 9999 cycles.
        names.sort_by(|a, b| {
            (parse_cycle_seq(a), a.as_str()).cmp(&(parse_cycle_seq(b), b.as_str()))
        });
        Ok(names)
    }

    /// Delete the oldest logs beyond the retention limit.
    ///
    /// Deletion is best-effort: failures are logged and skipped. Returns the
    /// number of files actually removed.
    pub fn enforce(&self) -> Result<usize> {
        let names = self.sorted_names()?;
        if names.len() <= self.max_logs {
            return Ok(0);
        }
        let excess = names.len() - self.max_logs;
        let mut removed = 0;
        for name in &names[..excess] {
            let path = self.dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %path.display(), err = %err, "failed to delete cycle log"),
            }
        }
        debug!(removed, kept = names.len() - removed, "rotated cycle logs");
        Ok(removed)
    }

    /// Retained cycle logs, newest first.
    pub fn list(&self) -> Result<Vec<CycleLogEntry>> {
        let mut entries = Vec::new();
        for name in self.sorted_names()? {
            let size = fs::metadata(self.dir.join(&name))
                .map(|meta| meta.len())
                .unwrap_or(0);
            entries.push(CycleLogEntry {
                seq: parse_cycle_seq(&name),
                name,
                size,
            });
        }
        entries.sort_by_key(|entry| Reverse((entry.seq, entry.name.clone())));
        Ok(entries)
    }

    /// Highest sequence number on disk, if any.
    pub fn latest_seq(&self) -> Result<Option<u64>> {
        Ok(self
            .sorted_names()?
            .iter()
            .filter_map(|name| parse_cycle_seq(name))
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600 + secs, 0)
            .single()
            .expect("timestamp")
    }

    fn touch_logs(dir: &Path, count: u64) {
        for seq in 1..=count {
            fs::write(dir.join(cycle_log_name(seq, at(seq as i64))), "log").expect("write");
        }
    }

    fn remaining(dir: &Path) -> Vec<u64> {
        let mut seqs: Vec<u64> = fs::read_dir(dir)
            .expect("read dir")
            .filter_map(|e| parse_cycle_seq(e.expect("entry").file_name().to_str()?))
            .collect();
        seqs.sort_unstable();
        seqs
    }

    #[test]
    fn names_are_zero_padded_and_sortable() {
        assert_eq!(cycle_log_name(7, at(0)), "cycle-0007-2026-01-01T00-00-00.log");
        assert_eq!(parse_cycle_seq("cycle-0007-2026-01-01T00-00-00.log"), Some(7));
        assert_eq!(parse_cycle_seq("auto-company.log"), None);
    }

    #[test]
    fn keeps_only_most_recent_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch_logs(temp.path(), 5);
        fs::write(temp.path().join("auto-company.log"), "main").expect("write");

        let removed = LogRotator::new(temp.path(), 2).enforce().expect("enforce");
        assert_eq!(removed, 3);
        assert_eq!(remaining(temp.path()), vec![4, 5]);
        assert!(temp.path().join("auto-company.log").exists());
    }

    #[test]
    fn under_limit_is_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch_logs(temp.path(), 3);
        let removed = LogRotator::new(temp.path(), 10).enforce().expect("enforce");
        assert_eq!(removed, 0);
        assert_eq!(remaining(temp.path()), vec![1, 2, 3]);
    }

    #[test]
    fn ordering_uses_sequence_past_four_digits() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(cycle_log_name(9999, at(0))), "a").expect("write");
        fs::write(temp.path().join(cycle_log_name(10000, at(1))), "b").expect("write");
        LogRotator::new(temp.path(), 1).enforce().expect("enforce");
        assert_eq!(remaining(temp.path()), vec![10000]);
    }

    #[test]
    fn list_is_newest_first_and_reports_latest() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch_logs(temp.path(), 3);
        let rotator = LogRotator::new(temp.path(), 10);
        let seqs: Vec<Option<u64>> = rotator
            .list()
            .expect("list")
            .into_iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![Some(3), Some(2), Some(1)]);
        assert_eq!(rotator.latest_seq().expect("latest"), Some(3));
    }

    #[test]
    fn write_cycle_log_includes_sections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_cycle_log(
            temp.path(),
            &CycleLogRecord {
                cycle: 12,
                started_at: at(0),
                outcome: "success",
                duration_ms: 40,
                stdout: "did work",
                stderr: "",
                last_message: Some("summary"),
                notes: None,
            },
        )
        .expect("write");
        assert!(path.ends_with("cycle-0012-2026-01-01T00-00-00.log"));
        let contents = fs::read_to_string(path).expect("read");
        assert!(contents.contains("=== stdout ===\ndid work"));
        assert!(contents.contains("=== last message ===\nsummary"));
        assert!(!contents.contains("=== runner ==="));
    }
}
