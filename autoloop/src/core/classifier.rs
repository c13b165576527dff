//! Deterministic classification of agent invocations.

use regex::{Regex, RegexBuilder};

use crate::core::types::{CycleOutcome, Invocation};

/// Phrases that mean the upstream provider refused work for quota reasons.
pub const DEFAULT_LIMIT_MARKERS: &[&str] = &[
    "usage limit",
    "rate limit",
    "too many requests",
    "resource_exhausted",
    "overloaded",
    "quota",
    "429",
    "billing",
    "insufficient credits",
];

/// Stdout shorter than this is treated as "no output" for a nonzero exit.
pub const MIN_MEANINGFUL_OUTPUT_BYTES: usize = 10;

/// Policy that turns a raw invocation into a [`CycleOutcome`].
pub trait OutcomeClassifier {
    fn classify(&self, invocation: &Invocation) -> CycleOutcome;
}

/// Default policy: case-insensitive marker matching plus an exit-code check.
///
/// - Timeouts and spawn failures are ordinary failures.
/// - Any limit marker in stdout or stderr is a soft failure, regardless of exit code.
/// - A nonzero exit with (almost) no stdout is an ordinary failure.
/// - Everything else is a success.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    markers: Option<Regex>,
    min_output_bytes: usize,
}

impl MarkerClassifier {
    pub fn new<S: AsRef<str>>(markers: &[S]) -> Result<Self, regex::Error> {
        let alternation = markers
            .iter()
            .map(|marker| regex::escape(marker.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        // An empty alternation would match everything.
        let markers = if alternation.is_empty() {
            None
        } else {
            Some(RegexBuilder::new(&alternation).case_insensitive(true).build()?)
        };
        Ok(Self {
            markers,
            min_output_bytes: MIN_MEANINGFUL_OUTPUT_BYTES,
        })
    }

    /// First limit marker found in `text`, lowercased.
    pub fn find_marker(&self, text: &str) -> Option<String> {
        self.markers
            .as_ref()?
            .find(text)
            .map(|found| found.as_str().to_lowercase())
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT_MARKERS).expect("default limit markers are valid literals")
    }
}

impl OutcomeClassifier for MarkerClassifier {
    fn classify(&self, invocation: &Invocation) -> CycleOutcome {
        match invocation {
            Invocation::TimedOut { duration_ms } => CycleOutcome::OrdinaryFailure {
                reason: format!("timeout after {duration_ms}ms"),
            },
            Invocation::NotStarted { reason } => CycleOutcome::OrdinaryFailure {
                reason: reason.clone(),
            },
            Invocation::Exited {
                exit_code,
                stdout,
                stderr,
                ..
            } => {
                let marker = self
                    .find_marker(stdout)
                    .or_else(|| self.find_marker(stderr));
                if let Some(marker) = marker {
                    return CycleOutcome::SoftFailure { marker };
                }
                if *exit_code != Some(0) && stdout.len() < self.min_output_bytes {
                    return CycleOutcome::OrdinaryFailure {
                        reason: format!(
                            "cycle validation failed: exit code {} with no output",
                            exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string())
                        ),
                    };
                }
                CycleOutcome::Success
            }
        }
    }
}
