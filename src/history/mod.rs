//! Append-only history log of per-test CI outcomes.
//!
//! The log is a JSON-lines file: one `TestRunRecord` per line. It is written
//! by `flakeguard record` after each CI run and read back in full by
//! `flakeguard analyze`.

pub mod window;

pub use self::window::select_window;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Outcome of a single test in a single CI run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[serde(alias = "passed")]
    Pass,
    #[serde(alias = "failed")]
    Fail,
    #[serde(alias = "skipped")]
    Skip,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => write!(f, "pass"),
            Outcome::Fail => write!(f, "fail"),
            Outcome::Skip => write!(f, "skip"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pass" | "passed" => Ok(Outcome::Pass),
            "fail" | "failed" => Ok(Outcome::Fail),
            "skip" | "skipped" => Ok(Outcome::Skip),
            other => anyhow::bail!("unknown test outcome '{}' (expected pass, fail or skip)", other),
        }
    }
}

/// One recorded outcome. Immutable once written to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunRecord {
    pub test_identifier: String,
    pub run_id: u64,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
}

impl TestRunRecord {
    pub fn new(
        test_identifier: impl Into<String>,
        run_id: u64,
        timestamp: DateTime<Utc>,
        outcome: Outcome,
    ) -> Self {
        Self {
            test_identifier: test_identifier.into(),
            run_id,
            timestamp,
            outcome,
        }
    }
}

/// One test's outcome as reported by a CI run, before it is stamped with a run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub test_identifier: String,
    pub outcome: Outcome,
}

/// Stamp a run's results with its id and time.
pub fn records_for_run(
    run_id: u64,
    timestamp: DateTime<Utc>,
    results: Vec<RunResult>,
) -> Vec<TestRunRecord> {
    results
        .into_iter()
        .map(|r| TestRunRecord::new(r.test_identifier, run_id, timestamp, r.outcome))
        .collect()
}

/// Records read from a history log, plus how many lines were unusable.
#[derive(Debug, Default)]
pub struct HistoryLoad {
    pub records: Vec<TestRunRecord>,
    pub skipped: usize,
}

/// Handle on a JSON-lines history file.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record in the log.
    ///
    /// A missing file is an empty history. Lines that fail to parse are
    /// skipped with a warning naming the line; partial data is still a usable
    /// stability signal.
    pub fn load(&self) -> Result<HistoryLoad> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "history log not found, starting empty");
            return Ok(HistoryLoad::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read history log: {}", self.path.display()))?;

        Ok(parse_lines(&content, &self.path))
    }

    /// Append records to the end of the log, creating it if needed.
    pub fn append(&self, records: &[TestRunRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create history directory: {}", parent.display())
                })?;
            }
        }

        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open history log: {}", self.path.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("failed to append to history log: {}", self.path.display()))?;

        debug!(path = %self.path.display(), count = records.len(), "appended history records");
        Ok(())
    }
}

fn parse_lines(content: &str, path: &Path) -> HistoryLoad {
    let mut load = HistoryLoad::default();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TestRunRecord>(line) {
            Ok(record) => load.records.push(record),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping malformed history record"
                );
                load.skipped += 1;
            }
        }
    }

    load
}
