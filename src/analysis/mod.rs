//! Test stability analysis: aggregation, classification, quarantine candidates.

pub mod aggregator;
pub mod engine;

pub use self::engine::StabilityAnalyzer;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::quarantine::{QuarantineEntry, QuarantineError};

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Quarantine(#[from] QuarantineError),
}

/// Classification of a single test over the stability window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stability {
    Stable,
    Flaky,
    Failing,
    InsufficientData,
}

impl Stability {
    /// Evaluated top-down: no data, then zero failures, then below threshold.
    pub fn classify(record: &TestStabilityRecord, instability_threshold: f64) -> Self {
        if record.total_runs == 0 {
            Stability::InsufficientData
        } else if record.failures == 0 {
            Stability::Stable
        } else if record.failure_rate < instability_threshold {
            Stability::Flaky
        } else {
            Stability::Failing
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stability::Stable => "stable",
            Stability::Flaky => "flaky",
            Stability::Failing => "failing",
            Stability::InsufficientData => "insufficient-data",
        };
        f.write_str(s)
    }
}

/// Pass/fail/skip counts for one test. Skips are not part of `total_runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestStabilityRecord {
    pub test_identifier: String,
    pub total_runs: u64,
    pub passes: u64,
    pub failures: u64,
    pub skips: u64,
    pub failure_rate: f64,
}

impl TestStabilityRecord {
    pub fn from_counts(test_identifier: &str, passes: u64, failures: u64, skips: u64) -> Self {
        let total_runs = passes + failures;
        let failure_rate = if total_runs == 0 {
            0.0
        } else {
            failures as f64 / total_runs as f64
        };
        Self {
            test_identifier: test_identifier.to_string(),
            total_runs,
            passes,
            failures,
            skips,
            failure_rate,
        }
    }
}

/// Outcome of one analysis pass.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub analysis_id: uuid::Uuid,
    pub generated_at: DateTime<Utc>,
    pub instability_threshold: f64,
    pub window_runs: usize,
    /// Distinct CI runs inside the window.
    pub runs_considered: usize,
    pub stable: Vec<TestStabilityRecord>,
    /// Highest failure rate first.
    pub flaky: Vec<TestStabilityRecord>,
    /// Highest failure rate first.
    pub failing: Vec<TestStabilityRecord>,
    pub insufficient_data: Vec<TestStabilityRecord>,
    pub newly_quarantined: Vec<QuarantineEntry>,
    /// Analyzed tests that were quarantined before this pass.
    pub already_quarantined: Vec<String>,
}

impl AnalysisResult {
    pub fn empty(instability_threshold: f64, window_runs: usize, now: DateTime<Utc>) -> Self {
        Self {
            analysis_id: uuid::Uuid::new_v4(),
            generated_at: now,
            instability_threshold,
            window_runs,
            runs_considered: 0,
            stable: Vec::new(),
            flaky: Vec::new(),
            failing: Vec::new(),
            insufficient_data: Vec::new(),
            newly_quarantined: Vec::new(),
            already_quarantined: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stable.is_empty()
            && self.flaky.is_empty()
            && self.failing.is_empty()
            && self.insufficient_data.is_empty()
    }

    /// Every analyzed test with its classification, in report order.
    pub fn classified(&self) -> impl Iterator<Item = (Stability, &TestStabilityRecord)> {
        self.failing
            .iter()
            .map(|r| (Stability::Failing, r))
            .chain(self.flaky.iter().map(|r| (Stability::Flaky, r)))
            .chain(self.stable.iter().map(|r| (Stability::Stable, r)))
            .chain(
                self.insufficient_data
                    .iter()
                    .map(|r| (Stability::InsufficientData, r)),
            )
    }

    pub fn is_already_quarantined(&self, test_identifier: &str) -> bool {
        self.already_quarantined.iter().any(|t| t == test_identifier)
    }
}
