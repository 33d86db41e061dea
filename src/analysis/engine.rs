use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::aggregator::OutcomeAggregator;
use super::{AnalysisResult, AnalyzeError, Stability, TestStabilityRecord};
use crate::config::{AnalysisConfig, ConfigError};
use crate::history::{select_window, TestRunRecord};
use crate::quarantine::{QuarantineEntry, QuarantineSet, QuarantineStore};

/// Classifies tests by recent outcome history and proposes quarantines.
#[derive(Debug, Clone, Copy)]
pub struct StabilityAnalyzer {
    config: AnalysisConfig,
}

impl StabilityAnalyzer {
    /// Fails if the threshold or window would make classification meaningless.
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Classify `runs` against an existing quarantine set. Pure: no I/O.
    ///
    /// Flaky tests missing from `existing` become new entries stamped with
    /// `now`. Tests already in `existing` are never touched, whatever their
    /// current classification.
    pub fn analyze(
        &self,
        runs: &[TestRunRecord],
        existing: &QuarantineSet,
        now: DateTime<Utc>,
    ) -> AnalysisResult {
        let threshold = self.config.instability_threshold;
        let mut result = AnalysisResult::empty(threshold, self.config.window_runs, now);
        if runs.is_empty() {
            return result;
        }

        // 1. Restrict to the stability window
        let windowed = select_window(runs, self.config.window_runs);
        result.runs_considered = windowed.iter().map(|r| r.run_id).collect::<HashSet<_>>().len();

        // 2. Aggregate and classify
        for record in OutcomeAggregator::aggregate(&windowed) {
            if existing.contains(&record.test_identifier) {
                result.already_quarantined.push(record.test_identifier.clone());
            }
            match Stability::classify(&record, threshold) {
                Stability::Stable => result.stable.push(record),
                Stability::Flaky => result.flaky.push(record),
                Stability::Failing => result.failing.push(record),
                Stability::InsufficientData => result.insufficient_data.push(record),
            }
        }

        // 3. Worst first; identifier breaks ties
        sort_by_rate(&mut result.flaky);
        sort_by_rate(&mut result.failing);

        // 4. Quarantine candidates
        result.newly_quarantined = result
            .flaky
            .iter()
            .filter(|r| !existing.contains(&r.test_identifier))
            .map(|r| quarantine_entry(r, now))
            .collect();

        for r in &result.failing {
            if !existing.contains(&r.test_identifier) {
                warn!(
                    test = %r.test_identifier,
                    failure_rate = r.failure_rate,
                    "test is consistently failing; not quarantining"
                );
            }
        }

        result
    }

    /// Full pass against a store: load, analyze, append new entries.
    ///
    /// Empty `runs` returns an empty result without touching the store. The
    /// store is written only when there is at least one new entry, and a
    /// store that cannot be loaded aborts before anything is written.
    pub fn run<S: QuarantineStore>(
        &self,
        store: &mut S,
        runs: &[TestRunRecord],
        now: DateTime<Utc>,
    ) -> Result<AnalysisResult, AnalyzeError> {
        if runs.is_empty() {
            info!("no history records, nothing to analyze");
            return Ok(AnalysisResult::empty(
                self.config.instability_threshold,
                self.config.window_runs,
                now,
            ));
        }

        let existing = store.load()?;
        let result = self.analyze(runs, &existing, now);

        if !result.newly_quarantined.is_empty() {
            store.append_entries(&result.newly_quarantined)?;
        }

        info!(
            stable = result.stable.len(),
            flaky = result.flaky.len(),
            failing = result.failing.len(),
            insufficient_data = result.insufficient_data.len(),
            newly_quarantined = result.newly_quarantined.len(),
            "stability analysis complete"
        );
        Ok(result)
    }
}

fn sort_by_rate(records: &mut [TestStabilityRecord]) {
    records.sort_by(|a, b| {
        b.failure_rate
            .total_cmp(&a.failure_rate)
            .then_with(|| a.test_identifier.cmp(&b.test_identifier))
    });
}

fn quarantine_entry(record: &TestStabilityRecord, now: DateTime<Utc>) -> QuarantineEntry {
    QuarantineEntry {
        test_identifier: record.test_identifier.clone(),
        reason: format!(
            "Flaky: failed {} of {} runs (failure rate {:.2})",
            record.failures, record.total_runs, record.failure_rate
        ),
        skip_in_ci: true,
        failure_rate: record.failure_rate,
        created: now,
    }
}
