//! flakeguard -- flaky-test detection and one-way CI quarantine.
//!
//! This crate reads a history of per-test CI outcomes, classifies each test
//! as stable, flaky, failing or insufficient-data over a window of recent
//! runs, appends newly flaky tests to a quarantine file that the test runner
//! honours, and reports the result.

pub mod analysis;
pub mod config;
pub mod history;
pub mod notify;
pub mod quarantine;
pub mod report;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::analysis::{AnalysisResult, StabilityAnalyzer};
use crate::config::AnalysisConfig;
use crate::history::HistoryLog;
use crate::notify::{Notification, Notifier};
use crate::quarantine::{JsonFileStore, QuarantineStore};

/// Inputs for one analysis pass, after config and flags are merged.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub history: PathBuf,
    pub quarantine: PathBuf,
    pub analysis: AnalysisConfig,
    /// Analyze and report without writing the quarantine file.
    pub dry_run: bool,
}

/// Run a full analysis pass: history in, quarantine file and notifications out.
pub async fn analyze(
    opts: &AnalyzeOptions,
    notifiers: &[Box<dyn Notifier>],
) -> Result<AnalysisResult> {
    // 1. Validate thresholds before touching any file
    let analyzer = StabilityAnalyzer::new(opts.analysis)?;

    // 2. Load history, skipping bad lines
    let history = HistoryLog::new(&opts.history).load()?;
    if history.skipped > 0 {
        tracing::warn!(
            path = %opts.history.display(),
            skipped = history.skipped,
            "some history records were malformed and ignored"
        );
    }
    tracing::info!(
        path = %opts.history.display(),
        records = history.records.len(),
        "loaded test history"
    );

    // 3. Classify and ratchet the quarantine list
    let mut store = JsonFileStore::new(&opts.quarantine);
    let now = Utc::now();
    let result = if opts.dry_run {
        let existing = if history.records.is_empty() {
            Default::default()
        } else {
            store.load()?
        };
        analyzer.analyze(&history.records, &existing, now)
    } else {
        analyzer.run(&mut store, &history.records, now).with_context(|| {
            format!(
                "analysis aborted; quarantine file {} left unchanged",
                opts.quarantine.display()
            )
        })?
    };

    // 4. Tell someone about new quarantines
    if !opts.dry_run {
        if let Some(notification) = Notification::for_new_quarantines(&result.newly_quarantined) {
            notify::dispatch(notifiers, &notification).await;
        }
    }

    Ok(result)
}
