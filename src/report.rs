//! Analysis report rendering: plain-text table and GitHub markdown.

use std::fmt::Write;

use crate::analysis::{AnalysisResult, Stability};

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn status_label(result: &AnalysisResult, stability: Stability, test: &str) -> String {
    if result.is_already_quarantined(test) {
        format!("{} (quarantined)", stability)
    } else if result.newly_quarantined.iter().any(|e| e.test_identifier == test) {
        format!("{} (new quarantine)", stability)
    } else {
        stability.to_string()
    }
}

/// Render a human-readable table of every analyzed test plus the quarantine delta.
pub fn render_text(result: &AnalysisResult) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "\nTest Stability Report");
    let _ = writeln!(
        out,
        "Window: {} of last {} runs | Threshold: {}",
        result.runs_considered,
        result.window_runs,
        percent(result.instability_threshold)
    );
    let _ = writeln!(
        out,
        "Stable: {} | Flaky: {} | Failing: {} | Insufficient data: {}",
        result.stable.len(),
        result.flaky.len(),
        result.failing.len(),
        result.insufficient_data.len()
    );

    if result.is_empty() {
        let _ = writeln!(out, "\nNo test history to analyze.");
        return out;
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<50} | {:<28} | {:>8} | {:>5} | {:>5} | {:>5}",
        "Test", "Status", "Fail %", "Pass", "Fail", "Skip"
    );
    let _ = writeln!(
        out,
        "{:-<50}-|-{:-<28}-|-{:->8}-|-{:->5}-|-{:->5}-|-{:->5}",
        "", "", "", "", "", ""
    );
    for (stability, r) in result.classified() {
        let rate = if stability == Stability::InsufficientData {
            "-".to_string()
        } else {
            percent(r.failure_rate)
        };
        let _ = writeln!(
            out,
            "{:<50} | {:<28} | {:>8} | {:>5} | {:>5} | {:>5}",
            r.test_identifier,
            status_label(result, stability, &r.test_identifier),
            rate,
            r.passes,
            r.failures,
            r.skips
        );
    }

    let _ = writeln!(out);
    if result.newly_quarantined.is_empty() {
        let _ = writeln!(out, "No new quarantines.");
    } else {
        let _ = writeln!(out, "Newly quarantined ({}):", result.newly_quarantined.len());
        for e in &result.newly_quarantined {
            let _ = writeln!(out, " - {} ({})", e.test_identifier, percent(e.failure_rate));
        }
    }

    out
}

/// Render the report as GitHub-flavoured markdown for job summaries and PR comments.
pub fn render_markdown(result: &AnalysisResult) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "## Test Stability Report\n");
    let _ = writeln!(
        out,
        "| Stable | Flaky | Failing | Insufficient data | Newly quarantined |"
    );
    let _ = writeln!(out, "|---:|---:|---:|---:|---:|");
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} | {} |\n",
        result.stable.len(),
        result.flaky.len(),
        result.failing.len(),
        result.insufficient_data.len(),
        result.newly_quarantined.len()
    );
    let _ = writeln!(
        out,
        "_{} runs analyzed (window {}), instability threshold {}._\n",
        result.runs_considered,
        result.window_runs,
        percent(result.instability_threshold)
    );

    if result.is_empty() {
        let _ = writeln!(out, "No test history to analyze.");
        return out;
    }

    // Stable tests are summarized above; listing them would drown the signal.
    let unstable: Vec<_> = result
        .classified()
        .filter(|(s, _)| *s != Stability::Stable)
        .collect();
    if !unstable.is_empty() {
        let _ = writeln!(out, "| Test | Status | Failure rate | Pass | Fail | Skip |");
        let _ = writeln!(out, "|---|---|---:|---:|---:|---:|");
        for (stability, r) in unstable {
            let rate = if stability == Stability::InsufficientData {
                "-".to_string()
            } else {
                percent(r.failure_rate)
            };
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} | {} | {} |",
                r.test_identifier.replace('|', "\\|"),
                status_label(result, stability, &r.test_identifier),
                rate,
                r.passes,
                r.failures,
                r.skips
            );
        }
        let _ = writeln!(out);
    }

    if !result.newly_quarantined.is_empty() {
        let _ = writeln!(out, "### Newly quarantined\n");
        for e in &result.newly_quarantined {
            let _ = writeln!(out, "- `{}`: {}", e.test_identifier, e.reason);
        }
    }

    out
}
