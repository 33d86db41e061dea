use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use flakeguard::config::Config;
use flakeguard::history::{self, HistoryLog, Outcome, RunResult};
use flakeguard::notify::{FileNotifier, LogNotifier, Notifier, WebhookNotifier};
use flakeguard::quarantine::{JsonFileStore, QuarantineStore};

#[derive(Parser)]
#[command(
    name = "flakeguard",
    about = "Flaky-test detection and CI quarantine from historical test outcomes",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (default: $FLAKEGUARD_CONFIG, then ./flakeguard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify tests over recent runs and quarantine new flaky ones
    Analyze {
        /// History log (JSON lines)
        #[arg(long)]
        history: Option<PathBuf>,

        /// Quarantine file
        #[arg(long)]
        quarantine: Option<PathBuf>,

        /// Failure rate at or above which a test is failing rather than flaky
        #[arg(long)]
        threshold: Option<f64>,

        /// Number of most recent CI runs to consider
        #[arg(long)]
        window: Option<usize>,

        /// Report format printed to stdout
        #[arg(long, value_enum, default_value = "text")]
        format: ReportFormat,

        /// Also write the rendered report to this file
        #[arg(long)]
        report_out: Option<PathBuf>,

        /// Write the notification payload (JSON) to this file
        #[arg(long)]
        notify_out: Option<PathBuf>,

        /// Post new quarantines to this chat webhook
        #[arg(long, env = "FLAKEGUARD_WEBHOOK_URL")]
        webhook: Option<String>,

        /// Analyze without writing the quarantine file or notifying
        #[arg(long)]
        dry_run: bool,
    },

    /// Append one CI run's outcomes to the history log
    Record {
        /// CI run identifier
        #[arg(long)]
        run_id: u64,

        /// Run time (RFC 3339); defaults to now
        #[arg(long)]
        timestamp: Option<DateTime<Utc>>,

        /// Test identifier for a single outcome
        #[arg(long, requires = "outcome", conflicts_with = "results")]
        test: Option<String>,

        /// Outcome for --test: pass, fail or skip
        #[arg(long, requires = "test")]
        outcome: Option<String>,

        /// JSON array of {"test_identifier", "outcome"} objects
        #[arg(long, required_unless_present = "test")]
        results: Option<PathBuf>,

        /// History log (JSON lines)
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Inspect or edit the quarantine list
    Quarantine {
        /// Quarantine file
        #[arg(long, global = true)]
        file: Option<PathBuf>,

        #[command(subcommand)]
        action: QuarantineAction,
    },
}

#[derive(Subcommand)]
enum QuarantineAction {
    /// List quarantined tests
    List,

    /// Exit 0 if the test must be skipped in CI, 1 if it should run,
    /// 2 if the quarantine file cannot be read
    Check {
        #[arg(long)]
        test: String,
    },

    /// Manually un-quarantine a test after it has been fixed
    Remove {
        #[arg(long)]
        test: String,
    },
}

/// Exit code of `quarantine check` when no answer can be given (unreadable
/// config or quarantine file).
const CHECK_ERROR_EXIT: u8 = 2;

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Text,
    Markdown,
    Json,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    // stdout carries reports; logs go to stderr.
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // `quarantine check` answers 1 for "run"; a failure must not look like that.
    let failure = match &cli.command {
        Commands::Quarantine {
            action: QuarantineAction::Check { .. },
            ..
        } => ExitCode::from(CHECK_ERROR_EXIT),
        _ => ExitCode::FAILURE,
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            failure
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Analyze {
            history,
            quarantine,
            threshold,
            window,
            format,
            report_out,
            notify_out,
            webhook,
            dry_run,
        } => {
            if let Some(t) = threshold {
                config.analysis.instability_threshold = t;
            }
            if let Some(w) = window {
                config.analysis.window_runs = w;
            }
            config.validate()?;

            let opts = flakeguard::AnalyzeOptions {
                history: history.unwrap_or(config.paths.history),
                quarantine: quarantine.unwrap_or(config.paths.quarantine),
                analysis: config.analysis,
                dry_run,
            };

            let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
            if let Some(path) = notify_out.or(config.notify.payload_path) {
                notifiers.push(Box::new(FileNotifier::new(path)));
            }
            if let Some(url) = webhook.or(config.notify.webhook_url) {
                notifiers.push(Box::new(WebhookNotifier::new(url)?));
            }

            tracing::info!(
                history = %opts.history.display(),
                quarantine = %opts.quarantine.display(),
                threshold = opts.analysis.instability_threshold,
                window = opts.analysis.window_runs,
                dry_run,
                "Running stability analysis"
            );
            let result = flakeguard::analyze(&opts, &notifiers).await?;

            let rendered = match format {
                ReportFormat::Text => flakeguard::report::render_text(&result),
                ReportFormat::Markdown => flakeguard::report::render_markdown(&result),
                ReportFormat::Json => serde_json::to_string_pretty(&result)?,
            };
            println!("{}", rendered);

            if let Some(path) = report_out {
                std::fs::write(&path, &rendered)
                    .with_context(|| format!("failed to write report: {}", path.display()))?;
            }
        }
        Commands::Record {
            run_id,
            timestamp,
            test,
            outcome,
            results,
            history,
        } => {
            let results = match (test, outcome, results) {
                (Some(test), Some(outcome), _) => vec![RunResult {
                    test_identifier: test,
                    outcome: outcome.parse::<Outcome>()?,
                }],
                (_, _, Some(path)) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read results file: {}", path.display()))?;
                    serde_json::from_str::<Vec<RunResult>>(&content)
                        .with_context(|| format!("failed to parse results file: {}", path.display()))?
                }
                _ => anyhow::bail!("either --test with --outcome, or --results, is required"),
            };

            let records = history::records_for_run(run_id, timestamp.unwrap_or_else(Utc::now), results);
            let log = HistoryLog::new(history.unwrap_or(config.paths.history));
            log.append(&records)?;
            println!(
                "Recorded {} outcome{} for run {} in {}",
                records.len(),
                if records.len() == 1 { "" } else { "s" },
                run_id,
                log.path().display()
            );
        }
        Commands::Quarantine { file, action } => {
            let mut store = JsonFileStore::new(file.unwrap_or(config.paths.quarantine));

            match action {
                QuarantineAction::List => {
                    let set = store.load()?;
                    if set.is_empty() {
                        println!("No tests quarantined.");
                    } else {
                        println!("{:<50} | {:>8} | {:<5} | Created", "Test", "Fail %", "Skip");
                        println!("{:-<50}-|-{:->8}-|-{:-<5}-|-{:-<20}", "", "", "", "");
                        for e in set.iter() {
                            println!(
                                "{:<50} | {:>7.1}% | {:<5} | {}",
                                e.test_identifier,
                                e.failure_rate * 100.0,
                                e.skip_in_ci,
                                e.created.to_rfc3339()
                            );
                        }
                    }
                }
                QuarantineAction::Check { test } => {
                    let set = store.load()?;
                    if set.should_skip(&test) {
                        println!("skip");
                        return Ok(ExitCode::SUCCESS);
                    }
                    println!("run");
                    return Ok(ExitCode::from(1));
                }
                QuarantineAction::Remove { test } => {
                    if store.remove(&test)? {
                        tracing::info!(%test, "Removed from quarantine");
                        println!("Test '{}' removed from quarantine.", test);
                    } else {
                        println!("Test '{}' is not quarantined.", test);
                    }
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
