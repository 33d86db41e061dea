//! Notifications for newly quarantined tests.
//!
//! The payload is built here; delivery is delegated to a `Notifier`.

pub mod webhook;

pub use self::webhook::WebhookNotifier;

use std::fmt::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::quarantine::QuarantineEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifiedTest {
    pub test: String,
    pub failure_rate: f64,
}

/// Human-readable message about tests that were just quarantined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub tests: Vec<NotifiedTest>,
}

impl Notification {
    /// `None` when nothing was quarantined.
    pub fn for_new_quarantines(entries: &[QuarantineEntry]) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }

        let title = if entries.len() == 1 {
            format!("Quarantined flaky test: {}", entries[0].test_identifier)
        } else {
            format!("Quarantined {} flaky tests", entries.len())
        };

        let mut body = String::from(
            "The following tests failed intermittently and will be skipped in CI until fixed:\n\n",
        );
        for e in entries {
            let _ = writeln!(
                body,
                "- {} (failure rate {:.1}%)",
                e.test_identifier,
                e.failure_rate * 100.0
            );
        }
        body.push_str("\nRemove an entry from the quarantine file once the test is fixed.");

        let tests = entries
            .iter()
            .map(|e| NotifiedTest {
                test: e.test_identifier.clone(),
                failure_rate: e.failure_rate,
            })
            .collect();

        Some(Self { title, body, tests })
    }

    /// Title and body as one chat message.
    pub fn text(&self) -> String {
        format!("*{}*\n{}", self.title, self.body)
    }
}

/// Delivers a notification somewhere outside the process.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes the notification to the log.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(title = %notification.title, tests = notification.tests.len(), "{}", notification.body);
        Ok(())
    }
}

/// Writes the payload as JSON for a later CI step (issue creation, PR comment).
pub struct FileNotifier {
    path: PathBuf,
}

impl FileNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Notifier for FileNotifier {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let json = serde_json::to_string_pretty(notification)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("failed to write notification payload: {}", self.path.display()))?;
        info!(path = %self.path.display(), "wrote notification payload");
        Ok(())
    }
}

/// Send through every notifier. Failures are logged, never propagated: the
/// quarantine file is already written by the time anyone is told.
pub async fn dispatch(notifiers: &[Box<dyn Notifier>], notification: &Notification) -> usize {
    let mut delivered = 0;
    for n in notifiers {
        match n.send(notification).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(notifier = n.name(), error = %e, "notification delivery failed"),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: &str, rate: f64) -> QuarantineEntry {
        QuarantineEntry {
            test_identifier: id.to_string(),
            reason: String::new(),
            skip_in_ci: true,
            failure_rate: rate,
            created: Utc::now(),
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl Notifier for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn send(&self, _notification: &Notification) -> Result<()> {
            anyhow::bail!("endpoint unreachable")
        }
    }

    #[test]
    fn test_no_notification_for_empty_delta() {
        assert!(Notification::for_new_quarantines(&[]).is_none());
    }

    #[test]
    fn test_single_test_title() {
        let n = Notification::for_new_quarantines(&[entry("Suite/testAlign", 0.1)]).unwrap();
        assert_eq!(n.title, "Quarantined flaky test: Suite/testAlign");
        assert!(n.body.contains("Suite/testAlign (failure rate 10.0%)"));
        assert_eq!(n.tests.len(), 1);
    }

    #[test]
    fn test_multiple_tests_title() {
        let n = Notification::for_new_quarantines(&[entry("A/x", 0.1), entry("A/y", 0.05)]).unwrap();
        assert_eq!(n.title, "Quarantined 2 flaky tests");
        assert!(n.text().starts_with("*Quarantined 2 flaky tests*\n"));
    }

    #[tokio::test]
    async fn test_file_notifier_writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notification.json");
        let n = Notification::for_new_quarantines(&[entry("A/x", 0.1)]).unwrap();

        FileNotifier::new(&path).send(&n).await.unwrap();

        let written: Notification =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, n);
    }

    #[tokio::test]
    async fn test_dispatch_tolerates_failures() {
        let n = Notification::for_new_quarantines(&[entry("A/x", 0.1)]).unwrap();
        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(Failing), Box::new(LogNotifier)];
        assert_eq!(dispatch(&notifiers, &n).await, 1);
    }
}
