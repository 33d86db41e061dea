//! End-to-end CLI runs against temporary history and quarantine files.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn flakeguard(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("flakeguard").unwrap();
    cmd.current_dir(dir).env_remove("FLAKEGUARD_CONFIG").env_remove("RUST_LOG");
    cmd
}

fn record(dir: &Path, run_id: u64, test: &str, outcome: &str) {
    flakeguard(dir)
        .args(["record", "--run-id", &run_id.to_string()])
        .args(["--timestamp", &format!("2026-09-01T00:{:02}:00Z", run_id)])
        .args(["--test", test, "--outcome", outcome])
        .assert()
        .success();
}

#[test]
fn test_record_analyze_check_remove() {
    let dir = tempfile::tempdir().unwrap();

    for run in 1..=10 {
        let outcome = if run == 4 { "fail" } else { "pass" };
        record(dir.path(), run, "HDRPlusTests/testAlignment", outcome);
        record(dir.path(), run, "HDRPlusTests/testMerge", "pass");
    }

    flakeguard(dir.path())
        .arg("analyze")
        .assert()
        .success()
        .stdout(predicate::str::contains("HDRPlusTests/testAlignment"))
        .stdout(predicate::str::contains("flaky (new quarantine)"));

    let quarantine = dir.path().join(".flakeguard/quarantine.json");
    let raw = std::fs::read_to_string(&quarantine).unwrap();
    assert!(raw.contains("\"skipInCI\": true"));

    flakeguard(dir.path())
        .args(["quarantine", "check", "--test", "HDRPlusTests/testAlignment"])
        .assert()
        .success()
        .stdout("skip\n");

    flakeguard(dir.path())
        .args(["quarantine", "check", "--test", "HDRPlusTests/testMerge"])
        .assert()
        .code(1)
        .stdout("run\n");

    flakeguard(dir.path())
        .args(["quarantine", "remove", "--test", "HDRPlusTests/testAlignment"])
        .assert()
        .success();

    flakeguard(dir.path())
        .args(["quarantine", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No tests quarantined."));
}

#[test]
fn test_results_file_and_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results.json");
    std::fs::write(
        &results,
        r#"[{"test_identifier":"Suite/testA","outcome":"passed"},{"test_identifier":"Suite/testB","outcome":"failed"}]"#,
    )
    .unwrap();

    flakeguard(dir.path())
        .args(["record", "--run-id", "1", "--results", "results.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded 2 outcomes for run 1"));

    let output = flakeguard(dir.path())
        .args(["analyze", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["stable"][0]["test_identifier"], "Suite/testA");
    assert_eq!(report["failing"][0]["test_identifier"], "Suite/testB");
    assert_eq!(report["newly_quarantined"].as_array().unwrap().len(), 0);
}

#[test]
fn test_dry_run_does_not_write_quarantine() {
    let dir = tempfile::tempdir().unwrap();
    for run in 1..=10 {
        record(dir.path(), run, "Suite/testFlaky", if run == 2 { "fail" } else { "pass" });
    }

    flakeguard(dir.path())
        .args(["analyze", "--dry-run", "--format", "markdown"])
        .assert()
        .success()
        .stdout(predicate::str::contains("## Test Stability Report"));

    assert!(!dir.path().join(".flakeguard/quarantine.json").exists());
}

#[test]
fn test_bad_threshold_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    flakeguard(dir.path())
        .args(["analyze", "--threshold", "1.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("instability_threshold"));
}

#[test]
fn test_corrupt_quarantine_aborts() {
    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), 1, "Suite/testA", "pass");
    std::fs::write(dir.path().join(".flakeguard/quarantine.json"), "[oops").unwrap();

    flakeguard(dir.path())
        .arg("analyze")
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupt"));
}

#[test]
fn test_config_file_sets_paths() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("flakeguard.toml"),
        "[paths]\nhistory = \"ci/history.jsonl\"\nquarantine = \"ci/quarantine.json\"\n",
    )
    .unwrap();

    record(dir.path(), 1, "Suite/testA", "pass");
    assert!(dir.path().join("ci/history.jsonl").exists());
}

#[test]
fn test_broken_local_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("flakeguard.toml"),
        "[analysis]\ninstability_threshold = \"0.3\"\n\n[paths]\nquarantine = \"ci/q.json\"\n",
    )
    .unwrap();

    flakeguard(dir.path())
        .args(["record", "--run-id", "1", "--test", "A/x", "--outcome", "pass"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("flakeguard.toml"));

    assert!(!dir.path().join(".flakeguard/history.jsonl").exists());
}

#[test]
fn test_check_on_corrupt_quarantine_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(".flakeguard")).unwrap();
    std::fs::write(dir.path().join(".flakeguard/quarantine.json"), "[oops").unwrap();

    flakeguard(dir.path())
        .args(["quarantine", "check", "--test", "A/x"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("corrupt"));
}

#[test]
fn test_check_with_broken_config_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("flakeguard.toml"), "[paths\n").unwrap();

    flakeguard(dir.path())
        .args(["quarantine", "check", "--test", "A/x"])
        .assert()
        .code(2);
}

#[test]
fn test_notification_payload_written_once() {
    let dir = tempfile::tempdir().unwrap();
    for run in 1..=10 {
        record(dir.path(), run, "Suite/testFlaky", if run == 3 { "fail" } else { "pass" });
        record(dir.path(), run, "Suite/testSteady", "pass");
    }
    let payload = dir.path().join("payload.json");

    flakeguard(dir.path())
        .args(["analyze", "--notify-out", "payload.json"])
        .assert()
        .success();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&payload).unwrap()).unwrap();
    assert_eq!(written["title"], "Quarantined flaky test: Suite/testFlaky");
    let tests = written["tests"].as_array().unwrap();
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0]["test"], "Suite/testFlaky");
    assert_eq!(tests[0]["failure_rate"], 0.1);

    // Nothing new on a repeat run, so nothing to announce.
    std::fs::remove_file(&payload).unwrap();
    flakeguard(dir.path())
        .args(["analyze", "--notify-out", "payload.json"])
        .assert()
        .success();
    assert!(!payload.exists());
}

#[test]
fn test_dry_run_sends_no_notification() {
    let dir = tempfile::tempdir().unwrap();
    for run in 1..=10 {
        record(dir.path(), run, "Suite/testFlaky", if run == 5 { "fail" } else { "pass" });
    }

    flakeguard(dir.path())
        .args(["analyze", "--dry-run", "--notify-out", "payload.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("flaky (new quarantine)"));

    assert!(!dir.path().join("payload.json").exists());
    assert!(!dir.path().join(".flakeguard/quarantine.json").exists());
}
