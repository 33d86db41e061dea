//! Stability window selection.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::TestRunRecord;

/// Keep only records belonging to the `window_runs` most recent CI runs.
///
/// A run's recency is the latest timestamp among its records; equal
/// timestamps fall back to the larger run id. Record order is preserved.
pub fn select_window(records: &[TestRunRecord], window_runs: usize) -> Vec<TestRunRecord> {
    let mut latest: HashMap<u64, DateTime<Utc>> = HashMap::new();
    for r in records {
        latest
            .entry(r.run_id)
            .and_modify(|t| {
                if r.timestamp > *t {
                    *t = r.timestamp;
                }
            })
            .or_insert(r.timestamp);
    }

    if latest.len() <= window_runs {
        return records.to_vec();
    }

    let mut runs: Vec<(u64, DateTime<Utc>)> = latest.into_iter().collect();
    runs.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

    let keep: HashSet<u64> = runs.iter().take(window_runs).map(|(id, _)| *id).collect();

    records
        .iter()
        .filter(|r| keep.contains(&r.run_id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Outcome;
    use chrono::TimeZone;

    fn record(run_id: u64, day: u32) -> TestRunRecord {
        TestRunRecord::new(
            "Suite/test",
            run_id,
            Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
            Outcome::Pass,
        )
    }

    #[test]
    fn test_window_keeps_most_recent_runs() {
        let records: Vec<_> = (1..=10).map(|i| record(i, i as u32)).collect();
        let windowed = select_window(&records, 3);
        let ids: Vec<u64> = windowed.iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![8, 9, 10]);
    }

    #[test]
    fn test_window_orders_by_timestamp_not_run_id() {
        // Run 1 was re-run late and carries the newest timestamp.
        let records = vec![record(1, 20), record(2, 2), record(3, 3)];
        let windowed = select_window(&records, 2);
        let ids: Vec<u64> = windowed.iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_window_tie_prefers_larger_run_id() {
        let records = vec![record(4, 5), record(9, 5), record(2, 5)];
        let windowed = select_window(&records, 1);
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].run_id, 9);
    }

    #[test]
    fn test_small_history_is_untouched() {
        let records = vec![record(1, 1), record(1, 1), record(2, 2)];
        assert_eq!(select_window(&records, 30), records);
    }
}
