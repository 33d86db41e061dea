use std::collections::BTreeMap;

use super::TestStabilityRecord;
use crate::history::{Outcome, TestRunRecord};

/// Fold run records into one stability record per test, in identifier order.
pub struct OutcomeAggregator;

impl OutcomeAggregator {
    pub fn aggregate(runs: &[TestRunRecord]) -> Vec<TestStabilityRecord> {
        let mut counts: BTreeMap<&str, (u64, u64, u64)> = BTreeMap::new();

        for r in runs {
            let c = counts.entry(r.test_identifier.as_str()).or_default();
            match r.outcome {
                Outcome::Pass => c.0 += 1,
                Outcome::Fail => c.1 += 1,
                Outcome::Skip => c.2 += 1,
            }
        }

        counts
            .into_iter()
            .map(|(id, (passes, failures, skips))| {
                TestStabilityRecord::from_counts(id, passes, failures, skips)
            })
            .collect()
    }
}
