//! Quarantine list: tests that CI skips until someone fixes them.
//!
//! The list only grows from analysis. Entries are removed solely through the
//! explicit `remove` operation on a store, which the CLI exposes as
//! `flakeguard quarantine remove`.

pub mod file;

pub use self::file::JsonFileStore;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("failed to read quarantine file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("quarantine file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("quarantine file {path} changed since it was loaded; re-run the analysis")]
    Conflict { path: PathBuf },

    #[error("test '{test_identifier}' is already quarantined")]
    Duplicate { test_identifier: String },

    #[error("failed to encode quarantine entry for '{test_identifier}': {source}")]
    Encode {
        test_identifier: String,
        source: serde_json::Error,
    },

    #[error("failed to write quarantine file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A persisted decision to skip a test in CI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub test_identifier: String,
    pub reason: String,
    pub skip_in_ci: bool,
    pub failure_rate: f64,
    pub created: DateTime<Utc>,
}

/// All quarantined tests, keyed by identifier. An identifier appears at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuarantineSet {
    entries: BTreeMap<String, QuarantineEntry>,
}

impl QuarantineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, test_identifier: &str) -> bool {
        self.entries.contains_key(test_identifier)
    }

    pub fn get(&self, test_identifier: &str) -> Option<&QuarantineEntry> {
        self.entries.get(test_identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &QuarantineEntry> {
        self.entries.values()
    }

    /// Whether the test runner should skip this test.
    pub fn should_skip(&self, test_identifier: &str) -> bool {
        self.get(test_identifier).map(|e| e.skip_in_ci).unwrap_or(false)
    }

    /// Add an entry, refusing to touch one that already exists.
    pub fn insert(&mut self, entry: QuarantineEntry) -> Result<(), QuarantineError> {
        if self.entries.contains_key(&entry.test_identifier) {
            return Err(QuarantineError::Duplicate {
                test_identifier: entry.test_identifier,
            });
        }
        self.entries.insert(entry.test_identifier.clone(), entry);
        Ok(())
    }

    fn remove(&mut self, test_identifier: &str) -> Option<QuarantineEntry> {
        self.entries.remove(test_identifier)
    }
}

impl FromIterator<QuarantineEntry> for QuarantineSet {
    fn from_iter<I: IntoIterator<Item = QuarantineEntry>>(iter: I) -> Self {
        let mut set = QuarantineSet::new();
        for entry in iter {
            set.entries.entry(entry.test_identifier.clone()).or_insert(entry);
        }
        set
    }
}

/// Persistence for the quarantine list.
///
/// `append_entries` must never rewrite or drop entries that were already
/// stored.
pub trait QuarantineStore {
    fn load(&mut self) -> Result<QuarantineSet, QuarantineError>;

    fn append_entries(&mut self, entries: &[QuarantineEntry]) -> Result<(), QuarantineError>;
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryQuarantineStore {
    set: QuarantineSet,
    corrupt: bool,
    writes: usize,
}

impl InMemoryQuarantineStore {
    pub fn new(set: QuarantineSet) -> Self {
        Self {
            set,
            corrupt: false,
            writes: 0,
        }
    }

    /// A store whose `load` always fails as if the backing file were unparseable.
    pub fn corrupt() -> Self {
        Self {
            corrupt: true,
            ..Self::default()
        }
    }

    pub fn set(&self) -> &QuarantineSet {
        &self.set
    }

    /// Number of successful `append_entries` calls.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn remove(&mut self, test_identifier: &str) -> bool {
        self.set.remove(test_identifier).is_some()
    }
}

impl QuarantineStore for InMemoryQuarantineStore {
    fn load(&mut self) -> Result<QuarantineSet, QuarantineError> {
        if self.corrupt {
            return Err(QuarantineError::Corrupt {
                path: PathBuf::from("<memory>"),
                reason: "simulated corruption".to_string(),
            });
        }
        Ok(self.set.clone())
    }

    fn append_entries(&mut self, entries: &[QuarantineEntry]) -> Result<(), QuarantineError> {
        let mut next = self.set.clone();
        for entry in entries {
            next.insert(entry.clone())?;
        }
        self.set = next;
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, rate: f64) -> QuarantineEntry {
        QuarantineEntry {
            test_identifier: id.to_string(),
            reason: format!("failure rate {:.2}", rate),
            skip_in_ci: true,
            failure_rate: rate,
            created: Utc::now(),
        }
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut set = QuarantineSet::new();
        set.insert(entry("A/x", 0.1)).unwrap();
        let err = set.insert(entry("A/x", 0.05)).unwrap_err();
        assert!(matches!(err, QuarantineError::Duplicate { .. }));
        assert_eq!(set.get("A/x").unwrap().failure_rate, 0.1);
    }

    #[test]
    fn test_from_iter_keeps_first_entry() {
        let set: QuarantineSet = vec![entry("A/x", 0.1), entry("A/x", 0.2)].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("A/x").unwrap().failure_rate, 0.1);
    }

    #[test]
    fn test_should_skip() {
        let mut not_skipped = entry("A/y", 0.1);
        not_skipped.skip_in_ci = false;
        let set: QuarantineSet = vec![entry("A/x", 0.1), not_skipped].into_iter().collect();
        assert!(set.should_skip("A/x"));
        assert!(!set.should_skip("A/y"));
        assert!(!set.should_skip("A/z"));
    }

    #[test]
    fn test_memory_store_append_is_all_or_nothing() {
        let mut store = InMemoryQuarantineStore::new(vec![entry("A/x", 0.1)].into_iter().collect());
        let err = store
            .append_entries(&[entry("A/new", 0.05), entry("A/x", 0.02)])
            .unwrap_err();
        assert!(matches!(err, QuarantineError::Duplicate { .. }));
        assert_eq!(store.set().len(), 1);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_encode_error_names_the_test() {
        let source = serde_json::from_str::<u8>("x").unwrap_err();
        let err = QuarantineError::Encode {
            test_identifier: "A/x".to_string(),
            source,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("failed to encode quarantine entry for 'A/x'"));
        assert!(!msg.contains("corrupt"));
    }

    #[test]
    fn test_corrupt_memory_store_fails_load() {
        let mut store = InMemoryQuarantineStore::corrupt();
        assert!(matches!(store.load(), Err(QuarantineError::Corrupt { .. })));
    }
}
