//! JSON file backing for the quarantine list.
//!
//! The file is a single JSON object mapping test identifier to
//! `{ "reason", "skipInCI", "failureRate", "created" }`; the test runner reads
//! it directly. New entries are spliced in ahead of the closing brace so the
//! bytes of existing entries never change.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{QuarantineEntry, QuarantineError, QuarantineSet, QuarantineStore};

/// On-disk shape of one quarantine value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileValue {
    reason: String,
    #[serde(rename = "skipInCI")]
    skip_in_ci: bool,
    #[serde(rename = "failureRate")]
    failure_rate: f64,
    created: DateTime<Utc>,
}

impl FileValue {
    fn from_entry(entry: &QuarantineEntry) -> Self {
        Self {
            reason: entry.reason.clone(),
            skip_in_ci: entry.skip_in_ci,
            failure_rate: entry.failure_rate,
            created: entry.created,
        }
    }

    fn into_entry(self, test_identifier: String) -> QuarantineEntry {
        QuarantineEntry {
            test_identifier,
            reason: self.reason,
            skip_in_ci: self.skip_in_ci,
            failure_rate: self.failure_rate,
            created: self.created,
        }
    }
}

/// Object members in file order. A repeated identifier is a decode error.
struct Members(Vec<(String, FileValue)>);

impl<'de> Deserialize<'de> for Members {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MembersVisitor;

        impl<'de> Visitor<'de> for MembersVisitor {
            type Value = Members;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping test identifiers to quarantine entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Members, A::Error> {
                let mut seen = HashSet::new();
                let mut members = Vec::new();
                while let Some((id, value)) = map.next_entry::<String, FileValue>()? {
                    if !seen.insert(id.clone()) {
                        return Err(de::Error::custom(format!(
                            "duplicate entry for test '{}'",
                            id
                        )));
                    }
                    members.push((id, value));
                }
                Ok(Members(members))
            }
        }

        deserializer.deserialize_map(MembersVisitor)
    }
}

/// What the file looked like at `load` time.
#[derive(Debug, Clone, PartialEq)]
enum Snapshot {
    NotLoaded,
    Absent,
    Present(String),
}

/// Quarantine store backed by a JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    snapshot: Snapshot,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: Snapshot::NotLoaded,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Manually un-quarantine a test. Returns `false` if it was not quarantined.
    ///
    /// This is the only operation that ever drops an entry; the remaining
    /// entries are re-serialized.
    pub fn remove(&mut self, test_identifier: &str) -> Result<bool, QuarantineError> {
        let current = self.read_current()?;
        let Some(content) = current else {
            return Ok(false);
        };

        let mut set = parse(&content, &self.path)?;
        if set.remove(test_identifier).is_none() {
            return Ok(false);
        }

        let members: Vec<String> = set.iter().map(render_member).collect::<Result<_, _>>()?;
        let rendered = render_object(&members);
        self.write_atomic(&rendered)?;
        self.snapshot = Snapshot::Present(rendered);

        info!(path = %self.path.display(), test = %test_identifier, "removed quarantine entry");
        Ok(true)
    }

    fn read_current(&self) -> Result<Option<String>, QuarantineError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(QuarantineError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write_atomic(&self, content: &str) -> Result<(), QuarantineError> {
        let write_err = |source| QuarantineError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "quarantine.json".to_string());
        let tmp = self.path.with_file_name(format!(".{}.tmp", file_name));

        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

impl QuarantineStore for JsonFileStore {
    fn load(&mut self) -> Result<QuarantineSet, QuarantineError> {
        match self.read_current()? {
            None => {
                debug!(path = %self.path.display(), "quarantine file not found, starting empty");
                self.snapshot = Snapshot::Absent;
                Ok(QuarantineSet::new())
            }
            Some(content) => {
                let set = parse(&content, &self.path)?;
                debug!(path = %self.path.display(), entries = set.len(), "loaded quarantine file");
                self.snapshot = Snapshot::Present(content);
                Ok(set)
            }
        }
    }

    fn append_entries(&mut self, entries: &[QuarantineEntry]) -> Result<(), QuarantineError> {
        if entries.is_empty() {
            return Ok(());
        }

        // Re-read right before writing so a concurrent edit is never clobbered.
        let current = self.read_current()?;
        let unchanged = match (&self.snapshot, &current) {
            (Snapshot::NotLoaded, _) => true,
            (Snapshot::Absent, None) => true,
            (Snapshot::Present(seen), Some(now)) => seen == now,
            _ => false,
        };
        if !unchanged {
            return Err(QuarantineError::Conflict {
                path: self.path.clone(),
            });
        }

        let mut existing = match &current {
            Some(content) => parse(content, &self.path)?,
            None => QuarantineSet::new(),
        };
        let had_members = !existing.is_empty();
        for entry in entries {
            existing.insert(entry.clone())?;
        }

        let members: Vec<String> = entries.iter().map(render_member).collect::<Result<_, _>>()?;
        let rendered = match current.as_deref() {
            Some(content) if had_members => splice(content, &members, &self.path)?,
            _ => render_object(&members),
        };

        self.write_atomic(&rendered)?;
        self.snapshot = Snapshot::Present(rendered);

        info!(path = %self.path.display(), added = entries.len(), "appended quarantine entries");
        Ok(())
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> QuarantineError {
    QuarantineError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn parse(content: &str, path: &Path) -> Result<QuarantineSet, QuarantineError> {
    let Members(members) =
        serde_json::from_str(content).map_err(|e| corrupt(path, e.to_string()))?;

    let mut set = QuarantineSet::new();
    for (id, value) in members {
        if !(0.0..=1.0).contains(&value.failure_rate) {
            return Err(corrupt(
                path,
                format!("entry '{}' has failureRate {} outside [0, 1]", id, value.failure_rate),
            ));
        }
        set.insert(value.into_entry(id))?;
    }
    Ok(set)
}

/// `"id": { ... }` indented as one member of a pretty-printed object.
fn render_member(entry: &QuarantineEntry) -> Result<String, QuarantineError> {
    let encode_err = |source| QuarantineError::Encode {
        test_identifier: entry.test_identifier.clone(),
        source,
    };
    let key = serde_json::to_string(&entry.test_identifier).map_err(encode_err)?;
    let value = serde_json::to_string_pretty(&FileValue::from_entry(entry)).map_err(encode_err)?;
    Ok(format!("  {}: {}", key, value.replace('\n', "\n  ")))
}

fn render_object(members: &[String]) -> String {
    if members.is_empty() {
        return "{}\n".to_string();
    }
    format!("{{\n{}\n}}\n", members.join(",\n"))
}

/// Insert members before the final `}` of a non-empty object, leaving every
/// preceding byte in place.
fn splice(content: &str, members: &[String], path: &Path) -> Result<String, QuarantineError> {
    let close = content
        .rfind('}')
        .ok_or_else(|| corrupt(path, "missing closing brace"))?;
    let head = content[..close].trim_end();
    Ok(format!("{},\n{}\n}}\n", head, members.join(",\n")))
}
