//! Persisted record of what has been exported.
//!
//! The file maps each session id to the fingerprint of the content last
//! written and the note's file name inside the output directory. It is private
//! to this tool; nothing else should read it.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::diff::Fingerprint;
use crate::error::{ExportError, Result};
use crate::utils::atomic_write;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateEntry {
    pub fingerprint: Fingerprint,
    /// File name relative to the output directory. `None` only for entries
    /// migrated from the oldest state format, which did not record it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// On-disk shapes an entry may take. Older exporters wrote
/// `{"dateUpdated": ..., "filename": ...}` or just the `dateUpdated` string.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Current {
        fingerprint: Fingerprint,
        #[serde(default)]
        filename: Option<String>,
    },
    Legacy(LegacyEntry),
    LegacyDate(#[allow(dead_code)] String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyEntry {
    #[serde(rename = "dateUpdated")]
    #[allow(dead_code)]
    date_updated: String,
    #[serde(default)]
    filename: Option<String>,
}

impl<'de> Deserialize<'de> for StateEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Legacy entries get an empty fingerprint, which never matches a real
        // one, so the session is re-rendered once and the entry upgraded.
        Ok(match StoredEntry::deserialize(deserializer)? {
            StoredEntry::Current {
                fingerprint,
                filename,
            } => StateEntry {
                fingerprint,
                filename,
            },
            StoredEntry::Legacy(LegacyEntry { filename, .. }) => StateEntry {
                fingerprint: Fingerprint::default(),
                filename,
            },
            StoredEntry::LegacyDate(_) => StateEntry {
                fingerprint: Fingerprint::default(),
                filename: None,
            },
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportState {
    #[serde(default)]
    version: u32,
    exported: BTreeMap<String, StateEntry>,
}

impl ExportState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            exported: BTreeMap::new(),
        }
    }

    /// Load the state file. A missing file is a first run and yields an empty
    /// state; anything unreadable is `StateCorrupt`, never silently emptied.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no export state yet, starting fresh");
                return Ok(Self::new());
            }
            Err(e) => return Err(ExportError::state_corrupt(path, e)),
        };

        let mut state: Self =
            serde_json::from_str(&content).map_err(|e| ExportError::state_corrupt(path, e))?;
        if state.version > STATE_VERSION {
            return Err(ExportError::state_corrupt(
                path,
                format!(
                    "written by a newer version (format {}, expected at most {STATE_VERSION})",
                    state.version
                ),
            ));
        }
        state.version = STATE_VERSION;
        debug!(path = %path.display(), entries = state.len(), "export state loaded");
        Ok(state)
    }

    /// Write the state atomically: a crash mid-save leaves the previous file intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| ExportError::write(path, std::io::Error::other(e)))?;
        json.push('\n');
        atomic_write(path, json.as_bytes()).map_err(|e| ExportError::write(path, e))?;
        debug!(path = %path.display(), entries = self.len(), "export state saved");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&StateEntry> {
        self.exported.get(id)
    }

    pub fn put(&mut self, id: impl Into<String>, fingerprint: Fingerprint, filename: impl Into<String>) {
        self.exported.insert(
            id.into(),
            StateEntry {
                fingerprint,
                filename: Some(filename.into()),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.exported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exported.is_empty()
    }

    /// Every (filename, id) pair the state knows about.
    pub fn filenames(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.exported
            .iter()
            .filter_map(|(id, e)| e.filename.as_deref().map(|f| (f, id.as_str())))
    }
}
