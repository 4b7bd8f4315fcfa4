//! Change detection between the source database and the export state.
//!
//! A fingerprint is a SHA-256 over everything that ends up in the note except
//! the id, which is the key. `dateUpdated` is left out: MacWhisper bumps it
//! for changes that never reach the note (playback position, UI state), and
//! re-exporting on those would only churn files.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ExportError, Result};
use crate::importer::{SessionDuration, SessionRecord};
use crate::renderer::RENDER_VERSION;
use crate::state::StateEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

/// The fields that decide whether a note must be rewritten.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    render_version: u32,
    title: Option<&'a str>,
    date: String,
    duration: SessionDuration,
    language: Option<&'a str>,
    source: Option<&'a str>,
    summary: Option<&'a str>,
    transcript: Option<&'a str>,
}

impl Fingerprint {
    pub fn of(record: &SessionRecord) -> Result<Self> {
        let input = FingerprintInput {
            render_version: RENDER_VERSION,
            title: record.title.as_deref(),
            date: record.date.format("%Y-%m-%d").to_string(),
            duration: record.duration,
            language: record.language.as_deref(),
            source: record.source_filename.as_deref(),
            summary: record.summary_text.as_deref(),
            transcript: record.transcript_text.as_deref(),
        };
        let json = serde_json::to_vec(&input).map_err(|e| ExportError::render(&record.id, e))?;

        let mut hasher = Sha256::new();
        hasher.update(&json);
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty fingerprints come from migrated legacy state entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    Updated,
    Skipped,
}

/// Exact comparison against the stored fingerprint. `force` turns every
/// previously exported session into an update.
pub fn classify(current: &Fingerprint, stored: Option<&StateEntry>, force: bool) -> Classification {
    match stored {
        None => Classification::New,
        Some(_) if force => Classification::Updated,
        Some(entry) if entry.fingerprint == *current => Classification::Skipped,
        Some(_) => Classification::Updated,
    }
}
