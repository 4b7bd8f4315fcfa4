//! Error kinds surfaced by the export pipeline.
//!
//! Two classes exist. Source and state problems are fatal and halt the run
//! before anything is persisted. Render and write problems concern a single
//! session; the run logs them and moves on to the next record.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    /// Source database missing, unreadable, or not shaped like a MacWhisper database.
    #[error("source database unavailable at {}: {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    /// The export state file exists but could not be read or parsed.
    #[error("export state at {} is corrupt: {reason}", path.display())]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("failed to write {}", path.display())]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Session content that cannot be turned into a note.
    #[error("cannot render session {id}: {reason}")]
    RenderError { id: String, reason: String },
}

impl ExportError {
    pub(crate) fn source_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn state_corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::StateCorrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteError {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn render(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::RenderError {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Fatal errors abort the whole run; the rest only cost one record.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::StateCorrupt { .. }
        )
    }
}
