use crate::error::{ExportError, Result};
use crate::importer::SessionRecord;
use crate::renderer::read_note_id;
use crate::state::ExportState;
use crate::utils::{atomic_write, short_id};
use std::collections::HashMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use tracing::{debug, warn};

const SLUG_MAX_LEN: usize = 60;
const ID_PREFIX_LENS: [usize; 2] = [8, 12];

/// Places rendered notes in the output directory.
///
/// File names look like `2024-01-15_0a1b2c3d_weekly-sync.md`. The id prefix
/// makes the name stable for a session; the slug is only there for humans, so
/// a retitled session is moved to its new name instead of leaving a duplicate.
pub struct Writer {
    output_dir: PathBuf,
    /// file name → id of the session that owns it
    registry: HashMap<String, String>,
}

impl Writer {
    pub fn new(output_dir: impl Into<PathBuf>, state: &ExportState) -> Self {
        let registry = state
            .filenames()
            .map(|(file, id)| (file.to_string(), id.to_string()))
            .collect();
        Self {
            output_dir: output_dir.into(),
            registry,
        }
    }

    /// Pick the file name for `record`: the shortest id prefix whose name is
    /// not owned by a different session, either in the state or on disk.
    pub fn allocate_filename(&self, record: &SessionRecord) -> Result<String> {
        let raw_slug = record.title.as_deref().map(slug::slugify).unwrap_or_default();
        // slug output is ASCII-only, so byte == char
        let slug = raw_slug[..raw_slug.len().min(SLUG_MAX_LEN)].trim_end_matches('-');

        let id_key = match slug::slugify(&record.id) {
            k if k.is_empty() => "session".to_string(),
            k => k,
        };
        let date = record.date.format("%Y-%m-%d");
        let stem_for = |prefix: &str| {
            if slug.is_empty() {
                format!("{date}_{prefix}")
            } else {
                format!("{date}_{prefix}_{slug}")
            }
        };

        let prefixes = ID_PREFIX_LENS
            .iter()
            .filter(|&&len| len < id_key.len())
            .map(|&len| &id_key[..len])
            .chain(std::iter::once(id_key.as_str()));
        for prefix in prefixes {
            let filename = format!("{}.md", stem_for(prefix));
            if self.is_available(&filename, &record.id) {
                return Ok(filename);
            }
        }

        // Even the full id is taken (by a file we did not write). Count up.
        let stem = stem_for(id_key.as_str());
        (2..1000)
            .map(|n| format!("{stem} ({n}).md"))
            .find(|f| self.is_available(f, &record.id))
            .ok_or_else(|| {
                ExportError::write(
                    self.output_dir.join(format!("{stem}.md")),
                    io::Error::new(ErrorKind::AlreadyExists, "every candidate file name is taken"),
                )
            })
    }

    fn is_available(&self, filename: &str, id: &str) -> bool {
        match self.registry.get(filename) {
            Some(owner) => owner == id,
            None => {
                let path = self.output_dir.join(filename);
                match path.try_exists() {
                    Ok(false) => true,
                    Ok(true) => read_note_id(&path).is_some_and(|owner| owner == id),
                    // Can't tell; claim it and let the write report the problem.
                    Err(_) => true,
                }
            }
        }
    }

    /// Write `text` as the note for `record` and return its file name.
    ///
    /// `previous` is the file name the session was last exported under. When
    /// it differs, the old note is removed once the new one is in place. On
    /// error nothing is returned, so the caller leaves its state untouched.
    pub fn write(
        &mut self,
        record: &SessionRecord,
        text: &str,
        previous: Option<&str>,
    ) -> Result<String> {
        let filename = self.allocate_filename(record)?;
        let path = self.output_dir.join(&filename);
        atomic_write(&path, text.as_bytes()).map_err(|e| ExportError::write(&path, e))?;
        self.registry.insert(filename.clone(), record.id.clone());

        if let Some(old) = previous.filter(|old| *old != filename) {
            self.remove_superseded(old, &record.id);
        }

        debug!(id = short_id(&record.id), file = %filename, "note written");
        Ok(filename)
    }

    /// Remove a session's old note, but only if it still carries that
    /// session's id. Files that were replaced by hand are left alone.
    fn remove_superseded(&mut self, old: &str, id: &str) {
        let old_path = self.output_dir.join(old);
        if !read_note_id(&old_path).is_some_and(|owner| owner == id) {
            if old_path.exists() {
                warn!(file = %old_path.display(), "not removing previous note: it no longer belongs to session {}", short_id(id));
            }
            if self.registry.get(old).is_some_and(|owner| owner == id) {
                self.registry.remove(old);
            }
            return;
        }

        match fs::remove_file(&old_path) {
            Ok(()) => {
                debug!(file = %old_path.display(), "removed superseded note");
                self.registry.remove(old);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.registry.remove(old);
            }
            Err(e) => warn!(file = %old_path.display(), error = %e, "could not remove superseded note"),
        }
    }
}
