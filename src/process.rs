use crate::config::ExportConfig;
use crate::diff::{Classification, Fingerprint, classify};
use crate::error::{ExportError, Result};
use crate::importer::{SessionReader, SessionRecord, snapshot_database};
use crate::renderer::render_session;
use crate::state::ExportState;
use crate::utils::short_id;
use crate::writer::Writer;
use std::fmt;
use std::fs;
use tracing::{debug, error, info};

/// Counts for one export run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, classification: Classification) {
        match classification {
            Classification::New => self.new += 1,
            Classification::Updated => self.updated += 1,
            Classification::Skipped => self.skipped += 1,
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Every session seen, including the ones that failed.
    pub fn total(&self) -> usize {
        self.new + self.updated + self.skipped + self.failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Done: {} new, {} updated, {} skipped (total {} sessions)",
            self.new,
            self.updated,
            self.skipped,
            self.total()
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        Ok(())
    }
}

/// Run one export pass.
///
/// Source and state problems abort before anything is saved. A session that
/// fails to render or write is logged and counted, keeps its previous state
/// entry, and is retried on the next run. The state is saved once, at the end.
pub fn run(config: &ExportConfig) -> Result<RunSummary> {
    let snapshot = snapshot_database(&config.db_path)?;
    let reader = SessionReader::open_snapshot(&snapshot, &config.db_path)?;
    let mut state = ExportState::load(&config.state_file)?;

    fs::create_dir_all(&config.output_dir)
        .map_err(|e| ExportError::write(&config.output_dir, e))?;

    let total = reader.count()?;
    info!(sessions = total, previously_exported = state.len(), "starting export");

    let progress = Progress::new(total, config.progress);
    let mut writer = Writer::new(&config.output_dir, &state);
    let mut summary = RunSummary::default();

    let mut query = reader.query()?;
    for item in query.records()? {
        let outcome = match item {
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => Err(e),
            Ok(record) => export_session(&record, &mut state, &mut writer, config.force),
        };
        match outcome {
            Ok(classification) => summary.record(classification),
            Err(e) => {
                summary.record_failure();
                progress.suspend(|| error!("{e}"));
            }
        }
        progress.inc();
    }
    progress.finish();

    state.save(&config.state_file)?;
    info!(entries = state.len(), "export state saved");
    Ok(summary)
}

fn export_session(
    record: &SessionRecord,
    state: &mut ExportState,
    writer: &mut Writer,
    force: bool,
) -> Result<Classification> {
    let fingerprint = Fingerprint::of(record)?;
    let stored = state.get(&record.id);
    let classification = classify(&fingerprint, stored, force);

    if classification == Classification::Skipped {
        debug!(id = short_id(&record.id), "unchanged, skipped");
        return Ok(classification);
    }

    let previous = stored.and_then(|e| e.filename.clone());
    let text = render_session(record)?;
    let filename = writer.write(record, &text, previous.as_deref())?;
    debug!(
        id = short_id(&record.id),
        file = %filename,
        updated_at = record.updated_at.as_deref().unwrap_or("-"),
        "{:?}",
        classification
    );
    state.put(&record.id, fingerprint, filename);
    Ok(classification)
}

/// Progress bar on stderr, compiled out without the `progress` feature.
struct Progress {
    #[cfg(feature = "progress")]
    bar: indicatif::ProgressBar,
}

impl Progress {
    #[cfg(feature = "progress")]
    fn new(total: u64, visible: bool) -> Self {
        use indicatif::{ProgressBar, ProgressStyle};

        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar }
    }

    #[cfg(not(feature = "progress"))]
    fn new(_total: u64, _visible: bool) -> Self {
        Self {}
    }

    fn inc(&self) {
        #[cfg(feature = "progress")]
        self.bar.inc(1);
    }

    fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        #[cfg(feature = "progress")]
        return self.bar.suspend(f);
        #[cfg(not(feature = "progress"))]
        f()
    }

    fn finish(&self) {
        #[cfg(feature = "progress")]
        self.bar.finish_and_clear();
    }
}
