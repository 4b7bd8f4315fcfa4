//! Session records as stored by MacWhisper, and the read-only reader over them.
//!
//! MacWhisper keeps its history in `~/Library/Application Support/MacWhisper/Database/main.sqlite`.
//! Only the `session` table is read. The columns this crate depends on:
//!
//! ```sql
//! CREATE TABLE session (
//!     id                BLOB PRIMARY KEY,   -- 16-byte UUID, surfaced as upper-case hex
//!     dateCreated       TEXT,               -- "YYYY-MM-DD HH:MM:SS.SSS"
//!     dateUpdated       TEXT,
//!     userChosenTitle   TEXT,
//!     aiTitle           TEXT,
//!     aiSummaryShort    TEXT,
//!     aiSummary         TEXT,
//!     fullText          TEXT,
//!     playbackDuration  REAL,               -- seconds
//!     detectedLanguage  TEXT,
//!     originalFilename  TEXT
//!     -- ...plus many columns this crate ignores
//! );
//! ```
//!
//! The schema is owned by MacWhisper and changes without notice, so it is
//! checked up front and a mismatch is reported instead of mis-mapping columns.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row, Statement, backup::Backup};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ExportError, Result};

pub const SESSION_TABLE: &str = "session";

pub const REQUIRED_COLUMNS: &[&str] = &[
    "id",
    "dateCreated",
    "dateUpdated",
    "userChosenTitle",
    "aiTitle",
    "aiSummaryShort",
    "aiSummary",
    "fullText",
    "playbackDuration",
    "detectedLanguage",
    "originalFilename",
];

// Column order here defines the indices used by `SessionRow::from_row`.
const SELECT_SESSIONS: &str = "SELECT hex(id), dateCreated, dateUpdated, userChosenTitle, aiTitle, \
     aiSummaryShort, aiSummary, fullText, playbackDuration, detectedLanguage, originalFilename \
     FROM session ORDER BY dateCreated, id";

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Elapsed playback time in whole seconds. Displays as `HH:MM:SS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SessionDuration(u64);

impl SessionDuration {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Missing, non-finite, zero and negative values all collapse to zero.
    /// Fractional seconds are truncated.
    pub fn from_playback(seconds: Option<f64>) -> Self {
        match seconds {
            Some(s) if s.is_finite() && s > 0.0 => Self(s as u64),
            _ => Self(0),
        }
    }
}

impl fmt::Display for SessionDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0;
        write!(
            f,
            "{:02}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    }
}

/// One transcription session, fully decoded.
///
/// `None` means the column was NULL in the source. An empty string is kept as
/// `Some("")` so "no summary" and "empty summary" stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub title: Option<String>,
    pub date: NaiveDate,
    pub duration: SessionDuration,
    pub language: Option<String>,
    pub source_filename: Option<String>,
    pub transcript_text: Option<String>,
    pub summary_text: Option<String>,
    /// Raw `dateUpdated`, for log lines only.
    pub updated_at: Option<String>,
}

impl SessionRecord {
    /// The title, or a fallback derived from the session date.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(t) => t.clone(),
            None => format!("Session {}", self.date),
        }
    }
}

/// A `session` row before interpretation. Text columns stay as bytes so that
/// bad encodings become per-record errors instead of aborting the query.
#[derive(Debug, Clone, Default)]
pub struct SessionRow {
    pub id: String,
    pub date_created: Option<Vec<u8>>,
    pub date_updated: Option<Vec<u8>>,
    pub user_chosen_title: Option<Vec<u8>>,
    pub ai_title: Option<Vec<u8>>,
    pub ai_summary_short: Option<Vec<u8>>,
    pub ai_summary: Option<Vec<u8>>,
    pub full_text: Option<Vec<u8>>,
    pub playback_duration: Option<f64>,
    pub detected_language: Option<Vec<u8>>,
    pub original_filename: Option<Vec<u8>>,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date_created: raw_text(row, 1)?,
            date_updated: raw_text(row, 2)?,
            user_chosen_title: raw_text(row, 3)?,
            ai_title: raw_text(row, 4)?,
            ai_summary_short: raw_text(row, 5)?,
            ai_summary: raw_text(row, 6)?,
            full_text: raw_text(row, 7)?,
            playback_duration: row.get(8)?,
            detected_language: raw_text(row, 9)?,
            original_filename: raw_text(row, 10)?,
        })
    }
}

fn raw_text(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Vec<u8>>> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Ok(Some(bytes.to_vec())),
        other => {
            let name = row.as_ref().column_name(idx)?.to_string();
            Err(rusqlite::Error::InvalidColumnType(
                idx,
                name,
                other.data_type(),
            ))
        }
    }
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = ExportError;

    fn try_from(row: SessionRow) -> Result<Self> {
        let id = row.id;
        let text = |column: &str, value: Option<Vec<u8>>| -> Result<Option<String>> {
            value
                .map(|bytes| {
                    String::from_utf8(bytes).map_err(|_| {
                        ExportError::render(&id, format!("column {column} is not valid UTF-8"))
                    })
                })
                .transpose()
        };

        let date_created = text("dateCreated", row.date_created)?;
        let date = date_created
            .as_deref()
            .and_then(parse_session_date)
            .ok_or_else(|| {
                ExportError::render(
                    &id,
                    format!("dateCreated {date_created:?} does not start with YYYY-MM-DD"),
                )
            })?;

        let user_chosen_title = text("userChosenTitle", row.user_chosen_title)?;
        let ai_title = text("aiTitle", row.ai_title)?;
        let ai_summary_short = text("aiSummaryShort", row.ai_summary_short)?;
        let source_filename = text("originalFilename", row.original_filename)?;

        let title = resolve_title([
            user_chosen_title.as_deref(),
            ai_title.as_deref(),
            ai_summary_short.as_deref(),
            source_filename.as_deref(),
        ]);

        Ok(SessionRecord {
            title,
            date,
            duration: SessionDuration::from_playback(row.playback_duration),
            language: text("detectedLanguage", row.detected_language)?,
            source_filename,
            transcript_text: text("fullText", row.full_text)?.map(|t| t.trim().to_string()),
            summary_text: text("aiSummary", row.ai_summary)?.map(|t| t.trim().to_string()),
            updated_at: text("dateUpdated", row.date_updated)?,
            id,
        })
    }
}

/// First non-blank candidate, trimmed. Candidates are in priority order.
fn resolve_title(candidates: [Option<&str>; 4]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

fn parse_session_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Copy the source database into a private temp file with the SQLite backup API.
///
/// MacWhisper may be running and holding the database open; reading from a
/// snapshot keeps the export consistent and never touches the original.
pub fn snapshot_database(db_path: &Path) -> Result<NamedTempFile> {
    if !db_path.exists() {
        return Err(ExportError::source_unavailable(db_path, "file not found"));
    }

    let src = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| ExportError::source_unavailable(db_path, e))?;

    let tmp = NamedTempFile::new().map_err(|e| {
        ExportError::source_unavailable(db_path, format!("cannot create snapshot file: {e}"))
    })?;
    let mut dst = Connection::open(tmp.path())
        .map_err(|e| ExportError::source_unavailable(db_path, e))?;

    {
        let backup = Backup::new(&src, &mut dst)
            .map_err(|e| ExportError::source_unavailable(db_path, e))?;
        backup
            .run_to_completion(1000, Duration::from_millis(5), None)
            .map_err(|e| ExportError::source_unavailable(db_path, format!("snapshot failed: {e}")))?;
    }

    debug!(source = %db_path.display(), snapshot = %tmp.path().display(), "database snapshot taken");
    Ok(tmp)
}

/// Read-only view of a MacWhisper database.
pub struct SessionReader {
    conn: Connection,
    path: PathBuf,
}

impl SessionReader {
    /// Open `path` read-only and verify that the `session` table carries every
    /// column the exporter reads.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_labeled(path, path)
    }

    /// Open a snapshot from [`snapshot_database`]. Errors name the original
    /// source, not the temp file.
    pub fn open_snapshot(snapshot: &NamedTempFile, source: &Path) -> Result<Self> {
        Self::open_labeled(snapshot.path(), source)
    }

    fn open_labeled(db: &Path, label: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ExportError::source_unavailable(label, e))?;

        let reader = Self {
            conn,
            path: label.to_path_buf(),
        };
        reader.check_schema()?;
        Ok(reader)
    }

    fn check_schema(&self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1)")
            .map_err(|e| self.unavailable(e))?;
        let columns: HashSet<String> = stmt
            .query_map([SESSION_TABLE], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect())
            .map_err(|e| self.unavailable(e))?;

        if columns.is_empty() {
            return Err(self.unavailable(format!("table `{SESSION_TABLE}` not found")));
        }

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !columns.contains(*c))
            .collect();
        if !missing.is_empty() {
            return Err(self.unavailable(format!(
                "table `{SESSION_TABLE}` is missing columns: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    fn unavailable(&self, reason: impl ToString) -> ExportError {
        ExportError::source_unavailable(&self.path, reason)
    }

    pub fn count(&self) -> Result<u64> {
        self.conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {SESSION_TABLE}"),
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n.max(0) as u64)
            .map_err(|e| self.unavailable(e))
    }

    pub fn query(&self) -> Result<SessionQuery<'_>> {
        let stmt = self
            .conn
            .prepare(SELECT_SESSIONS)
            .map_err(|e| self.unavailable(e))?;
        Ok(SessionQuery {
            stmt,
            path: &self.path,
        })
    }
}

/// A prepared session query. Iterating it twice re-runs the query.
pub struct SessionQuery<'conn> {
    stmt: Statement<'conn>,
    path: &'conn Path,
}

impl SessionQuery<'_> {
    /// Lazily yield sessions ordered by creation date, then id.
    ///
    /// SQLite failures are `SourceUnavailable` and should end the run; decode
    /// problems in a single row are `RenderError` for that row only.
    pub fn records(&mut self) -> Result<impl Iterator<Item = Result<SessionRecord>> + '_> {
        let path = self.path;
        let rows = self
            .stmt
            .query_map([], SessionRow::from_row)
            .map_err(|e| ExportError::source_unavailable(path, e))?;

        Ok(rows.map(move |row| {
            row.map_err(|e| ExportError::source_unavailable(path, e))
                .and_then(SessionRecord::try_from)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::TempDir;

    const SCHEMA: &str = "CREATE TABLE session (
        id BLOB PRIMARY KEY,
        dateCreated TEXT,
        dateUpdated TEXT,
        userChosenTitle TEXT,
        aiTitle TEXT,
        aiSummaryShort TEXT,
        aiSummary TEXT,
        fullText TEXT,
        playbackDuration REAL,
        detectedLanguage TEXT,
        originalFilename TEXT,
        speakerCount INTEGER
    )";

    fn make_db(dir: &TempDir) -> (PathBuf, Connection) {
        let path = dir.path().join("main.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        (path, conn)
    }

    fn insert(conn: &Connection, id: &[u8], created: &str, title: Option<&str>, text: Option<&str>) {
        conn.execute(
            "INSERT INTO session (id, dateCreated, dateUpdated, userChosenTitle, fullText, playbackDuration, detectedLanguage, originalFilename)
             VALUES (?1, ?2, ?2, ?3, ?4, 754.9, 'en', 'call.m4a')",
            params![id, created, title, text],
        )
        .unwrap();
    }

    fn read_all(path: &Path) -> Vec<Result<SessionRecord>> {
        let reader = SessionReader::open(path).unwrap();
        let mut query = reader.query().unwrap();
        query.records().unwrap().collect()
    }

    #[test]
    fn test_duration_format() {
        assert_eq!(SessionDuration::from_playback(None).to_string(), "00:00:00");
        assert_eq!(SessionDuration::from_playback(Some(-3.0)).to_string(), "00:00:00");
        assert_eq!(SessionDuration::from_playback(Some(f64::NAN)).to_string(), "00:00:00");
        assert_eq!(SessionDuration::from_playback(Some(754.9)).to_string(), "00:12:34");
        assert_eq!(SessionDuration::from_secs(3600 * 27 + 61).to_string(), "27:01:01");
    }

    #[test]
    fn test_title_priority_and_trimming() {
        assert_eq!(
            resolve_title([Some("  "), Some(" AI title "), Some("short"), None]),
            Some("AI title".to_string())
        );
        assert_eq!(
            resolve_title([None, None, None, Some("rec.m4a")]),
            Some("rec.m4a".to_string())
        );
        assert_eq!(resolve_title([None, Some(""), Some("\n"), None]), None);
    }

    #[test]
    fn test_parse_session_date() {
        assert_eq!(
            parse_session_date("2024-01-15 10:30:00.000"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_session_date("2024-1-5"), None);
        assert_eq!(parse_session_date("yesterday at noon"), None);
        assert_eq!(parse_session_date(""), None);
    }

    #[test]
    fn test_reads_rows_in_creation_order() {
        let dir = TempDir::new().unwrap();
        let (path, conn) = make_db(&dir);
        insert(&conn, &[0xBB; 16], "2024-02-01 09:00:00", Some("Later"), Some("  hello  "));
        insert(&conn, &[0xAA; 16], "2024-01-01 09:00:00", None, None);
        drop(conn);

        let records: Vec<SessionRecord> = read_all(&path).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.id, "AA".repeat(16));
        // Falls back to the source filename when no title column is set.
        assert_eq!(first.title.as_deref(), Some("call.m4a"));
        assert_eq!(first.transcript_text, None);
        assert_eq!(first.summary_text, None);
        assert_eq!(first.duration.to_string(), "00:12:34");
        assert_eq!(first.language.as_deref(), Some("en"));

        let second = &records[1];
        assert_eq!(second.title.as_deref(), Some("Later"));
        assert_eq!(second.transcript_text.as_deref(), Some("hello"));
        assert_eq!(second.date, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    }

    #[test]
    fn test_query_is_rerunnable() {
        let dir = TempDir::new().unwrap();
        let (path, conn) = make_db(&dir);
        insert(&conn, &[0x01; 16], "2024-01-01", Some("One"), None);
        drop(conn);

        let reader = SessionReader::open(&path).unwrap();
        assert_eq!(reader.count().unwrap(), 1);
        let mut query = reader.query().unwrap();
        assert_eq!(query.records().unwrap().count(), 1);
        assert_eq!(query.records().unwrap().count(), 1);
    }

    #[test]
    fn test_bad_rows_are_per_record_errors() {
        let dir = TempDir::new().unwrap();
        let (path, conn) = make_db(&dir);
        insert(&conn, &[0x01; 16], "not a date", Some("Broken"), None);
        insert(&conn, &[0x02; 16], "2024-01-02", Some("Fine"), None);
        conn.execute(
            "INSERT INTO session (id, dateCreated, fullText) VALUES (?1, '2024-01-03', CAST(?2 AS TEXT))",
            params![&[0x03u8; 16][..], &[0xFFu8, 0xFE, 0x00][..]],
        )
        .unwrap();
        drop(conn);

        let results = read_all(&path);
        assert_eq!(results.len(), 3);
        let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .all(|e| matches!(e, ExportError::RenderError { .. }))
        );
        assert!(results.iter().any(|r| matches!(r, Ok(s) if s.title.as_deref() == Some("Fine"))));
    }

    #[test]
    fn test_missing_table_or_column_is_source_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE threads (id TEXT)").unwrap();
        drop(conn);
        let err = SessionReader::open(&path).err().unwrap();
        assert!(matches!(err, ExportError::SourceUnavailable { .. }));
        assert!(err.to_string().contains("not found"));

        let path = dir.path().join("old.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE session (id BLOB, dateCreated TEXT, fullText TEXT)")
            .unwrap();
        drop(conn);
        let err = SessionReader::open(&path).err().unwrap();
        assert!(err.to_string().contains("aiSummary"));
    }

    #[test]
    fn test_snapshot_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = snapshot_database(&dir.path().join("nope.sqlite")).unwrap_err();
        assert!(matches!(err, ExportError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_snapshot_copies_rows_and_leaves_source_alone() {
        let dir = TempDir::new().unwrap();
        let (path, conn) = make_db(&dir);
        insert(&conn, &[0x07; 16], "2024-03-03", Some("Kept"), Some("text"));
        drop(conn);
        let before = std::fs::read(&path).unwrap();

        let snapshot = snapshot_database(&path).unwrap();
        let records = read_all(snapshot.path());
        assert_eq!(records.len(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }
}
