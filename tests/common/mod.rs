//! A MacWhisper-shaped database for integration tests.

#![allow(dead_code)]

use macwhisper_export::ExportConfig;
use macwhisper_export::renderer::parse_frontmatter;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};

const SCHEMA: &str = "CREATE TABLE session (
    id BLOB PRIMARY KEY NOT NULL,
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
    isFavorite INTEGER NOT NULL DEFAULT 0
)";

pub struct Session {
    pub id: [u8; 16],
    pub created: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub duration: Option<f64>,
    pub language: Option<String>,
    pub filename: Option<String>,
}

/// Session `n`: created on day `n` of January 2024, with summary and transcript.
pub fn session(n: u8) -> Session {
    Session {
        id: [n; 16],
        created: format!("2024-01-{:02} 09:30:00.000", n.clamp(1, 28)),
        title: Some(format!("Meeting {n}")),
        summary: Some(format!("Summary of meeting {n}.")),
        transcript: Some(format!("Transcript of meeting {n}.")),
        duration: Some(60.0 * f64::from(n) + 5.5),
        language: Some("en".to_string()),
        filename: Some(format!("meeting-{n}.m4a")),
    }
}

/// Upper-case hex id, as exported.
pub fn hex_id(n: u8) -> String {
    format!("{n:02X}").repeat(16)
}

pub struct SourceDb {
    pub path: PathBuf,
}

impl SourceDb {
    pub fn create(dir: &Path) -> Self {
        let path = dir.join("main.sqlite");
        Connection::open(&path).unwrap().execute_batch(SCHEMA).unwrap();
        Self { path }
    }

    pub fn with_sessions(dir: &Path, range: std::ops::RangeInclusive<u8>) -> Self {
        let db = Self::create(dir);
        for n in range {
            db.insert(&session(n));
        }
        db
    }

    fn conn(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }

    pub fn insert(&self, s: &Session) {
        self.conn()
            .execute(
                "INSERT INTO session (id, dateCreated, dateUpdated, userChosenTitle, aiSummary, fullText,
                                      playbackDuration, detectedLanguage, originalFilename)
                 VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    &s.id[..],
                    s.created,
                    s.title,
                    s.summary,
                    s.transcript,
                    s.duration,
                    s.language,
                    s.filename
                ],
            )
            .unwrap();
    }

    pub fn set(&self, n: u8, column: &str, value: Option<&str>) {
        self.conn()
            .execute(
                &format!("UPDATE session SET {column} = ?1, dateUpdated = '2025-01-01' WHERE id = ?2"),
                params![value, &[n; 16][..]],
            )
            .unwrap();
    }

    pub fn touch(&self, n: u8) {
        self.conn()
            .execute(
                "UPDATE session SET dateUpdated = '2099-12-31 23:59:59', isFavorite = 1 WHERE id = ?1",
                params![&[n; 16][..]],
            )
            .unwrap();
    }

    pub fn delete(&self, n: u8) {
        self.conn()
            .execute("DELETE FROM session WHERE id = ?1", params![&[n; 16][..]])
            .unwrap();
    }
}

pub fn config(dir: &Path, db: &SourceDb) -> ExportConfig {
    ExportConfig {
        db_path: db.path.clone(),
        output_dir: dir.join("notes"),
        state_file: dir.join(".export_state.json"),
        force: false,
        progress: false,
    }
}

/// All notes in the output directory, sorted by name, with their contents.
pub fn notes(dir: &Path) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
        .filter(|(name, path)| name.ends_with(".md") && path.is_file())
        .map(|(name, path)| (name, fs::read_to_string(path).unwrap()))
        .collect();
    out.sort();
    out
}

pub fn note_for(dir: &Path, n: u8) -> (String, String) {
    let id = hex_id(n);
    notes(dir)
        .into_iter()
        .find(|(_, body)| parse_frontmatter(body).is_some_and(|fm| fm.macwhisper_id == id))
        .unwrap_or_else(|| panic!("no note for session {n}"))
}
