//! # macwhisper-export
//!
//! A CLI tool that exports [MacWhisper](https://goodsnooze.gumroad.com/l/macwhisper)
//! transcription sessions to local Markdown files.
//!
//! ## What it does
//!
//! MacWhisper stores its transcription history in a SQLite database
//! (`main.sqlite`). This tool reads the `session` table from a private snapshot
//! of that database and writes each session as a standalone Markdown note with
//! YAML frontmatter (date, duration, language, source file, session id),
//! followed by the AI summary and the full transcript when they exist.
//!
//! The database is opened **read-only**. Your data is never modified.
//!
//! ## Incremental export
//!
//! A small state file (`.export_state.json`) records a content fingerprint and
//! the note name for every exported session. On repeated runs, sessions whose
//! fingerprint is unchanged are skipped; changed ones are re-rendered in place,
//! and a retitled session moves to its new file name instead of leaving a
//! duplicate behind.
//!
//! ## Usage
//!
//! ```sh
//! # Export into ./output using the default MacWhisper database location
//! macwhisper-export
//!
//! # Export into an Obsidian vault with an explicit database
//! macwhisper-export ~/vault/MacWhisper --db ~/backups/main.sqlite
//! ```
//!
//! Preferences can be persisted in `~/.config/macwhisper-export/config.toml`
//! (`db_path`, `output_dir`, `state_file`).

pub mod config;
pub mod diff;
pub mod error;
pub mod importer;
pub mod logging;
pub mod process;
pub mod renderer;
pub mod state;
pub mod utils;
pub mod writer;

pub use config::ExportConfig;
pub use error::ExportError;
pub use process::{RunSummary, run};
