use crate::error::{ExportError, Result};
use crate::importer::SessionRecord;
use chrono::NaiveDate;
use serde::Deserialize;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// Bumped whenever the note layout changes, so every session is re-rendered.
pub const RENDER_VERSION: u32 = 1;

const FRONTMATTER_FENCE: &str = "---";
const MAX_FRONTMATTER_BYTES: usize = 8192;

/// The metadata block at the top of every note.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Frontmatter {
    pub date: NaiveDate,
    pub duration: String,
    pub language: Option<String>,
    pub source: Option<String>,
    pub macwhisper_id: String,
}

/// Render a session to a complete markdown note.
pub fn render_session(record: &SessionRecord) -> Result<String> {
    let mut buf = Vec::new();
    write_session_markdown(&mut buf, record).map_err(|e| ExportError::render(&record.id, e))?;
    String::from_utf8(buf).map_err(|e| ExportError::render(&record.id, e))
}

pub fn write_session_markdown<W: Write>(writer: &mut W, record: &SessionRecord) -> io::Result<()> {
    // Keys are written by hand: the order is fixed and `duration` must stay
    // quoted so "00:12:34" is never read back as a sexagesimal number.
    writeln!(writer, "{FRONTMATTER_FENCE}")?;
    writeln!(writer, "date: {}", record.date.format("%Y-%m-%d"))?;
    writeln!(writer, "duration: {}", quoted(&record.duration.to_string()))?;
    write_optional(writer, "language", record.language.as_deref())?;
    write_optional(writer, "source", record.source_filename.as_deref())?;
    writeln!(writer, "macwhisper_id: {}", yaml_scalar(&record.id))?;
    writeln!(writer, "{FRONTMATTER_FENCE}")?;
    writeln!(writer)?;

    write!(writer, "# {}", heading(&record.display_title()))?;
    write_section(writer, "Summary", record.summary_text.as_deref())?;
    write_section(writer, "Transcript", record.transcript_text.as_deref())?;
    writeln!(writer)?;

    Ok(())
}

fn write_optional<W: Write>(writer: &mut W, key: &str, value: Option<&str>) -> io::Result<()> {
    match value {
        Some(v) => writeln!(writer, "{key}: {}", yaml_scalar(v)),
        None => writeln!(writer, "{key}:"),
    }
}

// A present-but-empty body still gets its heading; an absent one gets nothing.
fn write_section<W: Write>(writer: &mut W, name: &str, body: Option<&str>) -> io::Result<()> {
    let Some(body) = body else {
        return Ok(());
    };
    write!(writer, "\n\n## {name}")?;
    if !body.is_empty() {
        write!(writer, "\n\n{body}")?;
    }
    Ok(())
}

/// Headings are single-line.
fn heading(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Emit `value` as a plain YAML scalar when that is unambiguous, otherwise
/// double-quoted.
pub fn yaml_scalar(value: &str) -> Cow<'_, str> {
    if is_plain_safe(value) {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(quoted(value))
    }
}

fn is_plain_safe(value: &str) -> bool {
    let Some(first) = value.chars().next() else {
        return false;
    };
    if !first.is_alphanumeric() || value.ends_with(char::is_whitespace) {
        return false;
    }
    if value.chars().any(|c| {
        c.is_control()
            || matches!(
                c,
                ':' | '#'
                    | '\''
                    | '"'
                    | '\\'
                    | '{'
                    | '}'
                    | '['
                    | ']'
                    | ','
                    | '&'
                    | '*'
                    | '!'
                    | '|'
                    | '>'
                    | '%'
                    | '@'
                    | '`'
                    | '\u{2028}'
                    | '\u{2029}'
                    | '\u{feff}'
            )
    }) {
        return false;
    }
    !looks_like_non_string(value)
}

/// Values a YAML parser would resolve to a bool, null or number.
fn looks_like_non_string(value: &str) -> bool {
    const RESERVED: &[&str] = &[
        "true", "false", "yes", "no", "on", "off", "y", "n", "null", "nan", "inf", "infinity",
    ];
    let lower = value.to_ascii_lowercase();
    RESERVED.contains(&lower.as_str())
        || value.parse::<f64>().is_ok()
        || ["0x", "0o", "0b"].iter().any(|p| lower.starts_with(p))
        || value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '_' | '+' | '-' | '.'))
}

fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() || matches!(c, '\u{2028}' | '\u{2029}' | '\u{feff}') => {
                out.push_str(&format!("\\u{:04X}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Parse the frontmatter block at the top of a rendered note.
pub fn parse_frontmatter(text: &str) -> Option<Frontmatter> {
    let rest = text.strip_prefix("---\n")?;
    let end = if rest.starts_with("---") {
        0
    } else {
        rest.find("\n---")? + 1
    };
    serde_yaml::from_str(&rest[..end]).ok()
}

/// The `macwhisper_id` of an existing note, read without loading the body.
///
/// Notes from older exporters wrote values unescaped, so their frontmatter is
/// not always valid YAML (`source: [Zoom] call.m4a`). For those the id line is
/// scanned for directly.
pub fn read_note_id(path: &Path) -> Option<String> {
    let block = read_frontmatter_block(path)?;
    if let Ok(fm) = serde_yaml::from_str::<Frontmatter>(&block) {
        return Some(fm.macwhisper_id);
    }
    block
        .lines()
        .find_map(|line| line.strip_prefix("macwhisper_id:"))
        .map(|rest| rest.trim().trim_matches('\'').trim_matches('"').to_string())
        .filter(|id| !id.is_empty())
}

fn read_frontmatter_block(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let first = lines.next()?.ok()?;
    if first.trim() != FRONTMATTER_FENCE {
        return None;
    }

    let mut block = String::new();
    for line in lines {
        let line = line.ok()?;
        if line.trim() == FRONTMATTER_FENCE {
            return Some(block);
        }
        block.push_str(&line);
        block.push('\n');
        if block.len() > MAX_FRONTMATTER_BYTES {
            return None;
        }
    }
    None
}
