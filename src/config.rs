use crate::utils::expand_tilde;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DB_PATH: &str = "~/Library/Application Support/MacWhisper/Database/main.sqlite";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_STATE_FILE: &str = ".export_state.json";

/// Everything the export run needs.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub state_file: PathBuf,
    /// Re-render sessions even when their fingerprint is unchanged.
    pub force: bool,
    /// Draw a progress bar on stderr.
    pub progress: bool,
}

/// The three recognized settings. Used for both the config file and the CLI
/// flags, which are layered with [`PathConfig::or`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathConfig {
    pub db_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
}

impl PathConfig {
    /// Fill unset values from `lower`.
    pub fn or(self, lower: PathConfig) -> PathConfig {
        PathConfig {
            db_path: self.db_path.or(lower.db_path),
            output_dir: self.output_dir.or(lower.output_dir),
            state_file: self.state_file.or(lower.state_file),
        }
    }

    /// Apply defaults and tilde expansion.
    pub fn into_export_config(self, force: bool, progress: bool) -> ExportConfig {
        let resolve = |value: Option<PathBuf>, default: &str| {
            expand_tilde(&value.unwrap_or_else(|| PathBuf::from(default)))
        };
        ExportConfig {
            db_path: resolve(self.db_path, DEFAULT_DB_PATH),
            output_dir: resolve(self.output_dir, DEFAULT_OUTPUT_DIR),
            state_file: resolve(self.state_file, DEFAULT_STATE_FILE),
            force,
            progress,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("macwhisper-export/config.toml"))
}

/// Load the config file: an explicit path must exist; otherwise the default
/// location is used when present, and no file at all means no overrides.
pub fn load_file_config(explicit_path: Option<&Path>) -> Result<PathConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        default_config_path().filter(|p| p.exists())
    };

    match path {
        None => Ok(PathConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}
