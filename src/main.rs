use clap::Parser;
use eyre::{Context, Result};
use macwhisper_export::config::{self, PathConfig};
use macwhisper_export::logging::{self, Verbosity};
use std::path::PathBuf;

/// Export MacWhisper transcription sessions to Markdown notes.
/// Unchanged sessions are skipped on repeated runs.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to export markdown files.
    /// Defaults to ./output if not set in config.
    #[arg(value_name = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Path to the MacWhisper SQLite DB (main.sqlite).
    /// Defaults to MacWhisper's Application Support location.
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Where to keep the incremental export state.
    /// Defaults to ./.export_state.json
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/macwhisper-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Re-render every previously exported session, even if unchanged.
    #[arg(short, long)]
    force: bool,

    /// Log each file written or skipped.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress the progress bar and warnings.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    // CLI > config file > defaults
    let file_cfg = config::load_file_config(cli.config.as_deref())?;
    let cli_cfg = PathConfig {
        db_path: cli.db,
        output_dir: cli.output_dir,
        state_file: cli.state_file,
    };
    // Per-file log lines and a progress bar would fight over stderr.
    let progress = !cli.quiet && !cli.verbose;
    let config = cli_cfg.or(file_cfg).into_export_config(cli.force, progress);

    let summary = macwhisper_export::run(&config).wrap_err("Export failed")?;
    println!("{summary}");
    Ok(())
}
