use clap::Parser;
use eyre::{Context, Result, eyre};
use ghost_export::{ExportRequest, export_all};
use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Export a Ghost blog's posts to Markdown files with front matter.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root directory of the Ghost installation (contains content/data/ghost.db).
    #[arg(value_name = "SOURCE")]
    source: Option<PathBuf>,

    /// Directory to write one <prefix><slug>/index.md per post into.
    #[arg(value_name = "DESTINATION")]
    destination: Option<PathBuf>,

    /// Include draft posts.
    #[arg(long, overrides_with = "no_drafts")]
    drafts: bool,

    /// Leave drafts out, even if the config file includes them.
    #[arg(long, overrides_with = "drafts")]
    no_drafts: bool,

    /// Include published posts, even if the config file excludes them.
    #[arg(long, overrides_with = "no_published")]
    published: bool,

    /// Exclude published posts. Without --drafts this exports every post.
    #[arg(long, overrides_with = "published")]
    no_published: bool,

    /// Number of worker threads. Defaults to the number of CPUs.
    #[arg(short, long, value_name = "N")]
    jobs: Option<NonZeroUsize>,

    /// Read from a temporary copy of the database instead of the live file.
    #[arg(long, overrides_with = "no_snapshot")]
    snapshot: bool,

    /// Read the live database file, even if the config file asks for a snapshot.
    #[arg(long, overrides_with = "snapshot")]
    no_snapshot: bool,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/ghost-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log each post written.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
    published: Option<bool>,
    drafts: Option<bool>,
    jobs: Option<NonZeroUsize>,
    snapshot: Option<bool>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("ghost-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "ghost_export=debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Collapse an `--x` / `--no-x` pair; `None` when neither was given.
fn flag(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn build_request(cli: Cli, file_cfg: FileConfig) -> ExportRequest {
    // CLI > Config > Default
    let defaults = ExportRequest::default();
    ExportRequest {
        source: cli.source.or(file_cfg.source),
        destination: cli.destination.or(file_cfg.destination),
        published: flag(cli.published, cli.no_published)
            .or(file_cfg.published)
            .unwrap_or(defaults.published),
        drafts: flag(cli.drafts, cli.no_drafts)
            .or(file_cfg.drafts)
            .unwrap_or(defaults.drafts),
        jobs: cli.jobs.or(file_cfg.jobs),
        snapshot: flag(cli.snapshot, cli.no_snapshot)
            .or(file_cfg.snapshot)
            .unwrap_or(defaults.snapshot),
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let file_cfg = load_file_config(cli.config.as_deref())?;
    let request = build_request(cli, file_cfg);

    // Failures are logged by the library as they are reported.
    let Ok(summary) = export_all(&request, |_, _| {}) else {
        return Ok(ExitCode::FAILURE);
    };

    if summary.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "Exported {} of {} posts; {} failed.",
            summary.written.len(),
            summary.processed,
            summary.failed
        );
        Ok(ExitCode::FAILURE)
    }
}
