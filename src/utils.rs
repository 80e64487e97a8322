use crate::error::ExportError;
use crate::importer::{DB_SUB_PATH, StatusFilter};
use rusqlite::{Connection, OpenFlags, backup::Backup};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

/// Parameters of one export run.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Root of the Ghost installation.
    pub source: Option<PathBuf>,
    /// Directory receiving one sub-directory per post.
    pub destination: Option<PathBuf>,
    pub published: bool,
    pub drafts: bool,
    /// Worker threads; defaults to the available parallelism.
    pub jobs: Option<NonZeroUsize>,
    /// Read from a private copy of the database instead of the live file.
    pub snapshot: bool,
}

impl Default for ExportRequest {
    fn default() -> Self {
        ExportRequest {
            source: None,
            destination: None,
            published: true,
            drafts: false,
            jobs: None,
            snapshot: false,
        }
    }
}

impl ExportRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        ExportRequest {
            source: Some(source.into()),
            destination: Some(destination.into()),
            ..Default::default()
        }
    }

    pub fn filter(&self) -> StatusFilter {
        StatusFilter::from_flags(self.published, self.drafts)
    }

    pub fn workers(&self) -> usize {
        self.jobs
            .or_else(|| std::thread::available_parallelism().ok())
            .map(NonZeroUsize::get)
            .unwrap_or(4)
    }
}

/// Outcome of a completed export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Rows streamed from the post table, failed ones included.
    pub processed: usize,
    /// Post directories written, sorted.
    pub written: Vec<PathBuf>,
    /// Per-post failures reported during the run.
    pub failed: usize,
}

impl ExportSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Forwards per-post failures to the caller's callback and counts them.
pub(crate) struct Tally<'a, F> {
    callback: &'a F,
    failed: AtomicUsize,
}

impl<'a, F> Tally<'a, F>
where
    F: Fn(Option<&ExportError>, usize),
{
    pub(crate) fn new(callback: &'a F) -> Self {
        Tally {
            callback,
            failed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail(&self, err: ExportError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        match err.post_id() {
            Some(post_id) => warn!(%post_id, "{}", err),
            None => warn!("{}", err),
        }
        (self.callback)(Some(&err), 0);
    }

    pub(crate) fn finish(self, processed: usize, mut written: Vec<PathBuf>) -> ExportSummary {
        written.sort();
        let summary = ExportSummary {
            processed,
            written,
            failed: self.failed.into_inner(),
        };
        info!(
            processed = summary.processed,
            written = summary.written.len(),
            failed = summary.failed,
            "export finished"
        );
        (self.callback)(None, summary.processed);
        summary
    }
}

/// Run `body`, reporting a fatal error through `callback` with a zero count.
pub(crate) fn report_fatal<F, T>(
    callback: &F,
    body: impl FnOnce() -> Result<T, ExportError>,
) -> Result<T, ExportError>
where
    F: Fn(Option<&ExportError>, usize),
{
    body().inspect_err(|err| {
        error!("{}", err);
        callback(Some(err), 0);
    })
}

/// Paths of a request that passed validation.
#[derive(Debug, Clone)]
pub struct Validated {
    pub db_path: PathBuf,
    pub destination: PathBuf,
}

/// Check the request before any work starts. Creates the destination
/// directory (not its parents) when it does not exist yet.
pub fn validate(request: &ExportRequest) -> Result<Validated, ExportError> {
    let source = non_empty(request.source.as_deref()).ok_or(ExportError::MissingSource)?;
    if !source.exists() {
        return Err(ExportError::SourceNotFound(source.to_path_buf()));
    }
    let destination =
        non_empty(request.destination.as_deref()).ok_or(ExportError::MissingDestination)?;

    if !destination.exists() {
        fs::create_dir(destination).map_err(|source| ExportError::CreateDestination {
            path: destination.to_path_buf(),
            source,
        })?;
        debug!(destination = %destination.display(), "created destination directory");
    }

    Ok(Validated {
        db_path: source.join(DB_SUB_PATH),
        destination: destination.to_path_buf(),
    })
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Open the database read-only.
pub fn open_db(path: &Path) -> Result<Connection, ExportError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|source| ExportError::Database {
        path: path.to_path_buf(),
        source,
    })
}

/// The database an export reads from: the live file, or a snapshot of it
/// that is deleted when this value is dropped.
pub struct Database {
    path: PathBuf,
    _snapshot: Option<NamedTempFile>,
}

impl Database {
    pub fn prepare(db_path: &Path, snapshot: bool) -> Result<Self, ExportError> {
        if !snapshot {
            return Ok(Database {
                path: db_path.to_path_buf(),
                _snapshot: None,
            });
        }
        let tmp = backup_database(db_path)?;
        Ok(Database {
            path: tmp.path().to_path_buf(),
            _snapshot: Some(tmp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connect(&self) -> Result<Connection, ExportError> {
        open_db(&self.path)
    }
}

/// Copy the database to a temporary file with SQLite's online backup, so a
/// running Ghost instance is not blocked by the export.
pub fn backup_database(db_path: &Path) -> Result<NamedTempFile, ExportError> {
    let snapshot_err = |context: &'static str| {
        move |e: rusqlite::Error| ExportError::Snapshot {
            context,
            source: Box::new(e),
        }
    };

    let src = open_db(db_path)?;
    let tmp = NamedTempFile::new().map_err(|e| ExportError::Snapshot {
        context: "creating temporary file",
        source: Box::new(e),
    })?;
    let mut dst = Connection::open(tmp.path()).map_err(snapshot_err("opening snapshot"))?;

    {
        let backup = Backup::new(&src, &mut dst).map_err(snapshot_err("initializing backup"))?;
        backup
            .run_to_completion(1000, Duration::from_millis(5), None)
            .map_err(snapshot_err("copying pages"))?;
    }

    debug!(
        source = %db_path.display(),
        snapshot = %tmp.path().display(),
        "database snapshot taken"
    );
    Ok(tmp)
}
