use crate::error::ExportError;
use crate::exporter::export_post;
use crate::importer::{StatusFilter, for_each_post};
use crate::utils::{Database, ExportRequest, ExportSummary, Tally, report_fatal, validate};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use std::path::PathBuf;

/// Single-connection variant of [`crate::parallel::export_all`]: each post is
/// written before the next row is read, with a progress bar on stderr.
pub fn export_all<F>(request: &ExportRequest, callback: F) -> Result<ExportSummary, ExportError>
where
    F: Fn(Option<&ExportError>, usize) + Sync,
{
    let tally = Tally::new(&callback);
    let (processed, written) = report_fatal(&callback, || run(request, &tally))?;
    Ok(tally.finish(processed, written))
}

fn count_posts(conn: &Connection, filter: StatusFilter) -> Result<u64, ExportError> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM posts{}", filter.where_clause()),
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n.max(0) as u64)
    .map_err(ExportError::Query)
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let template = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)";
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar
}

fn run<F>(
    request: &ExportRequest,
    tally: &Tally<'_, F>,
) -> Result<(usize, Vec<PathBuf>), ExportError>
where
    F: Fn(Option<&ExportError>, usize) + Sync,
{
    let validated = validate(request)?;
    let database = Database::prepare(&validated.db_path, request.snapshot)?;
    let conn = database.connect()?;
    let filter = request.filter();

    let pb = progress_bar(count_posts(&conn, filter)?);
    let mut written = Vec::new();
    let streamed = for_each_post(&conn, filter, |decoded| {
        match decoded.and_then(|post| export_post(&conn, &validated.destination, &post)) {
            Ok(dir) => written.push(dir),
            Err(e) => pb.suspend(|| tally.fail(e)),
        }
        pb.inc(1);
    });
    pb.finish_and_clear();

    streamed.map(|processed| (processed, written))
}
