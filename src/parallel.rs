use crate::error::ExportError;
use crate::exporter::export_post;
use crate::importer::{Post, for_each_post};
use crate::utils::{Database, ExportRequest, ExportSummary, Tally, report_fatal, validate};
use crossbeam_channel::bounded;
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::debug;

/// Export every post selected by `request` to Markdown.
///
/// `callback` receives `(Some(err), 0)` for each failure and `(None, processed)`
/// once all posts have been handled. Pre-flight failures end the run with an
/// `Err`; failures of individual posts are reported and the run continues.
pub fn export_all<F>(request: &ExportRequest, callback: F) -> Result<ExportSummary, ExportError>
where
    F: Fn(Option<&ExportError>, usize) + Sync,
{
    let tally = Tally::new(&callback);
    let (processed, written) = report_fatal(&callback, || run(request, &tally))?;
    Ok(tally.finish(processed, written))
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
    let reader = database.connect()?;

    // One connection per worker, all opened before the first row is read.
    let n_workers = request.workers();
    let connections: Vec<Connection> = (0..n_workers)
        .map(|_| database.connect())
        .collect::<Result<_, _>>()?;
    debug!(workers = n_workers, db = %database.path().display(), "starting export");

    let destination = validated.destination.as_path();
    let (tx, rx) = bounded::<Post>(n_workers * 4);

    std::thread::scope(|s| {
        let workers: Vec<_> = connections
            .into_iter()
            .map(|conn| {
                let rx = rx.clone();
                s.spawn(move || {
                    let mut written = Vec::new();
                    for post in rx.iter() {
                        match export_post(&conn, destination, &post) {
                            Ok(dir) => written.push(dir),
                            Err(e) => tally.fail(e),
                        }
                    }
                    written
                })
            })
            .collect();
        drop(rx);

        let streamed = for_each_post(&reader, request.filter(), |decoded| match decoded {
            Ok(post) => {
                // Receivers only disappear when a worker panicked; joining re-raises it.
                let _ = tx.send(post);
            }
            Err(e) => tally.fail(e),
        });
        drop(tx);

        let mut written = Vec::new();
        for worker in workers {
            match worker.join() {
                Ok(dirs) => written.extend(dirs),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        streamed.map(|processed| (processed, written))
    })
}
