use ghost_export::{ExportError, ExportRequest, PostError, PostId, export_all};
use rusqlite::Connection;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const SCHEMA: &str = "
    CREATE TABLE posts (
        id TEXT PRIMARY KEY, uuid TEXT, title TEXT NOT NULL, slug TEXT NOT NULL,
        markdown TEXT, html TEXT, status TEXT NOT NULL, meta_description TEXT,
        published_at DATETIME
    );
    CREATE TABLE tags (id TEXT PRIMARY KEY, name TEXT);
    CREATE TABLE posts_tags (id TEXT PRIMARY KEY, post_id TEXT, tag_id TEXT, sort_order INTEGER);
";

const FIXTURE: &str = r#"
    INSERT INTO posts (id, title, slug, markdown, status, meta_description, published_at) VALUES
        ('p1', 'He said "hi"', 'hello', 'Hello **world**
rest of the post', 'published', NULL, '2021-03-05 10:00:00'),
        ('p2', 'Work in progress', 'wip', 'Not *done* yet', 'draft', NULL, NULL),
        ('p3', 'Summary', 'summary', 'Body text', 'published', 'Meta "desc"', '2020-12-31 23:00:00');
    INSERT INTO tags VALUES ('t1', 'a'), ('t2', 'b');
    INSERT INTO posts_tags VALUES ('x1', 'p1', 't1', 0), ('x2', 'p1', 't2', 1), ('x3', 'p2', 't2', 0);
"#;

struct Ghost {
    root: TempDir,
}

impl Ghost {
    fn new(sql: &str) -> Self {
        Ghost::with_schema(SCHEMA, sql)
    }

    fn with_schema(schema: &str, sql: &str) -> Self {
        let root = TempDir::new().unwrap();
        let data = root.path().join("content/data");
        fs::create_dir_all(&data).unwrap();
        let conn = Connection::open(data.join("ghost.db")).unwrap();
        conn.execute_batch(schema).unwrap();
        conn.execute_batch(sql).unwrap();
        Ghost { root }
    }

    fn source(&self) -> &Path {
        self.root.path()
    }

    fn dest(&self) -> PathBuf {
        self.root.path().join("out")
    }

    fn request(&self) -> ExportRequest {
        ExportRequest::new(self.source(), self.dest())
    }

    fn read(&self, dir: &str) -> String {
        fs::read_to_string(self.dest().join(dir).join("index.md")).unwrap()
    }

    fn exported_dirs(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dest())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Callback arguments recorded as `Err(message)` / `Ok(count)`.
#[derive(Default)]
struct Events(Mutex<Vec<Result<usize, String>>>);

impl Events {
    fn record(&self, err: Option<&ExportError>, count: usize) {
        let event = match err {
            Some(e) => {
                assert_eq!(count, 0);
                Err(e.to_string())
            }
            None => Ok(count),
        };
        self.0.lock().unwrap().push(event);
    }

    fn take(self) -> Vec<Result<usize, String>> {
        self.0.into_inner().unwrap()
    }
}

#[test]
fn exports_published_posts_by_default() {
    let ghost = Ghost::new(FIXTURE);
    let events = Events::default();
    let summary = export_all(&ghost.request(), |e, n| events.record(e, n)).unwrap();

    assert_eq!(summary.processed, 2);
    assert!(summary.is_clean());
    assert_eq!(ghost.exported_dirs(), vec!["2020-12-31-summary", "2021-03-05-hello"]);
    assert_eq!(events.take(), vec![Ok(2)]);

    assert_eq!(
        ghost.read("2021-03-05-hello"),
        "---\n\
         title: \"He said \\\"hi\\\"\"\n\
         date: 2021-03-05\n\
         layout: post\n\
         tags: a, b\n\
         description: \"Hello world\"\n\
         ---\n\
         Hello **world**\nrest of the post"
    );
    assert_eq!(
        ghost.read("2020-12-31-summary"),
        "---\n\
         title: \"Summary\"\n\
         date: 2020-12-31\n\
         layout: post\n\
         tags: \n\
         description: \"Meta \\\"desc\\\"\"\n\
         ---\n\
         Body text"
    );
}

#[test]
fn drafts_only() {
    let ghost = Ghost::new(FIXTURE);
    let request = ExportRequest {
        published: false,
        drafts: true,
        ..ghost.request()
    };
    let summary = export_all(&request, |_, _| {}).unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(ghost.exported_dirs(), vec!["draft-wip"]);
    let content = ghost.read("draft-wip");
    assert!(!content.contains("date:"));
    assert!(content.contains("tags: b\n"));
    assert!(content.contains("description: \"Not done yet\"\n"));
    assert!(content.ends_with("---\nNot *done* yet"));
}

#[test]
fn both_or_neither_flag_exports_everything() {
    for (published, drafts) in [(true, true), (false, false)] {
        let ghost = Ghost::new(FIXTURE);
        let request = ExportRequest {
            published,
            drafts,
            ..ghost.request()
        };
        let summary = export_all(&request, |_, _| {}).unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(
            ghost.exported_dirs(),
            vec!["2020-12-31-summary", "2021-03-05-hello", "draft-wip"]
        );
    }
}

#[test]
fn second_run_produces_identical_files() {
    let ghost = Ghost::new(FIXTURE);
    let request = ExportRequest {
        drafts: true,
        ..ghost.request()
    };
    export_all(&request, |_, _| {}).unwrap();
    let first: Vec<String> = ghost.exported_dirs().iter().map(|d| ghost.read(d)).collect();
    export_all(&request, |_, _| {}).unwrap();
    let second: Vec<String> = ghost.exported_dirs().iter().map(|d| ghost.read(d)).collect();
    assert_eq!(first, second);
}

#[test]
fn broken_tag_lookup_does_not_stop_siblings() {
    // A NULL tag name cannot be read as text, so only p1's lookup fails.
    let ghost = Ghost::new(&format!(
        "{FIXTURE}
         INSERT INTO tags VALUES ('t3', NULL);
         INSERT INTO posts_tags VALUES ('x4', 'p1', 't3', 2);"
    ));
    let events = Events::default();
    let request = ExportRequest {
        jobs: NonZeroUsize::new(2),
        ..ghost.request()
    };
    let summary = export_all(&request, |e, n| events.record(e, n)).unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.written, vec![ghost.dest().join("2020-12-31-summary")]);
    assert_eq!(ghost.exported_dirs(), vec!["2020-12-31-summary"]);

    let events = events.take();
    assert_eq!(events.len(), 2);
    let message = events[0].as_ref().unwrap_err();
    assert!(message.starts_with("Post p1:"), "{message}");
    assert!(message.contains("tags"), "{message}");
    assert_eq!(events[1], Ok(2));
}

#[test]
fn unreadable_row_and_failed_write_do_not_stop_siblings() {
    // Same as SCHEMA but with a nullable title, so a row can fail to decode.
    let schema = SCHEMA.replace("title TEXT NOT NULL", "title TEXT");
    let ghost = Ghost::with_schema(
        &schema,
        "INSERT INTO posts (id, title, slug, markdown, status) VALUES
            ('a', 'Blocked', 'blocked', 'x', 'draft'),
            ('b', NULL, 'untitled', 'x', 'draft'),
            ('c', 'Fine', 'ok', 'Body', 'draft');",
    );
    // A plain file where post a's directory should go makes its write fail.
    fs::create_dir(ghost.dest()).unwrap();
    fs::write(ghost.dest().join("draft-blocked"), "not a directory").unwrap();

    let events = Events::default();
    let request = ExportRequest {
        published: false,
        drafts: true,
        ..ghost.request()
    };
    let summary = export_all(&request, |e, n| events.record(e, n)).unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.written, vec![ghost.dest().join("draft-ok")]);
    assert!(ghost.read("draft-ok").ends_with("---\nBody"));

    let mut events = events.take();
    assert_eq!(events.pop(), Some(Ok(3)));
    let mut errors: Vec<String> = events.into_iter().map(|e| e.unwrap_err()).collect();
    errors.sort();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("Post a: failed to create directory"), "{}", errors[0]);
    assert!(errors[1].starts_with("Post b: failed to read column"), "{}", errors[1]);
}

#[test]
fn undated_published_post_is_reported_with_its_id() {
    let ghost = Ghost::new(&format!(
        "{FIXTURE}
         INSERT INTO posts (id, title, slug, markdown, status, published_at)
         VALUES ('p4', 'Undated', 'undated', 'x', 'published', NULL);"
    ));
    let errors = Mutex::new(Vec::new());
    let summary = export_all(&ghost.request(), |e, _| {
        if let Some(ExportError::Post { post_id, source }) = e {
            let missing = matches!(source, PostError::MissingPublishDate);
            errors.lock().unwrap().push((post_id.clone(), missing));
        }
    })
    .unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.written.len(), 2);
    assert_eq!(errors.into_inner().unwrap(), vec![(PostId::Text("p4".into()), true)]);
}

#[test]
fn completion_fires_after_every_write() {
    let mut sql = String::from(FIXTURE);
    for i in 0..50 {
        sql.push_str(&format!(
            "INSERT INTO posts (id, title, slug, markdown, status, published_at)
             VALUES ('n{i}', 'Post {i}', 'post-{i}', 'Body {i}', 'published', '2022-01-01');"
        ));
    }
    let ghost = Ghost::new(&sql);
    let dest = ghost.dest();
    let seen_at_completion = Mutex::new(None);
    let request = ExportRequest {
        jobs: NonZeroUsize::new(4),
        ..ghost.request()
    };
    export_all(&request, |e, n| {
        if e.is_none() {
            let on_disk = fs::read_dir(&dest).unwrap().count();
            *seen_at_completion.lock().unwrap() = Some((n, on_disk));
        }
    })
    .unwrap();
    assert_eq!(seen_at_completion.into_inner().unwrap(), Some((52, 52)));
}

#[test]
fn missing_source_is_fatal() {
    let events = Events::default();
    let request = ExportRequest {
        destination: Some("unused".into()),
        ..Default::default()
    };
    let err = export_all(&request, |e, n| events.record(e, n)).unwrap_err();
    assert!(matches!(err, ExportError::MissingSource));
    assert!(err.is_fatal());
    assert_eq!(events.take(), vec![Err("No source Ghost app specified".into())]);
}

#[test]
fn missing_destination_is_fatal() {
    let ghost = Ghost::new(FIXTURE);
    let request = ExportRequest {
        destination: None,
        ..ghost.request()
    };
    let err = export_all(&request, |_, _| {}).unwrap_err();
    assert!(matches!(err, ExportError::MissingDestination));
}

#[test]
fn missing_database_is_fatal() {
    let root = TempDir::new().unwrap();
    let out = root.path().join("out");
    let events = Events::default();
    let err = export_all(&ExportRequest::new(root.path(), &out), |e, n| events.record(e, n))
        .unwrap_err();
    assert!(matches!(err, ExportError::Database { .. }));
    assert_eq!(events.take().len(), 1);
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn exports_from_snapshot() {
    let ghost = Ghost::new(FIXTURE);
    let request = ExportRequest {
        snapshot: true,
        ..ghost.request()
    };
    let summary = export_all(&request, |_, _| {}).unwrap();
    assert_eq!(summary.written.len(), 2);
}

#[test]
fn legacy_integer_ids_and_millisecond_dates() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("content/data");
    fs::create_dir_all(&data).unwrap();
    let conn = Connection::open(data.join("ghost.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT, slug TEXT, markdown TEXT,
                             status TEXT, meta_description TEXT, published_at INTEGER);
         CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE posts_tags (id INTEGER PRIMARY KEY, post_id INTEGER, tag_id INTEGER);
         INSERT INTO posts VALUES (1, 'Old', 'old', '<p>Legacy</p> post', 'published', NULL,
                                   1614938400000);
         INSERT INTO tags VALUES (1, 'archive');
         INSERT INTO posts_tags VALUES (1, 1, 1);",
    )
    .unwrap();
    drop(conn);

    let out = root.path().join("out");
    export_all(&ExportRequest::new(root.path(), &out), |_, _| {}).unwrap();
    let content = fs::read_to_string(out.join("2021-03-05-old/index.md")).unwrap();
    assert!(content.contains("tags: archive\n"));
    assert!(content.contains("description: \"Legacy post\"\n"));
}
