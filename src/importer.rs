//! Read side of the export: the subset of Ghost's SQLite schema we consume.
//!
//! Tables read:
//! ```sql
//! CREATE TABLE posts (
//!     id               INTEGER|TEXT PRIMARY KEY,  -- INTEGER before Ghost 1.0, object id after
//!     title            TEXT NOT NULL,
//!     slug             TEXT NOT NULL,
//!     markdown         TEXT,
//!     status           TEXT NOT NULL,             -- "draft" | "published" | "scheduled" ...
//!     meta_description TEXT,
//!     published_at     DATETIME                   -- epoch millis (old) or "YYYY-MM-DD HH:MM:SS"
//!     -- ...
//! );
//! CREATE TABLE tags       (id, name TEXT NOT NULL, ...);
//! CREATE TABLE posts_tags (id, post_id, tag_id, ...);
//! ```
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Row, ToSql};

use crate::error::{ExportError, PostError};

/// Location of the database inside a Ghost installation.
pub const DB_SUB_PATH: &str = "content/data/ghost.db";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Primary key of a post. Older Ghost versions use integers, newer ones a
/// 24-character hex object id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PostId {
    Int(i64),
    Text(String),
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostId::Int(id) => write!(f, "{}", id),
            PostId::Text(id) => f.write_str(id),
        }
    }
}

impl FromSql for PostId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(id) => Ok(PostId::Int(id)),
            ValueRef::Text(_) => String::column_result(value).map(PostId::Text),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl ToSql for PostId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            PostId::Int(id) => ToSqlOutput::from(*id),
            PostId::Text(id) => ToSqlOutput::from(id.as_str()),
        })
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostStatus {
    Draft,
    Published,
    Other(String),
}

impl PostStatus {
    pub fn is_draft(&self) -> bool {
        matches!(self, PostStatus::Draft)
    }
}

impl From<&str> for PostStatus {
    fn from(s: &str) -> Self {
        match s {
            "draft" => PostStatus::Draft,
            "published" => PostStatus::Published,
            other => PostStatus::Other(other.to_string()),
        }
    }
}

impl FromSql for PostStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(PostStatus::from)
    }
}

/// Which posts an export selects, derived from the `published` / `drafts`
/// request flags.
///
/// Only the two "exactly one flag set" combinations filter anything; both
/// set and both cleared select every post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    PublishedOnly,
    DraftsOnly,
    All,
}

impl StatusFilter {
    pub fn from_flags(published: bool, drafts: bool) -> Self {
        match (published, drafts) {
            (true, false) => StatusFilter::PublishedOnly,
            (false, true) => StatusFilter::DraftsOnly,
            _ => StatusFilter::All,
        }
    }

    /// SQL predicate appended to the post query, including its leading space.
    pub fn where_clause(self) -> &'static str {
        match self {
            StatusFilter::PublishedOnly => " WHERE status IS NOT 'draft'",
            StatusFilter::DraftsOnly => " WHERE status IS 'draft'",
            StatusFilter::All => "",
        }
    }

    pub fn select_sql(self) -> String {
        format!(
            "SELECT id, slug, status, published_at, title, markdown, meta_description FROM posts{}",
            self.where_clause()
        )
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// `published_at` as stored. Ghost 0.x wrote epoch milliseconds, later
/// versions write SQL datetime text.
#[derive(Debug, Clone, PartialEq)]
pub enum Timestamp {
    Millis(i64),
    Text(String),
}

impl Timestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            Timestamp::Text(s) => parse_datetime_text(s.trim()),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Millis(ms) => write!(f, "{}", ms),
            Timestamp::Text(s) => f.write_str(s),
        }
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(ms) => Ok(Timestamp::Millis(ms)),
            ValueRef::Real(ms) => Ok(Timestamp::Millis(ms as i64)),
            ValueRef::Text(_) => String::column_result(value).map(Timestamp::Text),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

fn parse_datetime_text(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    // Millis that ended up in a TEXT column
    s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

/// One row of the `posts` table, read once and never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub slug: String,
    pub status: PostStatus,
    pub published_at: Option<Timestamp>,
    pub markdown: String,
    pub meta_description: Option<String>,
}

impl Post {
    fn from_row(id: PostId, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Post {
            id,
            title: row.get("title")?,
            slug: row.get("slug")?,
            status: row.get("status")?,
            published_at: row.get("published_at")?,
            markdown: row.get::<_, Option<String>>("markdown")?.unwrap_or_default(),
            meta_description: row.get("meta_description")?,
        })
    }

    /// Calendar date of publication, in UTC.
    pub fn publish_date(&self) -> Result<NaiveDate, PostError> {
        let raw = self
            .published_at
            .as_ref()
            .ok_or(PostError::MissingPublishDate)?;
        raw.to_datetime()
            .map(|dt| dt.date_naive())
            .ok_or_else(|| PostError::InvalidPublishDate(raw.to_string()))
    }
}

/// Stream every post selected by `filter`, in the database's native order.
///
/// `handle` receives each decoded post, or the error for a row that could not
/// be decoded; such rows do not stop the stream. Returns the number of rows
/// seen. An error from the row cursor itself ends the stream.
pub fn for_each_post<F>(
    conn: &Connection,
    filter: StatusFilter,
    mut handle: F,
) -> Result<usize, ExportError>
where
    F: FnMut(Result<Post, ExportError>),
{
    let mut stmt = conn
        .prepare(&filter.select_sql())
        .map_err(ExportError::Query)?;
    let mut rows = stmt.query([]).map_err(ExportError::Query)?;

    let mut count = 0usize;
    while let Some(row) = rows.next().map_err(ExportError::Query)? {
        count += 1;
        let decoded = match row.get::<_, PostId>("id") {
            Ok(id) => Post::from_row(id.clone(), row)
                .map_err(|e| PostError::Row(e).for_post(&id)),
            Err(e) => Err(ExportError::Row(e)),
        };
        handle(decoded);
    }
    Ok(count)
}

/// Names of the tags attached to `post_id`, in query order.
pub fn post_tags(conn: &Connection, post_id: &PostId) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT tags.name FROM posts_tags \
         JOIN tags ON posts_tags.tag_id = tags.id \
         WHERE posts_tags.post_id = ?1",
    )?;
    stmt.query_map([post_id], |row| row.get::<_, String>(0))?
        .collect()
}
