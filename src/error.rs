use std::path::PathBuf;

use thiserror::Error;

use crate::importer::PostId;

/// Errors reported by an export run.
///
/// `Row` and `Post` describe a single post and are reported without
/// interrupting the rest of the export. Every other variant ends the run.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No source Ghost app specified")]
    MissingSource,

    #[error("Source app does not exist: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("No destination directory specified")]
    MissingDestination,

    #[error("Failed to create destination directory {}: {source}", .path.display())]
    CreateDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open database {}: {source}", .path.display())]
    Database {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to snapshot database ({context}): {source}")]
    Snapshot {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to query posts: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("Failed to decode post row: {0}")]
    Row(#[source] rusqlite::Error),

    #[error("Post {post_id}: {source}")]
    Post {
        post_id: PostId,
        #[source]
        source: PostError,
    },
}

impl ExportError {
    /// Whether this error ended the run, as opposed to failing a single post.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExportError::Row(_) | ExportError::Post { .. })
    }

    /// The id of the post this error belongs to, if any.
    pub fn post_id(&self) -> Option<&PostId> {
        match self {
            ExportError::Post { post_id, .. } => Some(post_id),
            _ => None,
        }
    }
}

/// Failure while exporting one post.
#[derive(Debug, Error)]
pub enum PostError {
    #[error("failed to read column: {0}")]
    Row(#[source] rusqlite::Error),

    #[error("failed to look up tags: {0}")]
    Tags(#[source] rusqlite::Error),

    #[error("published post has no publish date")]
    MissingPublishDate,

    #[error("unrecognized publish date {0:?}")]
    InvalidPublishDate(String),

    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PostError {
    pub(crate) fn for_post(self, post_id: &PostId) -> ExportError {
        ExportError::Post {
            post_id: post_id.clone(),
            source: self,
        }
    }
}
