//! # ghost-export
//!
//! Exports the posts of a [Ghost](https://ghost.org) blog to Markdown files with front matter,
//! ready to be dropped into a static-site generator.
//!
//! ## What it does
//!
//! Ghost keeps its posts in a SQLite database at `content/data/ghost.db` inside the
//! installation. This crate reads that database (read-only, optionally from a snapshot),
//! selects posts by publication state, and writes each one to
//! `<destination>/<prefix><slug>/index.md`, where the prefix is `draft-` for drafts and the
//! publish date (`yyyy-mm-dd-`) for everything else.
//!
//! Each file starts with a front matter block:
//!
//! ```text
//! ---
//! title: "Hello world"
//! date: 2021-03-05
//! layout: post
//! tags: rust, ghost
//! description: "First line of the post, as plain text"
//! ---
//! ```
//!
//! followed by the post's Markdown body, unchanged.
//!
//! ## Usage
//!
//! ```no_run
//! use ghost_export::{ExportRequest, export_all};
//!
//! let request = ExportRequest::new("/var/www/ghost", "site/content/posts");
//! let summary = export_all(&request, |err, count| match err {
//!     Some(err) => eprintln!("{err}"),
//!     None => println!("{count} posts"),
//! })?;
//! assert!(summary.is_clean());
//! # Ok::<(), ghost_export::ExportError>(())
//! ```
//!
//! A failure on one post (unreadable row, tag lookup, write) is reported through the callback
//! and the export moves on; the final `(None, count)` call happens after every post is done.
mod error;
pub mod exporter;
pub mod importer;
pub mod parallel;
#[cfg(feature = "sequential")]
pub mod sequential;
mod utils;

pub use error::{ExportError, PostError};
pub use importer::{Post, PostId, PostStatus, StatusFilter, Timestamp};
pub use utils::{ExportRequest, ExportSummary, Validated, backup_database, validate};

#[cfg(not(feature = "sequential"))]
pub use parallel::export_all;
#[cfg(feature = "sequential")]
pub use sequential::export_all;
