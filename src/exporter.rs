use crate::error::{ExportError, PostError};
use crate::importer::{Post, post_tags};
use pulldown_cmark::{Event, Options, Parser};
use regex::Regex;
use rusqlite::Connection;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// File written inside each post directory.
pub const INDEX_FILE: &str = "index.md";

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex is valid"));

/// Directory name for a post: `draft-<slug>` for drafts, otherwise
/// `<yyyy-mm-dd>-<slug>` from the stored publish date.
///
/// The slug is used as-is. Two posts mapping to the same name overwrite each other.
pub fn post_dir_name(post: &Post) -> Result<String, PostError> {
    let prefix = if post.status.is_draft() {
        "draft-".to_string()
    } else {
        post.publish_date()?.format("%Y-%m-%d-").to_string()
    };
    Ok(format!("{}{}", prefix, post.slug))
}

/// Build the front matter block for `post`, closing `---` line included.
pub fn build_header(post: &Post, tags: &[String]) -> Result<String, PostError> {
    let date = if post.status.is_draft() {
        String::new()
    } else {
        format!("date: {}\n", post.publish_date()?.format("%Y-%m-%d"))
    };
    let description = description(post)
        .map(|d| format!("description: \"{}\"\n", escape_quoted(&d)))
        .unwrap_or_default();

    Ok(format!(
        "---\ntitle: \"{}\"\n{}layout: post\ntags: {}\n{}---\n",
        escape_quoted(&post.title),
        date,
        tags.join(", "),
        description
    ))
}

/// The post's description: `meta_description` when set, otherwise derived
/// from the first line of the body. `None` when it has fewer than two characters.
pub fn description(post: &Post) -> Option<String> {
    let text = match post.meta_description.as_deref() {
        Some(meta) if !meta.trim().is_empty() => meta.to_string(),
        _ => derive_description(&post.markdown),
    };
    (text.chars().count() > 1).then_some(text)
}

/// Plain text of the first line of a Markdown body, whitespace collapsed.
pub fn derive_description(markdown: &str) -> String {
    let first_line = markdown.split('\n').next().unwrap_or_default();
    let plain = strip_markdown(first_line.trim_end_matches('\r'));
    plain.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop Markdown syntax, keeping text and inline code. Tags are removed from
/// raw HTML only, so a literal `<` in prose survives.
fn strip_markdown(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for event in Parser::new_ext(source, Options::ENABLE_STRIKETHROUGH) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::Html(html) | Event::InlineHtml(html) => out.push_str(&strip_html(&html)),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            _ => {}
        }
    }
    out
}

fn strip_html(source: &str) -> String {
    HTML_TAG.replace_all(source, "").into_owned()
}

/// Escape a value for a double-quoted YAML scalar.
pub fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Create `dir` (and its parents) and write `header` followed by `body` to
/// its `index.md`, replacing any previous file.
pub fn write_post(dir: &Path, header: &str, body: &str) -> Result<PathBuf, PostError> {
    fs::create_dir_all(dir).map_err(|source| PostError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(INDEX_FILE);
    let write_err = |source| PostError::Write {
        path: path.clone(),
        source,
    };
    let file = File::create(&path).map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(header.as_bytes()).map_err(write_err)?;
    writer.write_all(body.as_bytes()).map_err(write_err)?;
    writer.flush().map_err(write_err)?;
    Ok(path)
}

/// Export a single post: name its directory, resolve its tags, build the
/// front matter and write `index.md`. Returns the directory written.
pub fn export_post(
    conn: &Connection,
    destination: &Path,
    post: &Post,
) -> Result<PathBuf, ExportError> {
    let name = post_dir_name(post).map_err(|e| e.for_post(&post.id))?;
    let tags =
        post_tags(conn, &post.id).map_err(|e| PostError::Tags(e).for_post(&post.id))?;
    let header = build_header(post, &tags).map_err(|e| e.for_post(&post.id))?;

    let dir = destination.join(&name);
    write_post(&dir, &header, &post.markdown).map_err(|e| e.for_post(&post.id))?;
    debug!(post_id = %post.id, dir = %dir.display(), tags = tags.len(), "exported post");
    Ok(dir)
}
