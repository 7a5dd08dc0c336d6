//! Markdown corpus discovery.
//!
//! Walks a corpus root, yielding path-derived metadata for each markdown
//! file. All path conventions (slugs, sections, fallback titles) live here
//! so the chunking and resume logic never touch them.

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use globset::GlobSet;

use crate::{error::Result, urls};

/// A discovered markdown document, not yet read.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Slug of the repository-relative path; stable document identity.
    pub doc_id: String,
    /// Fallback title derived from the file name. The pipeline prefers a
    /// front-matter title or the first heading when one exists.
    pub title: String,
    /// Leading section path (at most two segments), e.g. "engineering/development".
    pub section: String,
    /// Path relative to the corpus root.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

/// Recursively discover markdown files under `root`, sorted by relative
/// path. Hidden files and directories are skipped, as are relative paths
/// matching `exclude`.
pub fn discover_documents(
    root: &Path,
    exclude: Option<&GlobSet>,
) -> Result<Vec<SourceDocument>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, exclude, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    exclude: Option<&GlobSet>,
    results: &mut Vec<SourceDocument>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), exclude, results)?;
        } else if file_type.is_symlink() {
            let resolved = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            // Skip if the symlink points back into or above the root
            // (cycle prevention).
            if resolved.starts_with(root) && resolved.is_dir() {
                continue;
            }
            if resolved.is_file()
                && is_markdown(&resolved)
                && let Some(doc) =
                    make_document(root, &entry.path(), &resolved, exclude)?
            {
                results.push(doc);
            }
        } else if file_type.is_file() && is_markdown(&entry.path()) {
            let abs = entry.path().canonicalize()?;
            if let Some(doc) = make_document(root, &entry.path(), &abs, exclude)?
            {
                results.push(doc);
            }
        }
    }

    Ok(())
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "md")
}

fn make_document(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
    exclude: Option<&GlobSet>,
) -> Result<Option<SourceDocument>> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    if let Some(set) = exclude
        && set.is_match(&relative_path)
    {
        return Ok(None);
    }

    let mtime = std::fs::metadata(absolute_path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let doc_id = urls::slug(&relative_path);
    let section = derive_section(&relative_path, &doc_id);
    let title = fallback_title(&doc_id);

    Ok(Some(SourceDocument {
        doc_id,
        title,
        section,
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        mtime,
    }))
}

/// Section = leading slug segments, at most two. Index pages belong to the
/// section they introduce; regular pages to their parent directory.
fn derive_section(relative_path: &Path, doc_id: &str) -> String {
    let stem = relative_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let base = if stem == "index" || stem == "_index" {
        doc_id
    } else {
        match doc_id.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => "",
        }
    };
    base.split('/')
        .filter(|s| !s.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join("/")
}

/// Humanize the final slug segment: underscores and hyphens become spaces,
/// each word is capitalized.
fn fallback_title(doc_id: &str) -> String {
    let stem = doc_id.rsplit('/').next().unwrap_or(doc_id);
    let stem = if stem.is_empty() { "Home" } else { stem };
    stem.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + chars.as_str()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract a title from file content: front matter wins, then the first
/// `# ` heading, then the path-derived fallback.
pub fn resolve_title(
    front_matter_title: Option<&str>,
    content: &str,
    fallback: &str,
) -> String {
    if let Some(title) = front_matter_title {
        return title.to_string();
    }
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }
    fallback.to_string()
}
