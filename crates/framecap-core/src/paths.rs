//! Path helpers for picking which media file to hand to a stream.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR, MAIN_SEPARATOR_STR};

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Make `path` absolute and drop `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            c => normalized.push(c),
        }
    }
    normalized
}

/// True if `parent` is a strict ancestor of `child`.
///
/// Both paths are compared in normalized absolute form, so trailing
/// separators and `..` segments do not matter. A directory is not its own
/// subfolder.
pub fn is_subfolder(child: &Path, parent: &Path) -> bool {
    let child = normalize(child);
    let parent = normalize(parent);
    child.ancestors().skip(1).any(|ancestor| ancestor == parent.as_path())
}

/// Path of `file` below `root_dir`, with a leading separator (`/sub/file.txt`).
///
/// Returns an empty string when `file` is not under `root_dir`.
pub fn relative_file_path(file: &Path, root_dir: &Path) -> String {
    let file = normalize(file);
    let root = normalize(root_dir);

    match file.strip_prefix(&root) {
        Ok(relative) if !relative.as_os_str().is_empty() => {
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            format!("{MAIN_SEPARATOR}{}", parts.join(MAIN_SEPARATOR_STR))
        }
        _ => String::new(),
    }
}

/// Compile a file name pattern into a case-insensitive regex.
///
/// `*` and `?` are wildcards. A bare extension such as `.jpg` means `*.jpg`,
/// and an empty pattern matches everything.
fn compile_pattern(pattern: &str) -> Result<Regex> {
    let pattern = pattern.trim();
    let pattern = if pattern.is_empty() {
        "*".to_string()
    } else if pattern.starts_with('.') && !pattern.contains(['*', '?']) {
        format!("*{pattern}")
    } else {
        pattern.to_string()
    };

    let mut expr = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr).with_context(|| format!("invalid file pattern: {pattern}"))
}

/// Files in `dir` matching any of `patterns`.
///
/// Results are grouped by pattern in the order given; within one pattern,
/// files come in walk order (sorted by name). A file matching several
/// patterns is listed once, under the first pattern it matched.
pub fn enumerate_files<S: AsRef<str>>(
    dir: &Path,
    patterns: &[S],
    recursive: bool,
) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }

    let matchers = patterns
        .iter()
        .map(|p| compile_pattern(p.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let max_depth = if recursive { usize::MAX } else { 1 };
    let files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(%e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect();

    let mut seen = HashSet::new();
    let mut matched = Vec::new();
    for matcher in &matchers {
        for file in &files {
            let Some(name) = file.file_name() else {
                continue;
            };
            if matcher.is_match(&name.to_string_lossy()) && seen.insert(file.clone()) {
                matched.push(file.clone());
            }
        }
    }

    debug!(
        ?dir,
        patterns = matchers.len(),
        scanned = files.len(),
        matched = matched.len(),
        "enumerated files"
    );
    Ok(matched)
}
