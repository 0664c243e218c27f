//! Work-item discovery: walk the input tree, filter eligible images, and map
//! each to its output location.
//!
//! ## Why an explicit work-list instead of recursion?
//!
//! Scanned archives routinely nest `collection/box/folder/page` many levels
//! deep; an explicit stack walks arbitrarily deep hierarchies in constant
//! stack space. Directories are pushed in reverse-sorted order so popping
//! yields them sorted, and files within a directory are sorted too — the
//! same deterministic order the merge stage later relies on.
//!
//! Validation happens here, before anything enters the retry path: empty
//! files are excluded and reported, oversized files get a warning but are
//! kept (the endpoint may still accept them).

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::output::WorkItem;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The outcome of scanning the input root.
#[derive(Debug)]
pub struct Discovery {
    /// Eligible items in sorted input-path order, after any `limit`.
    pub items: Vec<WorkItem>,
    /// Files excluded by validation, with the reason.
    pub skipped: Vec<SkippedFile>,
}

/// A file excluded at discovery time. Never retried.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Enumerate eligible images under `input_root` and derive each item's
/// output path under `output_root`, preserving the relative directory
/// structure and substituting the `.txt` extension.
pub fn discover(
    input_root: &Path,
    output_root: &Path,
    config: &OcrConfig,
) -> Result<Discovery, OcrError> {
    if !input_root.exists() {
        return Err(OcrError::InputRootNotFound {
            path: input_root.to_path_buf(),
        });
    }
    if !input_root.is_dir() {
        return Err(OcrError::InputRootNotADirectory {
            path: input_root.to_path_buf(),
        });
    }

    let mut items = Vec::new();
    let mut skipped = Vec::new();

    // Depth-first over an explicit stack; reverse-sorted pushes make pops
    // come out in ascending order.
    let mut stack: Vec<PathBuf> = vec![input_root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => OcrError::PermissionDenied {
                    path: dir.clone(),
                },
                _ => OcrError::WalkFailed {
                    path: dir.clone(),
                    source: e,
                },
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        let mut subdirs = Vec::new();
        for path in entries {
            if path.is_dir() {
                subdirs.push(path);
            } else if is_eligible(&path, &config.extensions) {
                match validate(&path, config) {
                    Ok(()) => {
                        let output_path = map_output_path(&path, input_root, output_root);
                        items.push(WorkItem::new(path, output_path));
                    }
                    Err(reason) => {
                        warn!(path = %path.display(), %reason, "skipping file");
                        skipped.push(SkippedFile { path, reason });
                    }
                }
            }
        }
        // Reverse so the lexicographically first subdirectory is popped next.
        for sub in subdirs.into_iter().rev() {
            stack.push(sub);
        }
    }

    if items.is_empty() && skipped.is_empty() {
        return Err(OcrError::NoItemsFound {
            path: input_root.to_path_buf(),
            extensions: config.extensions.join(", "),
        });
    }

    // The stack walk already visits directories in order, but a final sort
    // pins the global ordering regardless of traversal details.
    items.sort_by(|a, b| a.input_path.cmp(&b.input_path));

    if let Some(limit) = config.limit {
        items.truncate(limit);
    }

    debug!(
        items = items.len(),
        skipped = skipped.len(),
        "discovery complete"
    );

    Ok(Discovery { items, skipped })
}

/// Extension filter (case-insensitive, against the configured list).
fn is_eligible(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .map(|e| extensions.iter().any(|allowed| *allowed == e))
        .unwrap_or(false)
}

/// Per-file validation. `Err(reason)` excludes the file from the run.
fn validate(path: &Path, config: &OcrConfig) -> Result<(), String> {
    let meta = std::fs::metadata(path).map_err(|e| format!("unreadable: {e}"))?;
    if meta.len() == 0 {
        return Err("empty file".into());
    }
    if meta.len() > config.max_file_bytes {
        warn!(
            path = %path.display(),
            bytes = meta.len(),
            "file exceeds the configured size guideline; the endpoint may reject it"
        );
    }
    Ok(())
}

/// Substitute the output root and `.txt` extension, keeping the relative
/// directory structure.
fn map_output_path(input: &Path, input_root: &Path, output_root: &Path) -> PathBuf {
    let rel = input.strip_prefix(input_root).unwrap_or(input);
    output_root.join(rel).with_extension("txt")
}
