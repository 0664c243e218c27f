//! Merge engine: consolidate per-item text artifacts into one file per
//! directory.
//!
//! Determinism is the whole point of this stage. Member files are sorted by
//! name with plain byte ordering (locale-independent), contents are trimmed
//! and joined with a double line break, and the output is written in one
//! atomic rename — so re-running the merge over an unchanged directory
//! reproduces byte-identical output. Previously generated merge artifacts
//! are recognised by the suffix in their file stem and never folded into
//! themselves.

use crate::config::OcrConfig;
use crate::error::OcrError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One directory's merge: the members consumed and the artifact produced.
#[derive(Debug, Clone)]
pub struct MergeGroup {
    /// Directory the members live in.
    pub directory: PathBuf,
    /// Member files in merge order (sorted by name, ascending).
    pub member_files: Vec<PathBuf>,
    /// The consolidated artifact.
    pub merged_path: PathBuf,
}

/// Merge every directory under `root` (inclusive) that contains at least one
/// per-item text artifact. Returns one [`MergeGroup`] per merged directory,
/// in directory order.
pub fn merge_tree(root: &Path, config: &OcrConfig) -> Result<Vec<MergeGroup>, OcrError> {
    if !root.is_dir() {
        return Err(OcrError::InputRootNotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut groups = Vec::new();

    // Same explicit-stack walk as discovery: deep trees, deterministic order.
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| OcrError::WalkFailed {
                path: dir.clone(),
                source: e,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        let mut members = Vec::new();
        let mut subdirs = Vec::new();
        for path in entries {
            if path.is_dir() {
                subdirs.push(path);
            } else if is_member(&path, &config.merge_suffix) {
                members.push(path);
            }
        }

        if !members.is_empty() {
            groups.push(merge_directory(&dir, members, config)?);
        }

        for sub in subdirs.into_iter().rev() {
            stack.push(sub);
        }
    }

    info!(groups = groups.len(), "merge complete");
    Ok(groups)
}

/// A mergeable member: a `.txt` file whose stem does not carry the merge
/// suffix (merge artifacts must never re-ingest themselves).
fn is_member(path: &Path, merge_suffix: &str) -> bool {
    let is_txt = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    if !is_txt {
        return false;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| !stem.ends_with(merge_suffix))
        .unwrap_or(false)
}

/// Merge one directory's members (already sorted) into its artifact.
fn merge_directory(
    dir: &Path,
    member_files: Vec<PathBuf>,
    config: &OcrConfig,
) -> Result<MergeGroup, OcrError> {
    let dir_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    let merged_path = dir.join(format!("{dir_name}{}.txt", config.merge_suffix));

    let mut parts = Vec::with_capacity(member_files.len());
    for member in &member_files {
        let content = std::fs::read_to_string(member).map_err(|e| OcrError::WalkFailed {
            path: member.clone(),
            source: e,
        })?;
        // A leading BOM is an encoding detail of the member, not content;
        // the merge artifact carries its own.
        let content = content.strip_prefix('\u{FEFF}').unwrap_or(&content);
        parts.push(content.trim().to_string());
    }
    let body = parts.join("\n\n");

    write_once(&merged_path, &config.encoding.encode(&body))?;
    debug!(
        directory = %dir.display(),
        members = member_files.len(),
        merged = %merged_path.display(),
        "merged directory"
    );

    Ok(MergeGroup {
        directory: dir.to_path_buf(),
        member_files,
        merged_path,
    })
}

/// Single atomic write: temp file in the same directory, then rename.
fn write_once(path: &Path, bytes: &[u8]) -> Result<(), OcrError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| OcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.write_all(bytes).map_err(|e| OcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.persist(path)
        .map_err(|e| OcrError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e.error,
        })?;
    Ok(())
}
