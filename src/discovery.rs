//! File discovery for fan-out steps
//!
//! A pattern is a regex anchored at the start of the candidate path. How far
//! below `root` candidates are collected depends on how many `/`-separated
//! segments the pattern has:
//!
//! - one segment: immediate entries of `root`
//! - two segments: entries of directories whose name matches the first segment
//! - three or more: every file below `root`

use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid regex '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Compile `pattern` anchored at the start, the way every candidate is matched
pub fn compile(pattern: &str) -> Result<Regex, DiscoveryError> {
    Regex::new(&format!("^(?:{})", pattern)).map_err(|source| DiscoveryError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Discover files under `root` matching `pattern`.
///
/// Returns absolute paths in sorted order, or `None` when nothing matched.
pub fn discover(pattern: &str, root: &Path) -> Result<Option<Vec<PathBuf>>, DiscoveryError> {
    let regex = compile(pattern)?;
    let root = root.canonicalize().map_err(|source| DiscoveryError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let segments: Vec<&str> = pattern.split('/').collect();
    let candidates = match segments.len() {
        1 => list_names(&root)?,
        2 => {
            let dir_regex = compile(segments[0])?;
            let mut files = Vec::new();
            for dir in list_names(&root)? {
                if !dir_regex.is_match(&dir) || !root.join(&dir).is_dir() {
                    continue;
                }
                for name in list_names(&root.join(&dir))? {
                    files.push(format!("{}/{}", dir, name));
                }
            }
            files
        }
        _ => walk_files(&root)?,
    };

    let mut matched: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|candidate| regex.is_match(candidate))
        .map(|candidate| root.join(candidate))
        .collect();
    matched.sort();

    Ok(if matched.is_empty() { None } else { Some(matched) })
}

fn list_names(dir: &Path) -> Result<Vec<String>, DiscoveryError> {
    let io_err = |source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

fn walk_files(root: &Path) -> Result<Vec<String>, DiscoveryError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| DiscoveryError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_string_lossy().into_owned());
        }
    }
    Ok(files)
}
