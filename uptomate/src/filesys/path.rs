//! Lexical path normalization

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// A relative path that would resolve outside of its base directory
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("path '{0}' escapes its base directory")]
pub struct PathEscape(pub String);

/// Normalize `rel` without touching the filesystem.
///
/// `.` segments are dropped and `..` segments pop the previous segment.
/// Absolute paths and any `..` that would climb above the base are rejected.
/// Symlinks are not resolved.
pub fn normalize_relative(rel: &Path) -> Result<PathBuf, PathEscape> {
    let escape = || PathEscape(rel.display().to_string());
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in rel.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return Err(escape()),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop().ok_or_else(escape)?;
            }
            Component::Normal(part) => parts.push(part),
        }
    }

    Ok(parts.iter().collect())
}

/// Slash-separated form of a relative path
pub fn slash_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
