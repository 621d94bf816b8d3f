//! Scope-relative path resolution.
//!
//! Every path a client sends is relative to its account's scope root. These
//! helpers join such paths lexically and refuse anything that would leave the
//! root, so a `..` in a request or in an archive entry name can never reach
//! the rest of the filesystem.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::error::ErrorClass;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path '{0}' escapes its scope")]
    Escape(String),
}

impl PathError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Security
    }
}

/// Join `relative` onto `root`, rejecting any result outside of `root`.
///
/// Leading slashes are ignored so `"/docs"` and `"docs"` resolve the same way.
///
/// # Example
/// ```
/// use folderhost_core::scope::resolve_within;
/// use std::path::Path;
///
/// let root = Path::new("/srv/folder");
/// assert_eq!(
///     resolve_within(root, "/docs/../notes.txt").unwrap(),
///     Path::new("/srv/folder/notes.txt")
/// );
/// assert!(resolve_within(root, "../etc/passwd").is_err());
/// ```
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(PathError::Escape(relative.to_string()));
                }
            }
            Component::CurDir | Component::RootDir => {}
            Component::Prefix(_) => return Err(PathError::Escape(relative.to_string())),
        }
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(parts);
    Ok(resolved)
}

/// Lexically check that `path` stays inside `root`.
pub fn is_within(root: &Path, path: &Path) -> bool {
    match (normalize(root), normalize(path)) {
        (Some(root), Some(path)) => path.starts_with(root),
        _ => false,
    }
}

fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Render an absolute path the way clients see it: relative to the scope root
/// and prefixed with `./`.
pub fn display_path(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rest) if rest.as_os_str().is_empty() => "./".to_string(),
        Ok(rest) => format!("./{}", rest.to_string_lossy().replace('\\', "/")),
        Err(_) => path.to_string_lossy().replace('\\', "/"),
    }
}

/// Display path of the directory containing `path`.
pub fn parent_display_path(root: &Path, path: &Path) -> String {
    match path.parent() {
        Some(parent) if path != root => display_path(root, parent),
        _ => "./".to_string(),
    }
}
