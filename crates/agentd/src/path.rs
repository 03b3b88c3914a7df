//! Path resolution helpers.
//!
//! Used during bootstrap to locate the agentd binary and derive the
//! installation prefix before any privilege is dropped.

use nix::unistd::AccessFlags;
use std::path::Path;
use thiserror::Error;

/// The system default executable search path, appended to `PATH` so
/// resolution still works under a scrubbed environment.
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Path resolution failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// No executable by that name exists on the search path.
    #[error("could not resolve {0} on the search path")]
    NotFound(String),

    /// The input had no usable form.
    #[error("invalid path argument")]
    Invalid,
}

/// Appends the default search path onto `path`.
///
/// An empty `path` yields the default path alone.
pub fn append_default(path: &str) -> String {
    if path.is_empty() {
        DEFAULT_PATH.to_string()
    } else {
        crate::strings::concat_all(&[path, ":", DEFAULT_PATH])
    }
}

/// Resolves `filename` against a colon-separated search `path`.
///
/// A filename already containing a separator is checked directly. Each
/// candidate must exist and be executable by the caller.
pub fn resolve(filename: &str, path: &str) -> Result<String, PathError> {
    if filename.is_empty() {
        return Err(PathError::Invalid);
    }

    if filename.contains('/') {
        if is_executable(filename) {
            return Ok(filename.to_string());
        }
        return Err(PathError::NotFound(filename.to_string()));
    }

    for dir in path.split(':') {
        if dir.is_empty() {
            continue;
        }
        let candidate = crate::strings::concat_all(&[dir, "/", filename]);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(PathError::NotFound(filename.to_string()))
}

/// Returns the directory portion of `filename`.
///
/// A bare name yields `"."`.
pub fn dirname(filename: &str) -> Result<String, PathError> {
    if filename.is_empty() {
        return Err(PathError::Invalid);
    }

    match Path::new(filename).parent() {
        Some(parent) if parent.as_os_str().is_empty() => Ok(".".to_string()),
        Some(parent) => Ok(parent.to_string_lossy().into_owned()),
        // "/" has no parent; its directory is itself.
        None => Ok("/".to_string()),
    }
}

fn is_executable(candidate: &str) -> bool {
    let path = Path::new(candidate);
    path.is_file() && nix::unistd::access(path, AccessFlags::X_OK).is_ok()
}
