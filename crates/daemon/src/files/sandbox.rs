//! Per-user filesystem sandbox.
//!
//! Every path a client supplies is resolved against a base directory
//! (the session's working directory, or home for directory changes) and
//! canonicalized before any filesystem access. The result is accepted
//! only if it is the user's home directory or a descendant of it, which
//! blocks both `../..` traversal and symlink escapes.

use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Errors that can occur during path resolution.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The resolved path falls outside the home directory.
    #[error("path escapes the home directory: {0}")]
    Forbidden(PathBuf),

    /// The path does not exist.
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    /// The path ends in a component that cannot name a file.
    #[error("path has no usable file name: {0}")]
    BadFileName(PathBuf),

    /// IO error while canonicalizing.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves client-supplied paths inside one user's home directory.
#[derive(Debug, Clone)]
pub struct Sandbox {
    /// Canonical home directory; the boundary every path is checked against.
    home: PathBuf,
}

impl Sandbox {
    /// Create a sandbox rooted at `home`, which must already exist.
    pub fn new(home: &Path) -> Result<Self, SandboxError> {
        let home = fs::canonicalize(home).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SandboxError::NotFound(home.to_path_buf()),
            _ => SandboxError::Io(e),
        })?;
        Ok(Self { home })
    }

    /// The canonical home directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Resolve a client path that must already exist.
    ///
    /// `base` is joined with `user_path` (an absolute `user_path` replaces
    /// it), canonicalized, and checked against the home boundary.
    pub fn resolve(&self, base: &Path, user_path: &str) -> Result<PathBuf, SandboxError> {
        let joined = base.join(user_path);
        match fs::canonicalize(&joined) {
            Ok(canonical) => self.check_boundary(canonical, joined),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A missing path is reported as such only when it would
                // have landed inside the sandbox; everything else is
                // forbidden, so probing cannot reveal what exists outside.
                let normalized = normalize(&joined)?;
                if normalized.starts_with(&self.home) {
                    Err(SandboxError::NotFound(joined))
                } else {
                    Err(SandboxError::Forbidden(joined))
                }
            }
            Err(e) => Err(SandboxError::Io(e)),
        }
    }

    /// Resolve a client path whose final components may not exist yet.
    ///
    /// Used for uploads: the deepest existing ancestor is canonicalized
    /// (so symlinks cannot smuggle the target outside home) and the
    /// remaining components are appended after lexical `.`/`..`
    /// normalization.
    pub fn resolve_for_creation(
        &self,
        base: &Path,
        user_path: &str,
    ) -> Result<PathBuf, SandboxError> {
        let joined = base.join(user_path);
        let normalized = normalize(&joined)?;

        if normalized.file_name().is_none() {
            return Err(SandboxError::BadFileName(joined));
        }

        let mut existing = normalized.clone();
        let mut pending: Vec<std::ffi::OsString> = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    pending.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => return Err(SandboxError::Forbidden(joined)),
            }
        }

        let mut resolved = fs::canonicalize(&existing)?;
        for name in pending.iter().rev() {
            resolved.push(name);
        }
        self.check_boundary(resolved, joined)
    }

    fn check_boundary(
        &self,
        resolved: PathBuf,
        original: PathBuf,
    ) -> Result<PathBuf, SandboxError> {
        if resolved.starts_with(&self.home) {
            Ok(resolved)
        } else {
            Err(SandboxError::Forbidden(original))
        }
    }
}

/// Lexically remove `.` and `..` components. Popping past the root is an
/// escape attempt and fails outright.
fn normalize(path: &Path) -> Result<PathBuf, SandboxError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(SandboxError::Forbidden(path.to_path_buf()));
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}
