//! Filesystem access for sessions.
//!
//! This module provides the two pieces every file-touching command goes
//! through:
//! - Path resolution sandboxed to the user's home directory
//! - Per-file locks serializing concurrent transfers of the same file
//!
//! # Security
//!
//! All client-supplied paths are canonicalized and checked against the
//! session's home directory before any filesystem access. Traversal via
//! `..` and escapes via symlinks are both rejected.

pub mod locks;
pub mod sandbox;

pub use locks::LockRegistry;
pub use sandbox::{Sandbox, SandboxError};
