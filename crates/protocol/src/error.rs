//! Error types for the protocol crate.

use thiserror::Error;

/// Errors produced while parsing a command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line contained no verb at all.
    #[error("empty command line")]
    Empty,

    /// The verb is not part of the command set.
    #[error("command not implemented: {0}")]
    Unknown(String),

    /// The verb is known but its arguments are malformed.
    ///
    /// The message is safe to echo back to the client verbatim.
    #[error("{0}")]
    Syntax(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ParseError>;
