//! Server replies.
//!
//! Every server response line is `<3-digit code> <text>` followed by CRLF.
//! The codes mirror FTP conventions but the set is reduced to what the
//! protocol actually uses.

use std::fmt;

/// The 3-digit status codes the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ReplyCode {
    /// Ready to transfer; for downloads the text is the byte count.
    TransferStarting = 150,
    /// Greeting sent when a connection is accepted.
    ServiceReady = 220,
    /// Goodbye, sent in response to QUIT.
    Goodbye = 221,
    /// Transfer or listing completed successfully.
    TransferComplete = 226,
    /// Login successful.
    LoggedIn = 230,
    /// Simple success (CWD, DELE).
    FileActionOk = 250,
    /// PWD result; the text is the quoted path.
    PathCreated = 257,
    /// Username accepted, password required.
    NeedPassword = 331,
    /// Transfer aborted (incomplete upload).
    TransferAborted = 426,
    /// Syntax error in arguments.
    SyntaxError = 501,
    /// Command not implemented.
    NotImplemented = 502,
    /// Command out of sequence (e.g. PASS before USER).
    BadSequence = 503,
    /// Not logged in, or credentials rejected.
    NotLoggedIn = 530,
    /// Requested action failed (permissions, missing file, bad path).
    ActionFailed = 550,
}

impl ReplyCode {
    /// The numeric wire value.
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// One reply line, ready to be written to the control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    pub text: String,
}

impl Reply {
    /// Build a reply from a code and its human-readable text.
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Render the CRLF-terminated wire form.
    pub fn to_line(&self) -> String {
        format!("{} {}\r\n", self.code.code(), self.text)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code.code(), self.text)
    }
}
