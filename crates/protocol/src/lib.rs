//! # Skiff Protocol Library
//!
//! This crate defines the wire-level vocabulary shared by the Skiff daemon
//! and its clients.
//!
//! ## Overview
//!
//! Skiff speaks a line-oriented, FTP-inspired command protocol over a single
//! TCP connection. There is no separate data channel: file bytes travel on
//! the control connection, framed by a size announced in the preceding
//! reply line. This crate provides:
//!
//! - **Command Parsing**: one input line to one [`Command`] variant
//! - **Reply Codes**: the reduced set of 3-digit status codes the server emits
//! - **Parse Errors**: unknown verbs vs. malformed arguments, mapped by the
//!   server to `502` and `501` respectively
//!
//! ## Wire format
//!
//! ```text
//! client → server:   <VERB> [arg ...]  CRLF
//! server → client:   <3-digit code> <text>  CRLF      (one or more lines)
//!
//! RETR framing:      150 <size> CRLF, then exactly <size> raw bytes, then 226
//! STOR framing:      150 ... CRLF, then the client sends exactly the
//!                    byte count it declared in the STOR line
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Command, Reply, ReplyCode};
//!
//! let cmd = Command::parse("STOR report.txt 11").unwrap();
//! assert_eq!(cmd, Command::Stor { name: "report.txt".into(), size: 11 });
//!
//! let reply = Reply::new(ReplyCode::TransferStarting, "Ready to receive.");
//! assert_eq!(reply.to_line(), "150 Ready to receive.\r\n");
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Command enum and line parser
//! - [`reply`]: Reply codes and line formatting
//! - [`error`]: Parse error types

pub mod command;
pub mod error;
pub mod reply;

pub use command::Command;
pub use error::{ParseError, Result};
pub use reply::{Reply, ReplyCode};

/// The port the daemon listens on when none is configured.
pub const DEFAULT_PORT: u16 = 2121;
