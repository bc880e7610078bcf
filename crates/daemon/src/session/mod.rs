//! Session management module.
//!
//! One session per accepted connection: the authentication state machine,
//! the command dispatcher, and the in-band file transfer I/O.

pub mod handler;

pub use handler::{Session, SessionOptions};
