//! # Skiff Daemon Library
//!
//! This crate provides the daemon (server) functionality for Skiff, a
//! multi-user file transfer service speaking a line-oriented, FTP-inspired
//! protocol over plain TCP.
//!
//! ## Overview
//!
//! The daemon is the core service. It provides:
//!
//! - **Authentication**: PBKDF2-hashed credentials in a SQLite user store
//! - **Sandboxed Storage**: every session is confined to its user's home
//! - **File Transfer**: uploads and downloads on the control connection,
//!   serialized per file by a lock registry
//! - **Provisioning**: a CLI for creating, removing, and listing users
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Server                              │
//! │              (TCP accept loop, task per client)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │   ┌──────────────┐   one per connection                     │
//! │   │   Session    │   state machine + command dispatch       │
//! │   └──────┬───────┘                                          │
//! │          │                                                  │
//! │   ┌──────┴───────┬───────────────┬─────────────────────┐    │
//! │   │  User Store  │    Sandbox    │    Lock Registry    │    │
//! │   │  (SQLite)    │  (per user)   │     (per file)      │    │
//! │   └──────────────┴───────────────┴─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use daemon::{Config, Server, SessionOptions, UserStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let users = Arc::new(UserStore::open(
//!         &config.storage.db_path,
//!         config.auth.pbkdf2_iterations,
//!     )?);
//!
//!     let server = Server::bind(
//!         config.socket_addr(),
//!         users,
//!         SessionOptions::default(),
//!     )
//!     .await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`auth`]: Password hashing and the user store
//! - [`files`]: Path sandbox and per-file locks
//! - [`session`]: Per-connection state machine and handlers
//! - [`server`]: TCP acceptor

pub mod auth;
pub mod config;
pub mod files;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export auth types for convenience
pub use auth::{Permissions, UserRecord, UserStore};

// Re-export files types for convenience
pub use files::{LockRegistry, Sandbox, SandboxError};

// Re-export session types for convenience
pub use session::{Session, SessionOptions};

// Re-export server type for convenience
pub use server::Server;
